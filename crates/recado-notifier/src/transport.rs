use anyhow::{Context, bail};

use recado_types::api::{BridgeTokenResponse, SESSION_COOKIE};

use crate::notifier::TokenSource;

/// Fetches gateway tokens from the token bridge endpoint using the browser
/// session cookie. Tokens are short-lived, so one is requested fresh before
/// every connection attempt rather than cached.
pub struct HttpTokenSource {
    client: reqwest::Client,
    token_url: String,
    session_cookie: String,
}

impl HttpTokenSource {
    pub fn new(base_url: &str, session_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: format!("{}/realtime/token", base_url.trim_end_matches('/')),
            session_cookie: format!("{}={}", SESSION_COOKIE, session_token),
        }
    }
}

impl TokenSource for HttpTokenSource {
    async fn bridge_token(&self) -> anyhow::Result<String> {
        let response = self
            .client
            .get(&self.token_url)
            .header(reqwest::header::COOKIE, &self.session_cookie)
            .send()
            .await
            .context("Token request failed")?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            bail!("Session expired, log in again");
        }
        let body: BridgeTokenResponse = response
            .error_for_status()
            .context("Token request rejected")?
            .json()
            .await
            .context("Malformed token response")?;

        Ok(body.token)
    }
}
