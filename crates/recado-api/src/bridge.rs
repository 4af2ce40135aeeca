use axum::{Extension, Json, extract::State, http::StatusCode};

use recado_types::api::{BridgeTokenResponse, Claims, TokenScope};

use crate::auth::{AppState, create_token};

/// Gateway tokens are deliberately short-lived. A leaked one expires the
/// same working day instead of living as long as the session cookie.
const GATEWAY_TOKEN_TTL_HOURS: i64 = 8;

/// Exchange the browser session for a gateway handshake token. The realtime
/// client cannot read the HttpOnly cookie, so it calls this endpoint and
/// passes the returned token in its `identify` frame instead.
pub async fn bridge_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<BridgeTokenResponse>, StatusCode> {
    let token = create_token(
        &state.jwt_secret,
        claims.sub,
        &claims.username,
        claims.role,
        TokenScope::Gateway,
        chrono::Duration::hours(GATEWAY_TOKEN_TTL_HOURS),
    )
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(BridgeTokenResponse { token }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recado_gateway::auth::verify_gateway_token;
    use recado_types::models::Role;
    use uuid::Uuid;

    use crate::auth::tests::{seed_user, session_claims, test_state};

    #[tokio::test]
    async fn test_bridge_token_verifies_at_the_gateway() {
        let state = test_state();
        let user_id = seed_user(&state, "amalia", Role::Member);
        let claims = session_claims(&state, user_id, "amalia");

        let Json(body) = bridge_token(State(state.clone()), Extension(claims))
            .await
            .unwrap();

        let verified = verify_gateway_token(&state.jwt_secret, &body.token).unwrap();
        assert_eq!(verified.sub, user_id);
        assert_eq!(verified.username, "amalia");
        assert_eq!(verified.scope, TokenScope::Gateway);
    }

    #[tokio::test]
    async fn test_bridge_token_expires_in_hours_not_days() {
        let state = test_state();
        let claims = session_claims(&state, Uuid::new_v4(), "amalia");

        let Json(body) = bridge_token(State(state.clone()), Extension(claims))
            .await
            .unwrap();

        let verified = verify_gateway_token(&state.jwt_secret, &body.token).unwrap();
        let now = chrono::Utc::now().timestamp() as usize;
        assert!(verified.exp > now + 7 * 3600);
        assert!(verified.exp < now + 9 * 3600);
    }

    #[tokio::test]
    async fn test_session_cookie_itself_is_rejected_by_the_gateway() {
        let state = test_state();
        let user_id = seed_user(&state, "amalia", Role::Member);
        let claims = session_claims(&state, user_id, "amalia");

        let session_token = create_token(
            &state.jwt_secret,
            claims.sub,
            &claims.username,
            claims.role,
            TokenScope::Session,
            chrono::Duration::days(30),
        )
        .unwrap();

        assert!(verify_gateway_token(&state.jwt_secret, &session_token).is_err());
    }
}
