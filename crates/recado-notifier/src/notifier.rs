use anyhow::{Context, bail};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use recado_types::events::{GatewayCommand, GatewayEvent, MessagePayload};

use crate::backoff::{Backoff, jittered};
use crate::dedup::SeenMessages;

/// Longest message excerpt shown in a notification body.
const PREVIEW_LEN: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// What gets handed to the UI layer. Advisory only: dismissing or losing a
/// notification loses nothing, the conversation view is the source of truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Deep link into the app, e.g. `/conversations/<id>`.
    pub link: String,
}

/// Fetches a fresh gateway token before each connection attempt.
pub trait TokenSource: Send {
    fn bridge_token(&self) -> impl Future<Output = anyhow::Result<String>> + Send;
}

/// Tells the notifier which conversation is on screen right now, if any.
/// Messages for that conversation are already visible and never notify.
pub trait ForegroundWatch: Send {
    fn active_conversation(&self) -> Option<Uuid>;
}

/// UI-side delivery of a finished notification.
pub trait NotificationSink: Send {
    fn notify(&self, notification: Notification);
}

/// Decide whether an incoming message becomes a notification.
///
/// A message skipped for being on screen still counts as seen, so a
/// redelivery after a reconnect stays quiet.
pub fn evaluate(
    me: Uuid,
    active_conversation: Option<Uuid>,
    seen: &mut SeenMessages,
    message: &MessagePayload,
) -> Option<Notification> {
    if message.author.id == me {
        return None;
    }
    if !seen.insert(message.id) {
        return None;
    }
    if active_conversation == Some(message.conversation_id) {
        return None;
    }

    Some(Notification {
        title: message.author.name.clone(),
        body: preview(&message.content),
        link: format!("/conversations/{}", message.conversation_id),
    })
}

fn preview(content: &str) -> String {
    let mut excerpt: String = content.chars().take(PREVIEW_LEN).collect();
    if content.chars().count() > PREVIEW_LEN {
        excerpt.push('…');
    }
    excerpt
}

pub struct NotifierConfig {
    /// Gateway endpoint, e.g. `ws://localhost:8080/gateway`.
    pub ws_url: String,
}

/// Long-running gateway listener that turns incoming messages into UI
/// notifications. Reconnects forever with capped exponential backoff; the
/// current [`ConnectionState`] is observable through a watch channel.
pub struct Notifier<T, F, S> {
    config: NotifierConfig,
    token_source: T,
    foreground: F,
    sink: S,
    state_tx: watch::Sender<ConnectionState>,
    me: Option<Uuid>,
}

impl<T, F, S> Notifier<T, F, S>
where
    T: TokenSource,
    F: ForegroundWatch,
    S: NotificationSink,
{
    pub fn new(config: NotifierConfig, token_source: T, foreground: F, sink: S) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            token_source,
            foreground,
            sink,
            state_tx,
            me: None,
        }
    }

    /// Observe connection state transitions, for a status indicator.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Run until the task is dropped. Every exit from a session, clean or
    /// not, leads back into the reconnect loop.
    pub async fn run(mut self) {
        let mut backoff = Backoff::default();
        let mut seen = SeenMessages::default();
        let mut connected_before = false;

        loop {
            self.set_state(if connected_before {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            });

            match self.run_session(&mut backoff, &mut seen).await {
                Ok(()) => info!("Gateway connection closed"),
                Err(e) => warn!("Gateway connection lost: {:#}", e),
            }
            connected_before = true;

            let delay = jittered(backoff.next_delay());
            debug!("Reconnecting in {:?}", delay);
            self.set_state(ConnectionState::Reconnecting);
            tokio::time::sleep(delay).await;
        }
    }

    async fn run_session(
        &mut self,
        backoff: &mut Backoff,
        seen: &mut SeenMessages,
    ) -> anyhow::Result<()> {
        let token = self
            .token_source
            .bridge_token()
            .await
            .context("Bridge token fetch failed")?;

        let (stream, _) = connect_async(&self.config.ws_url)
            .await
            .context("Gateway connect failed")?;
        let (mut tx, mut rx) = stream.split();

        let identify = serde_json::to_string(&GatewayCommand::Identify { token })?;
        tx.send(Message::Text(identify.into())).await?;

        while let Some(frame) = rx.next().await {
            match frame? {
                Message::Text(text) => {
                    let event: GatewayEvent = match serde_json::from_str(&text) {
                        Ok(event) => event,
                        Err(e) => {
                            debug!("Ignoring unrecognized gateway frame: {}", e);
                            continue;
                        }
                    };
                    self.handle_event(event, backoff, seen)?;
                }
                Message::Ping(payload) => tx.send(Message::Pong(payload)).await?,
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_event(
        &mut self,
        event: GatewayEvent,
        backoff: &mut Backoff,
        seen: &mut SeenMessages,
    ) -> anyhow::Result<()> {
        match event {
            GatewayEvent::Ready { user_id, username } => {
                info!("Connected to gateway as {}", username);
                self.me = Some(user_id);
                backoff.reset();
                self.set_state(ConnectionState::Connected);
            }
            GatewayEvent::AuthRejected { code } => {
                // the next attempt fetches a fresh token
                bail!("Gateway rejected token: {:?}", code);
            }
            GatewayEvent::Message(message) => {
                let Some(me) = self.me else {
                    return Ok(());
                };
                let active = self.foreground.active_conversation();
                if let Some(notification) = evaluate(me, active, seen, &message) {
                    self.sink.notify(notification);
                }
            }
            // acks and read receipts update views, not notifications
            _ => {}
        }
        Ok(())
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}
