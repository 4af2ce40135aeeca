use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use recado_db::Database;
use recado_types::api::Claims;
use recado_types::events::{AckStatus, AuthErrorCode, GatewayCommand, GatewayEvent, MessagePayload};

use crate::auth::verify_gateway_token;
use crate::dispatcher::{Dispatcher, Topic};
use crate::ops::{self, OpError};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh connection may take to present its bridge token.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for a command still executing when the socket dies, so work
/// that already persisted can finish its fan-out.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle a single WebSocket connection, from Identify handshake to cleanup.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: wait for the Identify command carrying a bridge token
    let claims = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Ok(claims) => claims,
        Err(code) => {
            warn!("WebSocket client failed to identify ({:?}), closing", code);
            let rejected = GatewayEvent::AuthRejected { code };
            let _ = sender
                .send(Message::Text(
                    serde_json::to_string(&rejected).unwrap().into(),
                ))
                .await;
            return;
        }
    };
    let user_id = claims.sub;
    let username = claims.username;

    info!("{} ({}) connected to gateway", username, user_id);

    // Step 2: send Ready
    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // Step 3: register the connection; every connection listens on its own
    // user group for global notifications
    let conn_id = Uuid::new_v4();
    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel();
    dispatcher.subscribe(Topic::User(user_id), conn_id, conn_tx.clone());

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward dispatched events to the client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = conn_rx.recv() => {
                    let event = match event {
                        Some(event) => event,
                        None => break,
                    };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "Heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client. Commands run one at a time per
    // connection; other connections proceed concurrently.
    let dispatcher_recv = dispatcher.clone();
    let username_recv = username.clone();
    let conn_tx_recv = conn_tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &db,
                            &dispatcher_recv,
                            conn_id,
                            &conn_tx_recv,
                            user_id,
                            &username_recv,
                            cmd,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // If the sink dies first, give the command currently executing a moment
    // to finish; anything already past its persistence step still completes
    // and broadcasts.
    tokio::select! {
        _ = &mut send_task => {
            let _ = tokio::time::timeout(DRAIN_TIMEOUT, &mut recv_task).await;
            recv_task.abort();
        }
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.drop_connection(conn_id);
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Result<Claims, AuthErrorCode> {
    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    return verify_gateway_token(jwt_secret, &token);
                }
            }
        }
        Err(AuthErrorCode::AuthRequired)
    });

    match timeout.await {
        Ok(result) => result,
        Err(_) => Err(AuthErrorCode::AuthRequired),
    }
}

async fn handle_command(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    conn_id: Uuid,
    conn_tx: &mpsc::UnboundedSender<GatewayEvent>,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // already handled

        GatewayCommand::JoinConversation {
            seq,
            conversation_id,
        } => {
            match ops::join_conversation(db, dispatcher, conn_id, conn_tx, user_id, conversation_id)
                .await
            {
                Ok(()) => send_ack(conn_tx, seq, AckStatus::Ok, None),
                Err(e) => {
                    let status = log_op_error(&e, username, user_id, "join_conversation");
                    send_ack(conn_tx, seq, status, None);
                }
            }
        }

        GatewayCommand::SendMessage {
            seq,
            conversation_id,
            content,
            attachments,
        } => {
            match ops::send_message(db, dispatcher, user_id, conversation_id, content, attachments)
                .await
            {
                Ok(payload) => send_ack(conn_tx, seq, AckStatus::Ok, Some(payload)),
                Err(e) => {
                    let status = log_op_error(&e, username, user_id, "send_message");
                    send_ack(conn_tx, seq, status, None);
                }
            }
        }

        GatewayCommand::MarkRead {
            seq,
            conversation_id,
            message_id,
        } => {
            match ops::mark_read(db, dispatcher, user_id, conversation_id, message_id).await {
                Ok(()) => send_ack(conn_tx, seq, AckStatus::Ok, None),
                Err(e) => {
                    let status = log_op_error(&e, username, user_id, "mark_read");
                    send_ack(conn_tx, seq, status, None);
                }
            }
        }
    }
}

fn send_ack(
    conn_tx: &mpsc::UnboundedSender<GatewayEvent>,
    seq: u64,
    status: AckStatus,
    message: Option<MessagePayload>,
) {
    let _ = conn_tx.send(GatewayEvent::Ack {
        seq,
        status,
        message,
    });
}

fn log_op_error(e: &OpError, username: &str, user_id: Uuid, op: &str) -> AckStatus {
    match e {
        OpError::Persistence(err) => {
            warn!("{} ({}) {} failed: {:#}", username, user_id, op, err);
        }
        other => {
            info!("{} ({}) {} rejected: {}", username, user_id, op, other);
        }
    }
    e.status()
}
