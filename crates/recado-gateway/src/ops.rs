use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use recado_db::Database;
use recado_types::events::{AckStatus, AuthorInfo, GatewayEvent, MessagePayload};
use recado_types::models::{Attachment, parse_timestamp};

use crate::dispatcher::{Dispatcher, Topic};

/// Hard cap on message text, matching the front end's composer limit.
pub const MAX_MESSAGE_LEN: usize = 4000;

/// Why a gateway operation was refused. Converted into an ack status at the
/// connection boundary; never thrown across it.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("caller is not a participant")]
    Forbidden,
    #[error("conversation or message not found")]
    NotFound,
    #[error("{0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl OpError {
    pub fn status(&self) -> AckStatus {
        match self {
            OpError::Forbidden => AckStatus::Forbidden,
            OpError::NotFound => AckStatus::NotFound,
            OpError::Invalid(_) => AckStatus::BadRequest,
            OpError::Persistence(_) => AckStatus::Error,
        }
    }
}

/// Subscribe the connection to a conversation's broadcast group, after
/// checking the caller actually belongs to it. A refused join leaves the
/// registry untouched.
pub async fn join_conversation(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    conn_id: Uuid,
    conn_tx: &mpsc::UnboundedSender<GatewayEvent>,
    user_id: Uuid,
    conversation_id: Uuid,
) -> Result<(), OpError> {
    let allowed = {
        let db = db.clone();
        tokio::task::spawn_blocking(move || {
            db.is_participant(&conversation_id.to_string(), &user_id.to_string())
        })
        .await
        .map_err(|e| OpError::Persistence(e.into()))??
    };
    if !allowed {
        return Err(OpError::Forbidden);
    }

    dispatcher.subscribe(Topic::Conversation(conversation_id), conn_id, conn_tx.clone());
    Ok(())
}

/// Persist a message and fan it out: once to the conversation's group, and
/// once to every other participant's user group so someone browsing another
/// page still gets the notification. Returns the persisted message with
/// author display fields populated, for the caller's ack.
pub async fn send_message(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    user_id: Uuid,
    conversation_id: Uuid,
    content: String,
    attachments: Vec<Attachment>,
) -> Result<MessagePayload, OpError> {
    if content.trim().is_empty() && attachments.is_empty() {
        return Err(OpError::Invalid("message is empty"));
    }
    if content.chars().count() > MAX_MESSAGE_LEN {
        return Err(OpError::Invalid("message too long"));
    }

    let message_id = Uuid::new_v4();
    let attachments_json = if attachments.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&attachments).map_err(|e| OpError::Persistence(e.into()))?)
    };

    let (author, inserted, content) = {
        let db = db.clone();
        tokio::task::spawn_blocking(move || -> Result<_, OpError> {
            let cid = conversation_id.to_string();
            let uid = user_id.to_string();
            if !db.is_participant(&cid, &uid)? {
                return Err(OpError::Forbidden);
            }
            let author = db.get_user_by_id(&uid)?.ok_or(OpError::Forbidden)?;
            let inserted = db.insert_message(
                &message_id.to_string(),
                &cid,
                &uid,
                &content,
                attachments_json.as_deref(),
            )?;
            Ok((author, inserted, content))
        })
        .await
        .map_err(|e| OpError::Persistence(e.into()))??
    };

    let payload = MessagePayload {
        id: message_id,
        conversation_id,
        author: AuthorInfo {
            id: user_id,
            name: author.display_name().to_string(),
        },
        content,
        attachments,
        created_at: parse_timestamp(&inserted.created_at),
    };

    dispatcher.publish(
        Topic::Conversation(conversation_id),
        &GatewayEvent::Message(payload.clone()),
    );
    for pid in &inserted.participant_ids {
        let Ok(recipient) = Uuid::parse_str(pid) else {
            warn!("Corrupt participant id '{}' in conversation {}", pid, conversation_id);
            continue;
        };
        if recipient == user_id {
            continue;
        }
        dispatcher.publish(
            Topic::User(recipient),
            &GatewayEvent::Message(payload.clone()),
        );
    }

    Ok(payload)
}

/// Idempotently mark one message read for the caller and broadcast a read
/// receipt to the conversation's group. Repeat calls keep the first
/// timestamp; the flag never reverts.
pub async fn mark_read(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    user_id: Uuid,
    conversation_id: Uuid,
    message_id: Uuid,
) -> Result<(), OpError> {
    let read_at = {
        let db = db.clone();
        tokio::task::spawn_blocking(move || -> Result<String, OpError> {
            let cid = conversation_id.to_string();
            let uid = user_id.to_string();
            if !db.is_participant(&cid, &uid)? {
                return Err(OpError::Forbidden);
            }
            let message = db
                .get_message(&message_id.to_string())?
                .ok_or(OpError::NotFound)?;
            if message.conversation_id != cid {
                return Err(OpError::NotFound);
            }
            let (_, read_at) = db.mark_message_read(&message_id.to_string(), &uid)?;
            Ok(read_at)
        })
        .await
        .map_err(|e| OpError::Persistence(e.into()))??
    };

    dispatcher.publish(
        Topic::Conversation(conversation_id),
        &GatewayEvent::MessageRead {
            conversation_id,
            message_id,
            user_id,
            read_at: parse_timestamp(&read_at),
        },
    );
    Ok(())
}

/// Fan out a bulk-read notification after an HTTP reconcile. Same two-level
/// fan-out as messages; the caller treats this as fire-and-forget.
pub fn publish_conversation_read(
    dispatcher: &Dispatcher,
    conversation_id: Uuid,
    user_id: Uuid,
    updated: u64,
    read_at: chrono::DateTime<chrono::Utc>,
    participant_ids: &[Uuid],
) {
    let event = GatewayEvent::ConversationRead {
        conversation_id,
        user_id,
        updated,
        read_at,
    };
    dispatcher.publish(Topic::Conversation(conversation_id), &event);
    for &pid in participant_ids {
        if pid != user_id {
            dispatcher.publish(Topic::User(pid), &event);
        }
    }
}
