use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Attachment;

/// Events sent over the WebSocket gateway (server → client).
///
/// Wire envelope is `{"type": "...", "data": {...}}`. Payload keys are
/// camelCase; the fields the browser front end already speaks keep their
/// Spanish names (`autor`, `contenido`, `mensajeId`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum GatewayEvent {
    /// Handshake accepted; the connection is bound to this identity.
    Ready { user_id: Uuid, username: String },

    /// Handshake refused; the server closes the connection after sending this.
    AuthRejected { code: AuthErrorCode },

    /// Reply to exactly one client command, matched by `seq`.
    Ack {
        seq: u64,
        status: AckStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<MessagePayload>,
    },

    /// A new message was persisted and fanned out.
    Message(MessagePayload),

    /// A single message was marked read by a participant.
    MessageRead {
        conversation_id: Uuid,
        #[serde(rename = "mensajeId")]
        message_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
    },

    /// A participant bulk-reconciled a conversation as read.
    ConversationRead {
        conversation_id: Uuid,
        user_id: Uuid,
        updated: u64,
        read_at: DateTime<Utc>,
    },
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum GatewayCommand {
    /// First frame on every connection: authenticate with a bridge token.
    Identify { token: String },

    /// Subscribe this connection to a conversation's broadcast group.
    JoinConversation { seq: u64, conversation_id: Uuid },

    /// Persist a message and fan it out to the other participants.
    SendMessage {
        seq: u64,
        conversation_id: Uuid,
        #[serde(rename = "contenido")]
        content: String,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },

    /// Mark one message read for the caller.
    MarkRead {
        seq: u64,
        conversation_id: Uuid,
        #[serde(rename = "mensajeId")]
        message_id: Uuid,
    },
}

/// Command acknowledgement status. Mirrors the HTTP error taxonomy; gateway
/// operations never throw across the connection boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckStatus {
    Ok,
    Forbidden,
    NotFound,
    BadRequest,
    Error,
}

/// Why a handshake was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorCode {
    AuthRequired,
    InvalidToken,
}

/// The full message object fanned out to clients and echoed in send acks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: Uuid,
    pub conversation_id: Uuid,
    #[serde(rename = "autor")]
    pub author: AuthorInfo,
    #[serde(rename = "contenido")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

/// Author display fields embedded in payloads so clients never need a
/// second lookup to render a sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorInfo {
    pub id: Uuid,
    #[serde(rename = "nombre")]
    pub name: String,
}

/// Payload written to the editorial-note SSE feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteCreatedPayload {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "autor")]
    pub author: AuthorInfo,
    pub created_at: DateTime<Utc>,
}
