use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::AuthorInfo;
use crate::models::{ConversationKind, Role};

/// Name of the browser session cookie, shared by the server that sets it
/// and the notifier client that forwards it.
pub const SESSION_COOKIE: &str = "recado_session";

// -- JWT Claims --

/// JWT claims shared across recado-api (session middleware, token issuance)
/// and recado-gateway (handshake authentication). Canonical definition lives
/// here in recado-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub scope: TokenScope,
    pub exp: usize,
}

/// What a token is good for. A session cookie cannot be replayed at the
/// gateway handshake and a bridge token cannot impersonate a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenScope {
    Session,
    Gateway,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub role: Role,
}

// -- Token bridge --

#[derive(Debug, Serialize, Deserialize)]
pub struct BridgeTokenResponse {
    pub token: String,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub participant_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub participant_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inbox row: one conversation with its unread count and a preview of the
/// latest message for list rendering.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub unread: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageHistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: u32,
    /// Cursor-based pagination: pass the `createdAt` of the oldest message
    /// from the previous page to fetch older messages.
    pub before: Option<String>,
}

fn default_history_limit() -> u32 {
    50
}

// -- Read reconciliation --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ReconcileReadRequest {
    pub conversation_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReconcileReadResponse {
    pub ok: bool,
    pub updated: u64,
}

// -- Notes --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateNoteRequest {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteResponse {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    #[serde(rename = "autor")]
    pub author: AuthorInfo,
    pub created_at: DateTime<Utc>,
}
