use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Access level carried on the session. Roles are provisioned by the HR
/// suite's user administration; registration always starts at `Member`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Editor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Editor => "editor",
            Role::Admin => "admin",
        }
    }

    pub fn from_db(raw: &str) -> Role {
        match raw {
            "member" => Role::Member,
            "editor" => Role::Editor,
            "admin" => Role::Admin,
            other => {
                warn!("Unknown role '{}' in users table, treating as member", other);
                Role::Member
            }
        }
    }

    /// Editorial notes (create + live feed) are restricted to editors.
    pub fn can_manage_notes(&self) -> bool {
        matches!(self, Role::Editor | Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }

    pub fn from_db(raw: &str) -> ConversationKind {
        match raw {
            "group" => ConversationKind::Group,
            "direct" => ConversationKind::Direct,
            other => {
                warn!("Unknown conversation kind '{}', treating as direct", other);
                ConversationKind::Direct
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// A chat thread. `name` is null for direct threads; `updated_at` is bumped
/// on every new message so inbox ordering follows activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership record linking a user to a conversation. Never hard-deleted in
/// normal flow; `last_read_at` tracks the bulk-read position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub last_read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// File metadata attached to a message. The file itself lives wherever the
/// front end uploaded it; the gateway only relays the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Parse a timestamp column. Rows written by this crate carry RFC 3339; rows
/// filled by SQLite's `datetime('now')` default are naive UTC.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}
