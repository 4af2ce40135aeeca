/// Database row types — these map directly to SQLite rows.
/// Distinct from recado-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
    pub role: String,
    pub created_at: String,
}

impl UserRow {
    /// Name shown next to messages. Falls back to the login name when the
    /// profile never set one.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

pub struct ConversationRow {
    pub id: String,
    pub kind: String,
    pub name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
    pub last_read_at: Option<String>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub author_id: String,
    pub author_username: String,
    pub author_display_name: Option<String>,
    pub content: String,
    pub attachments: Option<String>,
    pub created_at: String,
}

impl MessageRow {
    pub fn author_name(&self) -> &str {
        self.author_display_name
            .as_deref()
            .unwrap_or(&self.author_username)
    }
}

pub struct DeliveryStateRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub delivered: bool,
    pub delivered_at: Option<String>,
    pub read: bool,
    pub read_at: Option<String>,
}

pub struct NoteRow {
    pub id: String,
    pub author_id: String,
    pub author_username: String,
    pub author_display_name: Option<String>,
    pub title: String,
    pub body: String,
    pub created_at: String,
}

impl NoteRow {
    pub fn author_name(&self) -> &str {
        self.author_display_name
            .as_deref()
            .unwrap_or(&self.author_username)
    }
}

/// Inbox listing row: conversation plus per-caller unread count and a
/// preview of the newest message.
pub struct ConversationSummaryRow {
    pub id: String,
    pub kind: String,
    pub name: Option<String>,
    pub updated_at: String,
    pub unread: u64,
    pub last_message: Option<String>,
}

/// Result of persisting a message: the server-side timestamp and the
/// participant set captured inside the same transaction, so fan-out targets
/// match the delivery rows exactly.
pub struct InsertedMessage {
    pub created_at: String,
    pub participant_ids: Vec<String>,
}
