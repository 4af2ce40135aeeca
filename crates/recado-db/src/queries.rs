use crate::Database;
use crate::models::{
    ConversationRow, ConversationSummaryRow, DeliveryStateRow, InsertedMessage, MessageRow,
    NoteRow, ParticipantRow, UserRow,
};
use anyhow::{Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        display_name: Option<&str>,
        role: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, display_name, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    username,
                    password_hash,
                    display_name,
                    role,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn get_username_by_id(&self, id: &str) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map_err(|_| anyhow!("User not found: {}", id))
        })
    }

    // -- Conversations --

    pub fn create_conversation(
        &self,
        id: &str,
        kind: &str,
        name: Option<&str>,
        participant_ids: &[String],
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();

            tx.execute(
                "INSERT INTO conversations (id, kind, name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id, kind, name, now],
            )?;
            for user_id in participant_ids {
                tx.execute(
                    "INSERT INTO participants (conversation_id, user_id, created_at)
                     VALUES (?1, ?2, ?3)",
                    params![id, user_id, now],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// Find an existing two-person direct conversation between these users.
    pub fn find_direct_conversation(&self, user_a: &str, user_b: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let id = conn
                .query_row(
                    "SELECT c.id FROM conversations c
                     JOIN participants p1 ON p1.conversation_id = c.id AND p1.user_id = ?1
                     JOIN participants p2 ON p2.conversation_id = c.id AND p2.user_id = ?2
                     WHERE c.kind = 'direct'
                       AND (SELECT COUNT(*) FROM participants p WHERE p.conversation_id = c.id) = 2
                     LIMIT 1",
                    params![user_a, user_b],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id)
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, kind, name, created_at, updated_at FROM conversations WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(ConversationRow {
                            id: row.get(0)?,
                            kind: row.get(1)?,
                            name: row.get(2)?,
                            created_at: row.get(3)?,
                            updated_at: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_participants(&self, conversation_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id FROM participants WHERE conversation_id = ?1")?;
            let rows = stmt
                .query_map([conversation_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<ParticipantRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT conversation_id, user_id, last_read_at, created_at
                     FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
                    params![conversation_id, user_id],
                    |row| {
                        Ok(ParticipantRow {
                            conversation_id: row.get(0)?,
                            user_id: row.get(1)?,
                            last_read_at: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn add_participant(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO participants (conversation_id, user_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![conversation_id, user_id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let hit: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
                    params![conversation_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }

    /// Inbox listing: every conversation the user participates in, newest
    /// activity first, with the caller's unread count and a message preview.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummaryRow>> {
        self.with_conn(|conn| query_conversation_summaries(conn, user_id))
    }

    // -- Messages --

    /// Persist a message plus one delivery row per participant in a single
    /// transaction, bumping the conversation's activity timestamp. The
    /// author's own row starts delivered+read so unread counts never include
    /// own messages.
    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        author_id: &str,
        content: &str,
        attachments_json: Option<&str>,
    ) -> Result<InsertedMessage> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();

            tx.execute(
                "INSERT INTO messages (id, conversation_id, author_id, content, attachments, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, conversation_id, author_id, content, attachments_json, now],
            )?;

            let participant_ids = {
                let mut stmt =
                    tx.prepare("SELECT user_id FROM participants WHERE conversation_id = ?1")?;
                stmt.query_map([conversation_id], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            for user_id in &participant_ids {
                let own = user_id == author_id;
                tx.execute(
                    "INSERT INTO message_delivery_states
                         (id, message_id, user_id, delivered, delivered_at, read, read_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?4, ?5)",
                    params![
                        Uuid::new_v4().to_string(),
                        id,
                        user_id,
                        own,
                        if own { Some(now.as_str()) } else { None }
                    ],
                )?;
            }

            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![now, conversation_id],
            )?;

            tx.commit()?;
            Ok(InsertedMessage {
                created_at: now,
                participant_ids,
            })
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    pub fn get_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, conversation_id, limit, before))
    }

    // -- Delivery / read tracking --

    /// Idempotent single-message read upsert. Returns (newly_read, read_at);
    /// a repeat call reports the timestamp of the first successful one. The
    /// read flag never reverts.
    pub fn mark_message_read(&self, message_id: &str, user_id: &str) -> Result<(bool, String)> {
        self.with_conn_mut(|conn| {
            let now = Utc::now().to_rfc3339();

            let existing: Option<(bool, Option<String>)> = conn
                .query_row(
                    "SELECT read, read_at FROM message_delivery_states
                     WHERE message_id = ?1 AND user_id = ?2",
                    params![message_id, user_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match existing {
                Some((true, read_at)) => Ok((false, read_at.unwrap_or(now))),
                Some((false, _)) => {
                    conn.execute(
                        "UPDATE message_delivery_states
                         SET read = 1, read_at = ?3, delivered = 1,
                             delivered_at = COALESCE(delivered_at, ?3)
                         WHERE message_id = ?1 AND user_id = ?2",
                        params![message_id, user_id, now],
                    )?;
                    Ok((true, now))
                }
                None => {
                    conn.execute(
                        "INSERT INTO message_delivery_states
                             (id, message_id, user_id, delivered, delivered_at, read, read_at)
                         VALUES (?1, ?2, ?3, 1, ?4, 1, ?4)",
                        params![Uuid::new_v4().to_string(), message_id, user_id, now],
                    )?;
                    Ok((true, now))
                }
            }
        })
    }

    /// Bulk-mark every unread message from other authors in a conversation as
    /// delivered+read, backfilling delivery rows that were never created
    /// (participants added after the message existed). Also advances the
    /// participant's read cursor, even when nothing was unread.
    ///
    /// Returns (rows transitioned to read, cursor timestamp).
    pub fn reconcile_conversation_read(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(u64, String)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();

            let updated = tx.execute(
                "UPDATE message_delivery_states
                 SET read = 1, read_at = ?3, delivered = 1,
                     delivered_at = COALESCE(delivered_at, ?3)
                 WHERE user_id = ?2
                   AND read = 0
                   AND message_id IN
                       (SELECT id FROM messages WHERE conversation_id = ?1 AND author_id != ?2)",
                params![conversation_id, user_id, now],
            )?;

            let missing = {
                let mut stmt = tx.prepare(
                    "SELECT m.id FROM messages m
                     WHERE m.conversation_id = ?1 AND m.author_id != ?2
                       AND NOT EXISTS (
                           SELECT 1 FROM message_delivery_states d
                           WHERE d.message_id = m.id AND d.user_id = ?2
                       )",
                )?;
                stmt.query_map(params![conversation_id, user_id], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?
            };
            for message_id in &missing {
                tx.execute(
                    "INSERT OR IGNORE INTO message_delivery_states
                         (id, message_id, user_id, delivered, delivered_at, read, read_at)
                     VALUES (?1, ?2, ?3, 1, ?4, 1, ?4)",
                    params![Uuid::new_v4().to_string(), message_id, user_id, now],
                )?;
            }

            // Zero unread is a valid reconcile; the cursor still advances.
            tx.execute(
                "UPDATE participants SET last_read_at = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![conversation_id, user_id, now],
            )?;

            tx.commit()?;
            Ok(((updated + missing.len()) as u64, now))
        })
    }

    pub fn unread_count(&self, conversation_id: &str, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: u64 = conn.query_row(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.conversation_id = ?1 AND m.author_id != ?2
                   AND NOT EXISTS (
                       SELECT 1 FROM message_delivery_states d
                       WHERE d.message_id = m.id AND d.user_id = ?2 AND d.read = 1
                   )",
                params![conversation_id, user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    pub fn delivery_states_for_message(&self, message_id: &str) -> Result<Vec<DeliveryStateRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, user_id, delivered, delivered_at, read, read_at
                 FROM message_delivery_states WHERE message_id = ?1",
            )?;
            let rows = stmt
                .query_map([message_id], |row| {
                    Ok(DeliveryStateRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        user_id: row.get(2)?,
                        delivered: row.get(3)?,
                        delivered_at: row.get(4)?,
                        read: row.get(5)?,
                        read_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Notes --

    pub fn insert_note(&self, id: &str, author_id: &str, title: &str, body: &str) -> Result<String> {
        self.with_conn_mut(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO notes (id, author_id, title, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, author_id, title, body, now],
            )?;
            Ok(now)
        })
    }

    pub fn list_notes(&self, limit: u32) -> Result<Vec<NoteRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT n.id, n.author_id, u.username, u.display_name, n.title, n.body, n.created_at
                 FROM notes n
                 LEFT JOIN users u ON n.author_id = u.id
                 ORDER BY n.created_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok(NoteRow {
                        id: row.get(0)?,
                        author_id: row.get(1)?,
                        author_username: row
                            .get::<_, Option<String>>(2)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        author_display_name: row.get(3)?,
                        title: row.get(4)?,
                        body: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, password, display_name, role, created_at
         FROM users WHERE username = ?1",
    )?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                display_name: row.get(3)?,
                role: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, password, display_name, role, created_at
         FROM users WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                display_name: row.get(3)?,
                role: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.conversation_id, m.author_id, u.username, u.display_name,
                m.content, m.attachments, m.created_at
         FROM messages m
         LEFT JOIN users u ON m.author_id = u.id
         WHERE m.id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                author_id: row.get(2)?,
                author_username: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| "unknown".to_string()),
                author_display_name: row.get(4)?,
                content: row.get(5)?,
                attachments: row.get(6)?,
                created_at: row.get(7)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_messages(
    conn: &Connection,
    conversation_id: &str,
    limit: u32,
    before: Option<&str>,
) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch author display fields in a single query
    // (eliminates N+1). Newest first; `before` pages into history.
    let sql_base = "SELECT m.id, m.conversation_id, m.author_id, u.username, u.display_name,
                           m.content, m.attachments, m.created_at
                    FROM messages m
                    LEFT JOIN users u ON m.author_id = u.id
                    WHERE m.conversation_id = ?1";

    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<MessageRow> {
        Ok(MessageRow {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            author_id: row.get(2)?,
            author_username: row
                .get::<_, Option<String>>(3)?
                .unwrap_or_else(|| "unknown".to_string()),
            author_display_name: row.get(4)?,
            content: row.get(5)?,
            attachments: row.get(6)?,
            created_at: row.get(7)?,
        })
    };

    let rows = match before {
        Some(cursor) => {
            let sql = format!(
                "{} AND m.created_at < ?2 ORDER BY m.created_at DESC LIMIT ?3",
                sql_base
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![conversation_id, cursor, limit], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        None => {
            let sql = format!("{} ORDER BY m.created_at DESC LIMIT ?2", sql_base);
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![conversation_id, limit], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    Ok(rows)
}

fn query_conversation_summaries(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<ConversationSummaryRow>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.kind, c.name, c.updated_at,
                (SELECT COUNT(*) FROM messages m
                 WHERE m.conversation_id = c.id AND m.author_id != ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM message_delivery_states d
                       WHERE d.message_id = m.id AND d.user_id = ?1 AND d.read = 1
                   )) AS unread,
                (SELECT m.content FROM messages m
                 WHERE m.conversation_id = c.id
                 ORDER BY m.created_at DESC LIMIT 1) AS last_message
         FROM conversations c
         JOIN participants p ON p.conversation_id = c.id
         WHERE p.user_id = ?1
         ORDER BY c.updated_at DESC",
    )?;

    let rows = stmt
        .query_map([user_id], |row| {
            Ok(ConversationSummaryRow {
                id: row.get(0)?,
                kind: row.get(1)?,
                name: row.get(2)?,
                updated_at: row.get(3)?,
                unread: row.get(4)?,
                last_message: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn seed_user(db: &Database, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, username, "hash", None, "member")
            .unwrap();
        id
    }

    fn seed_conversation(db: &Database, kind: &str, users: &[&str]) -> String {
        let id = Uuid::new_v4().to_string();
        let participants: Vec<String> = users.iter().map(|u| u.to_string()).collect();
        db.create_conversation(&id, kind, None, &participants)
            .unwrap();
        id
    }

    #[test]
    fn test_create_and_fetch_user() {
        let db = test_db();
        let id = seed_user(&db, "amalia");

        let row = db.get_user_by_username("amalia").unwrap().unwrap();
        assert_eq!(row.id, id);
        assert_eq!(row.role, "member");
        // no display name set, falls back to the login name
        assert_eq!(row.display_name(), "amalia");

        assert!(db.get_user_by_username("nadie").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let db = test_db();
        seed_user(&db, "amalia");

        let dup = db.create_user(
            &Uuid::new_v4().to_string(),
            "amalia",
            "otherhash",
            None,
            "member",
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_direct_conversation_lookup() {
        let db = test_db();
        let a = seed_user(&db, "amalia");
        let b = seed_user(&db, "benito");
        let c = seed_user(&db, "carmen");
        let convo = seed_conversation(&db, "direct", &[&a, &b]);

        assert_eq!(db.find_direct_conversation(&a, &b).unwrap(), Some(convo.clone()));
        assert_eq!(db.find_direct_conversation(&b, &a).unwrap(), Some(convo));
        assert!(db.find_direct_conversation(&a, &c).unwrap().is_none());

        // a group containing both users is not a direct conversation
        seed_conversation(&db, "group", &[&a, &c]);
        assert!(db.find_direct_conversation(&a, &c).unwrap().is_none());
    }

    #[test]
    fn test_insert_message_creates_delivery_rows_for_all_participants() {
        let db = test_db();
        let a = seed_user(&db, "amalia");
        let b = seed_user(&db, "benito");
        let c = seed_user(&db, "carmen");
        let convo = seed_conversation(&db, "group", &[&a, &b, &c]);

        let msg_id = Uuid::new_v4().to_string();
        let inserted = db.insert_message(&msg_id, &convo, &a, "hola equipo", None).unwrap();
        assert_eq!(inserted.participant_ids.len(), 3);

        let states = db.delivery_states_for_message(&msg_id).unwrap();
        assert_eq!(states.len(), 3);

        let author_state = states.iter().find(|s| s.user_id == a).unwrap();
        assert!(author_state.delivered && author_state.read);
        assert_eq!(author_state.delivered_at.as_deref(), Some(inserted.created_at.as_str()));
        assert_eq!(author_state.read_at.as_deref(), Some(inserted.created_at.as_str()));

        for recipient in [&b, &c] {
            let state = states.iter().find(|s| s.user_id == *recipient).unwrap();
            assert!(!state.delivered && !state.read);
            assert!(state.delivered_at.is_none() && state.read_at.is_none());
        }
    }

    #[test]
    fn test_insert_message_bumps_conversation_updated_at() {
        let db = test_db();
        let a = seed_user(&db, "amalia");
        let b = seed_user(&db, "benito");
        let convo = seed_conversation(&db, "direct", &[&a, &b]);

        let inserted = db
            .insert_message(&Uuid::new_v4().to_string(), &convo, &a, "hola", None)
            .unwrap();

        let row = db.get_conversation(&convo).unwrap().unwrap();
        assert_eq!(row.updated_at, inserted.created_at);
    }

    #[test]
    fn test_mark_read_idempotent_preserves_first_timestamp() {
        let db = test_db();
        let a = seed_user(&db, "amalia");
        let b = seed_user(&db, "benito");
        let convo = seed_conversation(&db, "direct", &[&a, &b]);
        let msg_id = Uuid::new_v4().to_string();
        db.insert_message(&msg_id, &convo, &a, "hola", None).unwrap();

        let (newly, first) = db.mark_message_read(&msg_id, &b).unwrap();
        assert!(newly);

        let (again, second) = db.mark_message_read(&msg_id, &b).unwrap();
        assert!(!again);
        assert_eq!(second, first);

        let state = db
            .delivery_states_for_message(&msg_id)
            .unwrap()
            .into_iter()
            .find(|s| s.user_id == b)
            .unwrap();
        assert!(state.read && state.delivered);
        assert_eq!(state.read_at.as_deref(), Some(first.as_str()));
    }

    #[test]
    fn test_mark_read_backfills_missing_row() {
        let db = test_db();
        let a = seed_user(&db, "amalia");
        let b = seed_user(&db, "benito");
        let convo = seed_conversation(&db, "group", &[&a, &b]);
        let msg_id = Uuid::new_v4().to_string();
        db.insert_message(&msg_id, &convo, &a, "hola", None).unwrap();

        // carmen joins after the message exists, so she has no delivery row
        let c = seed_user(&db, "carmen");
        db.add_participant(&convo, &c).unwrap();
        assert_eq!(db.delivery_states_for_message(&msg_id).unwrap().len(), 2);

        let (newly, _) = db.mark_message_read(&msg_id, &c).unwrap();
        assert!(newly);

        let states = db.delivery_states_for_message(&msg_id).unwrap();
        assert_eq!(states.len(), 3);
        let state = states.into_iter().find(|s| s.user_id == c).unwrap();
        assert!(state.read && state.delivered);
    }

    #[test]
    fn test_reconcile_marks_all_unread() {
        let db = test_db();
        let a = seed_user(&db, "amalia");
        let b = seed_user(&db, "benito");
        let convo = seed_conversation(&db, "direct", &[&a, &b]);

        for i in 0..5 {
            db.insert_message(
                &Uuid::new_v4().to_string(),
                &convo,
                &a,
                &format!("mensaje {}", i),
                None,
            )
            .unwrap();
        }
        assert_eq!(db.unread_count(&convo, &b).unwrap(), 5);

        let (updated, cursor) = db.reconcile_conversation_read(&convo, &b).unwrap();
        assert_eq!(updated, 5);
        assert_eq!(db.unread_count(&convo, &b).unwrap(), 0);

        let participant = db.get_participant(&convo, &b).unwrap().unwrap();
        assert_eq!(participant.last_read_at.as_deref(), Some(cursor.as_str()));
    }

    #[test]
    fn test_reconcile_zero_unread_still_advances_cursor() {
        let db = test_db();
        let a = seed_user(&db, "amalia");
        let b = seed_user(&db, "benito");
        let convo = seed_conversation(&db, "direct", &[&a, &b]);

        let (updated, cursor) = db.reconcile_conversation_read(&convo, &b).unwrap();
        assert_eq!(updated, 0);

        let participant = db.get_participant(&convo, &b).unwrap().unwrap();
        assert_eq!(participant.last_read_at.as_deref(), Some(cursor.as_str()));
    }

    #[test]
    fn test_reconcile_skips_own_messages() {
        let db = test_db();
        let a = seed_user(&db, "amalia");
        let b = seed_user(&db, "benito");
        let convo = seed_conversation(&db, "direct", &[&a, &b]);

        db.insert_message(&Uuid::new_v4().to_string(), &convo, &b, "mía", None)
            .unwrap();
        db.insert_message(&Uuid::new_v4().to_string(), &convo, &a, "de amalia", None)
            .unwrap();

        let (updated, _) = db.reconcile_conversation_read(&convo, &b).unwrap();
        assert_eq!(updated, 1);
    }

    #[test]
    fn test_reconcile_backfills_missing_rows() {
        let db = test_db();
        let a = seed_user(&db, "amalia");
        let b = seed_user(&db, "benito");
        let convo = seed_conversation(&db, "group", &[&a, &b]);

        let msg_id = Uuid::new_v4().to_string();
        db.insert_message(&msg_id, &convo, &a, "hola", None).unwrap();

        let c = seed_user(&db, "carmen");
        db.add_participant(&convo, &c).unwrap();

        let (updated, _) = db.reconcile_conversation_read(&convo, &c).unwrap();
        assert_eq!(updated, 1);

        let state = db
            .delivery_states_for_message(&msg_id)
            .unwrap()
            .into_iter()
            .find(|s| s.user_id == c)
            .unwrap();
        assert!(state.read && state.delivered);
        assert_eq!(db.unread_count(&convo, &c).unwrap(), 0);
    }

    #[test]
    fn test_unread_count_excludes_own_messages() {
        let db = test_db();
        let a = seed_user(&db, "amalia");
        let b = seed_user(&db, "benito");
        let convo = seed_conversation(&db, "direct", &[&a, &b]);

        db.insert_message(&Uuid::new_v4().to_string(), &convo, &a, "uno", None)
            .unwrap();
        db.insert_message(&Uuid::new_v4().to_string(), &convo, &b, "dos", None)
            .unwrap();

        assert_eq!(db.unread_count(&convo, &a).unwrap(), 1);
        assert_eq!(db.unread_count(&convo, &b).unwrap(), 1);
    }

    #[test]
    fn test_list_conversations_summary() {
        let db = test_db();
        let a = seed_user(&db, "amalia");
        let b = seed_user(&db, "benito");
        let c = seed_user(&db, "carmen");
        let direct = seed_conversation(&db, "direct", &[&a, &b]);
        let group = seed_conversation(&db, "group", &[&a, &b, &c]);

        db.insert_message(&Uuid::new_v4().to_string(), &direct, &b, "primero", None)
            .unwrap();
        db.insert_message(&Uuid::new_v4().to_string(), &group, &c, "de carmen", None)
            .unwrap();

        let summaries = db.list_conversations(&a).unwrap();
        assert_eq!(summaries.len(), 2);
        // newest activity first
        assert_eq!(summaries[0].id, group);
        assert_eq!(summaries[0].unread, 1);
        assert_eq!(summaries[0].last_message.as_deref(), Some("de carmen"));
        assert_eq!(summaries[1].id, direct);
        assert_eq!(summaries[1].last_message.as_deref(), Some("primero"));

        // carmen only sees the group
        let summaries = db.list_conversations(&c).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].unread, 0);
    }

    #[test]
    fn test_get_messages_pagination() {
        let db = test_db();
        let a = seed_user(&db, "amalia");
        let b = seed_user(&db, "benito");
        let convo = seed_conversation(&db, "direct", &[&a, &b]);

        for i in 0..3 {
            db.insert_message(
                &Uuid::new_v4().to_string(),
                &convo,
                &a,
                &format!("mensaje {}", i),
                None,
            )
            .unwrap();
        }

        let page = db.get_messages(&convo, 2, None).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "mensaje 2");
        assert_eq!(page[1].content, "mensaje 1");

        let older = db
            .get_messages(&convo, 2, Some(&page[1].created_at))
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].content, "mensaje 0");
    }

    #[test]
    fn test_message_author_fields_joined() {
        let db = test_db();
        let a = Uuid::new_v4().to_string();
        db.create_user(&a, "amalia", "hash", Some("Amalia Ríos"), "member")
            .unwrap();
        let b = seed_user(&db, "benito");
        let convo = seed_conversation(&db, "direct", &[&a, &b]);

        let msg_id = Uuid::new_v4().to_string();
        db.insert_message(&msg_id, &convo, &a, "hola", Some(r#"[{"name":"n.pdf","url":"/f/1"}]"#))
            .unwrap();

        let row = db.get_message(&msg_id).unwrap().unwrap();
        assert_eq!(row.author_username, "amalia");
        assert_eq!(row.author_name(), "Amalia Ríos");
        assert!(row.attachments.as_deref().unwrap().contains("n.pdf"));
    }

    #[test]
    fn test_notes_round_trip() {
        let db = test_db();
        let e = Uuid::new_v4().to_string();
        db.create_user(&e, "editora", "hash", Some("La Editora"), "editor")
            .unwrap();

        let note_id = Uuid::new_v4().to_string();
        db.insert_note(&note_id, &e, "Cierre de nómina", "El cierre es el viernes.")
            .unwrap();

        let notes = db.list_notes(50).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id, note_id);
        assert_eq!(notes[0].title, "Cierre de nómina");
        assert_eq!(notes[0].author_name(), "La Editora");
    }

    #[test]
    fn test_participants_and_membership() {
        let db = test_db();
        let a = seed_user(&db, "amalia");
        let b = seed_user(&db, "benito");
        let c = seed_user(&db, "carmen");
        let convo = seed_conversation(&db, "direct", &[&a, &b]);

        assert!(db.is_participant(&convo, &a).unwrap());
        assert!(db.is_participant(&convo, &b).unwrap());
        assert!(!db.is_participant(&convo, &c).unwrap());

        let mut participants = db.get_participants(&convo).unwrap();
        participants.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(participants, expected);
    }
}
