use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row, params};

use pawlink_types::models::AdoptionStatus;

use crate::Database;
use crate::models::{
    AdoptionRow, ConversationRow, MessageRow, NewConversation, NewMessage, format_timestamp,
    parse_timestamp,
};

const CONVERSATION_COLUMNS: &str = "c.id, c.adoption_request_id, c.pet_name, c.requester_email, c.requester_name,
     c.owner_email, c.owner_name, c.last_message_content, c.last_message_sender_role,
     c.last_message_at, c.status, c.created_at";

const MESSAGE_COLUMNS: &str =
    "seq, id, conversation_id, sender_role, sender_email, sender_name, content, created_at, read";

impl Database {
    // -- Adoption mirror --

    pub fn insert_pet(
        &self,
        id: &str,
        name: &str,
        owner_email: Option<&str>,
        owner_name: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO pets (id, name, owner_email, owner_name) VALUES (?1, ?2, ?3, ?4)",
                params![id, name, owner_email, owner_name],
            )?;
            Ok(())
        })
    }

    pub fn insert_adoption_request(
        &self,
        id: &str,
        pet_id: &str,
        applicant_email: &str,
        applicant_name: &str,
        status: AdoptionStatus,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO adoption_requests (id, pet_id, applicant_email, applicant_name, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, pet_id, applicant_email, applicant_name, status.as_str()],
            )?;
            Ok(())
        })
    }

    /// Returns false when the adoption request does not exist.
    pub fn set_adoption_status(&self, id: &str, status: AdoptionStatus) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE adoption_requests
                 SET status = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![id, status.as_str(), format_timestamp(Utc::now())],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_adoption_request(&self, id: &str) -> Result<Option<AdoptionRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT a.id, a.pet_id, a.applicant_email, a.applicant_name, a.status,
                            p.name, p.owner_email, p.owner_name
                     FROM adoption_requests a
                     LEFT JOIN pets p ON p.id = a.pet_id
                     WHERE a.id = ?1",
                    [id],
                    |row| {
                        Ok(AdoptionRow {
                            id: row.get(0)?,
                            pet_id: row.get(1)?,
                            applicant_email: row.get(2)?,
                            applicant_name: row.get(3)?,
                            status: row.get(4)?,
                            pet_name: row.get(5)?,
                            owner_email: row.get(6)?,
                            owner_name: row.get(7)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Conversations --

    /// Insert a conversation and its welcome message unless one already
    /// exists for the adoption request. Returns the stored row and whether
    /// this call created it.
    pub fn create_conversation(
        &self,
        conversation: &NewConversation,
        welcome: &NewMessage,
    ) -> Result<(ConversationRow, bool)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let inserted = tx.execute(
                "INSERT INTO conversations (
                    id, adoption_request_id, pet_name, requester_email, requester_name,
                    owner_email, owner_name, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(adoption_request_id) DO NOTHING",
                params![
                    conversation.id,
                    conversation.adoption_request_id,
                    conversation.pet_name,
                    conversation.requester_email,
                    conversation.requester_name,
                    conversation.owner_email,
                    conversation.owner_name,
                    format_timestamp(Utc::now()),
                ],
            )?;

            if inserted > 0 {
                append_message(&tx, welcome)?;
            }

            let row = query_conversation_by_adoption(&tx, &conversation.adoption_request_id)?
                .ok_or_else(|| anyhow::anyhow!("Conversation vanished after insert"))?;

            tx.commit()?;
            Ok((row, inserted > 0))
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM conversations c WHERE c.id = ?1", CONVERSATION_COLUMNS);
            let row = conn.query_row(&sql, [id], conversation_from_row).optional()?;
            Ok(row)
        })
    }

    pub fn get_conversation_by_adoption(
        &self,
        adoption_request_id: &str,
    ) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation_by_adoption(conn, adoption_request_id))
    }

    /// Conversations where `email` holds either slot, with the number of
    /// messages from the other side still unread. Newest activity first,
    /// conversations without messages last.
    pub fn list_conversations_for(&self, email: &str) -> Result<Vec<(ConversationRow, u64)>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {},
                    (SELECT COUNT(*) FROM messages m
                     WHERE m.conversation_id = c.id
                       AND m.read = 0
                       AND LOWER(TRIM(m.sender_email)) <> LOWER(TRIM(?1))) AS unread
                 FROM conversations c
                 WHERE LOWER(TRIM(c.requester_email)) = LOWER(TRIM(?1))
                    OR LOWER(TRIM(c.owner_email)) = LOWER(TRIM(?1))
                 ORDER BY c.last_message_at IS NULL, c.last_message_at DESC, c.created_at DESC",
                CONVERSATION_COLUMNS
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([email], |row| {
                    let unread: i64 = row.get(12)?;
                    Ok((conversation_from_row(row)?, unread as u64))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Append a message and refresh the conversation's last-message summary
    /// in one transaction.
    pub fn insert_message(&self, message: &NewMessage) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let row = append_message(&tx, message)?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// The most recent `limit` messages, oldest first.
    pub fn get_messages(&self, conversation_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {cols} FROM (
                    SELECT {cols} FROM messages
                    WHERE conversation_id = ?1
                    ORDER BY created_at DESC, seq DESC
                    LIMIT ?2
                 ) ORDER BY created_at ASC, seq ASC",
                cols = MESSAGE_COLUMNS
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![conversation_id, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn count_messages(&self, conversation_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    pub fn unread_count(&self, conversation_id: &str, reader_email: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1
                   AND read = 0
                   AND LOWER(TRIM(sender_email)) <> LOWER(TRIM(?2))",
                params![conversation_id, reader_email],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Flip every unread message not authored by `reader_email` to read.
    /// Returns how many messages changed.
    pub fn mark_read(&self, conversation_id: &str, reader_email: &str) -> Result<u64> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET read = 1
                 WHERE conversation_id = ?1
                   AND read = 0
                   AND LOWER(TRIM(sender_email)) <> LOWER(TRIM(?2))",
                params![conversation_id, reader_email],
            )?;
            Ok(changed as u64)
        })
    }
}

/// Insert inside an open transaction. The timestamp is clamped to the
/// conversation's latest message so store order always equals send order.
fn append_message(conn: &Connection, message: &NewMessage) -> Result<MessageRow> {
    let latest: Option<String> = conn.query_row(
        "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
        [&message.conversation_id],
        |row| row.get(0),
    )?;

    let mut created_at = Utc::now();
    if let Some(latest) = latest {
        let latest = parse_timestamp(&latest)?;
        if latest > created_at {
            created_at = latest;
        }
    }
    let created_at = format_timestamp(created_at);

    conn.execute(
        "INSERT INTO messages (
            id, conversation_id, sender_role, sender_email, sender_name, content, created_at, read
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            message.id,
            message.conversation_id,
            message.sender_role.as_str(),
            message.sender_email,
            message.sender_name,
            message.content,
            created_at,
            message.read,
        ],
    )?;
    let seq = conn.last_insert_rowid();

    conn.execute(
        "UPDATE conversations
         SET last_message_content = ?2, last_message_sender_role = ?3, last_message_at = ?4
         WHERE id = ?1",
        params![
            message.conversation_id,
            message.content,
            message.sender_role.as_str(),
            created_at,
        ],
    )?;

    Ok(MessageRow {
        seq,
        id: message.id.clone(),
        conversation_id: message.conversation_id.clone(),
        sender_role: message.sender_role.as_str().to_string(),
        sender_email: message.sender_email.clone(),
        sender_name: message.sender_name.clone(),
        content: message.content.clone(),
        created_at,
        read: message.read,
    })
}

fn query_conversation_by_adoption(
    conn: &Connection,
    adoption_request_id: &str,
) -> Result<Option<ConversationRow>> {
    let sql = format!(
        "SELECT {} FROM conversations c WHERE c.adoption_request_id = ?1",
        CONVERSATION_COLUMNS
    );
    let row = conn
        .query_row(&sql, [adoption_request_id], conversation_from_row)
        .optional()?;
    Ok(row)
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        adoption_request_id: row.get(1)?,
        pet_name: row.get(2)?,
        requester_email: row.get(3)?,
        requester_name: row.get(4)?,
        owner_email: row.get(5)?,
        owner_name: row.get(6)?,
        last_message_content: row.get(7)?,
        last_message_sender_role: row.get(8)?,
        last_message_at: row.get(9)?,
        status: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        conversation_id: row.get(2)?,
        sender_role: row.get(3)?,
        sender_email: row.get(4)?,
        sender_name: row.get(5)?,
        content: row.get(6)?,
        created_at: row.get(7)?,
        read: row.get(8)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
