//! Database row types. These map directly to SQLite rows and stay separate
//! from the `pawlink-types` models; the `TryFrom` impls below are the only
//! bridge between the two.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use pawlink_types::models::{
    AdoptionStatus, Conversation, LastMessage, Message, Participant, SenderRole,
};

pub struct AdoptionRow {
    pub id: String,
    pub pet_id: String,
    pub applicant_email: String,
    pub applicant_name: String,
    pub status: String,
    /// `None` when the pet row is missing entirely
    pub pet_name: Option<String>,
    pub owner_email: Option<String>,
    pub owner_name: Option<String>,
}

impl AdoptionRow {
    pub fn status(&self) -> Result<AdoptionStatus> {
        Ok(self.status.parse()?)
    }
}

pub struct ConversationRow {
    pub id: String,
    pub adoption_request_id: String,
    pub pet_name: String,
    pub requester_email: String,
    pub requester_name: String,
    pub owner_email: String,
    pub owner_name: String,
    pub last_message_content: Option<String>,
    pub last_message_sender_role: Option<String>,
    pub last_message_at: Option<String>,
    pub status: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub conversation_id: String,
    pub sender_role: String,
    pub sender_email: String,
    pub sender_name: String,
    pub content: String,
    pub created_at: String,
    pub read: bool,
}

/// Conversation to insert. The welcome message is written in the same
/// transaction.
pub struct NewConversation {
    pub id: String,
    pub adoption_request_id: String,
    pub pet_name: String,
    pub requester_email: String,
    pub requester_name: String,
    pub owner_email: String,
    pub owner_name: String,
}

pub struct NewMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_role: SenderRole,
    pub sender_email: String,
    pub sender_name: String,
    pub content: String,
    pub read: bool,
}

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that
/// lexicographic order equals chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Corrupt timestamp '{}'", raw))?;
    Ok(ts.with_timezone(&Utc))
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("Corrupt {} '{}'", what, raw))
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = anyhow::Error;

    fn try_from(row: ConversationRow) -> Result<Self> {
        let last_message = match (
            row.last_message_content,
            row.last_message_sender_role,
            row.last_message_at,
        ) {
            (Some(content), Some(role), Some(at)) => Some(LastMessage {
                content,
                sender_role: role.parse()?,
                timestamp: parse_timestamp(&at)?,
            }),
            _ => None,
        };

        Ok(Conversation {
            id: parse_uuid(&row.id, "conversation id")?,
            adoption_request_id: parse_uuid(&row.adoption_request_id, "adoption request id")?,
            pet_name: row.pet_name,
            requester: Participant { email: row.requester_email, name: row.requester_name },
            owner: Participant { email: row.owner_email, name: row.owner_name },
            last_message,
            status: row.status.parse()?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: parse_uuid(&row.id, "message id")?,
            conversation_id: parse_uuid(&row.conversation_id, "conversation id")?,
            sender_role: row.sender_role.parse()?,
            sender_email: row.sender_email,
            sender_name: row.sender_name,
            content: row.content,
            created_at: parse_timestamp(&row.created_at)?,
            read: row.read,
        })
    }
}
