use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Returned when a stored enum column holds a value this build does not know.
#[derive(Debug, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Compare two emails the way participant slots are matched: trimmed and
/// ASCII case-insensitive.
pub fn same_email(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// One of the two fixed participant slots in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Requester,
    Owner,
}

impl ParticipantRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::Owner => "owner",
        }
    }

    pub fn counterpart(self) -> Self {
        match self {
            Self::Requester => Self::Owner,
            Self::Owner => Self::Requester,
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who authored a message. `System` is only used for the welcome message
/// written when a conversation is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Requester,
    Owner,
    System,
}

impl SenderRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::Owner => "owner",
            Self::System => "system",
        }
    }
}

impl From<ParticipantRole> for SenderRole {
    fn from(role: ParticipantRole) -> Self {
        match role {
            ParticipantRole::Requester => Self::Requester,
            ParticipantRole::Owner => Self::Owner,
        }
    }
}

impl FromStr for SenderRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requester" => Ok(Self::Requester),
            "owner" => Ok(Self::Owner),
            "system" => Ok(Self::System),
            other => Err(UnknownVariant { kind: "sender role", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(UnknownVariant { kind: "conversation status", value: other.to_string() }),
        }
    }
}

/// Adoption request state as recorded by the adoption service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdoptionStatus {
    Pending,
    Approved,
    Rejected,
}

impl AdoptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AdoptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdoptionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(UnknownVariant { kind: "adoption status", value: other.to_string() }),
        }
    }
}

/// Email and display name snapshot taken when the conversation was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub sender_role: SenderRole,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub adoption_request_id: Uuid,
    pub pet_name: String,
    pub requester: Participant,
    pub owner: Participant,
    pub last_message: Option<LastMessage>,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Which slot `email` occupies, if any.
    pub fn role_of(&self, email: &str) -> Option<ParticipantRole> {
        if same_email(&self.requester.email, email) {
            Some(ParticipantRole::Requester)
        } else if same_email(&self.owner.email, email) {
            Some(ParticipantRole::Owner)
        } else {
            None
        }
    }

    pub fn participant(&self, role: ParticipantRole) -> &Participant {
        match role {
            ParticipantRole::Requester => &self.requester,
            ParticipantRole::Owner => &self.owner,
        }
    }
}

/// A persisted chat message. This is also the payload of the live
/// `Message` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_role: SenderRole,
    pub sender_email: String,
    pub sender_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}
