use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent over the live channel, server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Sent once after the socket is accepted
    Ready { connection_id: Uuid },

    /// Acknowledges a Join or JoinAll with the connection's full room set
    Joined { conversation_ids: Vec<Uuid> },

    /// A message was persisted in a conversation
    Message(Message),

    /// The named participant read the conversation's unread messages
    Read { conversation_id: Uuid, reader_email: String },
}

impl GatewayEvent {
    /// Returns the conversation this event is scoped to.
    /// Connection-scoped events (Ready, Joined) return `None`.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::Message(message) => Some(message.conversation_id),
            Self::Read { conversation_id, .. } => Some(*conversation_id),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayCommand {
    /// Subscribe to one conversation's room
    Join { conversation_id: Uuid },

    /// Subscribe to every conversation the user participates in.
    /// Sent once after the conversation list is fetched so messages for
    /// conversations that are not open still arrive.
    JoinAll { conversation_ids: Vec<Uuid> },

    /// Unsubscribe from one conversation's room
    Leave { conversation_id: Uuid },
}
