//! Optimistic outgoing messages.
//!
//! ```text
//! Pending --confirm--> Confirmed
//! Pending --fail-----> Failed --retry--> Pending
//! Failed  --confirm--> Confirmed   (the server stored it after all)
//! ```

use chrono::{DateTime, Utc};
use uuid::Uuid;

use pawlink_types::models::Message;

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryState {
    Pending,
    Confirmed(Message),
    Failed { reason: String },
}

impl DeliveryState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed(_) => "confirmed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// A message the user sent, tracked from the moment it is rendered locally
/// until the server has assigned it an id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub local_id: String,
    pub conversation_id: Uuid,
    pub content: String,
    pub queued_at: DateTime<Utc>,
    pub state: DeliveryState,
}

impl OutgoingMessage {
    pub fn new(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            local_id: format!("local-{}", Uuid::new_v4()),
            conversation_id,
            content: content.into(),
            queued_at: Utc::now(),
            state: DeliveryState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, DeliveryState::Pending)
    }

    /// The server-side message once confirmed.
    pub fn confirmed(&self) -> Option<&Message> {
        match &self.state {
            DeliveryState::Confirmed(message) => Some(message),
            _ => None,
        }
    }

    pub fn confirm(&mut self, message: Message) -> Result<(), ClientError> {
        match self.state {
            DeliveryState::Pending | DeliveryState::Failed { .. } => {
                self.state = DeliveryState::Confirmed(message);
                Ok(())
            }
            DeliveryState::Confirmed(_) => Err(self.illegal("confirm")),
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), ClientError> {
        match self.state {
            DeliveryState::Pending => {
                self.state = DeliveryState::Failed { reason: reason.into() };
                Ok(())
            }
            _ => Err(self.illegal("fail")),
        }
    }

    pub fn retry(&mut self) -> Result<(), ClientError> {
        match self.state {
            DeliveryState::Failed { .. } => {
                self.state = DeliveryState::Pending;
                Ok(())
            }
            _ => Err(self.illegal("retry")),
        }
    }

    fn illegal(&self, action: &'static str) -> ClientError {
        ClientError::InvalidTransition {
            action,
            state: self.state.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pawlink_types::models::SenderRole;

    fn server_copy(out: &OutgoingMessage) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: out.conversation_id,
            sender_role: SenderRole::Requester,
            sender_email: "ann@example.com".into(),
            sender_name: "Ann".into(),
            content: out.content.clone(),
            created_at: Utc::now(),
            read: false,
        }
    }

    #[test]
    fn pending_confirms_once() {
        let mut out = OutgoingMessage::new(Uuid::new_v4(), "hi");
        assert!(out.local_id.starts_with("local-"));

        let server = server_copy(&out);
        out.confirm(server.clone()).unwrap();
        assert_eq!(out.confirmed(), Some(&server));

        let err = out.confirm(server).unwrap_err();
        assert_eq!(err.to_string(), "cannot confirm a message that is confirmed");
    }

    #[test]
    fn failed_can_retry_but_not_fail_again() {
        let mut out = OutgoingMessage::new(Uuid::new_v4(), "hi");
        out.fail("timed out").unwrap();
        assert!(out.fail("again").is_err());

        out.retry().unwrap();
        assert!(out.is_pending());
        assert!(out.retry().is_err());
    }

    #[test]
    fn late_confirmation_rescues_failed_message() {
        let mut out = OutgoingMessage::new(Uuid::new_v4(), "hi");
        out.fail("timed out").unwrap();
        let server = server_copy(&out);
        out.confirm(server).unwrap();
        assert!(out.confirmed().is_some());
    }
}
