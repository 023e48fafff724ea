use chrono::{DateTime, Utc};
use uuid::Uuid;

use pawlink_types::models::{Message, same_email};

use crate::error::ClientError;
use crate::pending::{DeliveryState, OutgoingMessage};

#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEntry {
    /// A message received from the server (history or live)
    Delivered(Message),
    /// A message sent from this client
    Outgoing(OutgoingMessage),
}

impl TimelineEntry {
    /// The server-side message, if the entry has one.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Delivered(message) => Some(message),
            Self::Outgoing(out) => out.confirmed(),
        }
    }

    /// Server timestamp; unconfirmed entries have none and sort last.
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.message().map(|m| m.created_at)
    }
}

/// Messages of the open conversation, in server order, followed by any
/// sends still waiting for the server.
#[derive(Debug)]
pub struct Timeline {
    conversation_id: Uuid,
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn new(conversation_id: Uuid, history: Vec<Message>) -> Self {
        Self {
            conversation_id,
            entries: history.into_iter().map(TimelineEntry::Delivered).collect(),
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push_outgoing(&mut self, out: OutgoingMessage) {
        self.entries.push(TimelineEntry::Outgoing(out));
    }

    fn contains_server_id(&self, id: Uuid) -> bool {
        self.entries
            .iter()
            .any(|e| e.message().is_some_and(|m| m.id == id))
    }

    fn outgoing_mut(&mut self, local_id: &str) -> Result<&mut OutgoingMessage, ClientError> {
        self.entries
            .iter_mut()
            .find_map(|e| match e {
                TimelineEntry::Outgoing(out) if out.local_id == local_id => Some(out),
                _ => None,
            })
            .ok_or_else(|| ClientError::UnknownPendingMessage(local_id.to_string()))
    }

    fn insert_delivered(&mut self, message: Message) {
        let at = message.created_at;
        let index = self
            .entries
            .iter()
            .position(|e| e.timestamp().is_none_or(|ts| ts > at))
            .unwrap_or(self.entries.len());
        self.entries.insert(index, TimelineEntry::Delivered(message));
    }

    /// Apply a message from the live channel. An echo of one of our own
    /// unconfirmed sends confirms it in place. Returns false for a message
    /// that is already shown.
    pub fn apply_live(&mut self, message: Message, own_email: &str) -> bool {
        if self.contains_server_id(message.id) {
            return false;
        }

        if same_email(&message.sender_email, own_email) {
            // Only unconfirmed entries can take the echo.
            let echo = self.entries.iter_mut().find_map(|e| match e {
                TimelineEntry::Outgoing(OutgoingMessage { content, state, .. })
                    if *content == message.content
                        && matches!(
                            state,
                            DeliveryState::Pending | DeliveryState::Failed { .. }
                        ) =>
                {
                    Some(state)
                }
                _ => None,
            });
            if let Some(state) = echo {
                *state = DeliveryState::Confirmed(message);
                return true;
            }
        }

        self.insert_delivered(message);
        true
    }

    /// The REST send returned. The entry may already have been confirmed by
    /// the live echo.
    pub fn confirm(&mut self, local_id: &str, message: Message) -> Result<(), ClientError> {
        let already_shown = self.contains_server_id(message.id);
        let current = self.outgoing_mut(local_id)?.confirmed().map(|m| m.id);

        match current {
            Some(id) if id == message.id => Ok(()),
            Some(_) => {
                // The echo was matched to a different send with equal text.
                if !already_shown {
                    self.insert_delivered(message);
                }
                Ok(())
            }
            None => {
                if already_shown {
                    // The live echo landed as a separate entry; fold it away.
                    let id = message.id;
                    self.entries
                        .retain(|e| !matches!(e, TimelineEntry::Delivered(m) if m.id == id));
                }
                self.outgoing_mut(local_id)?.confirm(message)
            }
        }
    }

    pub fn fail(&mut self, local_id: &str, reason: impl Into<String>) -> Result<(), ClientError> {
        self.outgoing_mut(local_id)?.fail(reason)
    }

    /// Put a failed message back to pending and return its content.
    pub fn retry(&mut self, local_id: &str) -> Result<String, ClientError> {
        let out = self.outgoing_mut(local_id)?;
        out.retry()?;
        Ok(out.content.clone())
    }

    pub fn remove(&mut self, local_id: &str) -> Option<OutgoingMessage> {
        let index = self.entries.iter().position(|e| {
            matches!(e, TimelineEntry::Outgoing(out) if out.local_id == local_id)
        })?;
        match self.entries.remove(index) {
            TimelineEntry::Outgoing(out) => Some(out),
            TimelineEntry::Delivered(_) => None,
        }
    }

    /// The counterpart read the conversation: flag our messages as read.
    /// Returns how many entries changed.
    pub fn mark_own_read(&mut self, own_email: &str) -> usize {
        let mut changed = 0;
        for entry in &mut self.entries {
            let message = match entry {
                TimelineEntry::Delivered(m) => m,
                TimelineEntry::Outgoing(OutgoingMessage {
                    state: DeliveryState::Confirmed(m),
                    ..
                }) => m,
                _ => continue,
            };
            if !message.read && same_email(&message.sender_email, own_email) {
                message.read = true;
                changed += 1;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pawlink_types::models::SenderRole;

    const ME: &str = "ann@example.com";
    const THEM: &str = "olga@example.com";

    fn msg(conversation_id: Uuid, from: &str, content: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_role: if from == ME { SenderRole::Requester } else { SenderRole::Owner },
            sender_email: from.into(),
            sender_name: "x".into(),
            content: content.into(),
            created_at: at,
            read: false,
        }
    }

    #[test]
    fn live_echo_confirms_pending_then_rest_reply_is_idempotent() {
        let conv = Uuid::new_v4();
        let mut timeline = Timeline::new(conv, vec![]);
        let out = OutgoingMessage::new(conv, "Hi!");
        let local_id = out.local_id.clone();
        timeline.push_outgoing(out);

        let server = msg(conv, ME, "Hi!", Utc::now());
        assert!(timeline.apply_live(server.clone(), ME));
        assert!(!timeline.apply_live(server.clone(), ME));
        timeline.confirm(&local_id, server).unwrap();

        assert_eq!(timeline.len(), 1);
        assert!(timeline.entries()[0].message().is_some());
    }

    #[test]
    fn echo_of_failed_send_confirms_it() {
        let conv = Uuid::new_v4();
        let mut timeline = Timeline::new(conv, vec![]);
        let out = OutgoingMessage::new(conv, "late");
        let local_id = out.local_id.clone();
        timeline.push_outgoing(out);
        timeline.fail(&local_id, "timed out").unwrap();

        let server = msg(conv, ME, "late", Utc::now());
        assert!(timeline.apply_live(server.clone(), ME));

        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.entries()[0].message(), Some(&server));
        // Already confirmed, so a retry is refused
        assert!(matches!(
            timeline.retry(&local_id),
            Err(ClientError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn rest_reply_after_separate_echo_collapses_duplicates() {
        let conv = Uuid::new_v4();
        let mut timeline = Timeline::new(conv, vec![]);
        let out = OutgoingMessage::new(conv, "Hi!");
        let local_id = out.local_id.clone();
        timeline.push_outgoing(out);

        // Echo stored as its own entry before the REST reply
        let server = msg(conv, ME, "Hi!", Utc::now());
        timeline.insert_delivered(server.clone());
        assert_eq!(timeline.len(), 2);

        timeline.confirm(&local_id, server).unwrap();
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn live_messages_slot_in_by_timestamp_before_pending() {
        let conv = Uuid::new_v4();
        let base = Utc::now();
        let first = msg(conv, THEM, "first", base);
        let third = msg(conv, THEM, "third", base + Duration::seconds(2));
        let mut timeline = Timeline::new(conv, vec![first, third]);
        timeline.push_outgoing(OutgoingMessage::new(conv, "mine"));

        timeline.apply_live(msg(conv, THEM, "second", base + Duration::seconds(1)), ME);
        timeline.apply_live(msg(conv, THEM, "fourth", base + Duration::seconds(3)), ME);

        let order: Vec<String> = timeline
            .entries()
            .iter()
            .map(|e| match e {
                TimelineEntry::Delivered(m) => m.content.clone(),
                TimelineEntry::Outgoing(o) => o.content.clone(),
            })
            .collect();
        assert_eq!(order, vec!["first", "second", "third", "fourth", "mine"]);
    }

    #[test]
    fn failure_paths() {
        let conv = Uuid::new_v4();
        let mut timeline = Timeline::new(conv, vec![]);
        let out = OutgoingMessage::new(conv, "retry me");
        let local_id = out.local_id.clone();
        timeline.push_outgoing(out);

        timeline.fail(&local_id, "timed out").unwrap();
        assert_eq!(timeline.retry(&local_id).unwrap(), "retry me");
        assert!(timeline.remove(&local_id).is_some());
        assert!(timeline.is_empty());
        assert!(matches!(
            timeline.fail(&local_id, "gone"),
            Err(ClientError::UnknownPendingMessage(_))
        ));
    }

    #[test]
    fn read_receipt_marks_only_own_messages() {
        let conv = Uuid::new_v4();
        let now = Utc::now();
        let mut timeline = Timeline::new(
            conv,
            vec![msg(conv, ME, "a", now), msg(conv, THEM, "b", now), msg(conv, ME, "c", now)],
        );

        assert_eq!(timeline.mark_own_read(ME), 2);
        assert_eq!(timeline.mark_own_read(ME), 0);
    }
}
