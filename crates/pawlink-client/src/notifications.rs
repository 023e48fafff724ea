use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use pawlink_types::models::Message;

/// How many recent notifications are kept for the badge dropdown.
pub const RECENT_CAPACITY: usize = 5;

/// Longest preview kept per notification, in characters.
const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub sender_name: String,
    pub preview: String,
    pub received_at: DateTime<Utc>,
}

impl Notification {
    pub fn from_message(message: &Message) -> Self {
        Self {
            conversation_id: message.conversation_id,
            message_id: message.id,
            sender_name: message.sender_name.clone(),
            preview: message.content.chars().take(PREVIEW_CHARS).collect(),
            received_at: message.created_at,
        }
    }
}

/// Unread counters per conversation plus a short rolling list of the most
/// recent notifications, newest first.
#[derive(Debug)]
pub struct NotificationCenter {
    unread: HashMap<Uuid, u64>,
    /// Message ids already recorded, per conversation
    seen: HashMap<Uuid, HashSet<Uuid>>,
    recent: VecDeque<Notification>,
    capacity: usize,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::with_capacity(RECENT_CAPACITY)
    }
}

impl NotificationCenter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            unread: HashMap::new(),
            seen: HashMap::new(),
            recent: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a message for a conversation the user is not viewing.
    /// A message already recorded for its conversation is ignored.
    pub fn push(&mut self, notification: Notification) -> bool {
        let conversation_id = notification.conversation_id;
        if !self.remember(notification) {
            return false;
        }
        *self.unread.entry(conversation_id).or_default() += 1;
        true
    }

    /// Like [`NotificationCenter::push`] for a message the counters already
    /// include, e.g. one that arrived together with a fresh conversation list.
    pub fn push_counted(&mut self, notification: Notification) -> bool {
        self.remember(notification)
    }

    fn remember(&mut self, notification: Notification) -> bool {
        let seen = self.seen.entry(notification.conversation_id).or_default();
        if !seen.insert(notification.message_id) {
            return false;
        }
        self.recent.push_front(notification);
        self.recent.truncate(self.capacity);
        true
    }

    /// Replace all counters with the server's view, e.g. after a fresh
    /// conversation list.
    pub fn seed<I>(&mut self, counts: I)
    where
        I: IntoIterator<Item = (Uuid, u64)>,
    {
        self.unread = counts.into_iter().filter(|(_, n)| *n > 0).collect();
        self.seen.clear();
    }

    /// The user opened the conversation: drop its counter and notifications.
    pub fn clear_conversation(&mut self, conversation_id: Uuid) {
        self.unread.remove(&conversation_id);
        self.seen.remove(&conversation_id);
        self.recent.retain(|n| n.conversation_id != conversation_id);
    }

    pub fn unread_for(&self, conversation_id: Uuid) -> u64 {
        self.unread.get(&conversation_id).copied().unwrap_or(0)
    }

    pub fn total_unread(&self) -> u64 {
        self.unread.values().sum()
    }

    pub fn recent(&self) -> impl Iterator<Item = &Notification> {
        self.recent.iter()
    }
}
