use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use pawlink_types::api::{ConversationSummary, SendMessageRequest};
use pawlink_types::events::GatewayEvent;
use pawlink_types::models::{LastMessage, Message, same_email};

use crate::error::ClientError;
use crate::notifications::{Notification, NotificationCenter};
use crate::pending::OutgoingMessage;
use crate::timeline::{Timeline, TimelineEntry};
use crate::transport::{ChatApi, RoomLink};

/// How long a send may take before its optimistic entry is marked failed.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// The signed-in user, as known to the marketplace.
#[derive(Debug, Clone)]
pub struct Identity {
    pub email: String,
    pub name: String,
}

/// Client chat state for one signed-in user with one live connection.
///
/// The caller feeds live events into [`ChatSession::handle_event`] and calls
/// [`ChatSession::sync`] after every (re)connect, since room memberships do
/// not survive a reconnect.
pub struct ChatSession<A, L> {
    api: A,
    link: L,
    me: Identity,
    conversations: Vec<ConversationSummary>,
    /// Rooms joined in bulk for background notifications
    background: HashSet<Uuid>,
    active: Option<Timeline>,
    notifications: NotificationCenter,
    send_timeout: Duration,
}

impl<A: ChatApi, L: RoomLink> ChatSession<A, L> {
    pub fn new(api: A, link: L, me: Identity) -> Self {
        Self {
            api,
            link,
            me,
            conversations: Vec::new(),
            background: HashSet::new(),
            active: None,
            notifications: NotificationCenter::default(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Replace the live link after a reconnect. Call [`ChatSession::sync`]
    /// afterwards.
    pub fn replace_link(&mut self, link: L) {
        self.link = link;
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn active(&self) -> Option<&Timeline> {
        self.active.as_ref()
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn me(&self) -> &Identity {
        &self.me
    }

    /// Fetch the conversation list, join every room, and restore the open
    /// conversation. Run on start and after every reconnect.
    pub async fn sync(&mut self) -> Result<(), ClientError> {
        self.refresh_conversations().await?;

        if let Some(conversation_id) = self.active.as_ref().map(Timeline::conversation_id) {
            self.link.join(conversation_id)?;
            // Anything sent while disconnected only arrives via REST.
            self.load_active(conversation_id).await?;
        }
        Ok(())
    }

    /// Re-fetch the conversation list and bulk-join all of its rooms.
    pub async fn refresh_conversations(&mut self) -> Result<(), ClientError> {
        let mut conversations = self.api.list_conversations(&self.me.email).await?;

        let active_id = self.active.as_ref().map(Timeline::conversation_id);
        for summary in &mut conversations {
            if Some(summary.conversation.id) == active_id {
                summary.unread_count = 0;
            }
        }

        let ids: Vec<Uuid> = conversations.iter().map(|c| c.conversation.id).collect();
        self.link.join_all(ids.clone())?;
        self.background = ids.into_iter().collect();

        self.notifications.seed(
            conversations
                .iter()
                .map(|c| (c.conversation.id, c.unread_count)),
        );
        info!(
            "{} has {} conversations ({} unread)",
            self.me.email,
            conversations.len(),
            self.notifications.total_unread()
        );
        self.conversations = conversations;
        Ok(())
    }

    /// Make a conversation the one on screen: switch rooms, load its
    /// history and mark it read.
    pub async fn open(&mut self, conversation_id: Uuid) -> Result<(), ClientError> {
        if let Some(previous) = self.active.as_ref().map(Timeline::conversation_id) {
            // Rooms from the bulk join stay joined so background
            // notifications keep arriving.
            if previous != conversation_id && !self.background.contains(&previous) {
                self.link.leave(previous)?;
            }
        }
        self.link.join(conversation_id)?;
        self.load_active(conversation_id).await
    }

    /// Stop viewing the open conversation.
    pub fn close(&mut self) -> Result<(), ClientError> {
        if let Some(timeline) = self.active.take() {
            let id = timeline.conversation_id();
            if !self.background.contains(&id) {
                self.link.leave(id)?;
            }
        }
        Ok(())
    }

    async fn load_active(&mut self, conversation_id: Uuid) -> Result<(), ClientError> {
        let history = self.api.history(conversation_id, &self.me.email).await?;

        // Keep unconfirmed sends across a reload of the same conversation.
        let carried: Vec<OutgoingMessage> = match self.active.take() {
            Some(old) if old.conversation_id() == conversation_id => old
                .entries()
                .iter()
                .filter_map(|e| match e {
                    TimelineEntry::Outgoing(out) if out.confirmed().is_none() => {
                        Some(out.clone())
                    }
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        let mut timeline = Timeline::new(conversation_id, history.messages);
        for out in carried {
            timeline.push_outgoing(out);
        }
        self.active = Some(timeline);

        self.api.mark_read(conversation_id, &self.me.email).await?;
        self.notifications.clear_conversation(conversation_id);
        if let Some(summary) = self.summary_mut(conversation_id) {
            summary.unread_count = 0;
        }
        Ok(())
    }

    /// Apply one event from the live channel.
    pub async fn handle_event(&mut self, event: GatewayEvent) -> Result<(), ClientError> {
        match event {
            GatewayEvent::Message(message) => self.on_message(message).await,
            GatewayEvent::Read {
                conversation_id,
                reader_email,
            } => {
                if same_email(&reader_email, &self.me.email) {
                    return Ok(());
                }
                if let Some(timeline) = self
                    .active
                    .as_mut()
                    .filter(|t| t.conversation_id() == conversation_id)
                {
                    let changed = timeline.mark_own_read(&self.me.email);
                    debug!("{} messages in {} now read", changed, conversation_id);
                }
                Ok(())
            }
            GatewayEvent::Ready { connection_id } => {
                debug!("Live connection {} ready", connection_id);
                Ok(())
            }
            GatewayEvent::Joined { conversation_ids } => {
                debug!("Subscribed to {} rooms", conversation_ids.len());
                Ok(())
            }
        }
    }

    async fn on_message(&mut self, message: Message) -> Result<(), ClientError> {
        let conversation_id = message.conversation_id;
        let own = same_email(&message.sender_email, &self.me.email);

        // A conversation created after the last refresh. The fresh list
        // already counts this message as unread.
        let refreshed = self.summary_mut(conversation_id).is_none();
        if refreshed {
            self.refresh_conversations().await?;
        }
        if let Some(summary) = self.summary_mut(conversation_id) {
            summary.conversation.last_message = Some(LastMessage {
                content: message.content.clone(),
                sender_role: message.sender_role,
                timestamp: message.created_at,
            });
        }
        self.bump(conversation_id);

        let viewing = self
            .active
            .as_ref()
            .is_some_and(|t| t.conversation_id() == conversation_id);

        if viewing {
            let added = self
                .active
                .as_mut()
                .map(|t| t.apply_live(message, &self.me.email))
                .unwrap_or(false);
            if added && !own {
                self.api.mark_read(conversation_id, &self.me.email).await?;
            }
        } else if !own {
            let notification = Notification::from_message(&message);
            if refreshed {
                self.notifications.push_counted(notification);
            } else if self.notifications.push(notification) {
                if let Some(summary) = self.summary_mut(conversation_id) {
                    summary.unread_count += 1;
                }
            }
        }
        Ok(())
    }

    /// Send into the open conversation. The message is shown immediately as
    /// pending and reconciled with the server's copy.
    ///
    /// On error the entry is removed; on timeout it stays as failed and can
    /// be retried with [`ChatSession::retry`].
    pub async fn send(&mut self, content: &str) -> Result<Message, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let timeline = self.active.as_mut().ok_or(ClientError::NoActiveConversation)?;

        let out = OutgoingMessage::new(timeline.conversation_id(), content);
        let local_id = out.local_id.clone();
        timeline.push_outgoing(out);

        self.deliver(&local_id, content.to_string()).await
    }

    pub async fn retry(&mut self, local_id: &str) -> Result<Message, ClientError> {
        let timeline = self.active.as_mut().ok_or(ClientError::NoActiveConversation)?;
        let content = timeline.retry(local_id)?;
        self.deliver(local_id, content).await
    }

    async fn deliver(&mut self, local_id: &str, content: String) -> Result<Message, ClientError> {
        let conversation_id = self
            .active
            .as_ref()
            .map(Timeline::conversation_id)
            .ok_or(ClientError::NoActiveConversation)?;

        let req = SendMessageRequest {
            conversation_id,
            content,
            sender_email: self.me.email.clone(),
            sender_name: self.me.name.clone(),
        };
        let outcome = tokio::time::timeout(self.send_timeout, self.api.send_message(req)).await;

        let timeline = self.active.as_mut().ok_or(ClientError::NoActiveConversation)?;
        match outcome {
            Ok(Ok(message)) => {
                timeline.confirm(local_id, message.clone())?;
                if let Some(summary) = self.summary_mut(conversation_id) {
                    summary.conversation.last_message = Some(LastMessage {
                        content: message.content.clone(),
                        sender_role: message.sender_role,
                        timestamp: message.created_at,
                    });
                }
                self.bump(conversation_id);
                Ok(message)
            }
            Ok(Err(e)) => {
                warn!("Send {} failed: {}", local_id, e);
                timeline.remove(local_id);
                Err(e)
            }
            Err(_) => {
                warn!("Send {} timed out after {:?}", local_id, self.send_timeout);
                timeline.fail(local_id, "timed out")?;
                Err(ClientError::Timeout)
            }
        }
    }

    fn summary_mut(&mut self, conversation_id: Uuid) -> Option<&mut ConversationSummary> {
        self.conversations
            .iter_mut()
            .find(|c| c.conversation.id == conversation_id)
    }

    /// Move a conversation with fresh activity to the top of the list.
    fn bump(&mut self, conversation_id: Uuid) {
        if let Some(index) = self
            .conversations
            .iter()
            .position(|c| c.conversation.id == conversation_id)
        {
            let summary = self.conversations.remove(index);
            self.conversations.insert(0, summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use pawlink_types::api::HistoryResponse;
    use pawlink_types::models::{
        Conversation, ConversationStatus, Participant, ParticipantRole, SenderRole,
    };

    use super::*;
    use crate::pending::DeliveryState;

    const ME: &str = "ann@example.com";
    const OWNER: &str = "olga@example.com";

    #[derive(Default)]
    struct Backend {
        conversations: Vec<ConversationSummary>,
        messages: HashMap<Uuid, Vec<Message>>,
        mark_read_calls: Vec<Uuid>,
        fail_sends: bool,
        send_delay: Option<Duration>,
    }

    #[derive(Clone, Default)]
    struct FakeApi(Arc<Mutex<Backend>>);

    impl ChatApi for FakeApi {
        async fn list_conversations(
            &self,
            _email: &str,
        ) -> Result<Vec<ConversationSummary>, ClientError> {
            Ok(self.0.lock().unwrap().conversations.clone())
        }

        async fn history(
            &self,
            conversation_id: Uuid,
            _email: &str,
        ) -> Result<HistoryResponse, ClientError> {
            let backend = self.0.lock().unwrap();
            let conversation = backend
                .conversations
                .iter()
                .find(|c| c.conversation.id == conversation_id)
                .map(|c| c.conversation.clone())
                .ok_or(ClientError::Api {
                    status: 404,
                    code: "not_found".into(),
                    message: "no such conversation".into(),
                })?;
            Ok(HistoryResponse {
                messages: backend.messages.get(&conversation_id).cloned().unwrap_or_default(),
                conversation,
            })
        }

        async fn send_message(&self, req: SendMessageRequest) -> Result<Message, ClientError> {
            let delay = self.0.lock().unwrap().send_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut backend = self.0.lock().unwrap();
            if backend.fail_sends {
                return Err(ClientError::Api {
                    status: 403,
                    code: "forbidden".into(),
                    message: "not a participant".into(),
                });
            }
            let message = message_from(req.conversation_id, &req.sender_email, &req.content);
            backend
                .messages
                .entry(req.conversation_id)
                .or_default()
                .push(message.clone());
            Ok(message)
        }

        async fn mark_read(&self, conversation_id: Uuid, _email: &str) -> Result<u64, ClientError> {
            self.0.lock().unwrap().mark_read_calls.push(conversation_id);
            Ok(0)
        }
    }

    #[derive(Debug, PartialEq)]
    enum Cmd {
        Join(Uuid),
        JoinAll(usize),
        Leave(Uuid),
    }

    #[derive(Clone, Default)]
    struct FakeLink(Arc<Mutex<Vec<Cmd>>>);

    impl RoomLink for FakeLink {
        fn join(&self, conversation_id: Uuid) -> Result<(), ClientError> {
            self.0.lock().unwrap().push(Cmd::Join(conversation_id));
            Ok(())
        }

        fn join_all(&self, conversation_ids: Vec<Uuid>) -> Result<(), ClientError> {
            self.0.lock().unwrap().push(Cmd::JoinAll(conversation_ids.len()));
            Ok(())
        }

        fn leave(&self, conversation_id: Uuid) -> Result<(), ClientError> {
            self.0.lock().unwrap().push(Cmd::Leave(conversation_id));
            Ok(())
        }
    }

    fn message_from(conversation_id: Uuid, from: &str, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_role: if from == ME { SenderRole::Requester } else { SenderRole::Owner },
            sender_email: from.into(),
            sender_name: if from == ME { "Ann".into() } else { "Olga".into() },
            content: content.into(),
            created_at: Utc::now(),
            read: false,
        }
    }

    fn summary(pet_name: &str, unread_count: u64) -> ConversationSummary {
        ConversationSummary {
            conversation: Conversation {
                id: Uuid::new_v4(),
                adoption_request_id: Uuid::new_v4(),
                pet_name: pet_name.into(),
                requester: Participant { email: ME.into(), name: "Ann".into() },
                owner: Participant { email: OWNER.into(), name: "Olga".into() },
                last_message: None,
                status: ConversationStatus::Active,
                created_at: Utc::now(),
            },
            unread_count,
            user_role: ParticipantRole::Requester,
        }
    }

    fn session(api: &FakeApi, link: &FakeLink) -> ChatSession<FakeApi, FakeLink> {
        ChatSession::new(
            api.clone(),
            link.clone(),
            Identity { email: ME.into(), name: "Ann".into() },
        )
    }

    fn backend_with(convs: &[&ConversationSummary]) -> FakeApi {
        let api = FakeApi::default();
        api.0.lock().unwrap().conversations = convs.iter().map(|c| (*c).clone()).collect();
        api
    }

    #[tokio::test]
    async fn sync_joins_every_room_and_seeds_unread() {
        let bella = summary("Bella", 2);
        let max = summary("Max", 1);
        let api = backend_with(&[&bella, &max]);
        let link = FakeLink::default();
        let mut chat = session(&api, &link);

        chat.sync().await.unwrap();

        assert_eq!(chat.conversations().len(), 2);
        assert_eq!(chat.notifications().total_unread(), 3);
        assert_eq!(*link.0.lock().unwrap(), vec![Cmd::JoinAll(2)]);
    }

    #[tokio::test]
    async fn opening_marks_read_and_keeps_background_rooms() {
        let bella = summary("Bella", 2);
        let max = summary("Max", 0);
        let (bella_id, max_id) = (bella.conversation.id, max.conversation.id);
        let api = backend_with(&[&bella, &max]);
        let link = FakeLink::default();
        let mut chat = session(&api, &link);
        chat.sync().await.unwrap();

        chat.open(bella_id).await.unwrap();
        chat.open(max_id).await.unwrap();

        assert_eq!(chat.notifications().unread_for(bella_id), 0);
        assert_eq!(api.0.lock().unwrap().mark_read_calls, vec![bella_id, max_id]);
        // Both rooms came from the bulk join, so neither is left.
        assert!(!link.0.lock().unwrap().iter().any(|c| matches!(c, Cmd::Leave(_))));
    }

    #[tokio::test]
    async fn message_for_other_conversation_becomes_notification() {
        let bella = summary("Bella", 0);
        let max = summary("Max", 0);
        let (bella_id, max_id) = (bella.conversation.id, max.conversation.id);
        let api = backend_with(&[&bella, &max]);
        let link = FakeLink::default();
        let mut chat = session(&api, &link);
        chat.sync().await.unwrap();
        chat.open(bella_id).await.unwrap();

        let incoming = message_from(max_id, OWNER, "Max is ready for a visit");
        chat.handle_event(GatewayEvent::Message(incoming.clone())).await.unwrap();
        // Redelivery of the same message is not counted twice
        chat.handle_event(GatewayEvent::Message(incoming)).await.unwrap();

        assert_eq!(chat.notifications().unread_for(max_id), 1);
        assert_eq!(chat.conversations()[0].conversation.id, max_id);
        assert_eq!(chat.conversations()[0].unread_count, 1);
        assert_eq!(chat.active().map(Timeline::len), Some(0));
    }

    #[tokio::test]
    async fn message_for_open_conversation_is_shown_and_read() {
        let bella = summary("Bella", 0);
        let bella_id = bella.conversation.id;
        let api = backend_with(&[&bella]);
        let link = FakeLink::default();
        let mut chat = session(&api, &link);
        chat.sync().await.unwrap();
        chat.open(bella_id).await.unwrap();

        let incoming = message_from(bella_id, OWNER, "Hello Ann");
        chat.handle_event(GatewayEvent::Message(incoming)).await.unwrap();

        assert_eq!(chat.active().map(Timeline::len), Some(1));
        assert_eq!(chat.notifications().total_unread(), 0);
        assert_eq!(api.0.lock().unwrap().mark_read_calls, vec![bella_id, bella_id]);
    }

    #[tokio::test]
    async fn send_confirms_and_echo_does_not_duplicate() {
        let bella = summary("Bella", 0);
        let bella_id = bella.conversation.id;
        let api = backend_with(&[&bella]);
        let link = FakeLink::default();
        let mut chat = session(&api, &link);
        chat.sync().await.unwrap();
        chat.open(bella_id).await.unwrap();

        let stored = chat.send("  Is Bella good with cats?  ").await.unwrap();
        assert_eq!(stored.content, "Is Bella good with cats?");

        chat.handle_event(GatewayEvent::Message(stored)).await.unwrap();
        let timeline = chat.active().unwrap();
        assert_eq!(timeline.len(), 1);
        assert!(timeline.entries()[0].message().is_some());
        // Own messages are never marked read on arrival
        assert_eq!(api.0.lock().unwrap().mark_read_calls.len(), 1);
    }

    #[tokio::test]
    async fn rejected_send_is_removed() {
        let bella = summary("Bella", 0);
        let api = backend_with(&[&bella]);
        api.0.lock().unwrap().fail_sends = true;
        let link = FakeLink::default();
        let mut chat = session(&api, &link);
        chat.sync().await.unwrap();
        chat.open(bella.conversation.id).await.unwrap();

        let err = chat.send("hello").await.unwrap_err();
        assert!(err.is_forbidden());
        assert_eq!(chat.active().map(Timeline::len), Some(0));
    }

    #[tokio::test]
    async fn timed_out_send_can_be_retried() {
        let bella = summary("Bella", 0);
        let api = backend_with(&[&bella]);
        api.0.lock().unwrap().send_delay = Some(Duration::from_secs(5));
        let link = FakeLink::default();
        let mut chat = session(&api, &link).with_send_timeout(Duration::from_millis(20));
        chat.sync().await.unwrap();
        chat.open(bella.conversation.id).await.unwrap();

        let err = chat.send("hello").await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout));

        let local_id = match &chat.active().unwrap().entries()[0] {
            TimelineEntry::Outgoing(out) => {
                assert!(matches!(out.state, DeliveryState::Failed { .. }));
                out.local_id.clone()
            }
            other => panic!("unexpected entry {:?}", other),
        };

        api.0.lock().unwrap().send_delay = None;
        let stored = chat.retry(&local_id).await.unwrap();
        assert_eq!(stored.content, "hello");
        assert!(chat.active().unwrap().entries()[0].message().is_some());
    }

    #[tokio::test]
    async fn send_requires_content_and_open_conversation() {
        let api = FakeApi::default();
        let link = FakeLink::default();
        let mut chat = session(&api, &link);

        assert!(matches!(chat.send("   ").await, Err(ClientError::EmptyMessage)));
        assert!(matches!(chat.send("hi").await, Err(ClientError::NoActiveConversation)));
    }

    #[tokio::test]
    async fn read_receipt_from_owner_marks_own_messages() {
        let bella = summary("Bella", 0);
        let bella_id = bella.conversation.id;
        let api = backend_with(&[&bella]);
        let link = FakeLink::default();
        let mut chat = session(&api, &link);
        chat.sync().await.unwrap();
        chat.open(bella_id).await.unwrap();
        chat.send("hi").await.unwrap();

        chat.handle_event(GatewayEvent::Read {
            conversation_id: bella_id,
            reader_email: OWNER.into(),
        })
        .await
        .unwrap();

        let read = chat.active().unwrap().entries()[0].message().map(|m| m.read);
        assert_eq!(read, Some(true));
    }

    #[tokio::test]
    async fn unknown_conversation_triggers_refresh() {
        let api = FakeApi::default();
        let link = FakeLink::default();
        let mut chat = session(&api, &link);
        chat.sync().await.unwrap();

        // Owner approved a new request after our last refresh
        let rex = summary("Rex", 1);
        let rex_id = rex.conversation.id;
        api.0.lock().unwrap().conversations.push(rex);

        let incoming = message_from(rex_id, OWNER, "Welcome!");
        chat.handle_event(GatewayEvent::Message(incoming)).await.unwrap();

        assert_eq!(chat.conversations().len(), 1);
        assert_eq!(chat.notifications().unread_for(rex_id), 1);
        assert_eq!(*link.0.lock().unwrap(), vec![Cmd::JoinAll(0), Cmd::JoinAll(1)]);
    }

    #[tokio::test]
    async fn refreshed_conversation_is_not_counted_twice() {
        let api = FakeApi::default();
        let link = FakeLink::default();
        let mut chat = session(&api, &link);
        chat.sync().await.unwrap();

        // The server stored the message before fanning it out, so the list
        // fetched on arrival already counts it.
        let rex = summary("Rex", 1);
        let rex_id = rex.conversation.id;
        api.0.lock().unwrap().conversations.push(rex);

        let incoming = message_from(rex_id, OWNER, "Welcome!");
        chat.handle_event(GatewayEvent::Message(incoming.clone())).await.unwrap();
        chat.handle_event(GatewayEvent::Message(incoming)).await.unwrap();

        assert_eq!(chat.notifications().unread_for(rex_id), 1);
        assert_eq!(chat.conversations()[0].unread_count, 1);
        assert_eq!(chat.notifications().recent().count(), 1);
    }

    #[tokio::test]
    async fn reconnect_rejoins_and_reloads_open_conversation() {
        let bella = summary("Bella", 0);
        let bella_id = bella.conversation.id;
        let api = backend_with(&[&bella]);
        let link = FakeLink::default();
        let mut chat = session(&api, &link);
        chat.sync().await.unwrap();
        chat.open(bella_id).await.unwrap();

        // Sent while we were disconnected
        let missed = message_from(bella_id, OWNER, "Are you still there?");
        api.0.lock().unwrap().messages.entry(bella_id).or_default().push(missed);

        chat.sync().await.unwrap();

        assert_eq!(chat.active().map(Timeline::len), Some(1));
        let cmds = link.0.lock().unwrap();
        assert_eq!(cmds.last(), Some(&Cmd::Join(bella_id)));
    }
}
