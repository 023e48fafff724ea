//! Delivery and read tracking: persist messages, fan them out to the
//! conversation's room, and keep read flags and unread counts.

use tracing::{debug, warn};
use uuid::Uuid;

use pawlink_db::Database;
use pawlink_db::models::NewMessage;
use pawlink_gateway::rooms::Fanout;
use pawlink_types::api::{ConversationSummary, HistoryResponse};
use pawlink_types::events::GatewayEvent;
use pawlink_types::models::{Conversation, Message, ParticipantRole};

use crate::error::{ChatError, ChatResult};

/// Longest message body accepted, in characters.
pub const MAX_CONTENT_CHARS: usize = 4000;

/// A conversation together with the caller's slot in it. Resolved once per
/// request and passed along instead of re-comparing emails.
pub struct ParticipantAccess {
    pub conversation: Conversation,
    pub role: ParticipantRole,
}

impl ParticipantAccess {
    /// The caller's email as captured in the conversation snapshot.
    pub fn email(&self) -> &str {
        &self.conversation.participant(self.role).email
    }
}

pub fn load_conversation(db: &Database, conversation_id: Uuid) -> ChatResult<Conversation> {
    let row = db
        .get_conversation(&conversation_id.to_string())?
        .ok_or_else(|| ChatError::NotFound(format!("conversation {} not found", conversation_id)))?;
    Ok(Conversation::try_from(row)?)
}

/// Resolve which slot `email` holds. Anyone else is refused.
pub fn authorize(conversation: Conversation, email: &str) -> ChatResult<ParticipantAccess> {
    match conversation.role_of(email) {
        Some(role) => Ok(ParticipantAccess { conversation, role }),
        None => {
            warn!(
                "Refusing {} on conversation {}: not a participant",
                email, conversation.id
            );
            Err(ChatError::Forbidden(format!(
                "{} is not a participant of conversation {}",
                email, conversation.id
            )))
        }
    }
}

/// Persist a message from one of the two participants and push it to the
/// conversation's room. Fan-out cannot fail the send.
pub fn send_message(
    db: &Database,
    fanout: &dyn Fanout,
    conversation_id: Uuid,
    sender_email: &str,
    sender_name: &str,
    content: &str,
) -> ChatResult<Message> {
    let access = authorize(load_conversation(db, conversation_id)?, sender_email)?;

    let content = content.trim();
    if content.is_empty() {
        return Err(ChatError::InvalidInput("message content is empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ChatError::InvalidInput(format!(
            "message content exceeds {} characters",
            MAX_CONTENT_CHARS
        )));
    }

    let participant = access.conversation.participant(access.role);
    let sender_name = match sender_name.trim() {
        "" => participant.name.clone(),
        name => name.to_string(),
    };

    let row = db.insert_message(&NewMessage {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        sender_role: access.role.into(),
        sender_email: participant.email.clone(),
        sender_name,
        content: content.to_string(),
        read: false,
    })?;
    let message = Message::try_from(row)?;

    let delivered = fanout.publish(conversation_id, GatewayEvent::Message(message.clone()));
    debug!(
        "Message {} in {} from {} delivered live to {} connections",
        message.id, conversation_id, access.role, delivered
    );

    Ok(message)
}

/// Mark everything the other side sent as read. Emits a `Read` event only
/// when something changed. Returns the number of messages marked.
pub fn mark_read(
    db: &Database,
    fanout: &dyn Fanout,
    conversation_id: Uuid,
    reader_email: &str,
) -> ChatResult<u64> {
    let access = authorize(load_conversation(db, conversation_id)?, reader_email)?;

    let updated = db.mark_read(&conversation_id.to_string(), access.email())?;
    if updated > 0 {
        fanout.publish(
            conversation_id,
            GatewayEvent::Read {
                conversation_id,
                reader_email: access.email().to_string(),
            },
        );
        debug!(
            "{} read {} messages in {}",
            access.role, updated, conversation_id
        );
    }

    Ok(updated)
}

/// Every conversation the user takes part in, newest activity first, with
/// the user's unread count and role.
pub fn list_conversations(db: &Database, user_email: &str) -> ChatResult<Vec<ConversationSummary>> {
    let user_email = user_email.trim();
    if user_email.is_empty() {
        return Err(ChatError::InvalidInput("email is required".into()));
    }

    let mut summaries = Vec::new();
    for (row, unread_count) in db.list_conversations_for(user_email)? {
        let conversation = Conversation::try_from(row)?;
        let Some(user_role) = conversation.role_of(user_email) else {
            warn!(
                "Conversation {} matched {} in SQL but not by slot",
                conversation.id, user_email
            );
            continue;
        };
        summaries.push(ConversationSummary {
            conversation,
            unread_count,
            user_role,
        });
    }

    Ok(summaries)
}

/// Annotate one conversation for a participant.
pub fn summarize(db: &Database, access: ParticipantAccess) -> ChatResult<ConversationSummary> {
    let unread_count = db.unread_count(&access.conversation.id.to_string(), access.email())?;
    Ok(ConversationSummary {
        conversation: access.conversation,
        unread_count,
        user_role: access.role,
    })
}

/// Message history, oldest first. When `viewer_email` is given it must be a
/// participant.
pub fn list_messages(
    db: &Database,
    conversation_id: Uuid,
    viewer_email: Option<&str>,
    limit: u32,
) -> ChatResult<HistoryResponse> {
    let mut conversation = load_conversation(db, conversation_id)?;
    if let Some(email) = viewer_email {
        conversation = authorize(conversation, email)?.conversation;
    }

    let messages = db
        .get_messages(&conversation_id.to_string(), limit)?
        .into_iter()
        .map(Message::try_from)
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(HistoryResponse {
        messages,
        conversation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ensure_conversation;
    use crate::testing::{OWNER, RecordingFanout, REQUESTER, seed_adoption};
    use pawlink_types::models::{AdoptionStatus, SenderRole};

    fn setup() -> (Database, RecordingFanout, Conversation) {
        let db = Database::open_in_memory().unwrap();
        let adoption = seed_adoption(&db, AdoptionStatus::Approved);
        let conv = ensure_conversation(&db, adoption).unwrap();
        (db, RecordingFanout::default(), conv)
    }

    fn unread_for(db: &Database, email: &str) -> u64 {
        list_conversations(db, email).unwrap()[0].unread_count
    }

    #[test]
    fn bella_scenario() {
        let (db, fanout, conv) = setup();

        let hi = send_message(&db, &fanout, conv.id, REQUESTER, "Ann", "Hi!").unwrap();
        assert_eq!(hi.sender_role, SenderRole::Requester);
        assert!(!hi.read);

        let owner_view = &list_conversations(&db, OWNER).unwrap()[0];
        assert_eq!(owner_view.user_role, ParticipantRole::Owner);
        assert_eq!(owner_view.unread_count, 1);
        let last = owner_view.conversation.last_message.as_ref().unwrap();
        assert_eq!(last.sender_role, SenderRole::Requester);
        assert_eq!(last.content, "Hi!");

        let history = list_messages(&db, conv.id, Some(OWNER), 100).unwrap();
        assert_eq!(history.messages.len(), 2);

        assert_eq!(mark_read(&db, &fanout, conv.id, OWNER).unwrap(), 1);
        assert_eq!(unread_for(&db, OWNER), 0);

        let events = fanout.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1, GatewayEvent::Message(hi));
        assert_eq!(
            events[1].1,
            GatewayEvent::Read {
                conversation_id: conv.id,
                reader_email: OWNER.to_string(),
            }
        );
    }

    #[test]
    fn stranger_is_forbidden_and_nothing_is_stored() {
        let (db, fanout, conv) = setup();

        let err = send_message(&db, &fanout, conv.id, "stranger@example.com", "Eve", "hello")
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        assert_eq!(db.count_messages(&conv.id.to_string()).unwrap(), 1);
        assert!(fanout.events().is_empty());
    }

    #[test]
    fn blank_content_is_invalid() {
        let (db, fanout, conv) = setup();

        let err = send_message(&db, &fanout, conv.id, OWNER, "Olga", " \n\t ").unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));

        let long = "x".repeat(MAX_CONTENT_CHARS + 1);
        let err = send_message(&db, &fanout, conv.id, OWNER, "Olga", &long).unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
    }

    #[test]
    fn unknown_conversation_is_not_found() {
        let (db, fanout, _) = setup();
        let err = send_message(&db, &fanout, Uuid::new_v4(), OWNER, "Olga", "hi").unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[test]
    fn second_mark_read_is_a_silent_no_op() {
        let (db, fanout, conv) = setup();
        for i in 0..3 {
            send_message(&db, &fanout, conv.id, OWNER, "Olga", &format!("update {}", i)).unwrap();
        }
        assert_eq!(unread_for(&db, REQUESTER), 3);

        assert_eq!(mark_read(&db, &fanout, conv.id, REQUESTER).unwrap(), 3);
        assert_eq!(unread_for(&db, REQUESTER), 0);
        let before = fanout.events().len();

        assert_eq!(mark_read(&db, &fanout, conv.id, REQUESTER).unwrap(), 0);
        assert_eq!(fanout.events().len(), before);
    }

    #[test]
    fn own_messages_never_count_as_unread() {
        let (db, fanout, conv) = setup();
        send_message(&db, &fanout, conv.id, REQUESTER, "Ann", "one").unwrap();
        send_message(&db, &fanout, conv.id, REQUESTER, "Ann", "two").unwrap();

        assert_eq!(unread_for(&db, REQUESTER), 0);
        assert_eq!(unread_for(&db, OWNER), 2);
    }

    #[test]
    fn sender_identity_comes_from_the_slot() {
        let (db, fanout, conv) = setup();
        let msg = send_message(&db, &fanout, conv.id, "  ANN@example.com ", "", "hey").unwrap();

        assert_eq!(msg.sender_email, REQUESTER);
        assert_eq!(msg.sender_name, "Ann");
        assert_eq!(msg.content, "hey");
    }

    #[test]
    fn history_preserves_send_order() {
        let (db, fanout, conv) = setup();
        let sent: Vec<Message> = (0..10)
            .map(|i| {
                let who = if i % 3 == 0 { OWNER } else { REQUESTER };
                send_message(&db, &fanout, conv.id, who, "", &format!("n{}", i)).unwrap()
            })
            .collect();

        let history = list_messages(&db, conv.id, None, 100).unwrap();
        let ids: Vec<Uuid> = history.messages[1..].iter().map(|m| m.id).collect();
        assert_eq!(ids, sent.iter().map(|m| m.id).collect::<Vec<_>>());
        assert!(history.messages.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn history_refuses_strangers() {
        let (db, _, conv) = setup();
        let err = list_messages(&db, conv.id, Some("eve@example.com"), 10).unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
    }

    #[test]
    fn list_sorts_by_latest_activity() {
        let db = Database::open_in_memory().unwrap();
        let fanout = RecordingFanout::default();
        let first = ensure_conversation(&db, seed_adoption(&db, AdoptionStatus::Approved)).unwrap();
        let second = ensure_conversation(&db, seed_adoption(&db, AdoptionStatus::Approved)).unwrap();

        send_message(&db, &fanout, first.id, REQUESTER, "Ann", "bump").unwrap();

        let ids: Vec<Uuid> = list_conversations(&db, REQUESTER)
            .unwrap()
            .iter()
            .map(|s| s.conversation.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn list_requires_an_email() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(list_conversations(&db, "  "), Err(ChatError::InvalidInput(_))));
    }
}
