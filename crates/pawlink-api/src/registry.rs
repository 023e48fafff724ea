//! Conversation registry: at most one conversation per approved adoption
//! request, seeded from the request's applicant and the pet's owner.

use tracing::info;
use uuid::Uuid;

use pawlink_db::Database;
use pawlink_db::models::{AdoptionRow, NewConversation, NewMessage};
use pawlink_types::models::{AdoptionStatus, Conversation, Participant, SenderRole};

use crate::error::{ChatError, ChatResult};

/// Display name used for system-authored messages.
pub const SYSTEM_SENDER_NAME: &str = "PawLink";

pub fn welcome_text(pet_name: &str) -> String {
    format!("Chat created for adoption of {}. You can now communicate.", pet_name)
}

/// Return the conversation for an approved adoption request, creating it
/// (with its welcome message) on first call.
pub fn ensure_conversation(db: &Database, adoption_request_id: Uuid) -> ChatResult<Conversation> {
    let adoption = load_adoption(db, adoption_request_id)?;

    let status = adoption.status()?;
    if status != AdoptionStatus::Approved {
        return Err(ChatError::InvalidState(format!(
            "adoption request {} is {}, not approved",
            adoption_request_id, status
        )));
    }

    if let Some(row) = db.get_conversation_by_adoption(&adoption.id)? {
        return Ok(Conversation::try_from(row)?);
    }

    let (pet_name, owner) = owner_of(&adoption)?;
    let conversation_id = Uuid::new_v4().to_string();

    let new = NewConversation {
        id: conversation_id.clone(),
        adoption_request_id: adoption.id.clone(),
        pet_name: pet_name.clone(),
        requester_email: adoption.applicant_email.trim().to_string(),
        requester_name: adoption.applicant_name.clone(),
        owner_email: owner.email,
        owner_name: owner.name,
    };
    // Stored as already read so it never shows up as unread for either side.
    let welcome = NewMessage {
        id: Uuid::new_v4().to_string(),
        conversation_id,
        sender_role: SenderRole::System,
        sender_email: String::new(),
        sender_name: SYSTEM_SENDER_NAME.to_string(),
        content: welcome_text(&pet_name),
        read: true,
    };

    let (row, created) = db.create_conversation(&new, &welcome)?;
    if created {
        info!(
            "Conversation {} created for adoption {} ({})",
            row.id, adoption.id, pet_name
        );
    }

    Ok(Conversation::try_from(row)?)
}

/// Look up the conversation for an adoption request without failing on the
/// normal "not approved yet" case. Approved requests without a conversation
/// get one created.
pub fn resolve_for_adoption(
    db: &Database,
    adoption_request_id: Uuid,
) -> ChatResult<Option<Conversation>> {
    let adoption = load_adoption(db, adoption_request_id)?;

    if let Some(row) = db.get_conversation_by_adoption(&adoption.id)? {
        return Ok(Some(Conversation::try_from(row)?));
    }

    match adoption.status()? {
        AdoptionStatus::Approved => ensure_conversation(db, adoption_request_id).map(Some),
        _ => Ok(None),
    }
}

fn load_adoption(db: &Database, adoption_request_id: Uuid) -> ChatResult<AdoptionRow> {
    db.get_adoption_request(&adoption_request_id.to_string())?
        .ok_or_else(|| {
            ChatError::NotFound(format!("adoption request {} not found", adoption_request_id))
        })
}

/// Owner snapshot from the pet record. Missing data is an integrity error
/// and is never filled with defaults.
fn owner_of(adoption: &AdoptionRow) -> ChatResult<(String, Participant)> {
    let incomplete = |what: &str| {
        ChatError::IncompleteOwnerData(format!(
            "pet {} for adoption request {} has no {}",
            adoption.pet_id, adoption.id, what
        ))
    };

    let pet_name = adoption
        .pet_name
        .as_deref()
        .ok_or_else(|| incomplete("record"))?;
    let email = adoption
        .owner_email
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| incomplete("owner email"))?;
    let name = adoption
        .owner_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| incomplete("owner name"))?;

    Ok((
        pet_name.to_string(),
        Participant {
            email: email.to_string(),
            name: name.to_string(),
        },
    ))
}
