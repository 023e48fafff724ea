use axum::{Json, extract::State, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use pawlink_types::api::{AdoptionStatusRequest, AdoptionStatusResponse};
use pawlink_types::models::AdoptionStatus;

use crate::error::{ChatError, ChatResult};
use crate::extract::{ApiJson, ApiPath};
use crate::registry;
use crate::state::{AppState, run_blocking};

/// PUT /adoptions/{adoption_id}/status
///
/// Hook for the adoption service: records the new status and, on approval,
/// makes sure the adopter and owner have a conversation. Owner data problems
/// are reported even though the status change itself was stored.
pub async fn update_status(
    State(state): State<AppState>,
    ApiPath(adoption_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<AdoptionStatusRequest>,
) -> ChatResult<impl IntoResponse> {
    let status = req.status;
    let conversation_id = run_blocking(&state, move |s| {
        if !s.db.set_adoption_status(&adoption_id.to_string(), status)? {
            return Err(ChatError::NotFound(format!(
                "adoption request {} not found",
                adoption_id
            )));
        }
        info!("Adoption {} is now {}", adoption_id, status);

        match status {
            AdoptionStatus::Approved => {
                registry::ensure_conversation(&s.db, adoption_id).map(|c| Some(c.id))
            }
            _ => Ok(None),
        }
    })
    .await?;

    Ok(Json(AdoptionStatusResponse {
        adoption_id,
        status,
        conversation_id,
    }))
}
