use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use pawlink_types::api::SendMessageRequest;

use crate::delivery;
use crate::error::ChatResult;
use crate::extract::ApiJson;
use crate::state::{AppState, run_blocking};

/// POST /messages
///
/// The sender is identified only by `senderEmail` in the body, which must
/// match one of the conversation's two participants.
pub async fn send_message(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> ChatResult<impl IntoResponse> {
    let message = run_blocking(&state, move |s| {
        delivery::send_message(
            &s.db,
            s.fanout.as_ref(),
            req.conversation_id,
            &req.sender_email,
            &req.sender_name,
            &req.content,
        )
    })
    .await?;

    Ok((StatusCode::CREATED, Json(message)))
}
