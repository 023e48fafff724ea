use axum::{Json, extract::State, response::IntoResponse};
use uuid::Uuid;

use pawlink_types::api::{
    AdoptionLookupQuery, ConversationListQuery, HistoryQuery, MarkReadRequest, MarkReadResponse,
};

use crate::delivery;
use crate::error::ChatResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::registry;
use crate::state::{AppState, MAX_HISTORY_LIMIT, run_blocking};

/// GET /conversations?email=
pub async fn list_conversations(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ConversationListQuery>,
) -> ChatResult<impl IntoResponse> {
    let summaries =
        run_blocking(&state, move |s| delivery::list_conversations(&s.db, &query.email)).await?;
    Ok(Json(summaries))
}

/// GET /conversations/{conversation_id}/messages?userEmail=&limit=
pub async fn get_history(
    State(state): State<AppState>,
    ApiPath(conversation_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> ChatResult<impl IntoResponse> {
    let history = run_blocking(&state, move |s| {
        let limit = query.limit.unwrap_or(s.history_limit).clamp(1, MAX_HISTORY_LIMIT);
        delivery::list_messages(&s.db, conversation_id, query.user_email.as_deref(), limit)
    })
    .await?;
    Ok(Json(history))
}

/// PUT /conversations/{conversation_id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    ApiPath(conversation_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<MarkReadRequest>,
) -> ChatResult<impl IntoResponse> {
    let updated = run_blocking(&state, move |s| {
        delivery::mark_read(&s.db, s.fanout.as_ref(), conversation_id, &req.user_email)
    })
    .await?;
    Ok(Json(MarkReadResponse {
        success: true,
        updated,
    }))
}

/// GET /conversations/by-adoption/{adoption_id}?userEmail=
///
/// Responds with `null` while the adoption request is not approved; that is
/// the normal empty state, not an error.
pub async fn by_adoption(
    State(state): State<AppState>,
    ApiPath(adoption_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<AdoptionLookupQuery>,
) -> ChatResult<impl IntoResponse> {
    let summary = run_blocking(&state, move |s| {
        match registry::resolve_for_adoption(&s.db, adoption_id)? {
            Some(conversation) => {
                let access = delivery::authorize(conversation, &query.user_email)?;
                delivery::summarize(&s.db, access).map(Some)
            }
            None => Ok(None),
        }
    })
    .await?;
    Ok(Json(summary))
}
