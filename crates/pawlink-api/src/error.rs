use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use pawlink_types::api::ErrorBody;

pub type ChatResult<T> = Result<T, ChatError>;

/// Failures of the chat operations. Every variant is returned to the REST
/// caller as-is; nothing is retried.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The adoption request is not in the state the operation needs
    #[error("{0}")]
    InvalidState(String),

    /// The pet record lacks the owner contact needed to seed a conversation
    #[error("{0}")]
    IncompleteOwnerData(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidState(_) => StatusCode::CONFLICT,
            Self::IncompleteOwnerData(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidState(_) => "invalid_state",
            Self::IncompleteOwnerData(_) => "incomplete_owner_data",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "internal_error",
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Storage(e) => {
                error!("Storage failure: {:#}", e);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: self.code().to_string(),
            message,
        };
        (self.status(), Json(body)).into_response()
    }
}
