use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a structured error
    #[error("{code} ({status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("request timed out")]
    Timeout,

    #[error("gateway: {0}")]
    Gateway(String),

    #[error("no conversation is open")]
    NoActiveConversation,

    #[error("message is empty")]
    EmptyMessage,

    #[error("no local message with id {0}")]
    UnknownPendingMessage(String),

    #[error("cannot {action} a message that is {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
}

impl ClientError {
    /// True for the server's "not a participant" refusal.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Api { status: 403, .. })
    }
}
