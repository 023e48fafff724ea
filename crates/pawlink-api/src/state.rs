use std::sync::Arc;

use tracing::error;

use pawlink_db::Database;
use pawlink_gateway::rooms::Fanout;

use crate::error::{ChatError, ChatResult};

/// Default number of messages returned by a history fetch.
pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

/// Upper bound a caller may request with `?limit=`.
pub const MAX_HISTORY_LIMIT: u32 = 500;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub fanout: Arc<dyn Fanout>,
    pub history_limit: u32,
}

impl AppStateInner {
    pub fn new(db: Database, fanout: Arc<dyn Fanout>) -> Self {
        Self {
            db,
            fanout,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        self
    }
}

/// Run blocking chat work (SQLite) off the async runtime.
pub async fn run_blocking<F, T>(state: &AppState, f: F) -> ChatResult<T>
where
    F: FnOnce(&AppStateInner) -> ChatResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ChatError::Storage(anyhow::anyhow!("blocking task failed: {}", e))
        })?
}
