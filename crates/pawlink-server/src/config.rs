use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use pawlink_api::state::DEFAULT_HISTORY_LIMIT;

/// Server settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub history_limit: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("PAWLINK_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("PAWLINK_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PAWLINK_PORT is not a port number: '{}'", raw))?,
            None => 3000,
        };
        let db_path = lookup("PAWLINK_DB_PATH")
            .unwrap_or_else(|| "pawlink.db".into())
            .into();
        let history_limit = match lookup("PAWLINK_HISTORY_LIMIT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PAWLINK_HISTORY_LIMIT is not a number: '{}'", raw))?,
            None => DEFAULT_HISTORY_LIMIT,
        };

        Ok(Self {
            host,
            port,
            db_path,
            history_limit,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
