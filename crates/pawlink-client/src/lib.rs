//! Client side of PawLink chat: keeps one live connection, mirrors the
//! user's conversations, and reconciles optimistic sends with the server.

pub mod error;
pub mod notifications;
pub mod pending;
pub mod session;
pub mod timeline;
pub mod transport;

pub use error::ClientError;
pub use session::{ChatSession, Identity};
