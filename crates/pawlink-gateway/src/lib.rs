//! Live channel: the room router that fans persisted events out to
//! subscribed sockets, and the per-socket connection loop.

pub mod connection;
pub mod rooms;
