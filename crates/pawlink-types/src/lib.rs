//! Wire and domain types shared by the PawLink server crates and the client
//! library.

pub mod api;
pub mod events;
pub mod models;
