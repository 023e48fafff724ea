pub mod adoptions;
pub mod conversations;
pub mod delivery;
pub mod error;
pub mod extract;
pub mod messages;
pub mod registry;
pub mod routes;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;
