use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use pawlink_types::events::GatewayEvent;

/// Server-assigned identity of one live socket.
pub type ConnectionId = Uuid;

/// Pushes an event to every connection currently in a conversation's room.
///
/// Delivery is best-effort and at-most-once per subscribed connection.
/// Connections that join later catch up over REST.
pub trait Fanout: Send + Sync {
    /// Returns how many connections the event was queued for.
    fn publish(&self, conversation_id: Uuid, event: GatewayEvent) -> usize;
}

/// Tracks which live connections are subscribed to which conversations.
///
/// Owned by the server process and handed to whoever needs it; there is no
/// global instance. Locks are only held for map updates, never across an
/// await.
#[derive(Clone, Default)]
pub struct RoomRouter {
    inner: Arc<RwLock<RouterState>>,
}

#[derive(Default)]
struct RouterState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<Uuid, HashSet<ConnectionId>>,
}

struct ConnectionEntry {
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rooms: HashSet<Uuid>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RouterState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RouterState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new connection. Returns its id and the queue its socket
    /// writer drains.
    pub fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.write().connections.insert(
            conn_id,
            ConnectionEntry {
                tx,
                rooms: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    /// Subscribe a connection to a conversation. Returns true if the
    /// subscription is new; joining twice is a no-op.
    pub fn join(&self, conn_id: ConnectionId, conversation_id: Uuid) -> bool {
        let mut state = self.write();
        join_locked(&mut state, conn_id, conversation_id)
    }

    /// Subscribe to many conversations at once. Returns how many were new.
    pub fn join_all(&self, conn_id: ConnectionId, conversation_ids: &[Uuid]) -> usize {
        let mut state = self.write();
        conversation_ids
            .iter()
            .filter(|id| join_locked(&mut state, conn_id, **id))
            .count()
    }

    /// Unsubscribe from one conversation. Returns true if it was subscribed.
    pub fn leave(&self, conn_id: ConnectionId, conversation_id: Uuid) -> bool {
        let mut state = self.write();
        let removed = match state.connections.get_mut(&conn_id) {
            Some(entry) => entry.rooms.remove(&conversation_id),
            None => return false,
        };
        if removed {
            remove_member(&mut state.rooms, conversation_id, conn_id);
        }
        removed
    }

    /// Drop a connection and every room membership it held. Returns the
    /// number of memberships dropped.
    pub fn disconnect(&self, conn_id: ConnectionId) -> usize {
        let mut state = self.write();
        let Some(entry) = state.connections.remove(&conn_id) else {
            return 0;
        };
        for conversation_id in &entry.rooms {
            remove_member(&mut state.rooms, *conversation_id, conn_id);
        }
        entry.rooms.len()
    }

    /// Queue an event for one connection only.
    pub fn send_to(&self, conn_id: ConnectionId, event: GatewayEvent) -> bool {
        self.read()
            .connections
            .get(&conn_id)
            .is_some_and(|entry| entry.tx.send(event).is_ok())
    }

    /// Conversations a connection is subscribed to, sorted for stable output.
    pub fn subscriptions(&self, conn_id: ConnectionId) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .read()
            .connections
            .get(&conn_id)
            .map(|entry| entry.rooms.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn room_size(&self, conversation_id: Uuid) -> usize {
        self.read()
            .rooms
            .get(&conversation_id)
            .map_or(0, HashSet::len)
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }
}

impl Fanout for RoomRouter {
    fn publish(&self, conversation_id: Uuid, event: GatewayEvent) -> usize {
        let state = self.read();
        let Some(members) = state.rooms.get(&conversation_id) else {
            return 0;
        };

        let mut delivered = 0;
        for conn_id in members {
            let Some(entry) = state.connections.get(conn_id) else {
                continue;
            };
            // A closed queue means the socket is going away; its
            // disconnect cleans the membership up.
            if entry.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!("Dropping event for closing connection {}", conn_id);
            }
        }
        delivered
    }
}

fn join_locked(state: &mut RouterState, conn_id: ConnectionId, conversation_id: Uuid) -> bool {
    let Some(entry) = state.connections.get_mut(&conn_id) else {
        return false;
    };
    if !entry.rooms.insert(conversation_id) {
        return false;
    }
    state.rooms.entry(conversation_id).or_default().insert(conn_id);
    true
}

fn remove_member(
    rooms: &mut HashMap<Uuid, HashSet<ConnectionId>>,
    conversation_id: Uuid,
    conn_id: ConnectionId,
) {
    if let Some(members) = rooms.get_mut(&conversation_id) {
        members.remove(&conn_id);
        if members.is_empty() {
            rooms.remove(&conversation_id);
        }
    }
}
