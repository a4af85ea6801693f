//! Connection/Room Registry: in-memory fan-out state, destroyed on
//! disconnect. Lifecycle per connection:
//!
//!   Connecting -> Authenticated -> (JoiningRoom)* -> Disconnected
//!
//! `authenticate` registers the connection and auto-joins its personal room
//! (`user:{id}`), which private-message delivery uses without an explicit
//! join. Event/community rooms are joined explicitly and membership-checked.
//! A user may hold several simultaneous connections; all of them receive
//! fanout. Nothing here is durable — a multi-process deployment would swap
//! the room maps for a shared pub/sub layer behind `send_to_room` /
//! `send_to_user` / `live_sessions` without touching the Dispatch Engine.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use stoop_types::events::GatewayEvent;
use stoop_types::models::personal_room_key;
use stoop_types::{ChatError, SurfaceRef};

use crate::membership::MembershipProvider;

pub type ConnId = Uuid;

/// Handle returned to the connection task: its id and the frame stream the
/// send half of the socket drains.
pub struct Session {
    pub conn_id: ConnId,
    pub user_id: i64,
    pub frames: mpsc::UnboundedReceiver<GatewayEvent>,
}

struct ConnHandle {
    user_id: i64,
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rooms: HashSet<String>,
}

#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
    membership: Arc<dyn MembershipProvider>,
}

struct RegistryInner {
    conns: RwLock<HashMap<ConnId, ConnHandle>>,
    /// room key -> member connections
    rooms: RwLock<HashMap<String, HashSet<ConnId>>>,
}

impl Registry {
    pub fn new(membership: Arc<dyn MembershipProvider>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                conns: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
            }),
            membership,
        }
    }

    /// Register a pre-authenticated connection and auto-join its personal
    /// room. Connections arrive with a resolved user id; no credential
    /// checks happen here.
    pub async fn authenticate(&self, user_id: i64) -> Session {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let personal = personal_room_key(user_id);

        {
            let mut conns = self.inner.conns.write().await;
            let mut rooms = self.inner.rooms.write().await;
            conns.insert(
                conn_id,
                ConnHandle {
                    user_id,
                    tx,
                    rooms: HashSet::from([personal.clone()]),
                },
            );
            rooms.entry(personal).or_default().insert(conn_id);
        }

        debug!("connection {conn_id} authenticated as user {user_id}");
        Session {
            conn_id,
            user_id,
            frames: rx,
        }
    }

    /// Join an event/community/conversation room. `Forbidden` for
    /// non-participants, `NotFound` for a connection that never
    /// authenticated or already disconnected. Idempotent.
    pub async fn join_room(&self, conn_id: ConnId, surface: SurfaceRef) -> Result<(), ChatError> {
        let user_id = {
            let conns = self.inner.conns.read().await;
            conns
                .get(&conn_id)
                .map(|c| c.user_id)
                .ok_or(ChatError::NotFound("connection"))?
        };

        if !self.membership.is_participant(user_id, surface)? {
            return Err(ChatError::Forbidden);
        }

        let key = surface.room_key();
        let mut conns = self.inner.conns.write().await;
        let mut rooms = self.inner.rooms.write().await;
        let handle = conns
            .get_mut(&conn_id)
            .ok_or(ChatError::NotFound("connection"))?;
        handle.rooms.insert(key.clone());
        rooms.entry(key).or_default().insert(conn_id);
        Ok(())
    }

    pub async fn leave_room(&self, conn_id: ConnId, surface: SurfaceRef) -> Result<(), ChatError> {
        let key = surface.room_key();
        let mut conns = self.inner.conns.write().await;
        let mut rooms = self.inner.rooms.write().await;
        let handle = conns
            .get_mut(&conn_id)
            .ok_or(ChatError::NotFound("connection"))?;
        handle.rooms.remove(&key);
        if let Some(members) = rooms.get_mut(&key) {
            members.remove(&conn_id);
            if members.is_empty() {
                rooms.remove(&key);
            }
        }
        Ok(())
    }

    /// Release every room membership held by the connection. Safe to call
    /// for an unknown id (transport close races with explicit logout).
    pub async fn disconnect(&self, conn_id: ConnId) {
        let mut conns = self.inner.conns.write().await;
        let mut rooms = self.inner.rooms.write().await;
        let Some(handle) = conns.remove(&conn_id) else {
            return;
        };
        for key in &handle.rooms {
            if let Some(members) = rooms.get_mut(key) {
                members.remove(&conn_id);
                if members.is_empty() {
                    rooms.remove(key);
                }
            }
        }
        debug!("connection {conn_id} (user {}) disconnected", handle.user_id);
    }

    /// Deliver a frame to every live connection in a room. Send failures
    /// mean the receiving task is gone; its disconnect cleanup handles the
    /// rest.
    pub async fn send_to_room(&self, room_key: &str, event: &GatewayEvent) {
        let conns = self.inner.conns.read().await;
        let rooms = self.inner.rooms.read().await;
        let Some(members) = rooms.get(room_key) else {
            return;
        };
        for conn_id in members {
            if let Some(handle) = conns.get(conn_id) {
                let _ = handle.tx.send(event.clone());
            }
        }
    }

    /// Deliver a frame to every live session of one user (personal room).
    pub async fn send_to_user(&self, user_id: i64, event: &GatewayEvent) {
        self.send_to_room(&personal_room_key(user_id), event).await;
    }

    /// Deliver a frame to one specific connection (command acks).
    pub async fn send_to_conn(&self, conn_id: ConnId, event: GatewayEvent) {
        let conns = self.inner.conns.read().await;
        if let Some(handle) = conns.get(&conn_id) {
            let _ = handle.tx.send(event);
        }
    }

    /// Number of live connections a user currently holds. Zero means the
    /// push-token path is the sole delivery route.
    pub async fn live_sessions(&self, user_id: i64) -> usize {
        let rooms = self.inner.rooms.read().await;
        rooms
            .get(&personal_room_key(user_id))
            .map_or(0, |members| members.len())
    }
}
