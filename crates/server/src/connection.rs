//! Connection registry
//!
//! Tracks every live WebSocket connection: its outbound queue and its
//! authentication latch. Threads outlive connections, so this registry only
//! owns socket-scoped state.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use patchbay_protocol::ServerMessage;

use crate::error::RequestError;

/// Development user assigned to every authenticated connection. Token
/// verification is a stub: any non-empty token maps to this user.
pub const DEV_USER_ID: &str = "dev-user";

/// Messages queued for the per-socket writer task
#[derive(Debug)]
pub enum Outbound {
    Json(ServerMessage),
    Pong(Bytes),
}

pub type OutboundSender = mpsc::Sender<Outbound>;

#[derive(Debug)]
struct Connection {
    authenticated: bool,
    user_id: Option<String>,
    outbound: OutboundSender,
}

/// Registry of live connections keyed by a process-wide counter id
pub struct ConnectionRegistry {
    connections: DashMap<u64, Connection>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Insert a fresh, unauthenticated connection and hand back its id.
    pub fn register(&self, outbound: OutboundSender) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(
            id,
            Connection {
                authenticated: false,
                user_id: None,
                outbound,
            },
        );
        id
    }

    /// One-way latch: any non-empty token authenticates the connection as
    /// the dev user. The latch never reverts for the connection's lifetime.
    pub fn authenticate(&self, id: u64, token: Option<&str>) -> Result<String, RequestError> {
        let accepted = matches!(token, Some(t) if !t.is_empty());
        if !accepted {
            return Err(RequestError::InvalidToken);
        }

        match self.connections.get_mut(&id) {
            Some(mut conn) => {
                conn.authenticated = true;
                conn.user_id = Some(DEV_USER_ID.to_string());
                Ok(DEV_USER_ID.to_string())
            }
            None => Err(RequestError::NotAuthenticated),
        }
    }

    pub fn is_authenticated(&self, id: u64) -> bool {
        self.connections
            .get(&id)
            .map(|conn| conn.authenticated)
            .unwrap_or(false)
    }

    pub fn user_id(&self, id: u64) -> Option<String> {
        self.connections.get(&id).and_then(|conn| conn.user_id.clone())
    }

    /// Clone of the connection's outbound queue, if it is still registered.
    pub fn outbound(&self, id: u64) -> Option<OutboundSender> {
        self.connections.get(&id).map(|conn| conn.outbound.clone())
    }

    pub fn remove(&self, id: u64) {
        self.connections.remove(&id);
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
