//! Session registry: live connections and the document each one has open.
//!
//! Each session owns a bounded outbound queue. Delivery is at-most-once: a
//! message that does not fit, or whose receiver is gone, is dropped.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::ServerMessage;
use crate::document::DocumentId;

pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A connection's association with the document it is viewing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub active_document_id: Option<DocumentId>,
}

/// Receiving end of a session's outbound queue.
pub type Outbox = mpsc::Receiver<Arc<ServerMessage>>;

struct Entry {
    session: Session,
    outbox: mpsc::Sender<Arc<ServerMessage>>,
}

pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Entry>,
    outbox_capacity: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOX_CAPACITY)
    }
}

impl SessionRegistry {
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            outbox_capacity: outbox_capacity.max(1),
        }
    }

    /// Create a session with no active document. It takes part in fan-out
    /// as soon as this returns.
    pub fn register(&self, connection_id: ConnectionId) -> (Session, Outbox) {
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        let session = Session {
            connection_id,
            active_document_id: None,
        };
        self.sessions.insert(
            connection_id,
            Entry {
                session: session.clone(),
                outbox: tx,
            },
        );
        debug!(%connection_id, "session registered");
        (session, rx)
    }

    pub fn set_active_document(&self, connection_id: ConnectionId, document_id: DocumentId) {
        if let Some(mut entry) = self.sessions.get_mut(&connection_id) {
            entry.session.active_document_id = Some(document_id);
        }
    }

    pub fn clear_active_document(&self, connection_id: ConnectionId) {
        if let Some(mut entry) = self.sessions.get_mut(&connection_id) {
            entry.session.active_document_id = None;
        }
    }

    /// No-op when the session is already gone.
    pub fn unregister(&self, connection_id: ConnectionId) {
        if self.sessions.remove(&connection_id).is_some() {
            debug!(%connection_id, "session unregistered");
        }
    }

    pub fn list_interested(&self, document_id: DocumentId) -> HashSet<ConnectionId> {
        self.sessions
            .iter()
            .filter(|entry| entry.session.active_document_id == Some(document_id))
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn connections(&self) -> HashSet<ConnectionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn session(&self, connection_id: ConnectionId) -> Option<Session> {
        self.sessions.get(&connection_id).map(|entry| entry.session.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Enqueue without waiting. Returns whether the message was accepted.
    pub fn deliver(&self, connection_id: ConnectionId, message: Arc<ServerMessage>) -> bool {
        let Some(outbox) = self
            .sessions
            .get(&connection_id)
            .map(|entry| entry.outbox.clone())
        else {
            return false;
        };

        match outbox.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%connection_id, "outbox full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}
