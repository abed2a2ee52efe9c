//! Active-session registry with unicast and best-effort broadcast.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use agent_relay_core::EventEnvelope;
use thiserror::Error;
use uuid::Uuid;

/// Session identifier, unique for the process's lifetime.
pub type SessionId = Uuid;

/// Delivery error reported by a connection sink.
#[derive(Debug, Error)]
#[error("Connection closed")]
pub struct DeliveryError;

/// Fire-and-forget delivery handle for one session's connection.
///
/// The registry owns the sink for the connection's lifetime. `send` must not
/// block: the WebSocket transport implements it with an unbounded channel
/// whose forwarding task performs the actual write, so a failed send means
/// the connection is gone.
pub trait ConnectionSink: Send + Sync {
    /// Queue an envelope for delivery.
    ///
    /// # Errors
    /// Returns error if the connection can no longer accept writes.
    fn send(&self, envelope: EventEnvelope) -> Result<(), DeliveryError>;
}

/// Outcome of a unicast delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The envelope was handed to the session's connection.
    Sent,
    /// Delivery failed and the session was deregistered; do not retry.
    Removed,
}

/// Tracks the set of currently connected observers.
///
/// The active set is the only state shared between session tasks. Mutations
/// take the write lock; broadcast snapshots the set under the read lock and
/// iterates outside it.
#[derive(Default)]
pub struct SessionRegistry {
    active: RwLock<HashMap<SessionId, Arc<dyn ConnectionSink>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the active set and assign it an identifier.
    pub fn register(&self, sink: Arc<dyn ConnectionSink>) -> SessionId {
        let id = Uuid::new_v4();
        let mut active = self.active.write().unwrap();
        active.insert(id, sink);
        tracing::info!(
            session_id = %id,
            total_connections = active.len(),
            "Session registered"
        );
        id
    }

    /// Deliver an envelope to exactly one session.
    ///
    /// On any delivery failure the session is deregistered as a side effect
    /// and `Removed` is reported; the caller must not retry.
    pub fn unicast(&self, id: SessionId, envelope: EventEnvelope) -> Delivery {
        let sink = self.active.read().unwrap().get(&id).cloned();
        let Some(sink) = sink else {
            tracing::warn!(session_id = %id, "Unicast to unknown session");
            return Delivery::Removed;
        };

        let kind = envelope.event.kind();
        if let Err(e) = sink.send(envelope) {
            tracing::warn!(session_id = %id, event = kind, "Delivery failed, removing session: {e}");
            self.deregister(id);
            return Delivery::Removed;
        }
        tracing::debug!(session_id = %id, event = kind, "Envelope delivered");
        Delivery::Sent
    }

    /// Deliver an envelope to every active session, best effort.
    ///
    /// Sessions whose delivery fails are deregistered in a single pass
    /// without aborting delivery to the rest.
    pub fn broadcast(&self, envelope: &EventEnvelope) {
        // Snapshot-then-iterate: sends happen outside the lock.
        let snapshot: Vec<(SessionId, Arc<dyn ConnectionSink>)> = self
            .active
            .read()
            .unwrap()
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect();

        if snapshot.is_empty() {
            tracing::debug!("No active sessions for broadcast");
            return;
        }

        tracing::debug!(
            event = envelope.event.kind(),
            sessions = snapshot.len(),
            "Broadcasting envelope"
        );

        let mut broken = Vec::new();
        for (id, sink) in snapshot {
            if let Err(e) = sink.send(envelope.clone()) {
                tracing::warn!(session_id = %id, "Broadcast delivery failed, marking for removal: {e}");
                broken.push(id);
            }
        }

        for id in broken {
            self.deregister(id);
        }
    }

    /// Remove a session from the active set.
    ///
    /// Idempotent: removing an absent session is a no-op, logged as a benign
    /// anomaly. Returns whether the session was present.
    pub fn deregister(&self, id: SessionId) -> bool {
        let mut active = self.active.write().unwrap();
        if active.remove(&id).is_some() {
            tracing::info!(
                session_id = %id,
                remaining_connections = active.len(),
                "Session deregistered"
            );
            true
        } else {
            tracing::warn!(session_id = %id, "Deregister of session not in active set");
            false
        }
    }

    /// Number of currently active sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.read().unwrap().len()
    }
}
