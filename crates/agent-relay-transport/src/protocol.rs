//! Wire protocol for client-to-relay communication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message from client to relay.
///
/// Only `user_message` is recognized; any other tag parses to [`Unknown`]
/// (logged and ignored, not an error). A payload that fails to parse at all
/// is session-fatal.
///
/// [`Unknown`]: ClientMessage::Unknown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// New user turn text.
    UserMessage { content: String },
    /// Any unrecognized message kind.
    #[serde(other)]
    Unknown,
}

/// Liveness probe response.
///
/// Read-only; reflects the registry's current active-set size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub active_connections: usize,
    pub timestamp: DateTime<Utc>,
}

impl HealthStatus {
    /// Build a healthy probe response.
    #[must_use]
    pub fn healthy(service: impl Into<String>, active_connections: usize) -> Self {
        Self {
            status: "healthy".to_string(),
            service: service.into(),
            active_connections,
            timestamp: Utc::now(),
        }
    }
}
