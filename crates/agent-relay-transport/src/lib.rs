//! WebSocket transport and session lifecycle for the agent relay.
//!
//! Provides:
//! - Wire protocol for inbound client messages
//! - WebSocket session lifecycle (connect, initialize, message loop, teardown)
//! - Liveness probe and router builder

pub mod protocol;
pub mod websocket;

pub use protocol::{ClientMessage, HealthStatus};
pub use websocket::{RelayState, relay_router};
