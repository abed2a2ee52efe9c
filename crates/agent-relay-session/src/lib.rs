//! Session registry and execution tracking for the agent relay.
//!
//! Provides:
//! - `SessionRegistry` - Active connection set with unicast/broadcast delivery
//! - `ExecutionTracker` - Per-session state machine classifying engine
//!   updates into lifecycle events

pub mod registry;
pub mod tracker;

pub use registry::{ConnectionSink, Delivery, DeliveryError, SessionId, SessionRegistry};
pub use tracker::{ExecutionTracker, TrackerError};
