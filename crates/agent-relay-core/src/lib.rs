//! Core types for the agent execution-event relay.
//!
//! This crate provides the fundamental building blocks:
//! - `EventEnvelope` / `Event` - Typed, timestamped wire events
//! - `Turn` - Conversation history units
//! - `ReasoningEngine` - Interface to the external agent pipeline
//! - `ToolProvider` - Interface to named callable tools

pub mod engine;
pub mod envelope;
pub mod tools;
pub mod turn;

pub use engine::{EngineError, Fragment, FragmentStream, ReasoningEngine, ToolRecord};
pub use envelope::{Event, EventEnvelope, result_preview};
pub use tools::{ToolError, ToolProvider};
pub use turn::{Role, ToolInvocation, Turn};
