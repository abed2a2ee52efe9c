//! Interface to the external reasoning engine.
//!
//! The relay never talks to a model directly; it consumes this interface.
//! Implementations wrap whatever pipeline actually produces turns (an LLM
//! API, an orchestration graph, a scripted stand-in for tests).

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::turn::Turn;

/// Reasoning engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine initialization failed: {0}")]
    Initialization(String),
    #[error("Streaming call failed: {0}")]
    Stream(String),
    #[error("Completion call failed: {0}")]
    Completion(String),
}

/// One incremental unit of the engine's streamed output.
///
/// Fragments are tagged by the coarse stage that produced them, mirroring
/// the engine's update stream; the tracker classifies each variant into
/// lifecycle events.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Progress from the agent-reasoning stage: a partial or final turn,
    /// possibly carrying requested tool invocations.
    Reasoning(Turn),
    /// Progress from the tool-execution stage.
    ToolExecution(ToolRecord),
}

/// Record of one tool interaction as observed in the update stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRecord {
    /// Textual content of the tool's output.
    pub content: String,
}

impl ToolRecord {
    /// Create a record from tool output text.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Lazy, finite, non-restartable sequence of update fragments.
pub type FragmentStream = BoxStream<'static, Result<Fragment, EngineError>>;

/// External reasoning pipeline: turn history in, new turn out.
///
/// `stream` is the preferred path; `complete` is the blocking fallback the
/// tracker uses when streaming is unusable or yields no terminal turn.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// One-time session setup (credentials, tool discovery).
    ///
    /// Returns the system turn to seed the session's history with, if the
    /// engine defines one.
    ///
    /// # Errors
    /// Returns error if setup fails; the session cannot be used.
    async fn initialize(&self) -> Result<Option<Turn>, EngineError>;

    /// Stream incremental update fragments for one processing cycle.
    ///
    /// # Errors
    /// Returns error if the stream cannot be established.
    async fn stream(&self, history: &[Turn]) -> Result<FragmentStream, EngineError>;

    /// Produce the final turn in a single blocking call.
    ///
    /// # Errors
    /// Returns error if the engine fails to produce a turn.
    async fn complete(&self, history: &[Turn]) -> Result<Turn, EngineError>;
}
