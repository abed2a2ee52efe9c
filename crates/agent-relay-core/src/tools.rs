//! Tool provider contract.
//!
//! Tools are supplied to reasoning-engine implementations; the relay itself
//! never invokes them.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Tool invocation error.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Tool execution failed: {0}")]
    Failed(String),
}

/// A named callable tool with a mapping-in/mapping-out contract.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Name the agent uses to request this tool.
    fn name(&self) -> &str;

    /// Human-readable description, surfaced to the agent.
    fn description(&self) -> &str;

    /// Invoke the tool with an argument mapping.
    ///
    /// # Errors
    /// Returns error if the arguments are invalid or execution fails.
    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}
