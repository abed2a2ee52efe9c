//! Typed event envelopes delivered to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum number of characters in a tool-result preview.
pub const RESULT_PREVIEW_CHARS: usize = 200;

/// Marker appended to a truncated tool-result preview.
pub const TRUNCATION_MARKER: char = '…';

/// Status of a tool invocation as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// The tool has been invoked and is running.
    Executing,
    /// The tool finished and produced a result.
    Completed,
}

/// Lifecycle event, tagged with its payload.
///
/// Serializes to `{"type": "<kind>", "data": {...}}` with snake_case kinds,
/// flattened into the [`EventEnvelope`] wire record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// Session object created, before agent initialization.
    SessionStart { message: String },
    /// Agent initialization succeeded.
    SessionReady { message: String },
    /// Inbound user message accepted (echoed before processing).
    UserInput { message: String },
    /// Execution began, before the first classified update.
    Thinking { message: String },
    /// A tool-call fragment was classified.
    ToolCalled {
        tool_name: String,
        description: String,
        arguments: Value,
    },
    /// Immediately follows `ToolCalled`.
    ToolExecuting {
        tool_name: String,
        status: ToolStatus,
    },
    /// A tool-result fragment matched an open tool call.
    ToolResult {
        tool_name: String,
        status: ToolStatus,
        result: String,
    },
    /// Execution reached a final turn.
    Response {
        message: String,
        execution_completed: bool,
    },
    /// Unrecoverable failure at session or execution level.
    Error { message: String },
}

impl Event {
    /// Build a `tool_called` event for a named invocation.
    #[must_use]
    pub fn tool_called(tool_name: impl Into<String>, arguments: Value) -> Self {
        let tool_name = tool_name.into();
        let description = format!("Executing {tool_name}");
        Self::ToolCalled {
            tool_name,
            description,
            arguments,
        }
    }

    /// Build a `tool_executing` event.
    #[must_use]
    pub fn tool_executing(tool_name: impl Into<String>) -> Self {
        Self::ToolExecuting {
            tool_name: tool_name.into(),
            status: ToolStatus::Executing,
        }
    }

    /// Build a `tool_result` event with a truncated result preview.
    #[must_use]
    pub fn tool_result(tool_name: impl Into<String>, content: &str) -> Self {
        Self::ToolResult {
            tool_name: tool_name.into(),
            status: ToolStatus::Completed,
            result: result_preview(content),
        }
    }

    /// Build a terminal `response` event.
    #[must_use]
    pub fn response(message: impl Into<String>) -> Self {
        Self::Response {
            message: message.into(),
            execution_completed: true,
        }
    }

    /// Build an `error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire-level type tag for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SessionStart { .. } => "session_start",
            Self::SessionReady { .. } => "session_ready",
            Self::UserInput { .. } => "user_input",
            Self::Thinking { .. } => "thinking",
            Self::ToolCalled { .. } => "tool_called",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::ToolResult { .. } => "tool_result",
            Self::Response { .. } => "response",
            Self::Error { .. } => "error",
        }
    }
}

/// The wire-level unit of communication.
///
/// Immutable once created; serializes to
/// `{"type": ..., "timestamp": <ISO-8601>, "execution_id": <string|null>, "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub execution_id: Option<String>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventEnvelope {
    /// Wrap an event with the current timestamp and an execution id.
    #[must_use]
    pub fn new(execution_id: Option<String>, event: Event) -> Self {
        Self {
            timestamp: Utc::now(),
            execution_id,
            event,
        }
    }

    /// Wrap a session-level event (no execution id).
    #[must_use]
    pub fn session_level(event: Event) -> Self {
        Self::new(None, event)
    }
}

/// Truncate tool-result content to a bounded preview.
///
/// Content at or under [`RESULT_PREVIEW_CHARS`] characters is returned
/// verbatim; longer content is cut at exactly that many characters with
/// [`TRUNCATION_MARKER`] appended.
#[must_use]
pub fn result_preview(content: &str) -> String {
    let mut chars = content.chars();
    let preview: String = chars.by_ref().take(RESULT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        let mut truncated = preview;
        truncated.push(TRUNCATION_MARKER);
        truncated
    } else {
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = EventEnvelope::new(
            Some("exec_1".to_string()),
            Event::tool_called("list_tasks", json!({})),
        );
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "tool_called");
        assert_eq!(value["execution_id"], "exec_1");
        assert_eq!(value["data"]["tool_name"], "list_tasks");
        assert_eq!(value["data"]["description"], "Executing list_tasks");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_session_level_execution_id_is_null() {
        let envelope = EventEnvelope::session_level(Event::SessionStart {
            message: "hello".to_string(),
        });
        let value = serde_json::to_value(&envelope).unwrap();
        assert!(value["execution_id"].is_null());
        assert_eq!(value["type"], "session_start");
        assert_eq!(value["data"]["message"], "hello");
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = EventEnvelope::new(
            Some("exec_2".to_string()),
            Event::response("You have 3 open tasks."),
        );
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_tool_status_serialization() {
        let value = serde_json::to_value(Event::tool_executing("search")).unwrap();
        assert_eq!(value["data"]["status"], "executing");

        let value = serde_json::to_value(Event::tool_result("search", "ok")).unwrap();
        assert_eq!(value["data"]["status"], "completed");
    }

    #[test]
    fn test_preview_verbatim_at_limit() {
        let content = "x".repeat(RESULT_PREVIEW_CHARS);
        assert_eq!(result_preview(&content), content);
    }

    #[test]
    fn test_preview_truncates_over_limit() {
        let content = "y".repeat(350);
        let preview = result_preview(&content);
        assert_eq!(preview.chars().count(), RESULT_PREVIEW_CHARS + 1);
        assert!(preview.ends_with(TRUNCATION_MARKER));
        assert!(preview.starts_with(&"y".repeat(RESULT_PREVIEW_CHARS)));
    }

    #[test]
    fn test_preview_counts_characters_not_bytes() {
        let content = "é".repeat(250);
        let preview = result_preview(&content);
        assert_eq!(preview.chars().count(), RESULT_PREVIEW_CHARS + 1);
    }
}
