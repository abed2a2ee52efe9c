//! Per-session execution tracking.
//!
//! Drives one agent turn to completion, classifying the engine's incremental
//! update fragments into lifecycle events and emitting them through the
//! session registry. Falls back to a single blocking call when streaming is
//! unusable or never yields a terminal turn.

use std::sync::Arc;

use agent_relay_core::{Event, EventEnvelope, Fragment, ReasoningEngine, Turn};
use chrono::Utc;
use futures::StreamExt;
use thiserror::Error;

use crate::registry::{Delivery, SessionId, SessionRegistry};

/// Tracker error.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Delivery failed and the session was removed from the registry; the
    /// owning task should tear the session down.
    #[error("Session {0} is no longer registered")]
    SessionGone(SessionId),
}

/// Per-session state machine for one execution at a time.
///
/// Exactly one tracker is bound to a session and never shared; the `&mut`
/// receiver on [`process`](Self::process) keeps executions strictly
/// sequential within the session.
pub struct ExecutionTracker {
    session_id: SessionId,
    registry: Arc<SessionRegistry>,
    engine: Arc<dyn ReasoningEngine>,
    history: Vec<Turn>,
    current_execution: Option<String>,
}

impl ExecutionTracker {
    /// Create a tracker bound to one session.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        registry: Arc<SessionRegistry>,
        engine: Arc<dyn ReasoningEngine>,
    ) -> Self {
        Self {
            session_id,
            registry,
            engine,
            history: Vec::new(),
            current_execution: None,
        }
    }

    /// Seed the history with the engine's system turn.
    pub fn seed_system_turn(&mut self, turn: Turn) {
        self.history.push(turn);
    }

    /// Ordered conversation history, append-only within the session.
    #[must_use]
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Identifier of the in-flight execution, if one is being processed.
    #[must_use]
    pub fn current_execution(&self) -> Option<&str> {
        self.current_execution.as_deref()
    }

    /// Process one user turn to a terminal event.
    ///
    /// Emits exactly one `response` or `error` per execution, with zero or
    /// more tool events in between, in fragment-arrival order. Engine
    /// failures are contained to the execution; the session stays usable.
    ///
    /// # Errors
    /// Returns error only when delivery fails and the session was removed.
    pub async fn process(&mut self, user_input: String) -> Result<(), TrackerError> {
        let execution_id = new_execution_id();
        tracing::info!(
            session_id = %self.session_id,
            execution_id = %execution_id,
            "Starting execution"
        );
        self.current_execution = Some(execution_id);

        let result = self.run(user_input).await;
        self.current_execution = None;
        result
    }

    async fn run(&mut self, user_input: String) -> Result<(), TrackerError> {
        self.emit(Event::Thinking {
            message: "Processing your request...".to_string(),
        })?;

        // Echo the input before processing begins, whatever the outcome.
        self.history.push(Turn::user(user_input.clone()));
        self.emit(Event::UserInput {
            message: user_input,
        })?;

        let reply = match self.consume_stream().await? {
            Some(text) => Some(text),
            None => match self.engine.complete(&self.history).await {
                Ok(turn) => Some(turn.content),
                Err(e) => {
                    tracing::error!(
                        session_id = %self.session_id,
                        "Agent processing failed: {e}"
                    );
                    self.emit(Event::error(format!("Agent processing failed: {e}")))?;
                    None
                }
            },
        };

        if let Some(text) = reply {
            self.history.push(Turn::assistant(text.clone()));
            self.emit(Event::Response {
                message: text,
                execution_completed: true,
            })?;
        }

        Ok(())
    }

    /// Consume the fragment stream, emitting tool events in arrival order.
    ///
    /// Returns the final reply text when the last reasoning fragment carried
    /// a usable terminal turn, `None` when the caller must fall back to the
    /// blocking path.
    async fn consume_stream(&mut self) -> Result<Option<String>, TrackerError> {
        let mut fragments = match self.engine.stream(&self.history).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    "Streaming unusable, using fallback invoke: {e}"
                );
                return Ok(None);
            }
        };

        let mut open_tool: Option<String> = None;
        let mut terminal: Option<Turn> = None;

        while let Some(next) = fragments.next().await {
            match next {
                Ok(Fragment::Reasoning(turn)) => {
                    for call in &turn.tool_calls {
                        tracing::info!(
                            session_id = %self.session_id,
                            tool = %call.name,
                            "Tool called"
                        );
                        self.emit(Event::tool_called(&call.name, call.arguments.clone()))?;
                        self.emit(Event::tool_executing(&call.name))?;
                        // Last call wins for result matching.
                        open_tool = Some(call.name.clone());
                    }
                    terminal = Some(turn);
                }
                Ok(Fragment::ToolExecution(record)) => {
                    if let Some(tool_name) = open_tool.take() {
                        tracing::info!(
                            session_id = %self.session_id,
                            tool = %tool_name,
                            "Tool execution completed"
                        );
                        self.emit(Event::tool_result(&tool_name, &record.content))?;
                    } else {
                        tracing::debug!(
                            session_id = %self.session_id,
                            "Tool result with no open tool call, ignoring"
                        );
                    }
                }
                Err(e) => {
                    // Classification anomaly: skip the fragment, keep going.
                    tracing::warn!(
                        session_id = %self.session_id,
                        "Skipping malformed fragment: {e}"
                    );
                }
            }
        }

        let reply = terminal
            .filter(|turn| !turn.content.is_empty())
            .map(|turn| turn.content);
        if reply.is_none() {
            tracing::warn!(
                session_id = %self.session_id,
                "Streaming yielded no terminal turn, using fallback invoke"
            );
        }
        Ok(reply)
    }

    fn emit(&self, event: Event) -> Result<(), TrackerError> {
        let envelope = EventEnvelope::new(self.current_execution.clone(), event);
        match self.registry.unicast(self.session_id, envelope) {
            Delivery::Sent => Ok(()),
            Delivery::Removed => Err(TrackerError::SessionGone(self.session_id)),
        }
    }
}

/// Fresh execution identifier, timestamp-derived for uniqueness per cycle.
fn new_execution_id() -> String {
    format!("exec_{}", Utc::now().format("%Y%m%d_%H%M%S_%6f"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_relay_core::{EngineError, FragmentStream, ToolInvocation, ToolRecord};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    };

    use crate::registry::{ConnectionSink, DeliveryError};

    #[derive(Default)]
    struct CaptureSink {
        events: Mutex<Vec<EventEnvelope>>,
        fail: AtomicBool,
    }

    impl CaptureSink {
        fn kinds(&self) -> Vec<&'static str> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.event.kind())
                .collect()
        }

        fn envelopes(&self) -> Vec<EventEnvelope> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ConnectionSink for CaptureSink {
        fn send(&self, envelope: EventEnvelope) -> Result<(), DeliveryError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DeliveryError);
            }
            self.events.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    /// Engine that plays back a scripted fragment sequence once.
    struct ScriptedEngine {
        fragments: Mutex<Vec<Result<Fragment, EngineError>>>,
        stream_fails: bool,
        completion: Option<Turn>,
    }

    impl ScriptedEngine {
        fn streaming(fragments: Vec<Result<Fragment, EngineError>>) -> Self {
            Self {
                fragments: Mutex::new(fragments),
                stream_fails: false,
                completion: None,
            }
        }

        fn with_completion(mut self, turn: Turn) -> Self {
            self.completion = Some(turn);
            self
        }

        fn broken_stream() -> Self {
            Self {
                fragments: Mutex::new(Vec::new()),
                stream_fails: true,
                completion: None,
            }
        }
    }

    #[async_trait]
    impl ReasoningEngine for ScriptedEngine {
        async fn initialize(&self) -> Result<Option<Turn>, EngineError> {
            Ok(Some(Turn::system("You are a helpful assistant.")))
        }

        async fn stream(&self, _history: &[Turn]) -> Result<FragmentStream, EngineError> {
            if self.stream_fails {
                return Err(EngineError::Stream("stream unavailable".to_string()));
            }
            let fragments = std::mem::take(&mut *self.fragments.lock().unwrap());
            Ok(futures::stream::iter(fragments).boxed())
        }

        async fn complete(&self, _history: &[Turn]) -> Result<Turn, EngineError> {
            self.completion
                .clone()
                .ok_or_else(|| EngineError::Completion("model unavailable".to_string()))
        }
    }

    fn setup(engine: ScriptedEngine) -> (Arc<CaptureSink>, ExecutionTracker) {
        let registry = Arc::new(SessionRegistry::new());
        let sink = Arc::new(CaptureSink::default());
        let id = registry.register(Arc::clone(&sink) as Arc<dyn ConnectionSink>);
        let mut tracker = ExecutionTracker::new(id, registry, Arc::new(engine));
        tracker.seed_system_turn(Turn::system("You are a helpful assistant."));
        (sink, tracker)
    }

    fn terminal_count(kinds: &[&str]) -> usize {
        kinds
            .iter()
            .filter(|k| **k == "response" || **k == "error")
            .count()
    }

    #[tokio::test]
    async fn test_tool_flow_emits_full_sequence() {
        let engine = ScriptedEngine::streaming(vec![
            Ok(Fragment::Reasoning(Turn::with_tool_calls(
                "",
                vec![ToolInvocation::new("list_tasks", json!({}))],
            ))),
            Ok(Fragment::ToolExecution(ToolRecord::new("t".repeat(350)))),
            Ok(Fragment::Reasoning(Turn::assistant(
                "You have 3 open tasks.",
            ))),
        ]);
        let (sink, mut tracker) = setup(engine);

        tracker
            .process("list my open tasks".to_string())
            .await
            .unwrap();

        let kinds = sink.kinds();
        assert_eq!(
            kinds,
            vec![
                "thinking",
                "user_input",
                "tool_called",
                "tool_executing",
                "tool_result",
                "response",
            ]
        );

        let envelopes = sink.envelopes();
        match &envelopes[4].event {
            Event::ToolResult {
                tool_name, result, ..
            } => {
                assert_eq!(tool_name, "list_tasks");
                assert_eq!(result.chars().count(), 201);
                assert!(result.ends_with('…'));
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
        match &envelopes[5].event {
            Event::Response {
                message,
                execution_completed,
            } => {
                assert_eq!(message, "You have 3 open tasks.");
                assert!(execution_completed);
            }
            other => panic!("expected response, got {other:?}"),
        }

        // Every event of the execution shares one non-null execution id.
        let ids: Vec<_> = envelopes.iter().map(|e| e.execution_id.clone()).collect();
        assert!(ids.iter().all(|id| id.is_some()));
        assert!(ids.iter().all(|id| *id == ids[0]));
    }

    #[tokio::test]
    async fn test_stream_failure_falls_back_to_blocking_call() {
        let engine = ScriptedEngine::broken_stream().with_completion(Turn::assistant("Done."));
        let (sink, mut tracker) = setup(engine);

        tracker.process("do it".to_string()).await.unwrap();

        assert_eq!(sink.kinds(), vec!["thinking", "user_input", "response"]);
        match &sink.envelopes()[2].event {
            Event::Response { message, .. } => assert_eq!(message, "Done."),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_stream_and_failed_fallback_emit_single_error() {
        let engine = ScriptedEngine::streaming(Vec::new());
        let (sink, mut tracker) = setup(engine);

        tracker.process("hello".to_string()).await.unwrap();

        let kinds = sink.kinds();
        assert_eq!(kinds, vec!["thinking", "user_input", "error"]);
        assert_eq!(terminal_count(&kinds), 1);

        // Execution failure leaves the session idle and usable.
        assert!(tracker.current_execution().is_none());
    }

    #[tokio::test]
    async fn test_malformed_fragments_are_skipped() {
        let engine = ScriptedEngine::streaming(vec![
            Err(EngineError::Stream("bad fragment".to_string())),
            Ok(Fragment::Reasoning(Turn::assistant("Recovered."))),
        ]);
        let (sink, mut tracker) = setup(engine);

        tracker.process("hi".to_string()).await.unwrap();

        assert_eq!(sink.kinds(), vec!["thinking", "user_input", "response"]);
    }

    #[tokio::test]
    async fn test_orphan_tool_result_is_ignored() {
        let engine = ScriptedEngine::streaming(vec![
            Ok(Fragment::ToolExecution(ToolRecord::new("orphan output"))),
            Ok(Fragment::Reasoning(Turn::assistant("No tools used."))),
        ]);
        let (sink, mut tracker) = setup(engine);

        tracker.process("hi".to_string()).await.unwrap();

        assert!(!sink.kinds().contains(&"tool_result"));
        assert_eq!(terminal_count(&sink.kinds()), 1);
    }

    #[tokio::test]
    async fn test_tool_result_matches_most_recent_call() {
        let engine = ScriptedEngine::streaming(vec![
            Ok(Fragment::Reasoning(Turn::with_tool_calls(
                "",
                vec![
                    ToolInvocation::new("search_mail", json!({"q": "invoices"})),
                    ToolInvocation::new("list_tasks", json!({})),
                ],
            ))),
            Ok(Fragment::ToolExecution(ToolRecord::new("3 tasks"))),
            Ok(Fragment::Reasoning(Turn::assistant("All done."))),
        ]);
        let (sink, mut tracker) = setup(engine);

        tracker.process("check everything".to_string()).await.unwrap();

        let results: Vec<_> = sink
            .envelopes()
            .into_iter()
            .filter_map(|e| match e.event {
                Event::ToolResult { tool_name, .. } => Some(tool_name),
                _ => None,
            })
            .collect();
        // Two calls open, one record arrives: the later call supersedes.
        assert_eq!(results, vec!["list_tasks"]);
    }

    #[tokio::test]
    async fn test_short_tool_result_delivered_verbatim() {
        let engine = ScriptedEngine::streaming(vec![
            Ok(Fragment::Reasoning(Turn::with_tool_calls(
                "",
                vec![ToolInvocation::new("read_doc", json!({"id": 7}))],
            ))),
            Ok(Fragment::ToolExecution(ToolRecord::new("short result"))),
            Ok(Fragment::Reasoning(Turn::assistant("Read it."))),
        ]);
        let (sink, mut tracker) = setup(engine);

        tracker.process("read doc 7".to_string()).await.unwrap();

        let result = sink
            .envelopes()
            .into_iter()
            .find_map(|e| match e.event {
                Event::ToolResult { result, .. } => Some(result),
                _ => None,
            })
            .unwrap();
        assert_eq!(result, "short result");
    }

    #[tokio::test]
    async fn test_success_appends_assistant_turn_to_history() {
        let engine = ScriptedEngine::streaming(vec![Ok(Fragment::Reasoning(Turn::assistant(
            "Sure thing.",
        )))]);
        let (_sink, mut tracker) = setup(engine);

        tracker.process("please".to_string()).await.unwrap();

        let history = tracker.history();
        assert_eq!(history.len(), 3); // system, user, assistant
        assert_eq!(history[1], Turn::user("please"));
        assert_eq!(history[2], Turn::assistant("Sure thing."));
        assert!(tracker.current_execution().is_none());
    }

    #[tokio::test]
    async fn test_failed_execution_keeps_user_turn_only() {
        let engine = ScriptedEngine::streaming(Vec::new());
        let (_sink, mut tracker) = setup(engine);

        tracker.process("hello".to_string()).await.unwrap();

        let history = tracker.history();
        assert_eq!(history.len(), 2); // system, user; no assistant turn
        assert_eq!(history[1], Turn::user("hello"));
    }

    #[tokio::test]
    async fn test_delivery_failure_reports_session_gone() {
        let registry = Arc::new(SessionRegistry::new());
        let sink = Arc::new(CaptureSink::default());
        let id = registry.register(Arc::clone(&sink) as Arc<dyn ConnectionSink>);
        let engine =
            ScriptedEngine::streaming(vec![Ok(Fragment::Reasoning(Turn::assistant("hi")))]);
        let mut tracker = ExecutionTracker::new(id, Arc::clone(&registry), Arc::new(engine));

        sink.fail.store(true, Ordering::SeqCst);
        let err = tracker.process("hello".to_string()).await.unwrap_err();
        assert!(matches!(err, TrackerError::SessionGone(gone) if gone == id));
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_consecutive_executions_get_distinct_ids() {
        let engine = ScriptedEngine::streaming(vec![Ok(Fragment::Reasoning(Turn::assistant(
            "first",
        )))])
        .with_completion(Turn::assistant("second"));
        let (sink, mut tracker) = setup(engine);

        tracker.process("one".to_string()).await.unwrap();
        // Scripted fragments are spent; the second cycle uses the fallback.
        tracker.process("two".to_string()).await.unwrap();

        let ids: Vec<_> = sink
            .envelopes()
            .into_iter()
            .filter_map(|e| match e.event {
                Event::Response { .. } => e.execution_id,
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }
}
