//! WebSocket session lifecycle.
//!
//! One task per session: accept and register the connection, run one-time
//! agent initialization, then loop dispatching inbound user messages to the
//! execution tracker until disconnect or fatal error.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use agent_relay_core::{Event, EventEnvelope, ReasoningEngine};
use agent_relay_session::{
    ConnectionSink, DeliveryError, ExecutionTracker, SessionId, SessionRegistry,
};

use crate::protocol::{ClientMessage, HealthStatus};

/// Shared relay state for the transport handlers.
#[derive(Clone)]
pub struct RelayState {
    pub registry: Arc<SessionRegistry>,
    pub engine: Arc<dyn ReasoningEngine>,
    pub service_name: String,
}

impl RelayState {
    /// Create relay state around a registry and an engine.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        engine: Arc<dyn ReasoningEngine>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            engine,
            service_name: service_name.into(),
        }
    }
}

/// Connection sink backed by the session's outbound channel.
///
/// The forwarding task owns the actual WebSocket writes; once a write fails
/// it stops and drops the receiver, so later sends here fail and the
/// registry removes the session.
struct WsSink {
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

impl ConnectionSink for WsSink {
    fn send(&self, envelope: EventEnvelope) -> Result<(), DeliveryError> {
        self.tx.send(envelope).map_err(|_| DeliveryError)
    }
}

/// Build the relay router: WebSocket endpoint plus liveness probe.
#[must_use]
pub fn relay_router(state: RelayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler(State(state): State<RelayState>) -> Json<HealthStatus> {
    Json(HealthStatus::healthy(
        state.service_name.clone(),
        state.registry.active_count(),
    ))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for queueing envelopes to the client.
    let (tx, mut rx) = mpsc::unbounded_channel::<EventEnvelope>();

    // Forward envelopes to the WebSocket until a write fails.
    let send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let json = match serde_json::to_string(&envelope) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize envelope: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let session_id = state.registry.register(Arc::new(WsSink { tx }));
    tracing::info!(%session_id, "WebSocket session connected");

    let _ = state.registry.unicast(
        session_id,
        EventEnvelope::session_level(Event::SessionStart {
            message: "Initializing agent...".to_string(),
        }),
    );

    let mut tracker = ExecutionTracker::new(
        session_id,
        Arc::clone(&state.registry),
        Arc::clone(&state.engine),
    );

    // One-time agent setup; failure is session-fatal.
    match state.engine.initialize().await {
        Ok(system_turn) => {
            if let Some(turn) = system_turn {
                tracker.seed_system_turn(turn);
            }
            let _ = state.registry.unicast(
                session_id,
                EventEnvelope::session_level(Event::SessionReady {
                    message: "Agent initialized successfully".to_string(),
                }),
            );
            tracing::info!(%session_id, "Agent initialized, entering message loop");
        }
        Err(e) => {
            tracing::error!(%session_id, "Agent initialization failed: {e}");
            let _ = state.registry.unicast(
                session_id,
                EventEnvelope::session_level(Event::error(format!("Initialization failed: {e}"))),
            );
            close_session(&state, session_id, send_task).await;
            return;
        }
    }

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(%session_id, "WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(%session_id, "Malformed client payload: {e}");
                let _ = state.registry.unicast(
                    session_id,
                    EventEnvelope::session_level(Event::error(format!(
                        "Invalid message format: {e}"
                    ))),
                );
                break;
            }
        };

        match client_msg {
            ClientMessage::UserMessage { content } => {
                tracing::info!(
                    %session_id,
                    chars = content.len(),
                    "Processing user message"
                );
                // The next inbound read waits for the terminal event.
                if let Err(e) = tracker.process(content).await {
                    tracing::warn!(%session_id, "Stopping session loop: {e}");
                    break;
                }
            }
            ClientMessage::Unknown => {
                tracing::warn!(%session_id, "Ignoring unrecognized message type");
            }
        }
    }

    close_session(&state, session_id, send_task).await;
    tracing::info!(%session_id, "WebSocket session closed");
}

/// Deregister and let the forward task drain queued envelopes.
///
/// Deregistering drops the session's sender; the forward task then writes
/// whatever is still queued (an `error` envelope, typically) and exits when
/// the channel closes.
async fn close_session(
    state: &RelayState,
    session_id: SessionId,
    send_task: tokio::task::JoinHandle<()>,
) {
    state.registry.deregister(session_id);
    let _ = send_task.await;
}
