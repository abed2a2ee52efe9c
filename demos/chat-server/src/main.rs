//! Demo chat server wiring a scripted reasoning engine into the relay.
//!
//! Run with: cargo run -p chat-server-demo
//!
//! Then open http://localhost:9000 in your browser, or probe /health.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use axum::{Router, response::Html, routing::get};
use futures::StreamExt;
use serde_json::{Value, json};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_relay_core::{
    EngineError, Fragment, FragmentStream, ReasoningEngine, Role, ToolError, ToolInvocation,
    ToolProvider, ToolRecord, Turn,
};
use agent_relay_session::SessionRegistry;
use agent_relay_transport::{RelayState, relay_router};

/// Canned task-list tool so the relay's tool events can be observed.
struct ListTasksTool;

#[async_trait]
impl ToolProvider for ListTasksTool {
    fn name(&self) -> &str {
        "list_tasks"
    }

    fn description(&self) -> &str {
        "List the user's open tasks"
    }

    async fn call(&self, _arguments: Value) -> Result<Value, ToolError> {
        Ok(json!({
            "tasks": [
                { "id": 1, "title": "Review quarterly report" },
                { "id": 2, "title": "Reply to the design thread" },
                { "id": 3, "title": "Book travel for the offsite" },
            ]
        }))
    }
}

/// Scripted engine: invokes a tool when the user mentions it by topic,
/// otherwise answers directly. Stands in for a real model pipeline.
struct DemoEngine {
    tools: Vec<Arc<dyn ToolProvider>>,
}

impl DemoEngine {
    fn new() -> Self {
        Self {
            tools: vec![Arc::new(ListTasksTool)],
        }
    }

    fn last_user_input(history: &[Turn]) -> &str {
        history
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map_or("", |turn| turn.content.as_str())
    }

    fn reply_for(input: &str, tool_output: Option<&Value>) -> String {
        match tool_output {
            Some(output) => {
                let count = output["tasks"].as_array().map_or(0, Vec::len);
                format!("You have {count} open tasks.")
            }
            None => format!("You said: {input}"),
        }
    }
}

#[async_trait]
impl ReasoningEngine for DemoEngine {
    async fn initialize(&self) -> Result<Option<Turn>, EngineError> {
        Ok(Some(Turn::system(
            "You are a demo assistant with a task-list tool.",
        )))
    }

    async fn stream(&self, history: &[Turn]) -> Result<FragmentStream, EngineError> {
        let input = Self::last_user_input(history);
        let mut fragments = Vec::new();
        let mut tool_output = None;

        if input.to_lowercase().contains("task") {
            let tool = &self.tools[0];
            let output = tool
                .call(json!({}))
                .await
                .map_err(|e| EngineError::Stream(e.to_string()))?;
            fragments.push(Ok(Fragment::Reasoning(Turn::with_tool_calls(
                "",
                vec![ToolInvocation::new(tool.name(), json!({}))],
            ))));
            fragments.push(Ok(Fragment::ToolExecution(ToolRecord::new(
                output.to_string(),
            ))));
            tool_output = Some(output);
        }

        fragments.push(Ok(Fragment::Reasoning(Turn::assistant(Self::reply_for(
            input,
            tool_output.as_ref(),
        )))));

        Ok(futures::stream::iter(fragments).boxed())
    }

    async fn complete(&self, history: &[Turn]) -> Result<Turn, EngineError> {
        Ok(Turn::assistant(Self::reply_for(
            Self::last_user_input(history),
            None,
        )))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let port = std::env::var("RELAY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9000);

    let state = RelayState::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(DemoEngine::new()),
        "agent-relay",
    );

    let app = Router::new()
        .route("/", get(index_handler))
        .merge(relay_router(state));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Relay listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Agent Relay - Demo Chat</title>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            color: #d4d4d4;
            font-family: system-ui, sans-serif;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        .status { color: #888; font-size: 14px; margin-bottom: 10px; }
        .connected { color: #4a4; }
        .disconnected { color: #a44; }
        #log {
            height: calc(100vh - 180px);
            overflow-y: auto;
            border: 1px solid #333;
            padding: 10px;
            font-family: Menlo, Monaco, monospace;
            font-size: 13px;
        }
        .event { color: #888; }
        .response { color: #d4d4d4; }
        .error { color: #a44; }
        #input { width: 100%; padding: 8px; margin-top: 10px; box-sizing: border-box; }
    </style>
</head>
<body>
    <h1>Agent Relay</h1>
    <div class="status" id="status">Connecting...</div>
    <div id="log"></div>
    <input id="input" placeholder="Type a message and press Enter" autofocus />

    <script>
        const log = document.getElementById('log');
        const status = document.getElementById('status');
        const input = document.getElementById('input');
        let ws;

        function append(cls, text) {
            const line = document.createElement('div');
            line.className = cls;
            line.textContent = text;
            log.appendChild(line);
            log.scrollTop = log.scrollHeight;
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws`);

            ws.onopen = () => {
                status.textContent = 'Connected';
                status.className = 'status connected';
            };

            ws.onclose = () => {
                status.textContent = 'Disconnected - reconnecting...';
                status.className = 'status disconnected';
                setTimeout(connect, 2000);
            };

            ws.onmessage = (event) => {
                const msg = JSON.parse(event.data);
                if (msg.type === 'response') {
                    append('response', `assistant: ${msg.data.message}`);
                } else if (msg.type === 'error') {
                    append('error', `error: ${msg.data.message}`);
                } else {
                    append('event', `[${msg.type}] ${JSON.stringify(msg.data)}`);
                }
            };
        }

        input.addEventListener('keydown', (e) => {
            if (e.key === 'Enter' && input.value && ws && ws.readyState === WebSocket.OPEN) {
                ws.send(JSON.stringify({ type: 'user_message', content: input.value }));
                input.value = '';
            }
        });

        connect();
    </script>
</body>
</html>
"#;
