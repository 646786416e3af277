//! SSE/HTTP host surface for the relay, built on axum.
//!
//! Only available when the `relay-server` feature is enabled. The relay
//! core is transport-agnostic and talks to a [`HostBridge`]; this module is
//! the batteries-included implementation of that bridge:
//!
//! - `GET /sse` opens a session: the client receives an `endpoint` event
//!   naming its POST endpoint, then a stream of `message` events carrying
//!   JSON-RPC responses, reverse calls, and notifications.
//! - `POST /messages?session_id=…` accepts inbound JSON-RPC (`initialize`,
//!   `tools/list`, `tools/call`, `tools/reply`). Responses travel back over
//!   the session's SSE stream; the POST itself returns `202 Accepted`.
//!
//! Both AI clients and tool providers connect the same way; a provider is
//! just a session that registers tools and answers reverse calls.

use crate::toolrelay::config::RelayConfig;
use crate::toolrelay::dispatcher::RemoteRelay;
use crate::toolrelay::host::{
    CallContext, HandlerOutcome, HostBridge, HostError, SessionCleanup, SessionStatus, ToolHandler,
};
use crate::toolrelay::protocol::{
    ContentEnvelope, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_INITIALIZE,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, METHOD_TOOLS_LIST_CHANGED, METHOD_TOOLS_REPLY,
};
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

struct SessionChannel {
    tx: mpsc::UnboundedSender<String>,
}

struct HostTool {
    description: String,
    input_schema: Value,
    handler: Arc<dyn ToolHandler>,
}

/// Axum-backed [`HostBridge`]: session table, AI-facing tool table, and the
/// teardown subscription.
pub struct RelayHost {
    sessions: Arc<Mutex<HashMap<String, SessionChannel>>>,
    tools: Mutex<HashMap<String, HostTool>>,
    cleanup: Mutex<Option<Arc<dyn SessionCleanup>>>,
    relay: Mutex<Option<Arc<RemoteRelay>>>,
}

impl RelayHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            tools: Mutex::new(HashMap::new()),
            cleanup: Mutex::new(None),
            relay: Mutex::new(None),
        })
    }

    /// Point the host's `tools/reply` entry at a relay.
    pub async fn set_relay(&self, relay: Arc<RemoteRelay>) {
        *self.relay.lock().await = Some(relay);
    }

    async fn open_session(&self) -> (String, mpsc::UnboundedReceiver<String>) {
        let session_id = Uuid::new_v4().to_string().replace('-', "");
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .lock()
            .await
            .insert(session_id.clone(), SessionChannel { tx });
        log::info!("Session {} connected", session_id);
        (session_id, rx)
    }

    async fn close_session(&self, session_id: &str) {
        if self.sessions.lock().await.remove(session_id).is_none() {
            return;
        }
        log::info!("Session {} closed", session_id);
        let cleanup = self.cleanup.lock().await.clone();
        if let Some(cleanup) = cleanup {
            cleanup.session_closed(session_id).await;
        }
    }

    async fn session_exists(&self, session_id: &str) -> bool {
        self.sessions.lock().await.contains_key(session_id)
    }

    /// Push a JSON-RPC response down a session's event stream.
    async fn push_response(&self, session_id: &str, response: JsonRpcResponse) {
        match serde_json::to_value(&response) {
            Ok(message) => {
                if let Err(e) = self.send_to_session(session_id, message).await {
                    log::warn!("Could not push response to session {}: {}", session_id, e);
                }
            }
            Err(e) => log::error!("Could not serialize response: {}", e),
        }
    }

    #[cfg(test)]
    async fn open_session_for_test(&self, session_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .lock()
            .await
            .insert(session_id.to_string(), SessionChannel { tx });
        rx
    }
}

#[async_trait]
impl HostBridge for RelayHost {
    async fn send_to_session(&self, session_id: &str, message: Value) -> Result<(), HostError> {
        let tx = {
            let sessions = self.sessions.lock().await;
            match sessions.get(session_id) {
                Some(channel) => channel.tx.clone(),
                None => return Err(HostError::SessionNotFound(session_id.to_string())),
            }
        };
        let data = serde_json::to_string(&message)
            .map_err(|e| HostError::SendFailed(e.to_string()))?;
        tx.send(data).map_err(|_| {
            HostError::SendFailed(format!("event stream for session {} is closed", session_id))
        })
    }

    async fn register_tool(
        &self,
        name: &str,
        description: &str,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), HostError> {
        self.tools.lock().await.insert(
            name.to_string(),
            HostTool {
                description: description.to_string(),
                input_schema,
                handler,
            },
        );
        Ok(())
    }

    async fn unregister_tool(&self, name: &str) -> Result<(), HostError> {
        self.tools.lock().await.remove(name);
        Ok(())
    }

    async fn session_status(&self, session_id: &str) -> SessionStatus {
        match self.sessions.lock().await.get(session_id) {
            Some(channel) if !channel.tx.is_closed() => SessionStatus::Connected,
            Some(_) => SessionStatus::Disconnected,
            None => SessionStatus::NotFound,
        }
    }

    async fn register_session_cleanup(&self, cleanup: Arc<dyn SessionCleanup>) {
        let mut slot = self.cleanup.lock().await;
        if slot.is_none() {
            *slot = Some(cleanup);
        }
    }

    async fn trigger_client_refresh(&self, delay: Duration) {
        // Batch rapid tool-list changes behind the delay, off the caller's
        // task so registration responses are not held up.
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let notification = JsonRpcNotification::new(METHOD_TOOLS_LIST_CHANGED, None);
            let data = match serde_json::to_string(&notification) {
                Ok(data) => data,
                Err(e) => {
                    log::error!("Could not serialize list_changed notification: {}", e);
                    return;
                }
            };
            for channel in sessions.lock().await.values() {
                let _ = channel.tx.send(data.clone());
            }
        });
    }
}

/// Build the axum router for a host.
pub fn router(host: Arc<RelayHost>) -> Router {
    Router::new()
        .route("/sse", get(sse_handler))
        .route("/messages", post(messages_handler))
        .with_state(host)
}

/// Drops when the SSE stream does, tearing the session down.
struct SessionGuard {
    host: Arc<RelayHost>,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let host = Arc::clone(&self.host);
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            host.close_session(&session_id).await;
        });
    }
}

async fn sse_handler(
    State(host): State<Arc<RelayHost>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let (session_id, rx) = host.open_session().await;

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?session_id={}", session_id));
    let guard = SessionGuard {
        host: Arc::clone(&host),
        session_id,
    };
    let messages = UnboundedReceiverStream::new(rx).map(move |data| {
        let _session = &guard;
        Ok::<Event, Infallible>(Event::default().event("message").data(data))
    });
    let stream = tokio_stream::once(Ok(endpoint)).chain(messages);

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    session_id: String,
}

async fn messages_handler(
    State(host): State<Arc<RelayHost>>,
    Query(query): Query<MessagesQuery>,
    Json(body): Json<Value>,
) -> Response {
    let session_id = query.session_id;
    if !host.session_exists(&session_id).await {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("Unknown session: {}", session_id)})),
        )
            .into_response();
    }

    let request: JsonRpcRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("Invalid JSON-RPC request: {}", e)})),
            )
                .into_response()
        }
    };
    let request_id = request.id.clone().unwrap_or(Value::Null);
    log::debug!(
        "JSONRPC request session={}, method={}, id={}",
        session_id,
        request.method,
        request_id
    );

    match request.method.as_str() {
        METHOD_INITIALIZE => {
            let result = json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": true}},
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                }
            });
            host.push_response(&session_id, JsonRpcResponse::success(request_id, result))
                .await;
        }
        "notifications/initialized" => {}
        METHOD_TOOLS_LIST => {
            let mut listed: Vec<Value> = {
                let tools = host.tools.lock().await;
                tools
                    .iter()
                    .map(|(name, tool)| {
                        json!({
                            "name": name,
                            "description": tool.description,
                            "inputSchema": tool.input_schema
                        })
                    })
                    .collect()
            };
            listed.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
            host.push_response(
                &session_id,
                JsonRpcResponse::success(request_id, json!({"tools": listed})),
            )
            .await;
        }
        METHOD_TOOLS_CALL => {
            let tool_name = request
                .params
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let arguments = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            let handler = {
                let tools = host.tools.lock().await;
                tools.get(&tool_name).map(|tool| Arc::clone(&tool.handler))
            };
            match handler {
                None => {
                    let envelope =
                        ContentEnvelope::error(format!("Tool not found: {}", tool_name));
                    respond_with_envelope(&host, &session_id, request_id, envelope).await;
                }
                Some(handler) => {
                    let ctx = CallContext::new(session_id.clone(), request_id.clone());
                    match handler.handle(arguments, ctx).await {
                        HandlerOutcome::Immediate(envelope) => {
                            respond_with_envelope(&host, &session_id, request_id, envelope).await;
                        }
                        // Deferred: the reply path produces the response.
                        HandlerOutcome::Deferred => {}
                    }
                }
            }
        }
        METHOD_TOOLS_REPLY => {
            let relay = host.relay.lock().await.clone();
            match relay {
                Some(relay) => {
                    let ack = relay.handle_reply(&request, &session_id).await;
                    respond_with_envelope(&host, &session_id, request_id, ack).await;
                }
                None => {
                    let envelope =
                        ContentEnvelope::error("No relay attached to this host".to_string());
                    respond_with_envelope(&host, &session_id, request_id, envelope).await;
                }
            }
        }
        other => {
            host.push_response(
                &session_id,
                JsonRpcResponse::error(request_id, -32601, format!("Method not found: {}", other)),
            )
            .await;
        }
    }

    StatusCode::ACCEPTED.into_response()
}

async fn respond_with_envelope(
    host: &RelayHost,
    session_id: &str,
    request_id: Value,
    envelope: ContentEnvelope,
) {
    match serde_json::to_value(&envelope) {
        Ok(result) => {
            host.push_response(session_id, JsonRpcResponse::success(request_id, result))
                .await;
        }
        Err(e) => log::error!("Could not serialize tool result: {}", e),
    }
}

/// A running relay server: bound address, the relay core, and the host.
pub struct RelayServerHandle {
    addr: SocketAddr,
    pub relay: Arc<RemoteRelay>,
    pub host: Arc<RelayHost>,
    server: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl RelayServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop serving. Sessions are dropped without cleanup callbacks.
    pub fn abort(&self) {
        self.server.abort();
    }
}

/// Bind an SSE/HTTP relay server, wire a [`RemoteRelay`] into it, and start
/// the pending-call TTL sweeper.
pub async fn start_relay_server(
    addr: SocketAddr,
    config: RelayConfig,
) -> Result<RelayServerHandle, Box<dyn Error + Send + Sync>> {
    let host = RelayHost::new();
    let ttl = config.pending_call_ttl;
    let relay = RemoteRelay::new(host.clone(), config);
    relay.attach().await?;
    host.set_relay(Arc::clone(&relay)).await;

    let sweeper = Arc::clone(&relay);
    let period = std::cmp::max(ttl / 2, Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            sweeper.expire_pending().await;
        }
    });

    let app = router(Arc::clone(&host));
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    log::info!("Relay server listening on {}", addr);
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    Ok(RelayServerHandle {
        addr,
        relay,
        host,
        server,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn relay_fixture() -> (Arc<RelayHost>, Arc<RemoteRelay>, Router) {
        let host = RelayHost::new();
        let relay = RemoteRelay::new(host.clone(), RelayConfig::default());
        relay.attach().await.unwrap();
        host.set_relay(Arc::clone(&relay)).await;
        let app = router(Arc::clone(&host));
        (host, relay, app)
    }

    async fn post_message(app: &Router, session_id: &str, body: Value) -> StatusCode {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/messages?session_id={}", session_id))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        app.clone().oneshot(request).await.unwrap().status()
    }

    fn next_message(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let data = rx.try_recv().expect("expected a queued SSE message");
        serde_json::from_str(&data).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_roundtrip() {
        let (host, _relay, app) = relay_fixture().await;
        let mut rx = host.open_session_for_test("ai").await;

        let status = post_message(
            &app,
            "ai",
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let response = next_message(&mut rx);
        assert_eq!(response["id"], json!(1));
        assert_eq!(response["result"]["protocolVersion"], json!(MCP_PROTOCOL_VERSION));
        assert_eq!(
            response["result"]["capabilities"]["tools"]["listChanged"],
            json!(true)
        );
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let (_host, _relay, app) = relay_fixture().await;
        let request = Request::builder()
            .method("POST")
            .uri("/messages?session_id=nope")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}).to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_register_then_tools_list() {
        let (host, _relay, app) = relay_fixture().await;
        let mut provider_rx = host.open_session_for_test("provider").await;
        let mut ai_rx = host.open_session_for_test("ai").await;

        let status = post_message(
            &app,
            "provider",
            json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": {"name": "remote", "arguments": {"input": {
                    "operation": "register",
                    "tool_name": "browser",
                    "description": "Browser control",
                    "parameters": {"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]},
                    "callback_endpoint": "ext://browser",
                    "TOOL_API_KEY": "k"
                }}}
            }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let response = next_message(&mut provider_rx);
        assert!(response["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("Successfully registered tool: browser"));

        post_message(
            &app,
            "ai",
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list", "params": {}}),
        )
        .await;
        let listing = next_message(&mut ai_rx);
        let tools = listing["result"]["tools"].as_array().unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert!(names.contains(&"browser"));
        assert!(names.contains(&"remote"));
        let browser = tools.iter().find(|t| t["name"] == "browser").unwrap();
        let properties = browser["inputSchema"]["properties"].as_object().unwrap();
        assert_eq!(properties.len(), 1);
        assert!(properties.contains_key("input"));
    }

    #[tokio::test]
    async fn test_full_reverse_roundtrip_over_http() {
        let (host, relay, app) = relay_fixture().await;
        let mut provider_rx = host.open_session_for_test("provider").await;
        let mut ai_rx = host.open_session_for_test("ai").await;

        post_message(
            &app,
            "provider",
            json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": {"name": "remote", "arguments": {"input": {
                    "operation": "register",
                    "tool_name": "browser",
                    "description": "Browser control",
                    "parameters": {"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]},
                    "callback_endpoint": "ext://browser",
                    "TOOL_API_KEY": "k"
                }}}
            }),
        )
        .await;
        let _registered = next_message(&mut provider_rx);

        post_message(
            &app,
            "ai",
            json!({
                "jsonrpc": "2.0", "id": 42, "method": "tools/call",
                "params": {"name": "browser", "arguments": {"input": {
                    "operation": "execute",
                    "tool_unlock_token": relay.unlock_token(),
                    "url": "https://example.com"
                }}}
            }),
        )
        .await;

        let reverse = next_message(&mut provider_rx);
        let call_id = reverse["reverse"]["call_id"].as_str().unwrap().to_string();
        assert_eq!(reverse["reverse"]["tool"], json!("browser"));
        assert_eq!(
            reverse["reverse"]["input"]["params"]["arguments"],
            json!({"url": "https://example.com"})
        );
        assert_eq!(reverse["reverse"]["input"]["id"], json!(42));

        post_message(
            &app,
            "provider",
            json!({
                "jsonrpc": "2.0", "id": call_id, "method": "tools/reply",
                "params": {"result": {"content": [{"type": "text", "text": "OK"}], "isError": false}}
            }),
        )
        .await;

        let ack = next_message(&mut provider_rx);
        assert!(ack["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Tool reply processed"));

        let response = next_message(&mut ai_rx);
        assert_eq!(response["id"], json!(42));
        assert_eq!(response["result"]["content"][0]["text"], json!("OK"));
        assert_eq!(response["result"]["isError"], json!(false));
        assert_eq!(relay.pending_call_count().await, 0);
    }

    #[tokio::test]
    async fn test_sse_endpoint_responds_with_event_stream() {
        let (_host, _relay, app) = relay_fixture().await;
        let request = Request::builder()
            .method("GET")
            .uri("/sse")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        assert!(content_type.starts_with("text/event-stream"));
    }
}
