//! Reverse dispatcher: the relay's central state machine.
//!
//! Links an inbound AI `tools/call` to an outbound reverse message on the
//! owning provider's event stream, holds the call context until the matching
//! `tools/reply` arrives, and fabricates the AI-facing JSON-RPC response.
//!
//! ```text
//! AI client ── tools/call ──▶ host ──▶ RemoteToolHandler
//!                                          │ unwrap / readme / token gate
//!                                          ▼
//!                                    RemoteRelay ── reverse envelope ──▶ provider SSE
//!                                          │ (PendingCall parked by call_id)
//! provider ── tools/reply ──▶ host ──▶ handle_reply
//!                                          │ readme substitution
//!                                          ▼
//!                              response { id: original request id } ──▶ AI client
//! ```
//!
//! The invocation path never blocks on the reply: the handler returns
//! [`HandlerOutcome::Deferred`] and the pending-call table *is* the
//! suspension primitive. Replies are matched purely by call id; no
//! inter-call ordering is assumed or provided. Host bridge calls are made
//! outside the internal locks.

use crate::toolrelay::config::RelayConfig;
use crate::toolrelay::host::{
    CallContext, HandlerOutcome, HostBridge, HostError, ToolHandler,
};
use crate::toolrelay::lifecycle::{self, SessionJanitor};
use crate::toolrelay::protocol::{
    ContentEnvelope, JsonRpcRequest, JsonRpcResponse, ReverseEnvelope, METHOD_TOOLS_CALL,
};
use crate::toolrelay::registration::{self, RemoteRegistrationHandler};
use crate::toolrelay::registry::{ToolRecord, ToolRegistry};
use crate::toolrelay::token;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Literal a provider may embed in an error reply to have the relay splice
/// in the tool's current readme before forwarding to the AI.
pub const SEE_README_PLACEHOLDER: &str = "{see readme}";

/// One in-flight AI-initiated call whose reply has not yet arrived.
#[derive(Debug, Clone)]
pub(crate) struct PendingCall {
    pub(crate) call_id: String,
    pub(crate) tool_name: String,
    /// AI-facing coordinates the final response is sent to.
    pub(crate) origin: CallContext,
    /// The provider session owning the tool: where the reverse message
    /// went, not where the call came from.
    pub(crate) provider_session_id: String,
    /// Unwrapped arguments as supplied by the AI, logged when the call is
    /// orphaned or expires without a reply.
    pub(crate) original_args: Value,
    pub(crate) created_at: Instant,
}

/// The relay core: tool registry, pending-call table, and the dispatch
/// logic connecting them to the host bridge.
///
/// One instance per process. Cheap to share (`Arc`); all interior state is
/// behind its own lock.
pub struct RemoteRelay {
    pub(crate) host: Arc<dyn HostBridge>,
    pub(crate) registry: ToolRegistry,
    pub(crate) pending: Mutex<HashMap<String, PendingCall>>,
    pub(crate) config: RelayConfig,
    pub(crate) unlock_token: String,
    cleanup_registered: AtomicBool,
}

impl RemoteRelay {
    pub fn new(host: Arc<dyn HostBridge>, config: RelayConfig) -> Arc<Self> {
        let unlock_token = config
            .unlock_token
            .clone()
            .unwrap_or_else(|| token::unlock_token().to_string());
        Arc::new(Self {
            host,
            registry: ToolRegistry::new(),
            pending: Mutex::new(HashMap::new()),
            config,
            unlock_token,
            cleanup_registered: AtomicBool::new(false),
        })
    }

    /// Wire the relay into the host: registers the built-in `remote`
    /// registration tool and subscribes to session teardown. Idempotent on
    /// the cleanup subscription.
    pub async fn attach(self: &Arc<Self>) -> Result<(), HostError> {
        if !self.cleanup_registered.swap(true, Ordering::SeqCst) {
            self.host
                .register_session_cleanup(Arc::new(SessionJanitor::new(Arc::clone(self))))
                .await;
            log::info!("Registered session cleanup callback");
        }
        self.host
            .register_tool(
                registration::REMOTE_TOOL_NAME,
                registration::REMOTE_TOOL_DESCRIPTION,
                registration::remote_tool_schema(),
                Arc::new(RemoteRegistrationHandler::new(Arc::clone(self))),
            )
            .await
    }

    /// The unlock token this relay gates execution behind.
    pub fn unlock_token(&self) -> &str {
        &self.unlock_token
    }

    /// Names currently registered, in no particular order.
    pub async fn registered_tool_names(&self) -> Vec<String> {
        self.registry.names().await
    }

    /// Number of calls awaiting a provider reply.
    pub async fn pending_call_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Handle an AI invocation of a registered tool.
    ///
    /// Readme requests and token failures resolve synchronously; authorized
    /// executes produce a reverse message and defer the response.
    pub async fn handle_tool_call(
        &self,
        tool_name: &str,
        arguments: Value,
        ctx: CallContext,
    ) -> HandlerOutcome {
        log::debug!("Tool {} args: {}", tool_name, arguments);
        let args = unwrap_arguments(arguments);

        let record = match self.registry.lookup(tool_name).await {
            Some(record) => record,
            None => {
                return HandlerOutcome::Immediate(ContentEnvelope::error(format!(
                    "Tool {} not found in registered tools",
                    tool_name
                )))
            }
        };

        if args.get("operation").and_then(Value::as_str) == Some("readme") {
            log::debug!("Readme request for {}", tool_name);
            return HandlerOutcome::Immediate(ContentEnvelope::text(record.readme.clone()));
        }

        match args.get("tool_unlock_token") {
            None => {
                log::warn!("Missing tool_unlock_token for {}, returning error with documentation", tool_name);
                return HandlerOutcome::Immediate(self.token_error(&record, true));
            }
            Some(candidate) => {
                let candidate = candidate.as_str().unwrap_or("");
                if !token::verify_unlock_token(candidate, &self.unlock_token) {
                    log::warn!("Incorrect tool_unlock_token for {}, returning error with documentation", tool_name);
                    return HandlerOutcome::Immediate(self.token_error(&record, false));
                }
            }
        }

        match self.dispatch_reverse(&record, args, &ctx).await {
            Ok(()) => HandlerOutcome::Deferred,
            Err(envelope) => HandlerOutcome::Immediate(envelope),
        }
    }

    /// Handle an inbound `tools/reply` from a provider. Returns the
    /// acknowledgement envelope for the replying session.
    pub async fn handle_reply(
        &self,
        request: &JsonRpcRequest,
        replying_session: &str,
    ) -> ContentEnvelope {
        let call_id = match &request.id {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                log::error!("tools/reply from session {} is missing its call id", replying_session);
                return ContentEnvelope::error("tools/reply is missing its call id");
            }
        };

        let call = { self.pending.lock().await.remove(&call_id) };
        let call = match call {
            Some(call) => call,
            None => {
                // Stale or malicious reply; drop it with an error to the
                // replying session, never crash.
                log::warn!(
                    "No pending call found for call_id: {} (reply from session {})",
                    call_id,
                    replying_session
                );
                return ContentEnvelope::error(format!(
                    "No pending call found for call_id: {}",
                    call_id
                ));
            }
        };

        let mut result = request
            .params
            .get("result")
            .cloned()
            .filter(|value| !value.is_null())
            .unwrap_or_else(|| {
                json!({
                    "content": [{"type": "text", "text": "(no result provided)"}],
                    "isError": true
                })
            });

        self.substitute_readme(&call.tool_name, &mut result).await;

        log::info!(
            "Completing call {} for tool {} back to session {}",
            call_id,
            call.tool_name,
            call.origin.session_id
        );
        self.deliver_result(&call, result).await;

        ContentEnvelope::text(format!("Tool reply processed for call_id {}", call_id))
    }

    /// Remove every registration and pending call owned by a dead session.
    pub async fn session_closed(&self, session_id: &str) {
        lifecycle::cleanup_session(self, session_id).await;
    }

    /// Expire pending calls older than the configured TTL, answering each
    /// origin with a timeout error.
    pub async fn expire_pending(&self) {
        lifecycle::expire_pending(self).await;
    }

    fn token_error(&self, record: &ToolRecord, missing: bool) -> ContentEnvelope {
        let first_sentence = if missing {
            format!("Error: Missing required tool_unlock_token for {}.\n\n", record.name)
        } else {
            format!("Error: Incorrect tool_unlock_token for {}.\n\n", record.name)
        };
        let mut message = first_sentence;
        message.push_str(
            "This tool requires a security token to ensure proper understanding of its usage. ",
        );
        message.push_str(
            "Please read the documentation below and include the tool_unlock_token in your request.\n\n",
        );
        message.push_str("Documentation:\n");
        message.push_str(&record.readme);
        ContentEnvelope::error(message)
    }

    async fn dispatch_reverse(
        &self,
        record: &ToolRecord,
        args: Value,
        ctx: &CallContext,
    ) -> Result<(), ContentEnvelope> {
        let original_args = args.clone();
        let mut stripped = args;
        if let Value::Object(map) = &mut stripped {
            // Synthetic fields never reach the provider.
            map.remove("operation");
            map.remove("tool_unlock_token");
        }

        let call_id = Uuid::new_v4().to_string();
        let inner_call = JsonRpcRequest::new(
            METHOD_TOOLS_CALL,
            Some(ctx.request_id.clone()),
            json!({"name": record.name, "arguments": stripped}),
        );
        let envelope = ReverseEnvelope::new(call_id.clone(), record.name.clone(), inner_call);
        let message = match serde_json::to_value(&envelope) {
            Ok(message) => message,
            Err(e) => {
                return Err(ContentEnvelope::error(format!(
                    "Error calling remote tool {}: {}",
                    record.name, e
                )))
            }
        };

        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                call_id.clone(),
                PendingCall {
                    call_id: call_id.clone(),
                    tool_name: record.name.clone(),
                    origin: ctx.clone(),
                    provider_session_id: record.session_id.clone(),
                    original_args,
                    created_at: Instant::now(),
                },
            );
        }
        log::info!(
            "Added pending call {} for tool {}, relaying to provider session {}",
            call_id,
            record.name,
            record.session_id
        );

        // The provider session is the one captured at registration time,
        // never the caller's session.
        if let Err(e) = self.host.send_to_session(&record.session_id, message).await {
            self.pending.lock().await.remove(&call_id);
            log::warn!(
                "Could not deliver reverse call {} to provider session {}: {}",
                call_id,
                record.session_id,
                e
            );
            return Err(ContentEnvelope::error(format!(
                "Error: the provider for tool {} is not reachable; it may have disconnected",
                record.name
            )));
        }
        Ok(())
    }

    /// Replace `{see readme}` placeholders in an error result's text items
    /// with the tool's current readme.
    async fn substitute_readme(&self, tool_name: &str, result: &mut Value) {
        if !result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            return;
        }
        let items = match result.get_mut("content").and_then(Value::as_array_mut) {
            Some(items) => items,
            None => return,
        };
        let has_placeholder = items.iter().any(|item| {
            item.get("type").and_then(Value::as_str) == Some("text")
                && item
                    .get("text")
                    .and_then(Value::as_str)
                    .map(|text| text.contains(SEE_README_PLACEHOLDER))
                    .unwrap_or(false)
        });
        if !has_placeholder {
            return;
        }

        let replacement = match self.registry.lookup(tool_name).await {
            Some(record) => format!("\n\nDocumentation:\n{}", record.readme),
            None => "\n\n[Error: Could not retrieve readme documentation]".to_string(),
        };
        for item in items.iter_mut() {
            if item.get("type").and_then(Value::as_str) != Some("text") {
                continue;
            }
            let Some(text) = item.get("text").and_then(Value::as_str) else {
                continue;
            };
            if text.contains(SEE_README_PLACEHOLDER) {
                log::info!(
                    "Found {} in error response for {}, replacing with actual readme",
                    SEE_README_PLACEHOLDER,
                    tool_name
                );
                let replaced = text.replace(SEE_README_PLACEHOLDER, &replacement);
                item["text"] = Value::String(replaced);
            }
        }
    }

    /// Send a result envelope to a call's AI origin as a JSON-RPC response.
    pub(crate) async fn deliver_result(&self, call: &PendingCall, result: Value) {
        let response = JsonRpcResponse::success(call.origin.request_id.clone(), result);
        let message = match serde_json::to_value(&response) {
            Ok(message) => message,
            Err(e) => {
                log::error!("Could not serialize response for call {}: {}", call.call_id, e);
                return;
            }
        };
        if let Err(e) = self
            .host
            .send_to_session(&call.origin.session_id, message)
            .await
        {
            // Origin died too; nothing left to notify.
            log::warn!(
                "Could not deliver response for call {} to session {}: {}",
                call.call_id,
                call.origin.session_id,
                e
            );
        }
    }
}

/// Host-facing handler for one registered remote tool.
pub(crate) struct RemoteToolHandler {
    relay: Arc<RemoteRelay>,
    tool_name: String,
}

impl RemoteToolHandler {
    pub(crate) fn new(relay: Arc<RemoteRelay>, tool_name: String) -> Self {
        Self { relay, tool_name }
    }
}

#[async_trait]
impl ToolHandler for RemoteToolHandler {
    async fn handle(&self, arguments: Value, ctx: CallContext) -> HandlerOutcome {
        self.relay
            .handle_tool_call(&self.tool_name, arguments, ctx)
            .await
    }
}

/// Unwrap `{"input": {...}}` shells, repeatedly, while the value is an
/// object whose only key is `input` holding another object. AI clients
/// sometimes double-wrap by mistake; single- and double-wrapped payloads
/// must behave identically.
pub(crate) fn unwrap_arguments(mut arguments: Value) -> Value {
    loop {
        let inner = match &mut arguments {
            Value::Object(map) if map.len() == 1 => match map.get("input") {
                Some(Value::Object(_)) => map.remove("input"),
                _ => None,
            },
            _ => None,
        };
        match inner {
            Some(value) => arguments = value,
            None => return arguments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_single_wrapped() {
        let args = json!({"input": {"operation": "execute", "url": "https://example.com"}});
        assert_eq!(
            unwrap_arguments(args),
            json!({"operation": "execute", "url": "https://example.com"})
        );
    }

    #[test]
    fn test_unwrap_double_wrapped_matches_single() {
        let single = unwrap_arguments(json!({"input": {"url": "x"}}));
        let double = unwrap_arguments(json!({"input": {"input": {"url": "x"}}}));
        assert_eq!(single, double);
    }

    #[test]
    fn test_unwrap_leaves_flat_arguments_alone() {
        let args = json!({"operation": "execute", "url": "x"});
        assert_eq!(unwrap_arguments(args.clone()), args);
    }

    #[test]
    fn test_unwrap_stops_when_input_is_not_an_object() {
        let args = json!({"input": "just a string"});
        assert_eq!(unwrap_arguments(args.clone()), args);
    }

    #[test]
    fn test_unwrap_requires_input_to_be_the_only_key() {
        let args = json!({"input": {"url": "x"}, "extra": 1});
        assert_eq!(unwrap_arguments(args.clone()), args);
    }

    #[test]
    fn test_unwrap_non_object() {
        assert_eq!(unwrap_arguments(json!(null)), json!(null));
        assert_eq!(unwrap_arguments(json!([1, 2])), json!([1, 2]));
    }
}
