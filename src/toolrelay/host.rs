//! Host bridge abstraction.
//!
//! The relay core never owns sockets. It depends on the host SSE/HTTP
//! server through the [`HostBridge`] trait for four operations (deliver a
//! message to a session, mutate the AI-facing tool table, observe session
//! liveness, nudge AI clients to refresh) and hands the host two things in
//! return: per-tool [`ToolHandler`]s and a [`SessionCleanup`] subscriber
//! invoked when a transport session ends.
//!
//! Transport handles are never marshalled through JSON arguments. The
//! AI-facing coordinates of a call travel as a typed [`CallContext`] beside
//! the arguments through the handler signature.

use crate::toolrelay::protocol::ContentEnvelope;
use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Transport coordinates of an inbound tool call: which session it arrived
/// on and the JSON-RPC id the final response must carry.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub session_id: String,
    pub request_id: Value,
}

impl CallContext {
    pub fn new(session_id: impl Into<String>, request_id: Value) -> Self {
        Self {
            session_id: session_id.into(),
            request_id,
        }
    }
}

/// Outcome of a tool handler invocation.
///
/// `Deferred` tells the host that no response exists yet; it will be
/// produced later by an independent `tools/reply` event and delivered
/// through [`HostBridge::send_to_session`].
#[derive(Debug)]
pub enum HandlerOutcome {
    Immediate(ContentEnvelope),
    Deferred,
}

/// Liveness of a transport session as observed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connected,
    /// The session exists but its underlying socket is no longer connected.
    Disconnected,
    /// The host has no record of the session.
    NotFound,
}

impl SessionStatus {
    pub fn is_live(self) -> bool {
        matches!(self, SessionStatus::Connected)
    }
}

/// Error surfaced by host bridge operations.
#[derive(Debug, Clone)]
pub enum HostError {
    /// The target session does not exist (or no longer exists).
    SessionNotFound(String),
    /// The message could not be delivered over the session's event stream.
    SendFailed(String),
    /// The host rejected a tool table mutation.
    Registration(String),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::SessionNotFound(session_id) => {
                write!(f, "Session not found: {}", session_id)
            }
            HostError::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            HostError::Registration(msg) => write!(f, "Tool registration failed: {}", msg),
        }
    }
}

impl Error for HostError {}

/// Handler for one AI-facing tool.
///
/// Implementations capture whatever they need (the relay reference and the
/// registered tool name); their lifetime is bounded by membership in the
/// host's tool table.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, arguments: Value, ctx: CallContext) -> HandlerOutcome;
}

/// Subscriber for transport session teardown, invoked by the host whenever
/// a session's event stream ends.
#[async_trait]
pub trait SessionCleanup: Send + Sync {
    async fn session_closed(&self, session_id: &str);
}

/// The operations the relay core requires from the host server.
///
/// Implementations must be safe to call from multiple tasks; the core calls
/// them outside of its own locks.
#[async_trait]
pub trait HostBridge: Send + Sync {
    /// Deliver a JSON message over the session's event stream. May fail if
    /// the session died mid-send; callers treat that as a provider
    /// disconnect rather than a fatal error.
    async fn send_to_session(&self, session_id: &str, message: Value) -> Result<(), HostError>;

    /// Add a tool to the host's AI-facing tool table so it appears in
    /// `tools/list` and routes `tools/call` to `handler`.
    async fn register_tool(
        &self,
        name: &str,
        description: &str,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), HostError>;

    /// Remove a tool from the host's AI-facing tool table.
    async fn unregister_tool(&self, name: &str) -> Result<(), HostError>;

    /// Observe the liveness of a transport session.
    async fn session_status(&self, session_id: &str) -> SessionStatus;

    /// Subscribe to session teardown. One-shot: hosts keep a single
    /// subscriber and later registrations are ignored.
    async fn register_session_cleanup(&self, cleanup: Arc<dyn SessionCleanup>);

    /// Nudge AI clients to re-fetch the tool list after `delay`.
    async fn trigger_client_refresh(&self, delay: Duration);
}
