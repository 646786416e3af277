//! Session lifecycle: garbage collection when a provider transport dies.
//!
//! The host invokes the [`SessionJanitor`] whenever a transport session
//! ends. Every tool registered under that session is removed from both the
//! registry and the host's tool table, AI clients are nudged to refresh
//! (once per invocation), and every pending call waiting on the dead
//! provider is orphaned with a synthesized error to its AI origin.
//!
//! The TTL sweep for stale pending calls lives here too; the host drives it
//! periodically.

use crate::toolrelay::dispatcher::{PendingCall, RemoteRelay};
use crate::toolrelay::host::SessionCleanup;
use crate::toolrelay::protocol::ContentEnvelope;
use async_trait::async_trait;
use std::sync::Arc;

/// The relay's subscriber to host session teardown.
pub(crate) struct SessionJanitor {
    relay: Arc<RemoteRelay>,
}

impl SessionJanitor {
    pub(crate) fn new(relay: Arc<RemoteRelay>) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl SessionCleanup for SessionJanitor {
    async fn session_closed(&self, session_id: &str) {
        cleanup_session(&self.relay, session_id).await;
    }
}

/// Remove all tools and orphan all pending calls owned by `session_id`.
pub(crate) async fn cleanup_session(relay: &RemoteRelay, session_id: &str) {
    let names = relay.registry.names_for_session(session_id).await;
    for name in &names {
        log::info!("Removing tool {} for session {}", name, session_id);
        relay.registry.remove(name).await;
        if let Err(e) = relay.host.unregister_tool(name).await {
            log::warn!("Could not remove tool {} from host handlers: {}", name, e);
        }
    }
    if !names.is_empty() {
        log::info!(
            "Cleaned up {} tools for session {}: {:?}",
            names.len(),
            session_id,
            names
        );
        relay
            .host
            .trigger_client_refresh(relay.config.refresh_delay)
            .await;
    }

    for call in take_orphaned(relay, session_id).await {
        log::warn!(
            "Orphaning call {} for tool {}: provider session {} disconnected (args: {})",
            call.call_id,
            call.tool_name,
            session_id,
            call.original_args
        );
        let envelope = ContentEnvelope::error(format!(
            "Error: the provider for tool {} disconnected before a reply was received",
            call.tool_name
        ));
        respond_with_envelope(relay, &call, envelope).await;
    }
}

/// Expire pending calls older than the configured TTL.
pub(crate) async fn expire_pending(relay: &RemoteRelay) {
    let ttl = relay.config.pending_call_ttl;
    let expired: Vec<PendingCall> = {
        let mut pending = relay.pending.lock().await;
        let stale: Vec<String> = pending
            .values()
            .filter(|call| call.created_at.elapsed() >= ttl)
            .map(|call| call.call_id.clone())
            .collect();
        stale.iter().filter_map(|id| pending.remove(id)).collect()
    };

    for call in expired {
        log::warn!(
            "Expiring call {} for tool {} after {}s without a reply (args: {})",
            call.call_id,
            call.tool_name,
            ttl.as_secs(),
            call.original_args
        );
        let envelope = ContentEnvelope::error(format!(
            "Error: the call to tool {} timed out after {} seconds waiting for the provider to reply",
            call.tool_name,
            ttl.as_secs()
        ));
        respond_with_envelope(relay, &call, envelope).await;
    }
}

async fn take_orphaned(relay: &RemoteRelay, session_id: &str) -> Vec<PendingCall> {
    let mut pending = relay.pending.lock().await;
    let orphaned: Vec<String> = pending
        .values()
        .filter(|call| call.provider_session_id == session_id)
        .map(|call| call.call_id.clone())
        .collect();
    orphaned.iter().filter_map(|id| pending.remove(id)).collect()
}

async fn respond_with_envelope(relay: &RemoteRelay, call: &PendingCall, envelope: ContentEnvelope) {
    match serde_json::to_value(&envelope) {
        Ok(result) => relay.deliver_result(call, result).await,
        Err(e) => log::error!(
            "Could not serialize synthesized error for call {}: {}",
            call.call_id,
            e
        ),
    }
}
