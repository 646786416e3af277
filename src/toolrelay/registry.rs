//! Registry of remotely registered tools.
//!
//! The canonical map of tool name → [`ToolRecord`]. A name is unique at all
//! times and appears here iff it appears in the host's AI-facing tool table
//! (the registration path keeps the two in lock-step). The registry is
//! shared process-wide behind a single lock with short critical sections;
//! host probes happen with the lock released.

use crate::toolrelay::host::HostBridge;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// One registered remote tool.
#[derive(Debug, Clone)]
pub struct ToolRecord {
    /// Externally-visible tool identifier; unique across the registry.
    pub name: String,
    /// Description presented to AI clients.
    pub description: String,
    /// The compressed `{input: object}` schema exposed to AI clients.
    pub wrapped_schema: Value,
    /// The injected inner fields an executing caller must supply.
    pub synthetic_schema: Value,
    /// Verbatim provider-supplied parameter schema.
    pub original_schema: Value,
    /// Readme document returned by the `readme` operation.
    pub readme: String,
    /// Provider-chosen identifier; never dialed by the relay, kept for
    /// observability.
    pub callback_endpoint: String,
    /// Provider-supplied secret; stored, not interpreted.
    pub api_key: String,
    /// The transport session owning this registration.
    pub session_id: String,
    pub registered_at: DateTime<Utc>,
}

/// Result of [`ToolRegistry::insert`].
#[derive(Debug)]
pub struct InsertOutcome {
    /// The name the record ended up under (suffixed on conflict).
    pub final_name: String,
    /// A stale record evicted from the requested name because its owning
    /// session was dead. The caller must drop its host-table entry too.
    pub evicted: Option<ToolRecord>,
}

/// Process-wide map of registered tools.
pub struct ToolRegistry {
    tools: Mutex<HashMap<String, ToolRecord>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a record, resolving name conflicts.
    ///
    /// If the requested name is occupied, the occupant's session is probed
    /// through the host: a dead occupant is evicted and the new record takes
    /// the name unchanged, a live occupant forces a numeric suffix (`name2`,
    /// `name3`, …, smallest vacant ≥ 2). The final name is recorded on the
    /// record and returned.
    pub async fn insert(&self, mut record: ToolRecord, host: &dyn HostBridge) -> InsertOutcome {
        let base = record.name.clone();
        let occupant = {
            let mut tools = self.tools.lock().await;
            match tools.get(&base) {
                None => {
                    tools.insert(base.clone(), record);
                    return InsertOutcome {
                        final_name: base,
                        evicted: None,
                    };
                }
                Some(existing) => existing.clone(),
            }
        };

        // Probe the occupant's session with the lock released; a record
        // without a session is corrupt and counts as dead.
        let occupant_dead = occupant.session_id.is_empty()
            || !host.session_status(&occupant.session_id).await.is_live();

        let mut tools = self.tools.lock().await;
        let mut evicted = None;
        if occupant_dead {
            // Re-check under the lock: evict only if the same stale record
            // still holds the name.
            let still_same = tools
                .get(&base)
                .map(|current| current.session_id == occupant.session_id)
                .unwrap_or(false);
            if still_same {
                evicted = tools.remove(&base);
                log::info!(
                    "Evicted tool {} registered by dead session {}",
                    base,
                    occupant.session_id
                );
            }
        }

        let final_name = if tools.contains_key(&base) {
            let mut counter = 2u32;
            loop {
                let candidate = format!("{}{}", base, counter);
                if !tools.contains_key(&candidate) {
                    break candidate;
                }
                counter += 1;
            }
        } else {
            base
        };
        record.name = final_name.clone();
        tools.insert(final_name.clone(), record);
        InsertOutcome {
            final_name,
            evicted,
        }
    }

    pub async fn lookup(&self, name: &str) -> Option<ToolRecord> {
        self.tools.lock().await.get(name).cloned()
    }

    pub async fn remove(&self, name: &str) -> Option<ToolRecord> {
        self.tools.lock().await.remove(name)
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.tools.lock().await.contains_key(name)
    }

    /// Names of all tools owned by the given session.
    pub async fn names_for_session(&self, session_id: &str) -> Vec<String> {
        self.tools
            .lock()
            .await
            .values()
            .filter(|record| record.session_id == session_id)
            .map(|record| record.name.clone())
            .collect()
    }

    pub async fn names(&self) -> Vec<String> {
        self.tools.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.tools.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.lock().await.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
