// src/lib.rs

// Import the top-level `toolrelay` module.
pub mod toolrelay;

// Re-export the types embedders interact with so they don't have to navigate
// the whole module hierarchy.
pub use toolrelay::config::RelayConfig;
pub use toolrelay::dispatcher::RemoteRelay;
pub use toolrelay::host::{
    CallContext, HandlerOutcome, HostBridge, HostError, SessionCleanup, SessionStatus, ToolHandler,
};
pub use toolrelay::protocol::{ContentEnvelope, ToolContent};
pub use toolrelay::registry::ToolRecord;
