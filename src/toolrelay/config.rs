//! Configuration for the relay.
//!
//! Provides the [`RelayConfig`] struct. Users construct it manually; no
//! config-file parsing dependencies are required.

use std::time::Duration;

/// Tunables for a [`RemoteRelay`](crate::toolrelay::dispatcher::RemoteRelay).
///
/// This struct is intentionally minimal and users construct it however they
/// want.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use toolrelay::RelayConfig;
///
/// let config = RelayConfig {
///     pending_call_ttl: Duration::from_secs(60),
///     ..RelayConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Delay applied before nudging AI clients to re-fetch the tool list,
    /// so rapid registration bursts collapse into one refresh.
    pub refresh_delay: Duration,
    /// How long a pending call may wait for its provider reply before the
    /// TTL sweep expires it with a timeout error.
    pub pending_call_ttl: Duration,
    /// Override for the installation unlock token. `None` uses the token
    /// derived by [`token::unlock_token`](crate::toolrelay::token::unlock_token).
    pub unlock_token: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            refresh_delay: Duration::from_secs(2),
            pending_call_ttl: Duration::from_secs(120),
            unlock_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.refresh_delay, Duration::from_secs(2));
        assert_eq!(config.pending_call_ttl, Duration::from_secs(120));
        assert!(config.unlock_token.is_none());
    }
}
