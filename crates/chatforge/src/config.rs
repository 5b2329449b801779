//! Node-level tunables.

use std::time::Duration;

/// Tunables for a chat node.
///
/// The listen address is given to [`ChatServerBuilder::bind`] rather than
/// carried here, and the coordinator link has its own knobs in
/// [`UplinkConfig`].
///
/// [`ChatServerBuilder::bind`]: crate::ChatServerBuilder::bind
/// [`UplinkConfig`]: chatforge_uplink::UplinkConfig
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Shared secret mixed into the login signature. Must match the value
    /// game servers use when signing on behalf of their clients.
    pub app_key: String,
    /// A connection that has not sent a frame for this long is dropped by
    /// the sweep task. Clients are expected to heartbeat well inside it.
    pub idle_timeout: Duration,
    /// How often the sweep task scans for idle connections.
    pub sweep_interval: Duration,
    /// How often the node logs its connection and player counts.
    pub status_interval: Duration,
    /// Grace given to a superseded or forbidden session between the notice
    /// frame and the forced close, so the notice has time to flush.
    pub kick_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(300),
            status_interval: Duration::from_secs(60),
            kick_delay: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert!(config.app_key.is_empty());
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.status_interval, Duration::from_secs(60));
        assert_eq!(config.kick_delay, Duration::from_secs(2));
    }
}
