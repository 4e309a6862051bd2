use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cluster forwarding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Settings for the proxy → master transaction protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// How long a proxy waits for the master to answer a round trip.
    /// Shared by every ask in the process.
    #[serde(default = "d_ask_timeout_ms")]
    pub ask_timeout_ms: u64,

    /// Idle time after which the master cancels an open write transaction
    /// nobody is touching. `0` disables expiry.
    #[serde(default = "d_write_idle_secs")]
    pub write_tx_idle_timeout_secs: u64,

    /// Upper bound on in-flight asks per cluster link.
    #[serde(default = "d_max_pending")]
    pub max_pending_requests: usize,
}

impl ClusterConfig {
    pub fn ask_timeout(&self) -> Duration {
        Duration::from_millis(self.ask_timeout_ms)
    }

    pub fn write_tx_idle_timeout(&self) -> Option<Duration> {
        (self.write_tx_idle_timeout_secs > 0)
            .then(|| Duration::from_secs(self.write_tx_idle_timeout_secs))
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            ask_timeout_ms: d_ask_timeout_ms(),
            write_tx_idle_timeout_secs: d_write_idle_secs(),
            max_pending_requests: d_max_pending(),
        }
    }
}

fn d_ask_timeout_ms() -> u64 {
    5_000
}

fn d_write_idle_secs() -> u64 {
    120
}

fn d_max_pending() -> usize {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_idle_timeout_disables_expiry() {
        let cfg = ClusterConfig {
            write_tx_idle_timeout_secs: 0,
            ..Default::default()
        };
        assert!(cfg.write_tx_idle_timeout().is_none());
        assert_eq!(
            ClusterConfig::default().write_tx_idle_timeout(),
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn deserialize_partial_uses_defaults() {
        let cfg: ClusterConfig = toml::from_str("ask_timeout_ms = 250").unwrap();
        assert_eq!(cfg.ask_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.max_pending_requests, 200);
    }
}
