use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session monitoring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Seconds between session-delta emissions. `0` disables the feed.
    #[serde(default = "d_update_interval")]
    pub update_interval_secs: u64,
}

impl MonitoringConfig {
    pub fn update_interval(&self) -> Option<Duration> {
        (self.update_interval_secs > 0).then(|| Duration::from_secs(self.update_interval_secs))
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: d_update_interval(),
        }
    }
}

fn d_update_interval() -> u64 {
    6
}
