use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Call-home
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallHomeConfig {
    /// Seconds a freshly connected device has to present its credential.
    #[serde(default = "d_hello_timeout")]
    pub hello_timeout_secs: u64,

    /// Devices allowed to call home. Anything else is recorded as an
    /// unlisted peer and refused.
    #[serde(default)]
    pub devices: Vec<AllowedDevice>,
}

impl Default for CallHomeConfig {
    fn default() -> Self {
        Self {
            hello_timeout_secs: d_hello_timeout(),
            devices: Vec::new(),
        }
    }
}

/// One allow-list entry. At least one of `ssh_host_key` or
/// `tls_fingerprint` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowedDevice {
    pub unique_id: String,
    /// Expected `host:port` of the device, informational only.
    #[serde(default)]
    pub address: Option<String>,
    /// SSH host key in authorized-keys form (`ssh-ed25519 AAAA...`).
    #[serde(default)]
    pub ssh_host_key: Option<String>,
    /// SHA-256 fingerprint of the device's TLS certificate, hex, colons optional.
    #[serde(default)]
    pub tls_fingerprint: Option<String>,
}

fn d_hello_timeout() -> u64 {
    10
}
