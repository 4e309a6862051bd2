mod callhome;
mod cluster;
mod monitoring;
mod observability;
mod server;

pub use callhome::*;
pub use cluster::*;
pub use monitoring::*;
pub use observability::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

use crate::device::normalize_fingerprint;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub callhome: CallHomeConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> crate::Result<Self> {
        toml::from_str(raw).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Read and parse a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |severity, field: String, message: &str| {
            errors.push(ConfigError {
                severity,
                field,
                message: message.into(),
            });
        };

        if self.server.port == 0 {
            push(ConfigSeverity::Error, "server.port".into(), "port must be greater than 0");
        }
        if self.server.host.is_empty() {
            push(ConfigSeverity::Error, "server.host".into(), "host must not be empty");
        }

        if self.cluster.ask_timeout_ms == 0 {
            push(
                ConfigSeverity::Error,
                "cluster.ask_timeout_ms".into(),
                "ask timeout must be greater than 0",
            );
        }
        if self.cluster.max_pending_requests == 0 {
            push(
                ConfigSeverity::Error,
                "cluster.max_pending_requests".into(),
                "at least one in-flight request must be allowed",
            );
        }

        if self.callhome.hello_timeout_secs == 0 {
            push(
                ConfigSeverity::Error,
                "callhome.hello_timeout_secs".into(),
                "hello timeout must be greater than 0",
            );
        }
        if self.callhome.devices.is_empty() {
            push(
                ConfigSeverity::Warning,
                "callhome.devices".into(),
                "no devices allowed to call home; every connection will be refused",
            );
        }

        let mut ids = HashSet::new();
        let mut credentials = HashSet::new();
        for (i, device) in self.callhome.devices.iter().enumerate() {
            let field = |name: &str| format!("callhome.devices[{i}].{name}");
            if device.unique_id.trim().is_empty() {
                push(ConfigSeverity::Error, field("unique_id"), "unique_id must not be empty");
            } else if !ids.insert(device.unique_id.as_str()) {
                push(ConfigSeverity::Error, field("unique_id"), "duplicate unique_id");
            }
            if device.ssh_host_key.is_none() && device.tls_fingerprint.is_none() {
                push(
                    ConfigSeverity::Error,
                    field("ssh_host_key"),
                    "either ssh_host_key or tls_fingerprint must be set",
                );
            }
            let keys = device.ssh_host_key.iter().map(|k| ("ssh", k.trim().to_owned()));
            let fingerprints = device
                .tls_fingerprint
                .iter()
                .map(|fp| ("tls", normalize_fingerprint(fp)));
            for credential in keys.chain(fingerprints) {
                if !credentials.insert(credential) {
                    push(
                        ConfigSeverity::Error,
                        field("credential"),
                        "credential already assigned to another device",
                    );
                }
            }
            if let Some(address) = &device.address {
                if address.parse::<SocketAddr>().is_err() {
                    push(ConfigSeverity::Error, field("address"), "address must be host:port");
                }
            }
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            push(
                ConfigSeverity::Error,
                "observability.sample_rate".into(),
                "sample_rate must be within [0.0, 1.0]",
            );
        }

        errors
    }
}
