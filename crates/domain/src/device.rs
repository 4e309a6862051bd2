//! Device identity and the peer material a call-home transport presents.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DeviceId
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity of a managed device.
///
/// Equality and hashing use the name only: the address is informational
/// (where the device was last reached) and may change between sessions
/// without the device becoming a different device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceId {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address: Option<SocketAddr>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }
}

impl PartialEq for DeviceId {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for DeviceId {}

impl Hash for DeviceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(addr) => write!(f, "RemoteDevice{{{}/{addr}}}", self.name),
            None => write!(f, "RemoteDevice{{{}}}", self.name),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport protocol
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Transport a call-home device used to reach the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Ssh,
    Tls,
}

impl TransportProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Tls => "tls",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ssh" => Ok(Self::Ssh),
            "tls" => Ok(Self::Tls),
            other => Err(format!("unknown call-home protocol: {other}")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Peer credential
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Authenticated material a transport handshake yielded for its peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "material", rename_all = "snake_case")]
pub enum PeerCredential {
    /// SSH server host key, in authorized-keys encoding.
    SshHostKey(String),
    /// TLS peer certificate (PEM or base64 DER).
    TlsCertificate(String),
}

impl PeerCredential {
    pub fn protocol(&self) -> TransportProtocol {
        match self {
            Self::SshHostKey(_) => TransportProtocol::Ssh,
            Self::TlsCertificate(_) => TransportProtocol::Tls,
        }
    }

    pub fn material(&self) -> &str {
        match self {
            Self::SshHostKey(m) | Self::TlsCertificate(m) => m.trim(),
        }
    }

    /// Lowercase hex SHA-256 of the credential material.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.material().as_bytes()))
    }

    /// Constant-time comparison of this credential's fingerprint against a
    /// configured one. Colons and case in `expected` are ignored.
    pub fn matches_fingerprint(&self, expected: &str) -> bool {
        digest_eq(&self.fingerprint(), &normalize_fingerprint(expected))
    }

    /// Constant-time comparison of the raw material against a configured key.
    pub fn matches_material(&self, expected: &str) -> bool {
        digest_eq(self.material(), expected.trim())
    }
}

/// Canonical form of a configured fingerprint: lowercase hex, no colons.
pub fn normalize_fingerprint(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != ':')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Hashing normalizes lengths so `ct_eq` always compares 32 bytes.
fn digest_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}
