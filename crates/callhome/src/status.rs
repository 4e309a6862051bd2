//! Allow-list of call-home devices and the last known status of each.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use nc_domain::config::AllowedDevice;
use nc_domain::trace::TraceEvent;
use nc_domain::{DeviceId, PeerCredential, TransportProtocol};
use parking_lot::RwLock;
use serde::Serialize;

use crate::listener::{IdentityLookup, SessionListener, StatusRecorder};
use crate::manager::SessionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Connected,
    Disconnected,
    /// Recognised by credential, but the credential was not valid for the
    /// transport it arrived on.
    FailedAuthFailure,
    /// Presented a credential that no listed device owns.
    FailedNotAllowed,
    /// Identified, but the transport failed before the session came up.
    Failed,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::FailedAuthFailure => "FAILED_AUTH_FAILURE",
            Self::FailedNotAllowed => "FAILED_NOT_ALLOWED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

struct Entry {
    address: Option<SocketAddr>,
    ssh_host_key: Option<String>,
    tls_fingerprint: Option<String>,
    /// `false` for peers recorded because nobody recognised them.
    listed: bool,
    status: DeviceStatus,
    updated_at: DateTime<Utc>,
}

/// Summary row returned by [`DeviceStatusTable::list`].
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusInfo {
    pub unique_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<SocketAddr>,
    pub listed: bool,
    pub status: DeviceStatus,
    pub updated_at: DateTime<Utc>,
}

/// Unlisted peers remembered at once; the stalest is evicted beyond this.
pub const DEFAULT_UNLISTED_CAPACITY: usize = 256;

pub struct DeviceStatusTable {
    entries: RwLock<HashMap<String, Entry>>,
    unlisted_capacity: usize,
}

impl DeviceStatusTable {
    /// Every configured device starts out `Disconnected`.
    pub fn from_config(devices: &[AllowedDevice]) -> Self {
        let now = Utc::now();
        let entries = devices
            .iter()
            .map(|d| {
                let entry = Entry {
                    address: d.address.as_deref().and_then(|a| a.parse().ok()),
                    ssh_host_key: d.ssh_host_key.clone(),
                    tls_fingerprint: d.tls_fingerprint.clone(),
                    listed: true,
                    status: DeviceStatus::Disconnected,
                    updated_at: now,
                };
                (d.unique_id.clone(), entry)
            })
            .collect();
        Self {
            entries: RwLock::new(entries),
            unlisted_capacity: DEFAULT_UNLISTED_CAPACITY,
        }
    }

    /// Cap on rows kept for peers nobody recognised. Listed devices are
    /// never evicted.
    pub fn with_unlisted_capacity(mut self, capacity: usize) -> Self {
        self.unlisted_capacity = capacity.max(1);
        self
    }

    pub fn status(&self, unique_id: &str) -> Option<DeviceStatus> {
        self.entries.read().get(unique_id).map(|e| e.status)
    }

    pub fn list(&self) -> Vec<DeviceStatusInfo> {
        let mut rows: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(id, e)| DeviceStatusInfo {
                unique_id: id.clone(),
                address: e.address,
                listed: e.listed,
                status: e.status,
                updated_at: e.updated_at,
            })
            .collect();
        rows.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));
        rows
    }

    /// Mark the listed device owning `credential` as having failed
    /// authentication. Returns its id, if any device matched.
    pub fn report_failed_auth(&self, credential: &PeerCredential) -> Option<DeviceId> {
        let id = self.id_for(credential)?;
        self.set(id.name(), DeviceStatus::FailedAuthFailure, None);
        Some(id)
    }

    /// Mark an identified device whose transport failed during setup.
    pub fn report_failure(&self, id: &DeviceId) {
        self.set(id.name(), DeviceStatus::Failed, id.address());
    }

    fn set(&self, unique_id: &str, status: DeviceStatus, address: Option<SocketAddr>) {
        let changed = {
            let mut entries = self.entries.write();
            let Some(entry) = entries.get_mut(unique_id) else {
                return;
            };
            if address.is_some() {
                entry.address = address;
            }
            entry.updated_at = Utc::now();
            std::mem::replace(&mut entry.status, status) != status
        };
        if changed {
            tracing::info!(device = %unique_id, status = %status, "device status changed");
            TraceEvent::DeviceStatusChanged {
                device: unique_id.to_owned(),
                status: status.to_string(),
            }
            .emit();
        }
    }
}

/// Identity of an unlisted peer: a fingerprint prefix when it presented a
/// credential, otherwise its IP (the source port changes on every dial).
fn unlisted_id(remote: SocketAddr, credential: Option<&PeerCredential>) -> String {
    match credential {
        Some(c) => format!("unlisted-{}", &c.fingerprint()[..16]),
        None => format!("unlisted-{}", remote.ip()),
    }
}

/// Drop the least recently updated unlisted rows until one more fits.
fn evict_unlisted(entries: &mut HashMap<String, Entry>, capacity: usize) {
    let mut unlisted: Vec<_> = entries
        .iter()
        .filter(|(_, e)| !e.listed)
        .map(|(id, e)| (e.updated_at, id.clone()))
        .collect();
    if unlisted.len() < capacity {
        return;
    }
    unlisted.sort();
    let excess = unlisted.len() + 1 - capacity;
    for (_, id) in unlisted.into_iter().take(excess) {
        entries.remove(&id);
        tracing::debug!(device = %id, "evicted unlisted peer from status table");
    }
}

impl IdentityLookup for DeviceStatusTable {
    fn id_for(&self, credential: &PeerCredential) -> Option<DeviceId> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|(_, e)| e.listed)
            .find(|(_, e)| match credential {
                PeerCredential::SshHostKey(_) => e
                    .ssh_host_key
                    .as_deref()
                    .is_some_and(|key| credential.matches_material(key)),
                PeerCredential::TlsCertificate(_) => e
                    .tls_fingerprint
                    .as_deref()
                    .is_some_and(|fp| credential.matches_fingerprint(fp)),
            })
            .map(|(id, _)| DeviceId::new(id.clone()))
    }
}

impl StatusRecorder for DeviceStatusTable {
    fn report_unknown_peer(
        &self,
        protocol: TransportProtocol,
        remote: SocketAddr,
        credential: Option<&PeerCredential>,
    ) {
        let unique_id = unlisted_id(remote, credential);
        tracing::warn!(
            device = %unique_id,
            protocol = %protocol,
            remote = %remote,
            "call-home from a device that is not allowed"
        );
        let mut entries = self.entries.write();
        if !entries.contains_key(&unique_id) {
            evict_unlisted(&mut entries, self.unlisted_capacity);
        }
        let entry = entries.entry(unique_id).or_insert_with(|| Entry {
            address: None,
            ssh_host_key: None,
            tls_fingerprint: None,
            listed: false,
            status: DeviceStatus::FailedNotAllowed,
            updated_at: Utc::now(),
        });
        entry.address = Some(remote);
        entry.updated_at = Utc::now();
    }
}

impl SessionListener for DeviceStatusTable {
    fn session_up(&self, session: &SessionContext) {
        self.set(
            session.id().name(),
            DeviceStatus::Connected,
            Some(session.remote_address()),
        );
    }

    fn session_down(&self, session: &SessionContext) {
        self.set(session.id().name(), DeviceStatus::Disconnected, None);
    }
}
