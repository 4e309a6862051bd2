//! Per-protocol registry of live call-home sessions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use nc_domain::trace::TraceEvent;
use nc_domain::{DeviceId, TransportProtocol};
use parking_lot::Mutex;

use crate::listener::{IdentityLookup, SessionListener, StatusRecorder};
use crate::transport::CallHomeTransport;

type Registry = Mutex<HashMap<DeviceId, Arc<SessionContext>>>;

/// A device identity bound to its live transport.
pub struct SessionContext {
    id: DeviceId,
    protocol: TransportProtocol,
    session_id: String,
    transport: Arc<dyn CallHomeTransport>,
    listener: Arc<dyn SessionListener>,
    connected_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    /// Unique per registration; a reconnecting device gets a new one.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transport(&self) -> &Arc<dyn CallHomeTransport> {
        &self.transport
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.transport.remote_address()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("session_id", &self.session_id)
            .field("remote", &self.remote_address())
            .finish()
    }
}

/// Why an incoming connection was not registered. The connection owner
/// decides what to do with the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("transport closed before registration")]
    TransportClosed,

    #[error("no device is allowed with the credential presented from {remote}")]
    UnknownPeer {
        remote: SocketAddr,
        fingerprint: Option<String>,
    },

    #[error("{device} already has an active session ({existing_session})")]
    Duplicate {
        device: DeviceId,
        existing_session: String,
    },
}

impl Rejection {
    /// Short machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::TransportClosed => "transport_closed",
            Self::UnknownPeer { .. } => "unknown_peer",
            Self::Duplicate { .. } => "duplicate_session",
        }
    }
}

/// Registry for one transport protocol. TLS and SSH each get their own
/// instance; a device may hold one session in each.
pub struct SessionContextManager {
    protocol: TransportProtocol,
    identities: Arc<dyn IdentityLookup>,
    status: Arc<dyn StatusRecorder>,
    listener: Arc<dyn SessionListener>,
    sessions: Arc<Registry>,
}

impl SessionContextManager {
    pub fn new(
        protocol: TransportProtocol,
        identities: Arc<dyn IdentityLookup>,
        status: Arc<dyn StatusRecorder>,
        listener: Arc<dyn SessionListener>,
    ) -> Self {
        Self {
            protocol,
            identities,
            status,
            listener,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    /// Register `transport` under the identity its credential maps to.
    ///
    /// On success the session stays registered until the transport
    /// closes. Rejected transports are never closed here.
    pub fn on_incoming_connection(
        &self,
        transport: Arc<dyn CallHomeTransport>,
    ) -> Result<Arc<SessionContext>, Rejection> {
        let remote = transport.remote_address();
        if !transport.is_open() {
            return Err(self.reject(remote, Rejection::TransportClosed));
        }

        let credential = transport.peer_credential();
        let Some(id) = credential.as_ref().and_then(|c| self.identities.id_for(c)) else {
            self.status
                .report_unknown_peer(self.protocol, remote, credential.as_ref());
            let fingerprint = credential.as_ref().map(|c| c.fingerprint());
            TraceEvent::UnknownPeer {
                protocol: self.protocol.to_string(),
                remote: remote.to_string(),
                fingerprint: fingerprint.clone(),
            }
            .emit();
            return Err(self.reject(
                remote,
                Rejection::UnknownPeer {
                    remote,
                    fingerprint,
                },
            ));
        };
        let id = id.with_address(remote);

        let context = {
            let mut sessions = self.sessions.lock();
            if let Some(existing) = sessions.get(&id) {
                let rejection = Rejection::Duplicate {
                    device: id.clone(),
                    existing_session: existing.session_id.clone(),
                };
                drop(sessions);
                return Err(self.reject(remote, rejection));
            }
            let context = Arc::new(SessionContext {
                id: id.clone(),
                protocol: self.protocol,
                session_id: uuid::Uuid::new_v4().to_string(),
                transport: transport.clone(),
                listener: self.listener.clone(),
                connected_at: Utc::now(),
            });
            sessions.insert(id, context.clone());
            context
        };

        tracing::info!(
            device = %context.id,
            protocol = %self.protocol,
            session_id = %context.session_id,
            remote = %remote,
            "call-home session registered"
        );
        TraceEvent::SessionRegistered {
            device: context.id.name().to_owned(),
            protocol: self.protocol.to_string(),
            session_id: context.session_id.clone(),
            remote: remote.to_string(),
        }
        .emit();
        context.listener.session_up(&context);

        transport.on_close(close_callback(
            Arc::downgrade(&self.sessions),
            context.id.clone(),
            context.session_id.clone(),
        ));
        Ok(context)
    }

    pub fn get(&self, id: &DeviceId) -> Option<Arc<SessionContext>> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<SessionContext>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Release the registry. Transports stay open; their close callbacks
    /// find nothing left to remove.
    pub fn close(&self) {
        let released = {
            let mut sessions = self.sessions.lock();
            let n = sessions.len();
            sessions.clear();
            n
        };
        tracing::info!(protocol = %self.protocol, released, "call-home registry closed");
    }

    fn reject(&self, remote: SocketAddr, rejection: Rejection) -> Rejection {
        tracing::warn!(
            protocol = %self.protocol,
            remote = %remote,
            reason = rejection.reason(),
            "{rejection}"
        );
        TraceEvent::SessionRejected {
            protocol: self.protocol.to_string(),
            remote: remote.to_string(),
            reason: rejection.reason().to_owned(),
        }
        .emit();
        rejection
    }
}

/// Removes the entry for `id` only while it still belongs to `session_id`.
fn close_callback(
    sessions: Weak<Registry>,
    id: DeviceId,
    session_id: String,
) -> Box<dyn FnOnce() + Send> {
    Box::new(move || {
        let Some(sessions) = sessions.upgrade() else {
            return;
        };
        let removed = {
            let mut sessions = sessions.lock();
            match sessions.get(&id) {
                Some(current) if current.session_id == session_id => sessions.remove(&id),
                _ => None,
            }
        };
        if let Some(context) = removed {
            tracing::info!(
                device = %context.id,
                protocol = %context.protocol,
                session_id = %context.session_id,
                "call-home session removed"
            );
            TraceEvent::SessionRemoved {
                device: context.id.name().to_owned(),
                protocol: context.protocol.to_string(),
                session_id: context.session_id.clone(),
            }
            .emit();
            context.listener.session_down(&context);
        }
    })
}
