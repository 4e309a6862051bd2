//! Collaborators the session manager calls out to.

use std::net::SocketAddr;
use std::sync::Arc;

use nc_domain::{DeviceId, PeerCredential, TransportProtocol};

use crate::manager::SessionContext;

/// Maps authenticated peer material to a device identity.
pub trait IdentityLookup: Send + Sync {
    fn id_for(&self, credential: &PeerCredential) -> Option<DeviceId>;
}

/// Accept-and-forget sink for connections nobody recognised.
pub trait StatusRecorder: Send + Sync {
    fn report_unknown_peer(
        &self,
        protocol: TransportProtocol,
        remote: SocketAddr,
        credential: Option<&PeerCredential>,
    );
}

/// Notified when a session enters or leaves the registry.
pub trait SessionListener: Send + Sync {
    fn session_up(&self, session: &SessionContext);
    fn session_down(&self, session: &SessionContext);
}

/// Fans session events out to several listeners, in registration order.
#[derive(Default, Clone)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn SessionListener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl SessionListener for ListenerSet {
    fn session_up(&self, session: &SessionContext) {
        for listener in &self.listeners {
            listener.session_up(session);
        }
    }

    fn session_down(&self, session: &SessionContext) {
        for listener in &self.listeners {
            listener.session_down(session);
        }
    }
}
