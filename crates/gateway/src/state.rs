use std::sync::Arc;

use nc_callhome::{DeviceStatusTable, SessionContextManager};
use nc_domain::config::Config;
use nc_domain::TransportProtocol;
use nc_sessions::SessionMonitor;
use tokio_util::sync::CancellationToken;

/// Shared application state passed to all API handlers.
///
/// One call-home registry per transport protocol; both report into the
/// same status table and session monitor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub status: Arc<DeviceStatusTable>,
    pub monitor: Arc<SessionMonitor>,
    pub ssh: Arc<SessionContextManager>,
    pub tls: Arc<SessionContextManager>,
    /// Cancelled once the server stops; background loops watch it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn registry(&self, protocol: TransportProtocol) -> &Arc<SessionContextManager> {
        match protocol {
            TransportProtocol::Ssh => &self.ssh,
            TransportProtocol::Tls => &self.tls,
        }
    }
}
