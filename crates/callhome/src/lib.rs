//! Call-home session registry: binds inbound, authenticated device
//! connections to device identities, one live session per device and
//! protocol.

pub mod listener;
pub mod manager;
pub mod status;
pub mod transport;

pub use listener::{IdentityLookup, ListenerSet, SessionListener, StatusRecorder};
pub use manager::{Rejection, SessionContext, SessionContextManager};
pub use status::{DeviceStatus, DeviceStatusInfo, DeviceStatusTable};
pub use transport::{CallHomeTransport, CloseCallback, TransportHandle};
