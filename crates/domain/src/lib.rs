//! Shared vocabulary for the clustered device-session core: device
//! identities, data-tree addressing, NETCONF-style error values,
//! configuration and structured trace events.

pub mod config;
pub mod device;
pub mod error;
pub mod path;
pub mod rpc_error;
pub mod trace;

pub use device::{DeviceId, PeerCredential, TransportProtocol};
pub use error::{Error, Result};
pub use path::{DataNode, DataPath, Store};
pub use rpc_error::{DeviceError, ErrorSeverity, ErrorTag, ErrorType};
