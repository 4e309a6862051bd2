//! Transaction forwarding between the master that owns a device
//! connection and the proxies on every other cluster node.
//!
//! - [`MasterTxContext`] runs operations against the device itself and
//!   guards the single write slot.
//! - [`spawn_master`] wraps a context in a task with a FIFO mailbox.
//! - [`ProxyReadHandle`] and [`ProxyWriteHandle`] forward operations to a
//!   [`MasterAddress`] with a bounded ask timeout.
//! - [`ClusterLink`] and [`serve_link`] carry the same traffic as frames
//!   between nodes.

pub mod ask;
pub mod device;
pub mod error;
pub mod link;
pub mod master;
pub mod memory;
pub mod proxy;

pub use ask::{AskFailure, MasterAddress, PendingReply};
pub use device::{DeviceBroker, DeviceReadTx, DeviceWriteTx};
pub use error::{CommitError, TxError};
pub use link::{serve_link, spawn_reply_reader, ClusterLink};
pub use master::{spawn_master, LocalMaster, MasterTxContext};
pub use memory::MemoryDevice;
pub use proxy::{ProxyReadHandle, ProxyWriteHandle, TxState};
