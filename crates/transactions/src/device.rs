//! The live device connection, as seen by the master.
//!
//! Implementations wrap a real NETCONF session; [`crate::MemoryDevice`]
//! is an in-process stand-in. Errors are returned unchanged to whoever
//! issued the operation.

use async_trait::async_trait;
use nc_domain::{DataPath, DeviceError, Store};
use serde_json::Value;

/// Opens read and write transactions on one device connection.
pub trait DeviceBroker: Send + Sync {
    fn new_read_only(&self) -> Box<dyn DeviceReadTx>;
    fn new_write_only(&self) -> Result<Box<dyn DeviceWriteTx>, DeviceError>;
}

#[async_trait]
pub trait DeviceReadTx: Send + Sync {
    /// `Ok(None)` when nothing exists at `path`.
    async fn read(&self, store: Store, path: &DataPath) -> Result<Option<Value>, DeviceError>;
    async fn exists(&self, store: Store, path: &DataPath) -> Result<bool, DeviceError>;
}

/// A device-side write transaction. Mutations accumulate until `commit`.
#[async_trait]
pub trait DeviceWriteTx: Send + Sync {
    async fn put(&mut self, store: Store, path: &DataPath, data: Value) -> Result<(), DeviceError>;
    async fn merge(&mut self, store: Store, path: &DataPath, data: Value)
        -> Result<(), DeviceError>;
    async fn delete(&mut self, store: Store, path: &DataPath) -> Result<(), DeviceError>;
    async fn cancel(self: Box<Self>) -> bool;
    async fn commit(self: Box<Self>) -> Result<(), DeviceError>;
}
