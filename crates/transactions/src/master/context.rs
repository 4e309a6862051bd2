use std::sync::Arc;

use nc_domain::{DataPath, DeviceError, DeviceId, Store};
use nc_protocol::{TxReply, TxRequest};
use serde_json::Value;

use crate::device::{DeviceBroker, DeviceReadTx, DeviceWriteTx};
use crate::error::{CommitError, TxError};

struct WriteSlot {
    tx: Box<dyn DeviceWriteTx>,
    /// Set when the slot was reserved by an explicit open.
    owner: Option<String>,
}

/// Executes transaction operations against the one live connection to a
/// device.
///
/// Holds a single read transaction for its whole lifetime and at most one
/// write transaction (the write slot) at a time. The slot is created by
/// the first mutation (or an explicit open) and cleared by every
/// cancel or submit, whatever their outcome.
///
/// Once an idle slot is expired, mutations and submits fail until the
/// next open, so a writer that outlived its slot never commits a partial
/// transaction.
pub struct MasterTxContext {
    device: DeviceId,
    broker: Arc<dyn DeviceBroker>,
    read_tx: Box<dyn DeviceReadTx>,
    write_slot: Option<WriteSlot>,
    expired: bool,
}

impl MasterTxContext {
    pub fn new(device: DeviceId, broker: Arc<dyn DeviceBroker>) -> Self {
        let read_tx = broker.new_read_only();
        Self {
            device,
            broker,
            read_tx,
            write_slot: None,
            expired: false,
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn has_write_slot(&self) -> bool {
        self.write_slot.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub async fn read(&self, store: Store, path: &DataPath) -> Result<Option<Value>, DeviceError> {
        self.read_tx.read(store, path).await
    }

    pub async fn exists(&self, store: Store, path: &DataPath) -> Result<bool, DeviceError> {
        self.read_tx.exists(store, path).await
    }

    /// Reserve the write slot for `owner`. Fails with `in-use` if someone
    /// else holds it. An owner re-opening its own slot gets a fresh one:
    /// that slot was reserved by an open whose reply never reached it.
    pub async fn open(&mut self, owner: Option<&str>) -> Result<(), DeviceError> {
        if let Some(slot) = self.write_slot.take() {
            if owner.is_none() || slot.owner.as_deref() != owner {
                self.write_slot = Some(slot);
                return Err(DeviceError::in_use(format!(
                    "{}: a write transaction is already open",
                    self.device
                )));
            }
            slot.tx.cancel().await;
            tracing::debug!(device = %self.device, "reclaimed write slot from an unanswered open");
        }
        self.write_slot = Some(WriteSlot {
            tx: self.broker.new_write_only()?,
            owner: owner.map(str::to_owned),
        });
        self.expired = false;
        Ok(())
    }

    /// Drop the slot if `owner` holds it. Returns whether anything was
    /// dropped.
    pub async fn release(&mut self, owner: &str) -> bool {
        let held = self
            .write_slot
            .as_ref()
            .is_some_and(|slot| slot.owner.as_deref() == Some(owner));
        if !held {
            return false;
        }
        match self.write_slot.take() {
            Some(slot) => {
                slot.tx.cancel().await;
                tracing::debug!(device = %self.device, "released write slot of a failed open");
                true
            }
            None => false,
        }
    }

    /// Cancel an idle slot and refuse further writes until the next open.
    /// Returns whether a slot was cancelled.
    pub async fn expire(&mut self) -> bool {
        match self.write_slot.take() {
            Some(slot) => {
                slot.tx.cancel().await;
                self.expired = true;
                true
            }
            None => false,
        }
    }

    fn slot(&mut self) -> Result<&mut Box<dyn DeviceWriteTx>, DeviceError> {
        if self.expired {
            return Err(DeviceError::operation_failed(format!(
                "{}: write transaction expired",
                self.device
            )));
        }
        if self.write_slot.is_none() {
            self.write_slot = Some(WriteSlot {
                tx: self.broker.new_write_only()?,
                owner: None,
            });
        }
        self.write_slot.as_mut().map(|slot| &mut slot.tx).ok_or_else(|| {
            DeviceError::operation_failed(format!("{}: write transaction unavailable", self.device))
        })
    }

    pub async fn put(&mut self, store: Store, path: &DataPath, data: Value) -> Result<(), DeviceError> {
        self.slot()?.put(store, path, data).await
    }

    pub async fn merge(
        &mut self,
        store: Store,
        path: &DataPath,
        data: Value,
    ) -> Result<(), DeviceError> {
        self.slot()?.merge(store, path, data).await
    }

    pub async fn delete(&mut self, store: Store, path: &DataPath) -> Result<(), DeviceError> {
        self.slot()?.delete(store, path).await
    }

    pub async fn cancel(&mut self) -> Result<bool, TxError> {
        match self.write_slot.take() {
            Some(slot) => Ok(slot.tx.cancel().await),
            None => Err(TxError::illegal_state(format!(
                "{}: cancel without an open write transaction",
                self.device
            ))),
        }
    }

    pub async fn submit(&mut self) -> Result<(), CommitError> {
        let slot = self.write_slot.take().ok_or(CommitError::NotOpen)?;
        slot.tx.commit().await.map_err(CommitError::Device)
    }

    /// Execute one envelope and build its reply.
    pub async fn handle(&mut self, request: TxRequest) -> TxReply {
        match request {
            TxRequest::Read { store, path } => match self.read(store, &path).await {
                Ok(Some(payload)) => TxReply::Data {
                    path: Some(path),
                    payload,
                },
                Ok(None) => TxReply::EmptyRead,
                Err(e) => e.into(),
            },
            TxRequest::Exists { store, path } => match self.exists(store, &path).await {
                Ok(value) => TxReply::Bool { value },
                Err(e) => e.into(),
            },
            TxRequest::OpenTransaction { owner } => match self.open(Some(owner.as_str())).await {
                Ok(()) => TxReply::Opened,
                Err(e) => e.into(),
            },
            TxRequest::Put {
                store,
                path,
                payload,
            } => ack(self.put(store, &path, payload).await),
            TxRequest::Merge {
                store,
                path,
                payload,
            } => ack(self.merge(store, &path, payload).await),
            TxRequest::Delete { store, path } => ack(self.delete(store, &path).await),
            TxRequest::Cancel => match self.cancel().await {
                Ok(value) => TxReply::Bool { value },
                Err(e) => DeviceError::operation_failed(e.to_string()).into(),
            },
            TxRequest::Submit => match self.submit().await {
                Ok(()) => TxReply::Submitted,
                Err(CommitError::NotOpen) => TxReply::SubmitFailed,
                Err(CommitError::Device(e)) => e.into(),
            },
            TxRequest::Release { owner } => TxReply::Bool {
                value: self.release(&owner).await,
            },
        }
    }
}

fn ack(result: Result<(), DeviceError>) -> TxReply {
    match result {
        Ok(()) => TxReply::Ack,
        Err(e) => e.into(),
    }
}
