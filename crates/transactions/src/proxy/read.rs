use std::sync::Arc;
use std::time::Duration;

use nc_domain::config::ClusterConfig;
use nc_domain::{DataNode, DataPath, Store};
use nc_protocol::{TxReply, TxRequest};

use super::{master_unreachable, unexpected_reply};
use crate::ask::MasterAddress;
use crate::error::TxError;

/// Stateless remote reader: every call is one independent round trip.
#[derive(Clone)]
pub struct ProxyReadHandle {
    master: Arc<dyn MasterAddress>,
    ask_timeout: Duration,
}

impl ProxyReadHandle {
    pub fn new(master: Arc<dyn MasterAddress>, ask_timeout: Duration) -> Self {
        Self {
            master,
            ask_timeout,
        }
    }

    pub fn from_config(master: Arc<dyn MasterAddress>, config: &ClusterConfig) -> Self {
        Self::new(master, config.ask_timeout())
    }

    /// `Ok(None)` when the device has no data at `path`.
    pub async fn read(&self, store: Store, path: DataPath) -> Result<Option<DataNode>, TxError> {
        let request = TxRequest::Read {
            store,
            path: path.clone(),
        };
        match self.round_trip("read", request).await? {
            TxReply::EmptyRead => Ok(None),
            TxReply::Data {
                path: replied,
                payload,
            } => Ok(Some(DataNode {
                path: replied.unwrap_or(path),
                data: payload,
            })),
            TxReply::Error { error } => Err(error.into()),
            other => Err(unexpected_reply(self.master.device(), "read", &other)),
        }
    }

    pub async fn exists(&self, store: Store, path: DataPath) -> Result<bool, TxError> {
        match self.round_trip("exists", TxRequest::Exists { store, path }).await? {
            TxReply::Bool { value } => Ok(value),
            TxReply::Error { error } => Err(error.into()),
            other => Err(unexpected_reply(self.master.device(), "exists", &other)),
        }
    }

    async fn round_trip(
        &self,
        operation: &'static str,
        request: TxRequest,
    ) -> Result<TxReply, TxError> {
        self.master
            .ask(request)
            .wait(self.ask_timeout)
            .await
            .map_err(|f| master_unreachable(self.master.device(), operation, f))
    }
}
