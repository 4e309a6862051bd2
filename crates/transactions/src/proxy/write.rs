use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt};
use nc_domain::config::ClusterConfig;
use nc_domain::trace::TraceEvent;
use nc_domain::{DataPath, Store};
use nc_protocol::{TxReply, TxRequest};
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use super::{master_unreachable, unexpected_reply};
use crate::ask::MasterAddress;
use crate::error::TxError;

const NOT_OPENED: &str = "Transaction isn't opened";

/// Caller-visible state of a [`ProxyWriteHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Closed,
    Open,
}

/// `Opening` covers the open round trip; callers see it as `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Closed,
    Opening,
    Open,
}

/// Remote write transaction with at most one open transaction at a time.
///
/// `open`, `cancel` and `submit` are round trips bounded by the ask
/// timeout. `put`, `merge` and `delete` are sent without waiting and rely
/// on the master address delivering them before a later `submit`.
/// `cancel` and `submit` close the handle before the round trip, so the
/// handle is reusable whatever the outcome.
///
/// Every handle opens under its own owner token. An open that does not
/// complete tells the master to release whatever slot it reserved for
/// that token, so a timed-out open never leaves the device locked.
pub struct ProxyWriteHandle {
    master: Arc<dyn MasterAddress>,
    ask_timeout: Duration,
    owner: String,
    state: Mutex<Slot>,
}

impl ProxyWriteHandle {
    pub fn new(master: Arc<dyn MasterAddress>, ask_timeout: Duration) -> Self {
        Self {
            master,
            ask_timeout,
            owner: Uuid::new_v4().to_string(),
            state: Mutex::new(Slot::Closed),
        }
    }

    pub fn from_config(master: Arc<dyn MasterAddress>, config: &ClusterConfig) -> Self {
        Self::new(master, config.ask_timeout())
    }

    pub fn state(&self) -> TxState {
        match *self.state.lock() {
            Slot::Open => TxState::Open,
            Slot::Closed | Slot::Opening => TxState::Closed,
        }
    }

    pub async fn open(&self) -> Result<(), TxError> {
        {
            let mut state = self.state.lock();
            if *state != Slot::Closed {
                return Err(TxError::TransactionInUse {
                    device: self.master.device().clone(),
                });
            }
            *state = Slot::Opening;
        }
        let guard = OpeningGuard {
            handle: self,
            armed: true,
        };

        let reply = self
            .master
            .ask(TxRequest::OpenTransaction {
                owner: self.owner.clone(),
            })
            .wait(self.ask_timeout)
            .await
            .map_err(|f| master_unreachable(self.master.device(), "open", f))?;

        match reply {
            TxReply::Opened => {
                guard.opened();
                tracing::debug!(device = %self.master.device(), "write transaction opened");
                Ok(())
            }
            TxReply::Error { error } => Err(error.into()),
            other => Err(unexpected_reply(self.master.device(), "open", &other)),
        }
    }

    pub fn put(&self, store: Store, path: DataPath, payload: Value) -> Result<(), TxError> {
        self.send_mutation(TxRequest::Put {
            store,
            path,
            payload,
        })
    }

    pub fn merge(&self, store: Store, path: DataPath, payload: Value) -> Result<(), TxError> {
        self.send_mutation(TxRequest::Merge {
            store,
            path,
            payload,
        })
    }

    pub fn delete(&self, store: Store, path: DataPath) -> Result<(), TxError> {
        self.send_mutation(TxRequest::Delete { store, path })
    }

    /// Returns `false` when nothing was open or the master could not
    /// confirm the cancel. Never fails.
    pub async fn cancel(&self) -> bool {
        let pending = {
            let mut state = self.state.lock();
            if *state != Slot::Open {
                return false;
            }
            *state = Slot::Closed;
            self.master.ask(TxRequest::Cancel)
        };

        match pending.wait(self.ask_timeout).await {
            Ok(TxReply::Bool { value }) => value,
            Ok(TxReply::Error { error }) => {
                tracing::warn!(device = %self.master.device(), error = %error, "cancel failed on master");
                false
            }
            Ok(other) => {
                unexpected_reply(self.master.device(), "cancel", &other);
                false
            }
            Err(failure) => {
                master_unreachable(self.master.device(), "cancel", failure);
                false
            }
        }
    }

    /// Commit the open transaction.
    ///
    /// The handle is closed as soon as this is called; the returned future
    /// only carries the outcome. A master that had nothing open resolves
    /// to [`TxError::AlreadyClosed`].
    pub fn submit(&self) -> BoxFuture<'static, Result<(), TxError>> {
        let pending = {
            let mut state = self.state.lock();
            if *state != Slot::Open {
                return future::ready(Err(TxError::illegal_state(NOT_OPENED))).boxed();
            }
            *state = Slot::Closed;
            self.master.ask(TxRequest::Submit)
        };
        let device = self.master.device().clone();
        let timeout = self.ask_timeout;

        async move {
            let reply = pending
                .wait(timeout)
                .await
                .map_err(|f| master_unreachable(&device, "submit", f))?;
            match reply {
                TxReply::Submitted => Ok(()),
                TxReply::SubmitFailed => {
                    tracing::warn!(device = %device, "submit failed: transaction already closed on master");
                    TraceEvent::SubmitAlreadyClosed {
                        device: device.to_string(),
                    }
                    .emit();
                    Err(TxError::AlreadyClosed { device })
                }
                TxReply::Error { error } => Err(error.into()),
                other => Err(unexpected_reply(&device, "submit", &other)),
            }
        }
        .boxed()
    }

    /// Sent while holding the state lock so concurrent callers cannot
    /// reorder a mutation past a submit.
    fn send_mutation(&self, request: TxRequest) -> Result<(), TxError> {
        let state = self.state.lock();
        if *state != Slot::Open {
            return Err(TxError::illegal_state(NOT_OPENED));
        }
        let operation = request.kind();
        self.master
            .tell(request)
            .map_err(|f| master_unreachable(self.master.device(), operation, f))
    }
}

/// Puts the handle back to `Closed` if the open round trip does not
/// complete, including when the `open` future is dropped mid-flight, and
/// releases any slot the master reserved for it.
struct OpeningGuard<'a> {
    handle: &'a ProxyWriteHandle,
    armed: bool,
}

impl OpeningGuard<'_> {
    fn opened(mut self) {
        *self.handle.state.lock() = Slot::Open;
        self.armed = false;
    }
}

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.handle.state.lock();
        if *state == Slot::Opening {
            *state = Slot::Closed;
        }
        // Sent under the lock so it reaches the master before a retried open.
        let release = TxRequest::Release {
            owner: self.handle.owner.clone(),
        };
        if let Err(failure) = self.handle.master.tell(release) {
            tracing::debug!(
                device = %self.handle.master.device(),
                cause = %failure,
                "could not release write slot after failed open"
            );
        }
    }
}
