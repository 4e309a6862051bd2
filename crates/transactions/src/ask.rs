//! Request/reply primitive between a proxy and the master of a device.
//!
//! A [`MasterAddress`] accepts fire-and-forget `tell`s and correlated
//! `ask`s. Messages sent through one address are delivered to the master
//! in send order.

use std::time::Duration;

use nc_domain::DeviceId;
use nc_protocol::{TxReply, TxRequest};
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AskFailure {
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("master went away before replying")]
    Disconnected,
    #[error("request refused: {0}")]
    Rejected(String),
}

/// Where the master for one device can be reached.
pub trait MasterAddress: Send + Sync {
    fn device(&self) -> &DeviceId;

    /// Enqueue a request without waiting for (or expecting) a reply.
    fn tell(&self, request: TxRequest) -> Result<(), AskFailure>;

    /// Enqueue a request and return a handle to its single reply.
    ///
    /// The request is enqueued before this returns, so a later `tell` or
    /// `ask` on the same address is processed after it.
    fn ask(&self, request: TxRequest) -> PendingReply;
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// The not-yet-arrived reply to an [`MasterAddress::ask`].
///
/// Dropping it (or timing out in [`PendingReply::wait`]) runs the
/// abandon hook, which lets correlation-map substrates forget the request.
pub struct PendingReply {
    slot: Option<Result<oneshot::Receiver<TxReply>, AskFailure>>,
    on_abandon: Option<Cleanup>,
}

impl PendingReply {
    pub fn new(rx: oneshot::Receiver<TxReply>) -> Self {
        Self {
            slot: Some(Ok(rx)),
            on_abandon: None,
        }
    }

    /// A reply that failed before anything was sent.
    pub fn failed(failure: AskFailure) -> Self {
        Self {
            slot: Some(Err(failure)),
            on_abandon: None,
        }
    }

    pub fn on_abandon(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_abandon = Some(Box::new(hook));
        self
    }

    /// Wait at most `timeout` for the reply.
    pub async fn wait(mut self, timeout: Duration) -> Result<TxReply, AskFailure> {
        let rx = match self.slot.take() {
            Some(Ok(rx)) => rx,
            Some(Err(failure)) => return Err(failure),
            None => return Err(AskFailure::Disconnected),
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(AskFailure::Disconnected),
            Err(_) => Err(AskFailure::Timeout(timeout)),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(hook) = self.on_abandon.take() {
            hook();
        }
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.slot {
            Some(Ok(_)) => "waiting",
            Some(Err(_)) => "failed",
            None => "consumed",
        };
        f.debug_struct("PendingReply").field("state", &state).finish()
    }
}
