//! Frame-based link between a proxy node and the master node of a device.
//!
//! The proxy side ([`ClusterLink`]) writes `ask`/`tell` frames to an
//! outbound sink and correlates `reply` frames back to waiting callers via
//! a pending map keyed by request id. The master side ([`serve_link`])
//! drains inbound frames in order into the local master mailbox.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nc_domain::config::ClusterConfig;
use nc_domain::{DeviceError, DeviceId};
use nc_protocol::{ClusterFrame, TxReply, TxRequest};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::ask::{AskFailure, MasterAddress, PendingReply};
use crate::master::LocalMaster;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<TxReply>>>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Proxy side
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ClusterLink {
    device: DeviceId,
    sink: mpsc::UnboundedSender<ClusterFrame>,
    /// request_id → waiting caller.
    pending: PendingMap,
    /// Maximum in-flight asks (0 = unlimited).
    max_pending: usize,
}

impl ClusterLink {
    pub fn new(
        device: DeviceId,
        sink: mpsc::UnboundedSender<ClusterFrame>,
        max_pending: usize,
    ) -> Self {
        Self {
            device,
            sink,
            pending: Arc::new(Mutex::new(HashMap::new())),
            max_pending,
        }
    }

    /// Link bounded by the configured `max_pending_requests`.
    pub fn from_config(
        device: DeviceId,
        sink: mpsc::UnboundedSender<ClusterFrame>,
        config: &ClusterConfig,
    ) -> Self {
        Self::new(device, sink, config.max_pending_requests)
    }

    /// Deliver a reply to whoever asked. Returns `false` for unknown ids
    /// (late replies to asks that already timed out).
    pub fn complete(&self, request_id: &str, reply: TxReply) -> bool {
        match self.pending.lock().remove(request_id) {
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => {
                tracing::warn!(
                    device = %self.device,
                    request_id = %request_id,
                    "received reply for unknown request"
                );
                false
            }
        }
    }

    pub fn handle_frame(&self, frame: ClusterFrame) {
        match frame {
            ClusterFrame::Reply { request_id, reply } => {
                self.complete(&request_id, reply);
            }
            other => {
                tracing::warn!(
                    device = %self.device,
                    frame = ?other,
                    "proxy side ignoring non-reply frame"
                );
            }
        }
    }

    /// Fail every in-flight ask (link lost). Returns how many were failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        // Dropping the senders wakes each waiter with `Disconnected`.
        drop(drained);
        if count > 0 {
            tracing::warn!(
                device = %self.device,
                failed_requests = count,
                "failed in-flight requests for lost cluster link"
            );
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl MasterAddress for ClusterLink {
    fn device(&self) -> &DeviceId {
        &self.device
    }

    fn tell(&self, request: TxRequest) -> Result<(), AskFailure> {
        self.sink
            .send(ClusterFrame::Tell { request })
            .map_err(|_| AskFailure::Disconnected)
    }

    fn ask(&self, request: TxRequest) -> PendingReply {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if self.max_pending > 0 && pending.len() >= self.max_pending {
                return PendingReply::failed(AskFailure::Rejected(format!(
                    "pending limit reached ({} requests in-flight)",
                    pending.len()
                )));
            }
            pending.insert(request_id.clone(), tx);
        }

        let frame = ClusterFrame::Ask {
            request_id: request_id.clone(),
            request,
        };
        if self.sink.send(frame).is_err() {
            self.pending.lock().remove(&request_id);
            return PendingReply::failed(AskFailure::Disconnected);
        }

        let pending = self.pending.clone();
        PendingReply::new(rx).on_abandon(move || {
            pending.lock().remove(&request_id);
        })
    }
}

/// Feed reply frames from `inbound` into `link` until the stream ends,
/// then fail whatever is still waiting.
pub fn spawn_reply_reader(
    link: Arc<ClusterLink>,
    mut inbound: mpsc::UnboundedReceiver<ClusterFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = inbound.recv().await {
            link.handle_frame(frame);
        }
        link.fail_all();
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Master side
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serve frames arriving from one proxy against `master`.
///
/// Frames are handed to the master mailbox in arrival order; replies are
/// written back as they complete. A master that does not answer within
/// `reply_timeout` yields an `operation-failed` error reply.
pub async fn serve_link(
    master: LocalMaster,
    mut inbound: mpsc::UnboundedReceiver<ClusterFrame>,
    outbound: mpsc::UnboundedSender<ClusterFrame>,
    reply_timeout: Duration,
) {
    while let Some(frame) = inbound.recv().await {
        match frame {
            ClusterFrame::Tell { request } => {
                if master.tell(request).is_err() {
                    tracing::warn!(device = %master.device(), "master stopped, closing link");
                    break;
                }
            }
            ClusterFrame::Ask {
                request_id,
                request,
            } => {
                let operation = request.kind();
                let pending = master.ask(request);
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let reply = match pending.wait(reply_timeout).await {
                        Ok(reply) => reply,
                        Err(failure) => DeviceError::operation_failed(format!(
                            "{operation} failed on master: {failure}"
                        ))
                        .into(),
                    };
                    let _ = outbound.send(ClusterFrame::Reply { request_id, reply });
                });
            }
            ClusterFrame::Reply { request_id, .. } => {
                tracing::warn!(
                    device = %master.device(),
                    request_id = %request_id,
                    "master side ignoring reply frame"
                );
            }
        }
    }
    tracing::debug!(device = %master.device(), "cluster link closed");
}
