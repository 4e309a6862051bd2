use std::time::Duration;

use nc_domain::trace::TraceEvent;
use nc_domain::DeviceId;
use nc_protocol::{TxReply, TxRequest};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::MasterTxContext;
use crate::ask::{AskFailure, MasterAddress, PendingReply};

enum Envelope {
    Tell(TxRequest),
    Ask(TxRequest, oneshot::Sender<TxReply>),
}

/// Mailbox address of a master task running on this node.
///
/// The mailbox is FIFO, so everything sent through clones of one
/// `LocalMaster` is executed in send order.
#[derive(Clone)]
pub struct LocalMaster {
    device: DeviceId,
    mailbox: mpsc::UnboundedSender<Envelope>,
}

impl LocalMaster {
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

impl MasterAddress for LocalMaster {
    fn device(&self) -> &DeviceId {
        &self.device
    }

    fn tell(&self, request: TxRequest) -> Result<(), AskFailure> {
        self.mailbox
            .send(Envelope::Tell(request))
            .map_err(|_| AskFailure::Disconnected)
    }

    fn ask(&self, request: TxRequest) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        match self.mailbox.send(Envelope::Ask(request, tx)) {
            Ok(()) => PendingReply::new(rx),
            Err(_) => PendingReply::failed(AskFailure::Disconnected),
        }
    }
}

/// Spawn the task that owns `context` and serves its mailbox.
///
/// With `write_idle_timeout` set, a write slot nobody touched for that
/// long is cancelled, and writes sent after that fail until the next
/// open. The task exits once every [`LocalMaster`] clone is
/// dropped.
pub fn spawn_master(
    context: MasterTxContext,
    write_idle_timeout: Option<Duration>,
) -> (LocalMaster, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let address = LocalMaster {
        device: context.device().clone(),
        mailbox: tx,
    };
    let handle = tokio::spawn(run(context, rx, write_idle_timeout));
    (address, handle)
}

async fn run(
    mut ctx: MasterTxContext,
    mut mailbox: mpsc::UnboundedReceiver<Envelope>,
    write_idle_timeout: Option<Duration>,
) {
    tracing::debug!(device = %ctx.device(), "master task started");
    let mut expires_at: Option<Instant> = None;

    loop {
        let envelope = match expires_at {
            Some(at) => tokio::select! {
                envelope = mailbox.recv() => envelope,
                _ = tokio::time::sleep_until(at) => {
                    expires_at = None;
                    expire_write_slot(&mut ctx, write_idle_timeout).await;
                    continue;
                }
            },
            None => mailbox.recv().await,
        };
        let Some(envelope) = envelope else { break };

        match envelope {
            Envelope::Tell(request) => {
                let operation = request.kind();
                if let TxReply::Error { error } = ctx.handle(request).await {
                    tracing::warn!(
                        device = %ctx.device(),
                        operation,
                        error = %error,
                        "fire-and-forget operation failed on device"
                    );
                }
            }
            Envelope::Ask(request, reply_to) => {
                let reply = ctx.handle(request).await;
                if reply_to.send(reply).is_err() {
                    tracing::debug!(device = %ctx.device(), "asker gave up before the reply");
                }
            }
        }

        expires_at = match write_idle_timeout {
            Some(idle) if ctx.has_write_slot() => Some(Instant::now() + idle),
            _ => None,
        };
    }

    tracing::debug!(device = %ctx.device(), "master task stopped");
}

async fn expire_write_slot(ctx: &mut MasterTxContext, idle: Option<Duration>) {
    if !ctx.expire().await {
        return;
    }
    let idle_ms = idle.map(|d| d.as_millis() as u64).unwrap_or_default();
    tracing::warn!(
        device = %ctx.device(),
        idle_ms,
        "write transaction idle too long, cancelled"
    );
    TraceEvent::WriteSlotExpired {
        device: ctx.device().to_string(),
        idle_ms,
    }
    .emit();
}
