//! Forwarders used on nodes that do not hold the device connection.

mod read;
mod write;

pub use read::ProxyReadHandle;
pub use write::{ProxyWriteHandle, TxState};

use nc_domain::trace::TraceEvent;
use nc_domain::DeviceId;
use nc_protocol::TxReply;

use crate::ask::AskFailure;
use crate::error::TxError;

/// Every failed round trip, whatever the cause, is reported as an
/// unreachable master so the caller can retry from a clean state.
fn master_unreachable(device: &DeviceId, operation: &'static str, failure: AskFailure) -> TxError {
    tracing::warn!(
        device = %device,
        operation,
        cause = %failure,
        "master did not answer"
    );
    TraceEvent::MasterUnreachable {
        device: device.to_string(),
        operation: operation.into(),
    }
    .emit();
    TxError::MasterUnreachable {
        device: device.clone(),
    }
}

fn unexpected_reply(device: &DeviceId, operation: &'static str, reply: &TxReply) -> TxError {
    tracing::error!(
        device = %device,
        operation,
        reply = reply.kind(),
        "unexpected reply type"
    );
    TxError::UnexpectedReply {
        device: device.clone(),
        operation,
        reply: reply.kind(),
    }
}
