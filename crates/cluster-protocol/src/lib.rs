//! Cluster protocol: the transaction envelopes a proxy sends to the master
//! that owns a device connection, the replies it gets back, and the frame
//! wrapper that carries both across a node-to-node link.
//!
//! Envelopes are plain values. A proxy builds one, the master consumes it
//! exactly once, and nothing else ever mutates it.

pub mod callhome;

use nc_domain::{DataPath, DeviceError, Store};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Proxy → Master: one read or write operation against the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TxRequest {
    #[serde(rename = "read_request")]
    Read { store: Store, path: DataPath },

    #[serde(rename = "exists_request")]
    Exists { store: Store, path: DataPath },

    /// Ask the master to reserve its single write slot for `owner`.
    OpenTransaction { owner: String },

    #[serde(rename = "put_request")]
    Put {
        store: Store,
        path: DataPath,
        payload: Value,
    },

    #[serde(rename = "merge_request")]
    Merge {
        store: Store,
        path: DataPath,
        payload: Value,
    },

    #[serde(rename = "delete_request")]
    Delete { store: Store, path: DataPath },

    #[serde(rename = "cancel_request")]
    Cancel,

    #[serde(rename = "submit_request")]
    Submit,

    /// Drop the write slot if `owner` still holds it. Told after an open
    /// round trip failed, since the master may have reserved the slot late.
    #[serde(rename = "release_request")]
    Release { owner: String },
}

impl TxRequest {
    /// Short operation name for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Read { .. } => "read",
            Self::Exists { .. } => "exists",
            Self::OpenTransaction { .. } => "open",
            Self::Put { .. } => "put",
            Self::Merge { .. } => "merge",
            Self::Delete { .. } => "delete",
            Self::Cancel => "cancel",
            Self::Submit => "submit",
            Self::Release { .. } => "release",
        }
    }

    /// Put, merge and delete: sent fire-and-forget, never answered.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Put { .. } | Self::Merge { .. } | Self::Delete { .. })
    }
}

/// Master → Proxy: the answer to an asked [`TxRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TxReply {
    /// Data found. `path` may be omitted; the proxy re-attaches the one it asked for.
    Data {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<DataPath>,
        payload: Value,
    },

    /// Nothing exists at the requested path.
    #[serde(rename = "empty_read_response")]
    EmptyRead,

    /// Answer to `exists` and `cancel`.
    Bool { value: bool },

    /// The master reserved its write slot.
    Opened,

    /// A mutation that was asked rather than told has been applied.
    Ack,

    /// The write slot committed.
    Submitted,

    /// The master had no open write slot to commit.
    #[serde(rename = "submit_failed_reply")]
    SubmitFailed,

    /// The device (or the master on its behalf) rejected the operation.
    Error { error: DeviceError },
}

impl TxReply {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Data { .. } => "data",
            Self::EmptyRead => "empty_read",
            Self::Bool { .. } => "bool",
            Self::Opened => "opened",
            Self::Ack => "ack",
            Self::Submitted => "submitted",
            Self::SubmitFailed => "submit_failed",
            Self::Error { .. } => "error",
        }
    }
}

impl From<DeviceError> for TxReply {
    fn from(error: DeviceError) -> Self {
        Self::Error { error }
    }
}

/// Node-to-node frame. Asks carry a correlation id the reply echoes back;
/// tells carry none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ClusterFrame {
    Ask {
        request_id: String,
        request: TxRequest,
    },
    Tell {
        request: TxRequest,
    },
    Reply {
        request_id: String,
        reply: TxReply,
    },
}
