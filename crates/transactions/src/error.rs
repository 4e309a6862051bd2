use nc_domain::{DeviceError, DeviceId, ErrorSeverity, ErrorTag, ErrorType};

/// Failure surfaced to a caller of the proxy or master transaction API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TxError {
    /// The master did not answer within the ask timeout. Safe to retry.
    #[error("{device}: Master is down. Please try again.")]
    MasterUnreachable { device: DeviceId },

    /// `open` was called while a transaction is already open on this handle.
    #[error("{device}: Transaction is already opened")]
    TransactionInUse { device: DeviceId },

    #[error("{0}")]
    IllegalState(String),

    /// The master had no open write transaction when the submit arrived.
    #[error("{device}: Submit failed, the transaction was already closed")]
    AlreadyClosed { device: DeviceId },

    #[error("{device}: unexpected reply to {operation}: {reply}")]
    UnexpectedReply {
        device: DeviceId,
        operation: &'static str,
        reply: &'static str,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl TxError {
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MasterUnreachable { .. })
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::MasterUnreachable { .. } | Self::AlreadyClosed { .. } => ErrorSeverity::Warning,
            Self::Device(e) => e.severity,
            _ => ErrorSeverity::Error,
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::TransactionInUse { .. } => ErrorType::Protocol,
            Self::Device(e) => e.error_type,
            _ => ErrorType::Application,
        }
    }

    pub fn error_tag(&self) -> ErrorTag {
        match self {
            Self::TransactionInUse { .. } => ErrorTag::InUse,
            Self::Device(e) => e.tag,
            _ => ErrorTag::OperationFailed,
        }
    }
}

/// Failure of the master's own commit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommitError {
    #[error("no write transaction is open")]
    NotOpen,
    #[error(transparent)]
    Device(DeviceError),
}
