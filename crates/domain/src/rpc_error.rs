//! NETCONF-style error values that travel between master and proxy.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    DataMissing,
    LockDenied,
    AccessDenied,
    OperationFailed,
}

impl ErrorTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InUse => "in-use",
            Self::InvalidValue => "invalid-value",
            Self::DataMissing => "data-missing",
            Self::LockDenied => "lock-denied",
            Self::AccessDenied => "access-denied",
            Self::OperationFailed => "operation-failed",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Warning => f.write_str("warning"),
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transport => "transport",
            Self::Rpc => "rpc",
            Self::Protocol => "protocol",
            Self::Application => "application",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error reported by (or on behalf of) a device.
///
/// Serializable so a master can ship it to a proxy unchanged.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{error_type}/{tag}: {message}")]
pub struct DeviceError {
    pub severity: ErrorSeverity,
    pub error_type: ErrorType,
    pub tag: ErrorTag,
    pub message: String,
}

impl DeviceError {
    pub fn new(error_type: ErrorType, tag: ErrorTag, message: impl Into<String>) -> Self {
        Self {
            severity: ErrorSeverity::Error,
            error_type,
            tag,
            message: message.into(),
        }
    }

    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Application, ErrorTag::OperationFailed, message)
    }

    pub fn in_use(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Protocol, ErrorTag::InUse, message)
    }

    pub fn data_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Application, ErrorTag::DataMissing, message)
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Application, ErrorTag::InvalidValue, message)
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }
}
