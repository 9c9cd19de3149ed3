//! Daemon error types

use thiserror::Error;
use wirejump_proto::{FailureKind, IpcResponse};

use crate::network::allocator::AllocationError;
use crate::network::control::InterfaceError;
use crate::providers::directory::SelectionError;
use crate::providers::ProviderError;

/// Broad classes of handler failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Empty or malformed input
    Validation,
    /// The daemon is not in a state that allows the operation
    Precondition,
    /// The provider API or the system tunnel tools failed
    External,
}

/// Error returned by a command handler
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Precondition(String),

    #[error("{context}: {source}")]
    Provider {
        context: String,
        #[source]
        source: ProviderError,
    },

    #[error("{context}: {source}")]
    Interface {
        context: String,
        #[source]
        source: InterfaceError,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl DaemonError {
    pub fn validation(message: impl Into<String>) -> Self {
        DaemonError::Validation(message.into())
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        DaemonError::Precondition(message.into())
    }

    pub fn provider(context: impl Into<String>, source: ProviderError) -> Self {
        DaemonError::Provider {
            context: context.into(),
            source,
        }
    }

    pub fn interface(context: impl Into<String>, source: InterfaceError) -> Self {
        DaemonError::Interface {
            context: context.into(),
            source,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DaemonError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            DaemonError::Validation(_) => ErrorCategory::Validation,
            DaemonError::Precondition(_) => ErrorCategory::Precondition,
            DaemonError::Provider { .. } | DaemonError::Interface { .. } | DaemonError::Io { .. } => {
                ErrorCategory::External
            }
        }
    }
}

impl From<AllocationError> for DaemonError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::PrefixTooLarge(_) => DaemonError::Validation(err.to_string()),
            AllocationError::Exhausted => DaemonError::Precondition(err.to_string()),
        }
    }
}

impl From<SelectionError> for DaemonError {
    fn from(err: SelectionError) -> Self {
        DaemonError::Precondition(format!("unable to guess upstream: {}", err))
    }
}

/// Why the dispatcher could not produce a reply
#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("server is busy, try again later")]
    Busy,

    #[error("method not found: {0}")]
    UnknownFunction(String),

    #[error("invalid parameters for {function}: {source}")]
    InvalidParams {
        function: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {function} reply: {source}")]
    EncodeReply {
        function: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Handler(#[from] DaemonError),
}

impl ExecuteError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExecuteError::Busy => FailureKind::Busy,
            ExecuteError::UnknownFunction(_) => FailureKind::UnknownFunction,
            ExecuteError::InvalidParams { .. } | ExecuteError::EncodeReply { .. } => {
                FailureKind::Protocol
            }
            ExecuteError::Handler(_) => FailureKind::Command,
        }
    }

    /// Error envelope sent back over the socket
    pub fn to_response(&self) -> IpcResponse {
        IpcResponse::Error {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}
