//! Session-level error classification.
//!
//! Every connection-manager operation returns `Result<_, ServiceError>`.
//! Transports never pattern-match on messages: they branch on the variant or
//! on the stable tag from [`ServiceError::error_type`].

use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`ConnectionManager`](crate::service::ConnectionManager)
/// operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Bad caller input. Never changes the connection mode.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The requested device does not exist on this host.
    #[error("Port {0} not found")]
    PortNotFound(String),

    /// Device-layer failure on open, write or read.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A write did not complete within its timeout. The connection stays open.
    #[error("Send operation timed out after {0:?}")]
    WriteTimeout(Duration),

    /// No open device.
    #[error("Serial port not initialized or not open")]
    NotConnected,

    /// No message buffer exists because no session was ever opened (or it
    /// has been torn down).
    #[error("Serial not initialized")]
    NotInitialized,
}

impl ServiceError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionError(message.into())
    }

    /// Stable tag reported to callers as `error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidParameter(_) => "InvalidParameter",
            Self::PortNotFound(_) => "PortNotFound",
            Self::ConnectionError(_) => "ConnectionError",
            Self::WriteTimeout(_) => "WriteTimeout",
            Self::NotConnected => "NotConnected",
            Self::NotInitialized => "NotInitialized",
        }
    }
}

/// Convenient Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
