//! Error types for streamind-core

use std::fmt;

use thiserror::Error;

/// Numeric error codes shared with the other StreamInd SDKs
///
/// Error observers receive one of these alongside a human readable message,
/// so the values must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    AlreadyRegistered,
    InvalidConfig,
    NotConnected,
    AlreadyConnected,
    ConnectionFailed,
    ConnectionTimeout,
    InvalidSignal,
    SignalTooLarge,
    SendFailed,
    InvalidParameter,
    TerminalNotFound,
    InternalError,
}

impl ErrorCode {
    /// Wire-compatible numeric value
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::AlreadyRegistered => 2,
            ErrorCode::InvalidConfig => 3,
            ErrorCode::NotConnected => 4,
            ErrorCode::AlreadyConnected => 5,
            ErrorCode::ConnectionFailed => 6,
            ErrorCode::ConnectionTimeout => 7,
            ErrorCode::InvalidSignal => 8,
            ErrorCode::SignalTooLarge => 9,
            ErrorCode::SendFailed => 10,
            ErrorCode::InvalidParameter => 11,
            ErrorCode::TerminalNotFound => 12,
            ErrorCode::InternalError => 99,
        }
    }

    /// Default description for the code
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::AlreadyRegistered => "Terminal already registered",
            ErrorCode::InvalidConfig => "Invalid configuration",
            ErrorCode::NotConnected => "Not connected to platform",
            ErrorCode::AlreadyConnected => "Already connected to platform",
            ErrorCode::ConnectionFailed => "Connection failed",
            ErrorCode::ConnectionTimeout => "Connection timeout",
            ErrorCode::InvalidSignal => "Invalid signal",
            ErrorCode::SignalTooLarge => "Signal exceeds maximum size",
            ErrorCode::SendFailed => "Send failed",
            ErrorCode::InvalidParameter => "Invalid parameter",
            ErrorCode::TerminalNotFound => "Terminal not found",
            ErrorCode::InternalError => "Internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Terminal {0} not found")]
    TerminalNotFound(String),

    #[error("Terminal {0} already registered")]
    AlreadyRegistered(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Map onto the numeric code reported to error observers
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::NotConnected => ErrorCode::NotConnected,
            CoreError::AlreadyConnected => ErrorCode::AlreadyConnected,
            CoreError::ConnectionFailed(_) => ErrorCode::ConnectionFailed,
            CoreError::ConnectionTimeout(_) => ErrorCode::ConnectionTimeout,
            CoreError::PayloadTooLarge { .. } => ErrorCode::SignalTooLarge,
            CoreError::SendFailed(_) => ErrorCode::SendFailed,
            CoreError::TerminalNotFound(_) => ErrorCode::TerminalNotFound,
            CoreError::AlreadyRegistered(_) => ErrorCode::AlreadyRegistered,
            CoreError::InvalidParameter(_) => ErrorCode::InvalidParameter,
            CoreError::InvalidUrl(_) => ErrorCode::InvalidConfig,
            CoreError::Serialization(_) => ErrorCode::InvalidSignal,
            CoreError::InvalidFrame(_) | CoreError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CoreError>;
