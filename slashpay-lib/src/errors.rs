//! Error types for Slashpay operations.
//!
//! Errors fall into four groups:
//! - resolution errors, terminal for one resolution attempt;
//! - backend errors, surfaced to the payer as an `error: true` result;
//! - transport/protocol errors, terminal for one connection;
//! - storage errors, which are non-fatal and never reach the protocol layer.

use std::fmt;

/// Numeric error codes, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SlashpayErrorCode {
    /// Feature not compiled in
    Unimplemented = 1000,
    /// Transport/network layer error
    Transport = 2000,
    /// Operation exceeded its configured timeout
    Timeout = 2002,
    /// Identifier could not be decoded
    InvalidIdentifier = 4000,
    /// Replicated log has no entries
    DocumentNotFound = 4001,
    /// Service document lacks a SlashPay entry
    NoPaymentService = 4002,
    /// Service endpoint does not hold a valid peer key
    InvalidPeerAddress = 4003,
    /// Payment method not supported
    MethodNotSupported = 4010,
    /// Invalid request/data
    InvalidData = 5000,
    /// Serialization error
    Serialization = 5002,
    /// Payment node rejected or failed a call
    Backend = 6000,
    /// Receipt persistence failed (non-fatal)
    Storage = 7000,
    /// Internal/unexpected error
    Internal = 9999,
}

/// Error type for Slashpay operations.
#[derive(Debug)]
pub enum SlashpayError {
    /// Feature not compiled in.
    Unimplemented(&'static str),

    /// Transport/network layer error.
    Transport(String),

    /// An operation exceeded its configured timeout.
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Identifier is malformed or does not decode to a public key.
    InvalidIdentifier(String),

    /// The payee's replicated log is still empty after syncing.
    DocumentNotFound(String),

    /// The latest service document has no `SlashPay` service.
    NoPaymentService(String),

    /// The payment service endpoint does not decode to a peer key.
    InvalidPeerAddress(String),

    /// Payment method not supported by this node.
    MethodNotSupported(String),

    /// Invalid data provided.
    InvalidData {
        /// Field or parameter name
        field: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Serialization/deserialization error.
    Serialization(String),

    /// The payment node failed a call or returned an unusable answer.
    Backend(String),

    /// Receipt persistence failed. Logged and swallowed by callers.
    Storage(String),

    /// Internal/unexpected error.
    Internal(String),
}

impl SlashpayError {
    /// Get the numeric error code.
    pub fn code(&self) -> SlashpayErrorCode {
        match self {
            Self::Unimplemented(_) => SlashpayErrorCode::Unimplemented,
            Self::Transport(_) => SlashpayErrorCode::Transport,
            Self::Timeout { .. } => SlashpayErrorCode::Timeout,
            Self::InvalidIdentifier(_) => SlashpayErrorCode::InvalidIdentifier,
            Self::DocumentNotFound(_) => SlashpayErrorCode::DocumentNotFound,
            Self::NoPaymentService(_) => SlashpayErrorCode::NoPaymentService,
            Self::InvalidPeerAddress(_) => SlashpayErrorCode::InvalidPeerAddress,
            Self::MethodNotSupported(_) => SlashpayErrorCode::MethodNotSupported,
            Self::InvalidData { .. } => SlashpayErrorCode::InvalidData,
            Self::Serialization(_) => SlashpayErrorCode::Serialization,
            Self::Backend(_) => SlashpayErrorCode::Backend,
            Self::Storage(_) => SlashpayErrorCode::Storage,
            Self::Internal(_) => SlashpayErrorCode::Internal,
        }
    }

    /// Returns true for the errors a resolution attempt can end with.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier(_)
                | Self::DocumentNotFound(_)
                | Self::NoPaymentService(_)
                | Self::InvalidPeerAddress(_)
        )
    }

    /// Returns true if the error only affects bookkeeping.
    pub fn is_non_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Create a backend error from any error type.
    pub fn backend<E: fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }

    /// Create an invalid data error.
    pub fn invalid_data(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

impl fmt::Display for SlashpayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unimplemented(label) => write!(f, "{} is not implemented", label),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::Timeout {
                operation,
                timeout_ms,
            } => write!(f, "{} timed out after {}ms", operation, timeout_ms),
            Self::InvalidIdentifier(id) => write!(f, "invalid identifier: {}", id),
            Self::DocumentNotFound(key) => write!(f, "no slashtags document found for {}", key),
            Self::NoPaymentService(key) => write!(f, "no SlashPay service found for {}", key),
            Self::InvalidPeerAddress(endpoint) => {
                write!(f, "invalid slashpay peer address: {}", endpoint)
            }
            Self::MethodNotSupported(method) => {
                write!(f, "payment method not supported: {}", method)
            }
            Self::InvalidData { field, reason } => write!(f, "invalid {}: {}", field, reason),
            Self::Serialization(msg) => write!(f, "serialization error: {}", msg),
            Self::Backend(msg) => write!(f, "payment node error: {}", msg),
            Self::Storage(msg) => write!(f, "storage error: {}", msg),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for SlashpayError {}

impl From<serde_json::Error> for SlashpayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
