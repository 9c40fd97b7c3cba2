//! Slashpay Interactive Layer
//!
//! This crate implements the payment negotiation between a payer and a payee
//! over a Noise-encrypted peer channel: the payer sends a [`PaymentRequest`], the
//! payee answers with an offer (invoice or address), waits for settlement and
//! sends back a receipt.
//!
//! [`FramedChannel`] frames messages on a byte stream and [`NoiseChannel`]
//! encrypts them, authenticating the payee by its published peer address.

use slashpay_lib::SlashpayError;
use std::time::Duration;

pub mod channel;
pub mod messages;
pub mod negotiator;
pub mod noise;
pub mod observer;

pub use channel::{FramedChannel, SecureChannel, MAX_MESSAGE_SIZE};
pub use messages::{ErrorMessage, PayeeMessage, MALFORMED_REQUEST, NO_SUPPORTED_METHOD};
pub use negotiator::{
    NegotiationConfig, PayeeNegotiator, PayeeOutcome, PayeeState, PayerNegotiator, PayerState,
};
pub use noise::{NoiseChannel, NoiseKeypair, NOISE_PARAMS};
pub use observer::{NegotiationObserver, NoopObserver, TracingObserver};

pub use slashpay_lib::{MethodResult, PaymentRequest, Receipt};

/// Result type for interactive operations.
pub type Result<T> = std::result::Result<T, InteractiveError>;

#[derive(thiserror::Error, Debug)]
pub enum InteractiveError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Handshake or decryption failure.
    #[error("encryption error: {0}")]
    Crypto(String),
    #[error("{operation} timed out after {duration:?}")]
    Timeout {
        operation: &'static str,
        duration: Duration,
    },
    /// The peer answered with `error: true`.
    #[error("payee reported an error: {0}")]
    Rejected(String),
    #[error(transparent)]
    Lib(#[from] SlashpayError),
}

impl InteractiveError {
    /// Timeout of `operation` after `duration`.
    pub fn timeout(operation: &'static str, duration: Duration) -> Self {
        Self::Timeout {
            operation,
            duration,
        }
    }
}

impl From<serde_json::Error> for InteractiveError {
    fn from(e: serde_json::Error) -> Self {
        InteractiveError::Serialization(e.to_string())
    }
}
