//! Wire messages.
//!
//! The payer sends one [`PaymentRequest`]. The payee answers with up to two
//! messages on the same channel: an offer (a [`MethodResult`]) and later a
//! settlement (a [`Receipt`]), or a single error. Payee messages are untagged
//! JSON objects, so the payer classifies them by their fields.

use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slashpay_lib::{MethodResult, PaymentRequest, Receipt};

/// Error text sent when none of the requested methods is supported.
pub const NO_SUPPORTED_METHOD: &str = "no supported method";

/// Prefix of the error text sent for requests that cannot be decoded.
pub const MALFORMED_REQUEST: &str = "malformed request";

/// `{error: true, data}` sent by the payee when it cannot serve a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: bool,
    pub data: String,
}

impl ErrorMessage {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            error: true,
            data: data.into(),
        }
    }

    /// Error for a request that failed to decode or validate.
    pub fn malformed(reason: impl std::fmt::Display) -> Self {
        Self::new(format!("{}: {}", MALFORMED_REQUEST, reason))
    }
}

/// A message received by the payer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayeeMessage {
    /// Payable invoice or address.
    Offer(MethodResult),
    /// Proof of settlement.
    Settlement(Receipt),
    /// Any message with `error: true`, including failed offers.
    Error(String),
}

impl PayeeMessage {
    /// Classify a raw payee message.
    ///
    /// `error == true` wins over everything else, then the presence of an
    /// `orderId` marks a settlement. Anything else is an offer.
    pub fn classify(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        if value.get("error").and_then(Value::as_bool) == Some(true) {
            let data = match value.get("data") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            return Ok(PayeeMessage::Error(data));
        }
        if value.get("orderId").is_some() {
            return Ok(PayeeMessage::Settlement(serde_json::from_value(value)?));
        }
        Ok(PayeeMessage::Offer(serde_json::from_value(value)?))
    }

    /// Wire form of this message.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(match self {
            PayeeMessage::Offer(offer) => serde_json::to_vec(offer)?,
            PayeeMessage::Settlement(receipt) => serde_json::to_vec(receipt)?,
            PayeeMessage::Error(data) => serde_json::to_vec(&ErrorMessage::new(data.clone()))?,
        })
    }
}

/// Decode and validate a payment request.
///
/// The error is the full text to send back to the payer.
pub fn parse_request(bytes: &[u8]) -> std::result::Result<PaymentRequest, ErrorMessage> {
    let request: PaymentRequest =
        serde_json::from_slice(bytes).map_err(ErrorMessage::malformed)?;
    request.validate().map_err(ErrorMessage::malformed)?;
    Ok(request)
}
