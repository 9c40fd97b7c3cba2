//! Payer and payee state machines.
//!
//! Each side drives one negotiation per channel by receiving messages and
//! transitioning explicitly. Observers are told about every transition but
//! never cause one.

mod payee;
mod payer;

pub use payee::{PayeeNegotiator, PayeeOutcome};
pub use payer::PayerNegotiator;

use crate::channel::SecureChannel;
use crate::{InteractiveError, Result};
use serde::{Deserialize, Serialize};
use slashpay_lib::backend::AmountPolicy;
use slashpay_lib::PaymentRequest;
use std::fmt;
use std::time::Duration;

/// Payer progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayerState {
    Connecting,
    RequestSent,
    AwaitingResponse,
    MethodOffer,
    SettlementComplete,
    Failed,
    Closed,
}

impl fmt::Display for PayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PayerState::Connecting => "connecting",
            PayerState::RequestSent => "request sent",
            PayerState::AwaitingResponse => "awaiting response",
            PayerState::MethodOffer => "method offer",
            PayerState::SettlementComplete => "settlement complete",
            PayerState::Failed => "failed",
            PayerState::Closed => "closed",
        })
    }
}

/// Payee progress on one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayeeState {
    Listening,
    RequestReceived,
    MethodSelection,
    ResponseSent,
    AwaitingSettlement,
    ReceiptSent,
    Failed,
    Closed,
}

impl fmt::Display for PayeeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PayeeState::Listening => "listening",
            PayeeState::RequestReceived => "request received",
            PayeeState::MethodSelection => "method selection",
            PayeeState::ResponseSent => "response sent",
            PayeeState::AwaitingSettlement => "awaiting settlement",
            PayeeState::ReceiptSent => "receipt sent",
            PayeeState::Failed => "failed",
            PayeeState::Closed => "closed",
        })
    }
}

/// Negotiation options. Every timeout defaults to waiting indefinitely.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Longest wait for the next message from the peer.
    #[serde(default)]
    pub response_timeout: Option<Duration>,
    /// Longest wait for the payment to settle (payee only).
    #[serde(default)]
    pub settlement_timeout: Option<Duration>,
    /// Only settle once the requested amount has been received (payee only).
    #[serde(default)]
    pub require_full_amount: bool,
}

impl NegotiationConfig {
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn with_settlement_timeout(mut self, timeout: Duration) -> Self {
        self.settlement_timeout = Some(timeout);
        self
    }

    pub fn with_full_amount(mut self, require: bool) -> Self {
        self.require_full_amount = require;
        self
    }

    /// Amount check applied to settlements of `request`.
    pub fn amount_policy(&self, request: &PaymentRequest) -> AmountPolicy {
        if self.require_full_amount {
            AmountPolicy::Exact(request.amount)
        } else {
            AmountPolicy::AnyAmount
        }
    }
}

/// Receive the next message, giving up after `limit`.
async fn recv_within<C>(
    channel: &mut C,
    limit: Option<Duration>,
    operation: &'static str,
) -> Result<Option<Vec<u8>>>
where
    C: SecureChannel + ?Sized,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, channel.recv())
            .await
            .map_err(|_| InteractiveError::timeout(operation, limit))?,
        None => channel.recv().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slashpay_lib::MethodId;

    #[test]
    fn amount_policy_follows_config() {
        let request = PaymentRequest::new(vec![MethodId::bolt11()], 1_000, "");
        assert_eq!(
            NegotiationConfig::default().amount_policy(&request),
            AmountPolicy::AnyAmount
        );
        assert_eq!(
            NegotiationConfig::default()
                .with_full_amount(true)
                .amount_policy(&request),
            AmountPolicy::Exact(1_000)
        );
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: NegotiationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, NegotiationConfig::default());
        assert_eq!(config.response_timeout, None);
        assert_eq!(config.settlement_timeout, None);
    }
}
