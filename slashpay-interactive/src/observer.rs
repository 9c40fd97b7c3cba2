//! Progress reporting for negotiations.
//!
//! Observers see what a negotiator does but never influence it. Every method
//! has a no-op default.

use crate::negotiator::{PayeeState, PayerState};
use slashpay_lib::{MethodResult, PaymentRequest, Receipt};
use tracing::{debug, info, warn};

pub trait NegotiationObserver: Send + Sync {
    fn on_payer_state(&self, _state: PayerState) {}

    fn on_payee_state(&self, _state: PayeeState) {}

    /// The payee decoded a request.
    fn on_request(&self, _request: &PaymentRequest) {}

    /// An offer was sent (payee) or received (payer).
    fn on_offer(&self, _offer: &MethodResult) {}

    /// A receipt was sent (payee) or received (payer).
    fn on_receipt(&self, _receipt: &Receipt) {}

    /// The negotiation failed.
    fn on_failure(&self, _reason: &str) {}
}

/// Ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl NegotiationObserver for NoopObserver {}

/// Reports progress through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl NegotiationObserver for TracingObserver {
    fn on_payer_state(&self, state: PayerState) {
        debug!(%state, "payer");
    }

    fn on_payee_state(&self, state: PayeeState) {
        debug!(%state, "payee");
    }

    fn on_request(&self, request: &PaymentRequest) {
        info!(
            amount = request.amount,
            methods = ?request.methods,
            description = %request.description,
            "Received payment request"
        );
    }

    fn on_offer(&self, offer: &MethodResult) {
        info!(method = ?offer.method, id = %offer.id, "Offer");
    }

    fn on_receipt(&self, receipt: &Receipt) {
        info!(order_id = %receipt.order_id, sats = receipt.data.sats, "Receipt");
    }

    fn on_failure(&self, reason: &str) {
        warn!("Negotiation failed: {}", reason);
    }
}
