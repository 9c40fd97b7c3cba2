//! Rate-limited adapter over a [`PaymentBackend`].

use super::{Channel, InvoiceRequest, PaymentBackend, WalletInfo};
use crate::rate_limit::BackendRateLimiter;
use crate::{
    AddressFormat, MethodId, MethodResult, PaymentMethod, PaymentRequest, Receipt, Result,
    RoutingHint, SlashpayError,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Diagnostic returned when a request names no method the node can serve.
pub const NO_SUPPORTED_PAYMENT_METHOD: &str = "no supported payment method";

/// Confirmations an address payment needs before it counts as settled.
const MIN_CONFIRMATIONS: u32 = 1;

/// Which invoice updates count as settlement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountPolicy {
    /// Any positive received amount settles the invoice.
    #[default]
    AnyAmount,
    /// The received amount must reach the requested sum.
    Exact(u64),
}

impl AmountPolicy {
    fn accepts(&self, received: u64) -> bool {
        match self {
            Self::AnyAmount => received > 0,
            Self::Exact(expected) => received > 0 && received >= *expected,
        }
    }
}

/// Uniform, rate-limited access to a payment node.
///
/// One adapter is built at startup and shared by every connection task. All
/// node calls go through the shared limiter.
pub struct BackendAdapter<B> {
    backend: B,
    limiter: Arc<BackendRateLimiter>,
}

impl<B: PaymentBackend> BackendAdapter<B> {
    /// Wrap a backend.
    pub fn new(backend: B, limiter: Arc<BackendRateLimiter>) -> Self {
        Self { backend, limiter }
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The shared limiter.
    pub fn limiter(&self) -> &Arc<BackendRateLimiter> {
        &self.limiter
    }

    /// Whether the node can serve `method`. Unknown methods are never served.
    pub fn supports(&self, method: &MethodId) -> bool {
        match PaymentMethod::from_id(method) {
            Some(PaymentMethod::Bolt11) => true,
            Some(PaymentMethod::Chain(format)) => self.backend.supports_address_format(format),
            None => false,
        }
    }

    /// Query node identity.
    pub async fn get_wallet_info(&self) -> Result<WalletInfo> {
        self.limiter.schedule(self.backend.get_wallet_info()).await
    }

    /// Create a BOLT11 invoice carrying one routing hint per open channel.
    ///
    /// Channel policies are fetched concurrently. If any fetch fails, or a
    /// channel has no policy for its partner, no invoice is created.
    #[instrument(skip(self, description))]
    pub async fn generate_invoice(&self, amount: u64, description: &str) -> MethodResult {
        match self.try_generate_invoice(amount, description).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Invoice generation failed: {}", e);
                MethodResult::failure(Some(MethodId::bolt11()), e.to_string())
            }
        }
    }

    async fn try_generate_invoice(&self, amount: u64, description: &str) -> Result<MethodResult> {
        let channels = self.limiter.schedule(self.backend.get_channels()).await?;
        let hints = try_join_all(channels.iter().map(|channel| self.routing_hint(channel))).await?;
        debug!("Built {} routing hints", hints.len());

        let invoice = self
            .limiter
            .schedule(self.backend.create_invoice(InvoiceRequest {
                tokens: amount,
                description: description.to_string(),
                routes: vec![hints],
            }))
            .await?;

        Ok(match invoice.request {
            Some(request) => MethodResult::success(MethodId::bolt11(), request, invoice.id),
            None => MethodResult::failure(
                Some(MethodId::bolt11()),
                "payment node returned no invoice",
            ),
        })
    }

    async fn routing_hint(&self, channel: &Channel) -> Result<RoutingHint> {
        let info = self
            .limiter
            .schedule(self.backend.get_channel(&channel.id))
            .await?;
        let policy = info.policy_of(&channel.partner_public_key).ok_or_else(|| {
            SlashpayError::Backend(format!(
                "channel {} has no policy for partner {}",
                channel.id, channel.partner_public_key
            ))
        })?;

        Ok(RoutingHint {
            channel: info.id.clone(),
            node: channel.partner_public_key.clone(),
            base_fee_mtokens: policy.base_fee_mtokens.clone(),
            fee_rate: policy.fee_rate,
            cltv_delta: channel.local_csv,
            min_htlc_mtokens: channel.local_min_htlc_mtokens.clone(),
        })
    }

    /// Derive a fresh on-chain address. The address doubles as the
    /// settlement-tracking id.
    #[instrument(skip(self))]
    pub async fn generate_address(&self, format: AddressFormat) -> MethodResult {
        let method = MethodId::new(format.as_str());
        match self
            .limiter
            .schedule(self.backend.create_chain_address(format))
            .await
        {
            Ok(Some(address)) => MethodResult::success(method, address.clone(), address),
            Ok(None) => MethodResult::failure(Some(method), "payment node returned no address"),
            Err(e) => {
                warn!("Address generation failed: {}", e);
                MethodResult::failure(Some(method), e.to_string())
            }
        }
    }

    /// Dispatch a request to the operation matching `method`.
    ///
    /// Absent or unknown methods fail without contacting the node.
    pub async fn run_method(
        &self,
        method: Option<&MethodId>,
        request: &PaymentRequest,
    ) -> MethodResult {
        match method.and_then(PaymentMethod::from_id) {
            Some(PaymentMethod::Bolt11) => {
                self.generate_invoice(request.amount, &request.description)
                    .await
            }
            Some(PaymentMethod::Chain(format)) => self.generate_address(format).await,
            None => MethodResult::failure(None, NO_SUPPORTED_PAYMENT_METHOD),
        }
    }

    /// Wait for the first settlement of `id` and build its receipt.
    ///
    /// Invoices settle on the first update with a positive received amount
    /// accepted by `policy`. Addresses settle on the first confirmed payment.
    /// The subscription is dropped as soon as a receipt exists, so later
    /// events are never observed.
    #[instrument(skip(self))]
    pub async fn await_settlement(
        &self,
        method: &MethodId,
        id: &str,
        policy: AmountPolicy,
        timeout: Option<Duration>,
    ) -> Result<Receipt> {
        let settle = self.settle(method, id, policy);
        let receipt = match timeout {
            Some(limit) => tokio::time::timeout(limit, settle)
                .await
                .map_err(|_| SlashpayError::timeout("settlement", limit))??,
            None => settle.await?,
        };
        info!(order_id = %receipt.order_id, sats = receipt.data.sats, "Payment settled");
        Ok(receipt)
    }

    /// Watch `id` and hand the receipt to `on_receipt` exactly once.
    pub async fn run_subscribe<F>(&self, method: &MethodId, id: &str, on_receipt: F) -> Result<()>
    where
        F: FnOnce(Receipt),
    {
        let receipt = self
            .await_settlement(method, id, AmountPolicy::AnyAmount, None)
            .await?;
        on_receipt(receipt);
        Ok(())
    }

    async fn settle(&self, method: &MethodId, id: &str, policy: AmountPolicy) -> Result<Receipt> {
        match PaymentMethod::from_id(method) {
            Some(PaymentMethod::Bolt11) => {
                let mut updates = self
                    .limiter
                    .schedule(self.backend.subscribe_to_invoice(id))
                    .await?;
                while let Some(update) = updates.next().await {
                    if policy.accepts(update.received) {
                        return Ok(Receipt::settled(
                            update.id,
                            update.received,
                            update.description,
                        ));
                    }
                    debug!(received = update.received, "Ignoring invoice update");
                }
                Err(SlashpayError::Backend(format!(
                    "invoice subscription for {} closed before settlement",
                    id
                )))
            }
            Some(PaymentMethod::Chain(format)) => {
                let mut confirmations = self
                    .limiter
                    .schedule(
                        self.backend
                            .subscribe_to_chain_address(id, format, MIN_CONFIRMATIONS),
                    )
                    .await?;
                match confirmations.next().await {
                    Some(event) => Ok(Receipt::settled(event.transaction_id, event.tokens, "")),
                    None => Err(SlashpayError::Backend(format!(
                        "address subscription for {} closed before settlement",
                        id
                    ))),
                }
            }
            None => Err(SlashpayError::MethodNotSupported(method.to_string())),
        }
    }
}
