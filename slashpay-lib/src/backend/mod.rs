//! Payment node abstraction.
//!
//! [`PaymentBackend`] is the contract a payment node (LND or a mock) fulfils.
//! [`BackendAdapter`] wraps a backend with the shared rate limiter and turns
//! its answers into uniform [`MethodResult`](crate::MethodResult)s and
//! [`Receipt`](crate::Receipt)s.

mod adapter;
#[cfg(test)]
mod tests;

pub use adapter::{AmountPolicy, BackendAdapter, NO_SUPPORTED_PAYMENT_METHOD};

use crate::{AddressFormat, Result, RoutingHint};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Basic node identity, used as a health check before serving.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    /// Node public key (hex).
    pub public_key: String,
    /// Node alias.
    #[serde(default)]
    pub alias: String,
}

/// An open channel of the node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel id.
    pub id: String,
    /// Public key of the channel partner.
    pub partner_public_key: String,
    /// CLTV delta the node requires on this channel.
    pub local_csv: u32,
    /// Minimum HTLC the node accepts on this channel, in millisatoshis.
    pub local_min_htlc_mtokens: String,
}

/// Routing policies of both ends of a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel id.
    pub id: String,
    /// One policy per channel end.
    pub policies: Vec<ChannelPolicy>,
}

impl ChannelInfo {
    /// Policy published by `public_key`, if any.
    pub fn policy_of(&self, public_key: &str) -> Option<&ChannelPolicy> {
        self.policies.iter().find(|p| p.public_key == public_key)
    }
}

/// Routing policy of one channel end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPolicy {
    /// Node the policy belongs to.
    pub public_key: String,
    /// Base fee in millisatoshis.
    pub base_fee_mtokens: String,
    /// Proportional fee in parts per million.
    pub fee_rate: u64,
    /// CLTV delta of the hop.
    pub cltv_delta: u32,
}

/// Parameters of a new invoice.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    /// Amount in satoshis.
    pub tokens: u64,
    /// Invoice description.
    pub description: String,
    /// Private routes to embed, each a list of hops.
    pub routes: Vec<Vec<RoutingHint>>,
}

/// What the node returned for a created invoice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedInvoice {
    /// Invoice id (payment hash, hex).
    pub id: String,
    /// BOLT11 payment request. Absent means creation failed.
    pub request: Option<String>,
}

/// State change of a watched invoice.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceUpdate {
    /// Invoice id.
    pub id: String,
    /// Amount received so far, in satoshis.
    pub received: u64,
    /// Invoice description.
    #[serde(default)]
    pub description: String,
    /// Whether the invoice is fully settled.
    #[serde(default)]
    pub is_confirmed: bool,
}

/// A transaction paying a watched address reached the confirmation target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfirmation {
    /// Transaction id.
    pub transaction_id: String,
    /// Amount paid to the address, in satoshis.
    pub tokens: u64,
    /// Confirmations at the time of the event.
    pub confirmations: u32,
}

/// Stream of events from the node.
///
/// Dropping the handle ends the subscription; producers notice the closed
/// channel and stop.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Wrap a receiver.
    pub fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self { receiver }
    }

    /// A bounded channel pair: the sender goes to the producer task.
    pub fn channel(buffer: usize) -> (mpsc::Sender<T>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }

    /// Next event, or `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<T> {
        self.receiver.recv().await
    }
}

/// Contract of a payment node.
///
/// Implementations are shared across connection tasks and must be
/// `Send + Sync`.
#[async_trait]
pub trait PaymentBackend: Send + Sync {
    /// Node identity.
    async fn get_wallet_info(&self) -> Result<WalletInfo>;

    /// Open channels.
    async fn get_channels(&self) -> Result<Vec<Channel>>;

    /// Policies of one channel.
    async fn get_channel(&self, id: &str) -> Result<ChannelInfo>;

    /// Create a BOLT11 invoice.
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<CreatedInvoice>;

    /// Derive a fresh on-chain address. `None` when the node returns nothing.
    async fn create_chain_address(&self, format: AddressFormat) -> Result<Option<String>>;

    /// Whether the node can derive addresses of `format` at all.
    fn supports_address_format(&self, _format: AddressFormat) -> bool {
        true
    }

    /// Watch an invoice by id.
    async fn subscribe_to_invoice(&self, id: &str) -> Result<Subscription<InvoiceUpdate>>;

    /// Watch an address for confirmed payments.
    async fn subscribe_to_chain_address(
        &self,
        address: &str,
        format: AddressFormat,
        min_confirmations: u32,
    ) -> Result<Subscription<ChainConfirmation>>;
}

#[async_trait]
impl<B: PaymentBackend + ?Sized> PaymentBackend for std::sync::Arc<B> {
    async fn get_wallet_info(&self) -> Result<WalletInfo> {
        (**self).get_wallet_info().await
    }

    async fn get_channels(&self) -> Result<Vec<Channel>> {
        (**self).get_channels().await
    }

    async fn get_channel(&self, id: &str) -> Result<ChannelInfo> {
        (**self).get_channel(id).await
    }

    async fn create_invoice(&self, request: InvoiceRequest) -> Result<CreatedInvoice> {
        (**self).create_invoice(request).await
    }

    async fn create_chain_address(&self, format: AddressFormat) -> Result<Option<String>> {
        (**self).create_chain_address(format).await
    }

    fn supports_address_format(&self, format: AddressFormat) -> bool {
        (**self).supports_address_format(format)
    }

    async fn subscribe_to_invoice(&self, id: &str) -> Result<Subscription<InvoiceUpdate>> {
        (**self).subscribe_to_invoice(id).await
    }

    async fn subscribe_to_chain_address(
        &self,
        address: &str,
        format: AddressFormat,
        min_confirmations: u32,
    ) -> Result<Subscription<ChainConfirmation>> {
        (**self)
            .subscribe_to_chain_address(address, format, min_confirmations)
            .await
    }
}
