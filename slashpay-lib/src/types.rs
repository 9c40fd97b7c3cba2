//! Data exchanged between payer, payee and the payment node.

use crate::{MethodId, PublicKey, Result, SlashpayError};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Service type a payee publishes for payment negotiation.
pub const SLASHPAY_SERVICE_TYPE: &str = "SlashPay";

/// Service id used when publishing the payment service.
pub const SLASHPAY_SERVICE_ID: &str = "#slashpay";

/// Prefix of a peer endpoint inside a service descriptor.
pub const PEER_ENDPOINT_PREFIX: &str = "hyper:peer://";

/// What the payer asks for: an amount, a description and the methods it can
/// pay with, most preferred first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Requested methods in preference order.
    pub methods: Vec<MethodId>,
    /// Amount in satoshis.
    #[serde(deserialize_with = "de_amount")]
    pub amount: u64,
    /// Free-form description carried into the invoice.
    #[serde(default)]
    pub description: String,
}

impl PaymentRequest {
    /// Create a request.
    pub fn new(methods: Vec<MethodId>, amount: u64, description: impl Into<String>) -> Self {
        Self {
            methods,
            amount,
            description: description.into(),
        }
    }

    /// Check the invariants a payee relies on.
    pub fn validate(&self) -> Result<()> {
        if self.amount == 0 {
            return Err(SlashpayError::invalid_data("amount", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Payers built from interactive prompts send the amount as text.
fn de_amount<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(u64),
        Text(String),
    }

    match Amount::deserialize(deserializer)? {
        Amount::Number(n) => Ok(n),
        Amount::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid amount: {s}"))),
    }
}

/// Uniform answer of the backend adapter.
///
/// `data` is the invoice text or chain address on success and a diagnostic on
/// failure. `id` is the settlement-tracking handle (invoice id or the address
/// itself).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodResult {
    /// Method that produced this result. Absent when no method was selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<MethodId>,
    /// Payable target or diagnostic message.
    pub data: String,
    /// Settlement-tracking handle.
    #[serde(default)]
    pub id: String,
    /// Whether the call failed.
    pub error: bool,
}

impl MethodResult {
    /// A successful result.
    pub fn success(method: MethodId, data: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            method: Some(method),
            data: data.into(),
            id: id.into(),
            error: false,
        }
    }

    /// A failed result with a diagnostic message.
    pub fn failure(method: Option<MethodId>, message: impl Into<String>) -> Self {
        Self {
            method,
            data: message.into(),
            id: String::new(),
            error: true,
        }
    }
}

/// Fee and CLTV policy of one of the payee's channels, embedded in an invoice
/// so the payer's wallet can route without full graph visibility.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingHint {
    /// Channel id.
    pub channel: String,
    /// Public key of the channel partner (the hop before the payee).
    pub node: String,
    /// Base fee charged by the partner, in millisatoshis.
    pub base_fee_mtokens: String,
    /// Proportional fee rate in parts per million.
    pub fee_rate: u64,
    /// CLTV delta of the hop.
    pub cltv_delta: u32,
    /// Minimum HTLC size, in millisatoshis.
    pub min_htlc_mtokens: String,
}

/// Proof that funds for an invoice or address were received.
///
/// Receipts are immutable once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Freshly generated unique id.
    pub order_id: String,
    /// What was settled.
    pub data: ReceiptData,
    /// Whether settlement failed.
    #[serde(default)]
    pub error: bool,
    /// RFC 3339 creation time.
    #[serde(default)]
    pub timestamp: String,
}

/// Settled payment details.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptData {
    /// Invoice id or transaction id.
    pub id: String,
    /// Amount received, in satoshis.
    pub sats: u64,
    /// Invoice description, empty for chain payments.
    #[serde(default)]
    pub description: String,
}

impl Receipt {
    /// Build a receipt with a fresh order id and the current time.
    pub fn settled(id: impl Into<String>, sats: u64, description: impl Into<String>) -> Self {
        Self {
            order_id: uuid::Uuid::new_v4().to_string(),
            data: ReceiptData {
                id: id.into(),
                sats,
                description: description.into(),
            },
            error: false,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Latest entry of a payee's replicated log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDocument {
    /// Ordered service descriptors.
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

/// One published service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Service id, e.g. `#slashpay`.
    pub id: String,
    /// Service type, e.g. `SlashPay`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Where to reach the service.
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

impl ServiceDocument {
    /// A document advertising a single payment service at `peer`.
    pub fn slashpay(peer: &PeerAddress) -> Self {
        Self {
            services: vec![ServiceDescriptor {
                id: SLASHPAY_SERVICE_ID.to_string(),
                kind: SLASHPAY_SERVICE_TYPE.to_string(),
                service_endpoint: peer.to_endpoint(),
            }],
        }
    }

    /// The payment service, if the document has one.
    pub fn payment_service(&self) -> Option<&ServiceDescriptor> {
        self.services
            .iter()
            .find(|service| service.kind == SLASHPAY_SERVICE_TYPE)
    }
}

/// Binary key of the peer to open a secure channel with.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress(pub PublicKey);

impl PeerAddress {
    /// Parse a `hyper:peer://<hex>` endpoint.
    pub fn from_endpoint(endpoint: &str) -> Result<Self> {
        let encoded = endpoint.strip_prefix(PEER_ENDPOINT_PREFIX).unwrap_or(endpoint);
        let bytes = hex::decode(encoded)
            .map_err(|_| SlashpayError::InvalidPeerAddress(endpoint.to_string()))?;
        PublicKey::from_slice(&bytes)
            .map(Self)
            .ok_or_else(|| SlashpayError::InvalidPeerAddress(endpoint.to_string()))
    }

    /// Endpoint text as published in a service descriptor.
    pub fn to_endpoint(&self) -> String {
        format!("{}{}", PEER_ENDPOINT_PREFIX, self.0.to_hex())
    }

    /// The peer key.
    pub fn public_key(&self) -> &PublicKey {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_endpoint())
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerAddress({})", self.0.to_hex())
    }
}
