//! Slashpay library.
//!
//! Building blocks for negotiating a payment between two peers: resolving a
//! payee's published service document, producing invoices and addresses through
//! a rate-limited payment node adapter, waiting for settlement and keeping an
//! append-only list of receipts.
//!
//! Network-facing collaborators (the replicated document log, the payment node)
//! are injected through traits, so the crate holds no process-wide state.
//!
//! # Example
//!
//! ```ignore
//! use slashpay_lib::{backend::BackendAdapter, rate_limit::BackendRateLimiter};
//! use slashpay_lib::executors::{LndBackend, LndConfig};
//! use std::sync::Arc;
//!
//! let backend = LndBackend::new(LndConfig::from_env().unwrap())?;
//! let limiter = Arc::new(BackendRateLimiter::default());
//! let adapter = BackendAdapter::new(backend, limiter);
//!
//! let invoice = adapter.generate_invoice(1_000, "coffee").await;
//! assert!(!invoice.error);
//! ```

use std::fmt;

pub mod backend;
pub mod errors;
pub mod executors;
pub mod identifier;
pub mod methods;
pub mod rate_limit;
pub mod receipts;
pub mod resolver;
pub mod types;

/// Test utilities for exercising the protocol without a payment node.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use errors::{SlashpayError, SlashpayErrorCode};
pub use identifier::Identifier;
pub use methods::{select_method, AddressFormat, PaymentMethod};
pub use types::{
    MethodResult, PaymentRequest, PeerAddress, Receipt, ReceiptData, RoutingHint,
    ServiceDescriptor, ServiceDocument,
};

/// Common result alias for Slashpay operations.
pub type Result<T> = std::result::Result<T, SlashpayError>;

/// Length in bytes of every public key handled by the library.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// A 32-byte public key (payee log key or peer key).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice, rejecting anything that is not 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Generate a random key (used for fresh peer identities).
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// Identifier for a payment method as exchanged on the wire.
///
/// # Example
///
/// ```
/// use slashpay_lib::MethodId;
///
/// let method: MethodId = "bolt11".into();
/// assert_eq!(method, MethodId::bolt11());
/// assert_eq!(method.as_str(), "bolt11");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MethodId(pub String);

impl MethodId {
    /// Create a new MethodId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the method ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// BOLT11 Lightning invoice.
    pub const BOLT11: &'static str = "bolt11";
    /// Native segwit on-chain address.
    pub const P2WPKH: &'static str = "p2wpkh";
    /// Pay-to-script-hash (nested segwit) on-chain address.
    pub const P2SH: &'static str = "p2sh";
    /// Legacy pay-to-pubkey-hash on-chain address.
    pub const P2PKH: &'static str = "p2pkh";

    /// Create the bolt11 method ID.
    pub fn bolt11() -> Self {
        Self::new(Self::BOLT11)
    }
}

impl From<&str> for MethodId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MethodId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for MethodId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Methods a payee supports out of the box, most preferred first.
pub fn default_supported_methods() -> Vec<MethodId> {
    [
        MethodId::BOLT11,
        MethodId::P2WPKH,
        MethodId::P2SH,
        MethodId::P2PKH,
    ]
    .into_iter()
    .map(MethodId::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_from_slice_checks_length() {
        assert!(PublicKey::from_slice(&[0u8; 31]).is_none());
        assert!(PublicKey::from_slice(&[0u8; 33]).is_none());
        let key = PublicKey::from_slice(&[7u8; 32]).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn public_key_displays_as_hex() {
        let key = PublicKey::from_bytes([0xab; 32]);
        assert_eq!(key.to_string(), "ab".repeat(32));
    }

    #[test]
    fn method_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&MethodId::bolt11()).unwrap();
        assert_eq!(json, "\"bolt11\"");
    }

    #[test]
    fn default_methods_keep_preference_order() {
        let methods = default_supported_methods();
        let names: Vec<_> = methods.iter().map(MethodId::as_str).collect();
        assert_eq!(names, ["bolt11", "p2wpkh", "p2sh", "p2pkh"]);
    }
}
