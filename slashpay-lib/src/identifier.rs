//! Payee identifiers.
//!
//! An identifier is the string a payee shares with payers: `slashpay:`
//! followed by a multibase key. The key is the ed25519-pub multicodec prefix
//! (`0xed 0x01`) and the payee's 32-byte log key, base32 encoded
//! (RFC 4648, lowercase, unpadded) behind the multibase tag `b`.
//!
//! Decoding happens before any network action so malformed input never
//! reaches the discovery network.

use crate::{PublicKey, Result, SlashpayError};
use data_encoding::BASE32_NOPAD;
use std::fmt;
use std::str::FromStr;

/// Scheme prefix of every identifier.
pub const URL_PREFIX: &str = "slashpay:";

/// Multibase tag for lowercase, unpadded RFC 4648 base32.
const MULTIBASE_BASE32: char = 'b';

/// Multicodec varint for an ed25519 public key.
const ED25519_PUB_CODEC: [u8; 2] = [0xed, 0x01];

/// A decoded payee identifier.
///
/// # Example
///
/// ```
/// use slashpay_lib::{Identifier, PublicKey};
///
/// let id = Identifier::new(PublicKey::from_bytes([1u8; 32]));
/// let parsed: Identifier = id.to_string().parse().unwrap();
/// assert_eq!(parsed, id);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Identifier {
    key: PublicKey,
}

impl Identifier {
    /// Wrap a public key.
    pub fn new(key: PublicKey) -> Self {
        Self { key }
    }

    /// Decode an identifier string.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || SlashpayError::InvalidIdentifier(input.to_string());

        let trimmed = input.trim();
        let encoded = trimmed.strip_prefix(URL_PREFIX).ok_or_else(invalid)?;
        let encoded = encoded.strip_prefix("//").unwrap_or(encoded);
        let encoded = encoded
            .strip_prefix(MULTIBASE_BASE32)
            .ok_or_else(invalid)?;

        // The alphabet is lowercase; uppercase input is not canonical.
        if encoded.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(invalid());
        }
        let bytes = BASE32_NOPAD
            .decode(encoded.to_ascii_uppercase().as_bytes())
            .map_err(|_| invalid())?;
        let key_bytes = bytes.strip_prefix(&ED25519_PUB_CODEC[..]).ok_or_else(invalid)?;
        let key = PublicKey::from_slice(key_bytes).ok_or_else(invalid)?;
        Ok(Self { key })
    }

    /// The payee's log key.
    pub fn public_key(&self) -> &PublicKey {
        &self.key
    }
}

impl FromStr for Identifier {
    type Err = SlashpayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = ED25519_PUB_CODEC.to_vec();
        bytes.extend_from_slice(self.key.as_bytes());
        write!(
            f,
            "{}{}{}",
            URL_PREFIX,
            MULTIBASE_BASE32,
            BASE32_NOPAD.encode(&bytes).to_ascii_lowercase()
        )
    }
}
