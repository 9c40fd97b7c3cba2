//! Payment methods and method selection.
//!
//! A payer lists the methods it can pay with, most preferred first; the payee
//! has its own supported set. Selection picks the first method of the payer's
//! list the payee supports, so the payer's order always wins.

use crate::{MethodId, SlashpayError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// On-chain address account types a payment node can derive addresses for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFormat {
    /// Native segwit.
    P2wpkh,
    /// Nested segwit.
    P2sh,
    /// Legacy.
    P2pkh,
    /// Taproot. Never negotiated, only available to direct address requests.
    P2tr,
}

impl AddressFormat {
    /// Wire name of the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P2wpkh => "p2wpkh",
            Self::P2sh => "p2sh",
            Self::P2pkh => "p2pkh",
            Self::P2tr => "p2tr",
        }
    }
}

impl FromStr for AddressFormat {
    type Err = SlashpayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "p2wpkh" => Ok(Self::P2wpkh),
            "p2sh" => Ok(Self::P2sh),
            "p2pkh" => Ok(Self::P2pkh),
            "p2tr" => Ok(Self::P2tr),
            other => Err(SlashpayError::MethodNotSupported(other.to_string())),
        }
    }
}

impl fmt::Display for AddressFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a negotiable method id asks the payment node to produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentMethod {
    /// A BOLT11 Lightning invoice.
    Bolt11,
    /// A fresh on-chain address of the given format.
    Chain(AddressFormat),
}

impl PaymentMethod {
    /// Map a wire method id to a method. Unknown ids (and `p2tr`, which is not
    /// negotiable) yield `None`.
    pub fn from_id(id: &MethodId) -> Option<Self> {
        match id.as_str() {
            MethodId::BOLT11 => Some(Self::Bolt11),
            MethodId::P2WPKH => Some(Self::Chain(AddressFormat::P2wpkh)),
            MethodId::P2SH => Some(Self::Chain(AddressFormat::P2sh)),
            MethodId::P2PKH => Some(Self::Chain(AddressFormat::P2pkh)),
            _ => None,
        }
    }

    /// Wire id of the method.
    pub fn id(&self) -> MethodId {
        match self {
            Self::Bolt11 => MethodId::bolt11(),
            Self::Chain(format) => MethodId::new(format.as_str()),
        }
    }
}

/// Pick the first method in `requested` that `supported` contains.
///
/// ```
/// use slashpay_lib::{select_method, MethodId};
///
/// let requested = vec![MethodId::from("p2pkh"), MethodId::from("bolt11")];
/// let supported = vec![MethodId::bolt11()];
/// assert_eq!(select_method(&requested, &supported), Some(&MethodId::bolt11()));
/// ```
pub fn select_method<'a>(requested: &'a [MethodId], supported: &[MethodId]) -> Option<&'a MethodId> {
    requested.iter().find(|method| supported.contains(method))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn negotiable_ids_map_to_methods() {
        assert_eq!(
            PaymentMethod::from_id(&MethodId::bolt11()),
            Some(PaymentMethod::Bolt11)
        );
        assert_eq!(
            PaymentMethod::from_id(&MethodId::from("p2sh")),
            Some(PaymentMethod::Chain(AddressFormat::P2sh))
        );
        assert_eq!(PaymentMethod::from_id(&MethodId::from("p2tr")), None);
        assert_eq!(PaymentMethod::from_id(&MethodId::from("zcash")), None);
    }

    #[test]
    fn address_format_parses_wire_names() {
        for format in [
            AddressFormat::P2wpkh,
            AddressFormat::P2sh,
            AddressFormat::P2pkh,
            AddressFormat::P2tr,
        ] {
            assert_eq!(format.as_str().parse::<AddressFormat>().unwrap(), format);
        }
        assert!("segwit".parse::<AddressFormat>().is_err());
    }

    #[test]
    fn no_overlap_selects_nothing() {
        let requested = vec![MethodId::from("zcash")];
        assert_eq!(select_method(&requested, &crate::default_supported_methods()), None);
        assert_eq!(select_method(&[], &crate::default_supported_methods()), None);
    }

    fn method_ids() -> impl Strategy<Value = Vec<MethodId>> {
        prop::collection::vec(
            prop::sample::select(vec!["bolt11", "p2wpkh", "p2sh", "p2pkh", "p2tr", "zcash"]),
            0..6,
        )
        .prop_map(|ids| ids.into_iter().map(MethodId::from).collect())
    }

    proptest! {
        #[test]
        fn selection_returns_lowest_supported_index(
            requested in method_ids(),
            supported in method_ids(),
        ) {
            match select_method(&requested, &supported) {
                Some(chosen) => {
                    prop_assert!(supported.contains(chosen));
                    let index = requested.iter().position(|m| m == chosen).unwrap();
                    prop_assert!(requested[..index].iter().all(|m| !supported.contains(m)));
                }
                None => {
                    prop_assert!(requested.iter().all(|m| !supported.contains(m)));
                }
            }
        }
    }
}
