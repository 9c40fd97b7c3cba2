//! CLI command implementations

pub mod pay;
pub mod receipts;
pub mod receive;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use slashpay_interactive::NoiseKeypair;
use slashpay_lib::{PeerAddress, PublicKey};
use std::path::{Path, PathBuf};

/// Keys a payee publishes under and listens as.
#[derive(Clone, Debug)]
pub struct PayeeIdentity {
    /// Key of the log holding the service document.
    pub log_key: PublicKey,
    /// Static Noise keypair; its public half is the published peer address.
    pub noise: NoiseKeypair,
}

impl PayeeIdentity {
    /// Key peers connect to.
    pub fn peer(&self) -> PeerAddress {
        self.noise.peer_address()
    }
}

#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    log_key: String,
    peer_secret: String,
}

/// Get the path to the payee identity file
pub fn identity_path(data_dir: &Path) -> PathBuf {
    data_dir.join("identity.json")
}

/// Load the payee identity, creating one on first use so the published
/// identifier stays stable across restarts.
pub fn load_or_create_identity(data_dir: &Path) -> Result<PayeeIdentity> {
    let path = identity_path(data_dir);
    if path.exists() {
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let stored: StoredIdentity =
            serde_json::from_str(&json).context("Identity file is corrupt")?;
        return Ok(PayeeIdentity {
            log_key: parse_key(&stored.log_key)?,
            noise: NoiseKeypair::from_secret(parse_bytes(&stored.peer_secret)?),
        });
    }

    let identity = PayeeIdentity {
        log_key: PublicKey::random(),
        noise: NoiseKeypair::generate(),
    };
    let stored = StoredIdentity {
        log_key: identity.log_key.to_hex(),
        peer_secret: hex::encode(identity.noise.secret_bytes()),
    };
    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&path, serde_json::to_string_pretty(&stored)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(identity)
}

fn parse_key(hex_key: &str) -> Result<PublicKey> {
    Ok(PublicKey::from_bytes(parse_bytes(hex_key)?))
}

fn parse_bytes(hex_key: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_key).context("Identity key is not hex")?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Identity key must be 32 bytes"))
}
