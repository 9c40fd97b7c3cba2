//! Configuration for the LND payment node backend.
//!
//! # Environment Variables
//!
//! - `SLASHPAY_LND_URL` - LND REST API URL (e.g., `https://localhost:8080`)
//! - `SLASHPAY_LND_MACAROON` - admin macaroon in hex format
//! - `SLASHPAY_LND_MACAROON_PATH` - path to the macaroon file (used when the
//!   hex variable is not set)
//! - `SLASHPAY_LND_TLS_CERT_PATH` - path to the node's `tls.cert`
//! - `SLASHPAY_NETWORK` - `mainnet`, `testnet`, `signet` or `regtest`

use crate::{Result, SlashpayError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bitcoin network selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitcoinNetwork {
    /// Bitcoin mainnet.
    #[default]
    Mainnet,
    /// Bitcoin testnet (testnet3).
    Testnet,
    /// Bitcoin signet.
    Signet,
    /// Bitcoin regtest (local development).
    Regtest,
}

impl BitcoinNetwork {
    /// Network name as used in LND's data directory layout.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Signet => "signet",
            Self::Regtest => "regtest",
        }
    }

    /// Parse a network name, accepting common short forms.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Some(Self::Mainnet),
            "testnet" | "testnet3" | "test" => Some(Self::Testnet),
            "signet" | "sig" => Some(Self::Signet),
            "regtest" | "reg" | "local" => Some(Self::Regtest),
            _ => None,
        }
    }
}

/// Where LND keeps its TLS certificate and admin macaroon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LndPaths {
    /// `tls.cert` path.
    pub cert: PathBuf,
    /// `admin.macaroon` path.
    pub macaroon: PathBuf,
}

impl LndPaths {
    /// Default locations for the current operating system under `home`.
    pub fn for_home(home: &Path, network: BitcoinNetwork) -> Self {
        let lnd_dir = if cfg!(target_os = "macos") {
            home.join("Library").join("Application Support").join("Lnd")
        } else if cfg!(target_os = "windows") {
            home.join("AppData").join("Local").join("Lnd")
        } else {
            home.join(".lnd")
        };
        Self {
            cert: lnd_dir.join("tls.cert"),
            macaroon: lnd_dir
                .join("data")
                .join("chain")
                .join("bitcoin")
                .join(network.as_str())
                .join("admin.macaroon"),
        }
    }
}

/// Configuration for the LND REST backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LndConfig {
    /// REST API endpoint URL (e.g., "https://localhost:8080").
    pub rest_url: String,

    /// Macaroon for authentication (hex-encoded).
    pub macaroon_hex: String,

    /// TLS certificate (PEM format), needed for LND's self-signed certificate.
    pub tls_cert_pem: Option<String>,

    /// Network the node is on.
    #[serde(default)]
    pub network: BitcoinNetwork,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// How often subscriptions poll the node, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    2_000
}

impl LndConfig {
    /// Create a new LND configuration.
    pub fn new(rest_url: impl Into<String>, macaroon_hex: impl Into<String>) -> Self {
        Self {
            rest_url: rest_url.into(),
            macaroon_hex: macaroon_hex.into(),
            tls_cert_pem: None,
            network: BitcoinNetwork::default(),
            timeout_secs: default_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }

    /// Load configuration from `SLASHPAY_*` environment variables.
    ///
    /// Returns `None` when the URL or the macaroon is missing.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("SLASHPAY_LND_URL").ok()?;
        let macaroon = match std::env::var("SLASHPAY_LND_MACAROON") {
            Ok(hex) => hex,
            Err(_) => {
                let path = std::env::var("SLASHPAY_LND_MACAROON_PATH").ok()?;
                read_macaroon_hex(Path::new(&path)).ok()?
            }
        };

        let mut config = Self::new(url, macaroon);

        if let Ok(path) = std::env::var("SLASHPAY_LND_TLS_CERT_PATH") {
            if let Ok(pem) = std::fs::read_to_string(&path) {
                config = config.with_tls_cert(pem);
            }
        }

        if let Some(network) = std::env::var("SLASHPAY_NETWORK")
            .ok()
            .and_then(|s| BitcoinNetwork::parse(&s))
        {
            config = config.with_network(network);
        }

        Some(config)
    }

    /// Build a configuration from files on disk.
    pub fn from_paths(rest_url: impl Into<String>, paths: &LndPaths) -> Result<Self> {
        let macaroon = read_macaroon_hex(&paths.macaroon)?;
        let pem = std::fs::read_to_string(&paths.cert).map_err(|e| {
            SlashpayError::invalid_data(
                "tls_cert",
                format!("cannot read {}: {}", paths.cert.display(), e),
            )
        })?;
        Ok(Self::new(rest_url, macaroon).with_tls_cert(pem))
    }

    /// Set the TLS certificate.
    pub fn with_tls_cert(mut self, cert_pem: impl Into<String>) -> Self {
        self.tls_cert_pem = Some(cert_pem.into());
        self
    }

    /// Set the network.
    pub fn with_network(mut self, network: BitcoinNetwork) -> Self {
        self.network = network;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the subscription poll interval.
    pub fn with_poll_interval(mut self, millis: u64) -> Self {
        self.poll_interval_ms = millis;
        self
    }
}

/// Read a binary macaroon file and hex-encode it.
pub fn read_macaroon_hex(path: &Path) -> Result<String> {
    std::fs::read(path).map(hex::encode).map_err(|e| {
        SlashpayError::invalid_data(
            "macaroon",
            format!("cannot read {}: {}", path.display(), e),
        )
    })
}
