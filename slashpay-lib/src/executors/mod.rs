//! Real payment node backends.
//!
//! ## Feature Flags
//!
//! The `http-executor` feature flag must be enabled for actual HTTP requests:
//!
//! ```toml
//! [dependencies]
//! slashpay-lib = { version = "0.1", features = ["http-executor"] }
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use slashpay_lib::executors::{LndBackend, LndConfig};
//! use slashpay_lib::backend::PaymentBackend;
//!
//! let config = LndConfig::from_env().expect("SLASHPAY_LND_URL not set");
//! let lnd = LndBackend::new(config)?;
//!
//! let info = lnd.get_wallet_info().await?;
//! println!("Connected to {}", info.alias);
//! ```

mod config;
mod lnd;

pub use config::{read_macaroon_hex, BitcoinNetwork, LndConfig, LndPaths};
pub use lnd::LndBackend;
