//! Receive command - serve payers through an LND node

use anyhow::{anyhow, Context, Result};
use slashpay_interactive::{
    FramedChannel, NegotiationConfig, NoiseChannel, PayeeNegotiator, PayeeOutcome,
};
use slashpay_lib::backend::BackendAdapter;
use slashpay_lib::executors::{BitcoinNetwork, LndBackend, LndConfig, LndPaths};
use slashpay_lib::rate_limit::{BackendRateLimiter, RateLimitConfig};
use slashpay_lib::receipts::ReceiptStore;
use slashpay_lib::resolver::{publish_service, LocalDiscovery};
use slashpay_lib::{Identifier, MethodId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::ui;

/// Flags of `slashpay receive`.
pub struct ReceiveOptions {
    pub port: u16,
    pub methods: Vec<String>,
    pub lnd_url: String,
    pub macaroon: Option<String>,
    pub macaroon_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,
    pub network: String,
    pub settlement_timeout: Option<u64>,
}

/// Build the LND configuration from flags, falling back to LND's default
/// file locations.
pub fn lnd_config(options: &ReceiveOptions) -> Result<LndConfig> {
    let network = BitcoinNetwork::parse(&options.network)
        .ok_or_else(|| anyhow!("Unknown network: {}", options.network))?;
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let defaults = LndPaths::for_home(&home, network);
    let paths = LndPaths {
        cert: options.tls_cert_path.clone().unwrap_or(defaults.cert),
        macaroon: options.macaroon_path.clone().unwrap_or(defaults.macaroon),
    };

    let config = match &options.macaroon {
        Some(hex) => {
            let mut config = LndConfig::new(&options.lnd_url, hex.clone());
            if let Ok(pem) = std::fs::read_to_string(&paths.cert) {
                config = config.with_tls_cert(pem);
            }
            config
        }
        None => LndConfig::from_paths(&options.lnd_url, &paths)
            .context("Failed to load LND credentials")?,
    };
    Ok(config.with_network(network))
}

#[tracing::instrument(skip_all, fields(port = options.port))]
pub async fn run(
    data_dir: &Path,
    directory: &Path,
    options: ReceiveOptions,
    verbose: bool,
) -> Result<()> {
    ui::header("Payment Receiver");

    // Negotiation calls and settlement polls share one budget.
    let limiter = BackendRateLimiter::new_shared(RateLimitConfig::default());
    let backend = LndBackend::new(lnd_config(&options)?)
        .context("Invalid LND configuration")?
        .with_limiter(limiter.clone());
    let adapter = Arc::new(BackendAdapter::new(backend, limiter));

    let wallet = match adapter.get_wallet_info().await {
        Ok(wallet) => wallet,
        Err(e) => {
            ui::error(&format!("Unable to connect to LND node: {}", e));
            return Err(e).context("LND node unreachable");
        }
    };
    ui::success(&format!("Node found with alias: {}", wallet.alias));

    let supported: Vec<MethodId> = options.methods.iter().map(|m| MethodId::new(m.trim())).collect();
    let mut config = NegotiationConfig::default();
    if let Some(secs) = options.settlement_timeout {
        config = config.with_settlement_timeout(Duration::from_secs(secs));
    }
    let payee = Arc::new(
        PayeeNegotiator::new(adapter)
            .with_supported_methods(supported)
            .with_config(config)
            .with_store(Arc::new(ReceiptStore::new(data_dir)))
            .with_observer(Arc::new(ui::PayeeProgress::new(verbose))),
    );

    let listener = TcpListener::bind(("0.0.0.0", options.port))
        .await
        .context("Failed to bind to port")?;
    let local_addr = listener.local_addr()?;

    let identity = super::load_or_create_identity(data_dir)?;
    let discovery = LocalDiscovery::new(directory);
    discovery
        .announce_peer(&identity.peer(), local_addr)
        .await
        .context("Failed to announce listener")?;
    publish_service(&discovery, &identity.log_key, &identity.peer())
        .await
        .context("Failed to publish payment service")?;

    ui::key_value("Listening on", &identity.peer().to_endpoint());
    ui::key_value("Identifier", &Identifier::new(identity.log_key).to_string());
    ui::info("Press Ctrl+C to stop");
    ui::separator();

    let keypair = Arc::new(identity.noise);
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        tracing::info!("Connection from {}", addr);
                        let payee = payee.clone();
                        let keypair = keypair.clone();
                        tokio::spawn(async move {
                            let framed = FramedChannel::new(stream);
                            let mut channel = match NoiseChannel::accept(framed, &keypair).await {
                                Ok(channel) => channel,
                                Err(e) => {
                                    tracing::warn!("Handshake with {} failed: {}", addr, e);
                                    return;
                                }
                            };
                            match payee.serve(&mut channel).await {
                                Ok(PayeeOutcome::Settled(receipt)) => {
                                    tracing::info!("Receipt {} sent to {}", receipt.order_id, addr);
                                }
                                Ok(PayeeOutcome::Rejected(reason)) => {
                                    tracing::info!("Rejected {}: {}", addr, reason);
                                }
                                Err(e) => tracing::warn!("Connection {} failed: {}", addr, e),
                            }
                        });
                    }
                    Err(e) => ui::error(&format!("Accept error: {}", e)),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                ui::info("Receiver stopped");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(dir: &Path) -> ReceiveOptions {
        ReceiveOptions {
            port: 0,
            methods: vec!["bolt11".into()],
            lnd_url: "https://127.0.0.1:8080".into(),
            macaroon: None,
            macaroon_path: Some(dir.join("admin.macaroon")),
            tls_cert_path: Some(dir.join("tls.cert")),
            network: "regtest".into(),
            settlement_timeout: None,
        }
    }

    #[test]
    fn lnd_config_reads_credentials_from_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("admin.macaroon"), [0x02, 0x01]).unwrap();
        std::fs::write(dir.path().join("tls.cert"), "PEM").unwrap();

        let config = lnd_config(&options(dir.path())).unwrap();
        assert_eq!(config.macaroon_hex, "0201");
        assert_eq!(config.tls_cert_pem.as_deref(), Some("PEM"));
        assert_eq!(config.network, BitcoinNetwork::Regtest);
    }

    #[test]
    fn hex_macaroon_skips_the_macaroon_file() {
        let dir = TempDir::new().unwrap();
        let mut options = options(dir.path());
        options.macaroon = Some("abcd".into());

        let config = lnd_config(&options).unwrap();
        assert_eq!(config.macaroon_hex, "abcd");
        assert_eq!(config.tls_cert_pem, None);
    }

    #[test]
    fn unknown_network_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut options = options(dir.path());
        options.network = "dogecoin".into();
        assert!(lnd_config(&options).is_err());
    }

    #[test]
    fn missing_credentials_are_reported() {
        let dir = TempDir::new().unwrap();
        assert!(lnd_config(&options(dir.path())).is_err());
    }
}
