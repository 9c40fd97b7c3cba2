//! Pay command - resolve a payee and negotiate a payment

use anyhow::{bail, Context, Result};
use slashpay_interactive::{FramedChannel, NegotiationConfig, NoiseChannel, PayerNegotiator};
use slashpay_lib::receipts::ReceiptStore;
use slashpay_lib::resolver::{LocalDiscovery, Resolver, ResolverConfig};
use slashpay_lib::{MethodId, PaymentRequest};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::ui;

/// Flags of `slashpay pay`.
pub struct PayOptions {
    pub identifier: String,
    pub amount: u64,
    pub description: String,
    /// Preferred method first.
    pub methods: Vec<String>,
    pub use_cache: bool,
    pub timeout: Option<u64>,
}

impl PayOptions {
    /// The request sent to the payee. Repeated methods are sent once.
    pub fn request(&self) -> Result<PaymentRequest> {
        if self.amount == 0 {
            bail!("No amount provided");
        }
        let mut methods: Vec<MethodId> = Vec::new();
        for name in &self.methods {
            let method = MethodId::new(name.trim());
            if !methods.contains(&method) {
                methods.push(method);
            }
        }
        Ok(PaymentRequest::new(
            methods,
            self.amount,
            self.description.clone(),
        ))
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

#[tracing::instrument(skip_all, fields(identifier = %options.identifier))]
pub async fn run(data_dir: &Path, directory: &Path, options: PayOptions, _verbose: bool) -> Result<()> {
    ui::header("Payment");
    let request = options.request()?;

    ui::info(&format!("Resolving {}", options.identifier));
    let discovery = LocalDiscovery::new(directory);
    let mut resolver_config = ResolverConfig::default().with_cache(options.use_cache);
    if let Some(timeout) = options.timeout() {
        resolver_config = resolver_config.with_timeout(timeout);
    }
    let resolver = Resolver::new(discovery.clone(), resolver_config);

    let spinner = ui::spinner("Resolving...");
    let resolved = resolver.resolve(&options.identifier).await;
    spinner.finish_and_clear();
    let peer = match resolved {
        Ok(peer) => peer,
        Err(e) if options.use_cache => {
            return Err(e).context("Resolution failed, please try again without --use-cache");
        }
        Err(e) => return Err(e).context("Resolution failed"),
    };
    ui::key_value("Connecting", &peer.to_endpoint());

    let addr = discovery
        .lookup_peer(&peer)
        .await
        .context("Payee is not reachable")?;
    let framed = FramedChannel::connect(addr)
        .await
        .context("Failed to connect to payee")?;
    let mut channel = NoiseChannel::connect(framed, &peer)
        .await
        .context("Payee failed to authenticate")?;

    let mut config = NegotiationConfig::default();
    if let Some(timeout) = options.timeout() {
        config = config.with_response_timeout(timeout);
    }
    let mut payer = PayerNegotiator::new(config)
        .with_store(Arc::new(ReceiptStore::new(data_dir)))
        .with_observer(Arc::new(ui::PayerProgress::new()));

    // The observer already printed the outcome.
    payer
        .run(&mut channel, &request)
        .await
        .context("Payment failed")?;
    ui::separator();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(methods: &[&str], amount: u64) -> PayOptions {
        PayOptions {
            identifier: "slashpay:x".into(),
            amount,
            description: "tea".into(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            use_cache: false,
            timeout: None,
        }
    }

    #[test]
    fn request_keeps_preference_order() {
        let request = options(&["p2wpkh", "bolt11"], 10).request().unwrap();
        assert_eq!(request.methods, vec![MethodId::new("p2wpkh"), MethodId::bolt11()]);
        assert_eq!(request.amount, 10);
        assert_eq!(request.description, "tea");
    }

    #[test]
    fn repeated_method_is_sent_once() {
        let request = options(&["bolt11", "bolt11"], 10).request().unwrap();
        assert_eq!(request.methods, vec![MethodId::bolt11()]);
    }

    #[test]
    fn zero_amount_is_refused() {
        assert!(options(&["bolt11"], 0).request().is_err());
    }
}
