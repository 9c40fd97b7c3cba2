//! LND REST API backend.
//!
//! Talks to an LND node over its REST gateway. Invoice and address
//! subscriptions are implemented by polling; each subscription owns one task
//! that stops as soon as its [`Subscription`] handle is dropped. Polls go
//! through the limiter attached with [`LndBackend::with_limiter`], normally
//! the one shared with the [`BackendAdapter`](crate::backend::BackendAdapter).
//!
//! # Feature Flags
//!
//! The `http-executor` feature flag must be enabled for actual HTTP requests.
//! Without it, every call returns an `Unimplemented` error.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::config::LndConfig;
use crate::backend::{
    Channel, ChannelInfo, ChannelPolicy, ChainConfirmation, CreatedInvoice, InvoiceRequest,
    InvoiceUpdate, PaymentBackend, Subscription, WalletInfo,
};
use crate::rate_limit::BackendRateLimiter;
use crate::{AddressFormat, Result, SlashpayError};

/// Events buffered per subscription before the poller waits for the reader.
const SUBSCRIPTION_BUFFER: usize = 16;

/// LND REST API backend.
#[derive(Clone)]
pub struct LndBackend {
    config: LndConfig,
    limiter: Option<Arc<BackendRateLimiter>>,
    #[cfg(feature = "http-executor")]
    client: reqwest::Client,
}

impl LndBackend {
    /// Create a new LND backend with the given configuration.
    pub fn new(config: LndConfig) -> Result<Self> {
        if config.rest_url.is_empty() {
            return Err(SlashpayError::invalid_data(
                "rest_url",
                "REST URL cannot be empty",
            ));
        }
        if config.macaroon_hex.is_empty() {
            return Err(SlashpayError::invalid_data(
                "macaroon_hex",
                "Macaroon cannot be empty",
            ));
        }

        #[cfg(feature = "http-executor")]
        let client = build_client(&config)?;

        Ok(Self {
            config,
            limiter: None,
            #[cfg(feature = "http-executor")]
            client,
        })
    }

    /// Rate-limit subscription polls with `limiter`.
    pub fn with_limiter(mut self, limiter: Arc<BackendRateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &LndConfig {
        &self.config
    }

    /// Build the full URL for an API endpoint.
    #[cfg(any(feature = "http-executor", test))]
    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.rest_url.trim_end_matches('/'), path)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    async fn poll_invoice(&self, id: &str) -> Result<InvoiceUpdate> {
        match &self.limiter {
            Some(limiter) => limiter.schedule(self.fetch_invoice(id)).await,
            None => self.fetch_invoice(id).await,
        }
    }

    async fn poll_confirmations(
        &self,
        address: &str,
        min_confirmations: u32,
    ) -> Result<Vec<ChainConfirmation>> {
        match &self.limiter {
            Some(limiter) => {
                limiter
                    .schedule(self.fetch_confirmations(address, min_confirmations))
                    .await
            }
            None => self.fetch_confirmations(address, min_confirmations).await,
        }
    }

    /// Make an authenticated GET request.
    #[cfg(feature = "http-executor")]
    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .header("Grpc-Metadata-macaroon", &self.config.macaroon_hex)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        self.handle_response(response).await
    }

    /// Make an authenticated GET request (stub when feature disabled).
    #[cfg(not(feature = "http-executor"))]
    async fn get<T: for<'de> Deserialize<'de>>(&self, _path: &str) -> Result<T> {
        Err(SlashpayError::Unimplemented(
            "LND HTTP client not compiled - enable the 'http-executor' feature",
        ))
    }

    /// Make an authenticated POST request with a JSON body.
    #[cfg(feature = "http-executor")]
    async fn post<T: for<'de> Deserialize<'de>, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.url(path))
            .header("Grpc-Metadata-macaroon", &self.config.macaroon_hex)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        self.handle_response(response).await
    }

    /// Make an authenticated POST request (stub when feature disabled).
    #[cfg(not(feature = "http-executor"))]
    async fn post<T: for<'de> Deserialize<'de>, B: Serialize + Sync>(
        &self,
        _path: &str,
        _body: &B,
    ) -> Result<T> {
        Err(SlashpayError::Unimplemented(
            "LND HTTP client not compiled - enable the 'http-executor' feature",
        ))
    }

    /// Handle an HTTP response, parsing JSON or returning an error.
    #[cfg(feature = "http-executor")]
    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(map_status_error(status.as_u16(), &error_text));
        }

        response.json::<T>().await.map_err(|e| {
            SlashpayError::Serialization(format!("Failed to parse LND response: {}", e))
        })
    }

    /// Map reqwest errors to SlashpayError.
    #[cfg(feature = "http-executor")]
    fn map_reqwest_error(&self, e: reqwest::Error) -> SlashpayError {
        if e.is_timeout() {
            SlashpayError::timeout(
                "LND request",
                Duration::from_secs(self.config.timeout_secs),
            )
        } else {
            SlashpayError::Transport(format!("LND request failed: {}", e))
        }
    }

    async fn fetch_invoice(&self, id: &str) -> Result<InvoiceUpdate> {
        let invoice: LndInvoice = self.get(&format!("invoice/{}", id)).await?;
        Ok(InvoiceUpdate {
            id: id.to_string(),
            received: invoice.amt_paid_sat,
            description: invoice.memo,
            is_confirmed: invoice.settled || invoice.state == "SETTLED",
        })
    }

    async fn fetch_confirmations(
        &self,
        address: &str,
        min_confirmations: u32,
    ) -> Result<Vec<ChainConfirmation>> {
        let response: LndTransactions = self.get("transactions").await?;
        Ok(response
            .transactions
            .into_iter()
            .filter(|tx| tx.num_confirmations >= min_confirmations as i64)
            .filter_map(|tx| {
                let tokens = tx.amount_to(address)?;
                Some(ChainConfirmation {
                    transaction_id: tx.tx_hash,
                    tokens,
                    confirmations: tx.num_confirmations as u32,
                })
            })
            .collect())
    }
}

#[cfg(feature = "http-executor")]
fn build_client(config: &LndConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs));
    if let Some(pem) = &config.tls_cert_pem {
        let cert = reqwest::Certificate::from_pem(pem.as_bytes())
            .map_err(|e| SlashpayError::invalid_data("tls_cert_pem", e.to_string()))?;
        builder = builder.add_root_certificate(cert);
    }
    builder
        .build()
        .map_err(|e| SlashpayError::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// Map HTTP status codes to SlashpayError.
#[cfg(feature = "http-executor")]
fn map_status_error(status: u16, error_text: &str) -> SlashpayError {
    match status {
        400 => SlashpayError::invalid_data("request", error_text),
        404 => SlashpayError::Backend(format!("LND resource not found: {}", error_text)),
        500..=599 => {
            SlashpayError::Backend(format!("LND server error ({}): {}", status, error_text))
        }
        _ => SlashpayError::Transport(format!(
            "LND request failed ({}): {}",
            status, error_text
        )),
    }
}

/// LND's name for an address account type. LND cannot derive legacy
/// addresses.
fn address_type(format: AddressFormat) -> Option<&'static str> {
    match format {
        AddressFormat::P2wpkh => Some("WITNESS_PUBKEY_HASH"),
        AddressFormat::P2sh => Some("NESTED_PUBKEY_HASH"),
        AddressFormat::P2tr => Some("TAPROOT_PUBKEY"),
        AddressFormat::P2pkh => None,
    }
}

#[async_trait]
impl PaymentBackend for LndBackend {
    async fn get_wallet_info(&self) -> Result<WalletInfo> {
        let info: LndInfo = self.get("getinfo").await?;
        Ok(WalletInfo {
            public_key: info.identity_pubkey,
            alias: info.alias,
        })
    }

    async fn get_channels(&self) -> Result<Vec<Channel>> {
        let response: LndChannels = self.get("channels").await?;
        Ok(response
            .channels
            .into_iter()
            .map(|c| Channel {
                id: c.chan_id,
                partner_public_key: c.remote_pubkey,
                local_csv: c.local_constraints.csv_delay,
                local_min_htlc_mtokens: c.local_constraints.min_htlc_msat.to_string(),
            })
            .collect())
    }

    async fn get_channel(&self, id: &str) -> Result<ChannelInfo> {
        let edge: LndChannelEdge = self.get(&format!("graph/edge/{}", id)).await?;
        let policies = [
            (edge.node1_pub, edge.node1_policy),
            (edge.node2_pub, edge.node2_policy),
        ]
        .into_iter()
        .filter_map(|(public_key, policy)| {
            policy.map(|p| ChannelPolicy {
                public_key,
                base_fee_mtokens: p.fee_base_msat.to_string(),
                fee_rate: p.fee_rate_milli_msat,
                cltv_delta: p.time_lock_delta,
            })
        })
        .collect();

        Ok(ChannelInfo {
            id: edge.channel_id,
            policies,
        })
    }

    async fn create_invoice(&self, request: InvoiceRequest) -> Result<CreatedInvoice> {
        let route_hints = request
            .routes
            .iter()
            .filter(|route| !route.is_empty())
            .map(|route| -> Result<LndRouteHint> {
                let hop_hints = route
                    .iter()
                    .map(|hint| -> Result<LndHopHint> {
                        Ok(LndHopHint {
                            node_id: hint.node.clone(),
                            chan_id: hint.channel.clone(),
                            fee_base_msat: hint.base_fee_mtokens.parse().map_err(|_| {
                                SlashpayError::invalid_data(
                                    "base_fee_mtokens",
                                    hint.base_fee_mtokens.clone(),
                                )
                            })?,
                            fee_proportional_millionths: hint.fee_rate,
                            cltv_expiry_delta: hint.cltv_delta,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(LndRouteHint { hop_hints })
            })
            .collect::<Result<Vec<_>>>()?;

        let body = LndAddInvoice {
            memo: request.description,
            value: request.tokens.to_string(),
            private: !route_hints.is_empty(),
            route_hints,
        };
        let added: LndAddInvoiceResponse = self.post("invoices", &body).await?;
        if added.payment_request.is_empty() {
            return Ok(CreatedInvoice {
                id: String::new(),
                request: None,
            });
        }

        // The hex payment hash doubles as the invoice id for lookups.
        let decoded: LndPayReq = self
            .get(&format!("payreq/{}", added.payment_request))
            .await?;
        Ok(CreatedInvoice {
            id: decoded.payment_hash,
            request: Some(added.payment_request),
        })
    }

    fn supports_address_format(&self, format: AddressFormat) -> bool {
        address_type(format).is_some()
    }

    async fn create_chain_address(&self, format: AddressFormat) -> Result<Option<String>> {
        let kind = address_type(format)
            .ok_or_else(|| SlashpayError::MethodNotSupported(format.to_string()))?;
        let response: LndNewAddress = self.get(&format!("newaddress?type={}", kind)).await?;
        Ok(Some(response.address).filter(|a| !a.is_empty()))
    }

    async fn subscribe_to_invoice(&self, id: &str) -> Result<Subscription<InvoiceUpdate>> {
        // The first fetch surfaces unknown invoices and connection errors.
        let initial = self.fetch_invoice(id).await?;
        let (tx, subscription) = Subscription::channel(SUBSCRIPTION_BUFFER);
        let this = self.clone();
        let id = id.to_string();

        tokio::spawn(async move {
            let mut last = initial;
            if tx.send(last.clone()).await.is_err() {
                return;
            }
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = tokio::time::sleep(this.poll_interval()) => {}
                }
                match this.poll_invoice(&id).await {
                    Ok(update) if update != last => {
                        last = update.clone();
                        if tx.send(update).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Polling invoice {} failed: {}", id, e),
                }
            }
            debug!("Invoice subscription for {} ended", id);
        });

        Ok(subscription)
    }

    async fn subscribe_to_chain_address(
        &self,
        address: &str,
        _format: AddressFormat,
        min_confirmations: u32,
    ) -> Result<Subscription<ChainConfirmation>> {
        let initial = self.fetch_confirmations(address, min_confirmations).await?;
        let (tx, subscription) = Subscription::channel(SUBSCRIPTION_BUFFER);
        let this = self.clone();
        let address = address.to_string();

        tokio::spawn(async move {
            let mut seen = HashSet::new();
            let mut pending = initial;
            loop {
                for event in pending.drain(..) {
                    if seen.insert(event.transaction_id.clone()) && tx.send(event).await.is_err() {
                        return;
                    }
                }
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = tokio::time::sleep(this.poll_interval()) => {}
                }
                match this.poll_confirmations(&address, min_confirmations).await {
                    Ok(events) => pending = events,
                    Err(e) => warn!("Polling address {} failed: {}", address, e),
                }
            }
            debug!("Address subscription for {} ended", address);
        });

        Ok(subscription)
    }
}

/// LND encodes 64-bit integers as JSON strings.
fn de_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) if s.is_empty() => Ok(0),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn de_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) if s.is_empty() => Ok(0),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

// LND REST API types

#[derive(Deserialize)]
struct LndInfo {
    #[serde(default)]
    identity_pubkey: String,
    #[serde(default)]
    alias: String,
}

#[derive(Deserialize)]
struct LndChannels {
    #[serde(default)]
    channels: Vec<LndChannel>,
}

#[derive(Deserialize)]
struct LndChannel {
    chan_id: String,
    #[serde(default)]
    remote_pubkey: String,
    #[serde(default)]
    local_constraints: LndConstraints,
}

#[derive(Default, Deserialize)]
struct LndConstraints {
    #[serde(default)]
    csv_delay: u32,
    #[serde(default, deserialize_with = "de_u64")]
    min_htlc_msat: u64,
}

#[derive(Deserialize)]
struct LndChannelEdge {
    channel_id: String,
    #[serde(default)]
    node1_pub: String,
    #[serde(default)]
    node2_pub: String,
    node1_policy: Option<LndRoutingPolicy>,
    node2_policy: Option<LndRoutingPolicy>,
}

#[derive(Deserialize)]
struct LndRoutingPolicy {
    #[serde(default)]
    time_lock_delta: u32,
    #[serde(default, deserialize_with = "de_u64")]
    fee_base_msat: u64,
    #[serde(default, deserialize_with = "de_u64")]
    fee_rate_milli_msat: u64,
}

#[derive(Serialize)]
struct LndAddInvoice {
    memo: String,
    value: String,
    private: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    route_hints: Vec<LndRouteHint>,
}

#[derive(Serialize)]
struct LndRouteHint {
    hop_hints: Vec<LndHopHint>,
}

#[derive(Serialize)]
struct LndHopHint {
    node_id: String,
    chan_id: String,
    fee_base_msat: u64,
    fee_proportional_millionths: u64,
    cltv_expiry_delta: u32,
}

#[derive(Deserialize)]
struct LndAddInvoiceResponse {
    #[serde(default)]
    payment_request: String,
}

#[derive(Deserialize)]
struct LndPayReq {
    #[serde(default)]
    payment_hash: String,
}

#[derive(Deserialize)]
struct LndNewAddress {
    #[serde(default)]
    address: String,
}

#[derive(Deserialize)]
struct LndInvoice {
    #[serde(default)]
    memo: String,
    #[serde(default, deserialize_with = "de_u64")]
    amt_paid_sat: u64,
    #[serde(default)]
    settled: bool,
    #[serde(default)]
    state: String,
}

#[derive(Deserialize)]
struct LndTransactions {
    #[serde(default)]
    transactions: Vec<LndTransaction>,
}

#[derive(Deserialize)]
struct LndTransaction {
    tx_hash: String,
    #[serde(default, deserialize_with = "de_i64")]
    amount: i64,
    #[serde(default)]
    num_confirmations: i64,
    #[serde(default)]
    dest_addresses: Vec<String>,
    #[serde(default)]
    output_details: Vec<LndOutputDetail>,
}

#[derive(Deserialize)]
struct LndOutputDetail {
    #[serde(default)]
    address: String,
    #[serde(default, deserialize_with = "de_i64")]
    amount: i64,
}

impl LndTransaction {
    /// Amount this transaction paid to `address`, if it paid it at all.
    fn amount_to(&self, address: &str) -> Option<u64> {
        if let Some(output) = self.output_details.iter().find(|o| o.address == address) {
            return u64::try_from(output.amount).ok();
        }
        if self.dest_addresses.iter().any(|a| a == address) {
            return u64::try_from(self.amount).ok();
        }
        None
    }
}
