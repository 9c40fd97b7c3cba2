//! In-memory payment node.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use crate::backend::{
    ChainConfirmation, Channel, ChannelInfo, ChannelPolicy, CreatedInvoice, InvoiceRequest,
    InvoiceUpdate, PaymentBackend, Subscription, WalletInfo,
};
use crate::{AddressFormat, Result, SlashpayError};
use async_trait::async_trait;
use tokio::sync::mpsc;

const SUBSCRIPTION_BUFFER: usize = 16;

#[derive(Default)]
struct MockState {
    wallet_fails: bool,
    channels: Vec<Channel>,
    channel_infos: HashMap<String, ChannelInfo>,
    failing_channels: HashSet<String>,
    invoice_fails: bool,
    omit_invoice_request: bool,
    invoices: HashMap<String, InvoiceUpdate>,
    created_invoices: Vec<InvoiceRequest>,
    confirmations: HashMap<String, Vec<ChainConfirmation>>,
    unsupported_formats: HashSet<AddressFormat>,
    next_id: u64,
}

/// A scriptable [`PaymentBackend`].
///
/// Invoices and addresses are created in memory. Tests settle them with
/// [`MockBackend::pay_invoice`] and [`MockBackend::confirm_address`], which
/// push events to every live subscription.
pub struct MockBackend {
    alias: String,
    state: RwLock<MockState>,
    invoice_watchers: Mutex<HashMap<String, Vec<mpsc::Sender<InvoiceUpdate>>>>,
    address_watchers: Mutex<HashMap<String, Vec<mpsc::Sender<ChainConfirmation>>>>,
    calls: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A node with no channels.
    pub fn new() -> Self {
        Self {
            alias: "mock-node".to_string(),
            state: RwLock::new(MockState::default()),
            invoice_watchers: Mutex::new(HashMap::new()),
            address_watchers: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Add a channel whose partner publishes `partner_fee_base_msat` and
    /// `partner_fee_rate`.
    pub fn with_channel(
        self,
        id: &str,
        partner: &str,
        partner_fee_base_msat: u64,
        partner_fee_rate: u64,
    ) -> Self {
        {
            let mut state = self.state.write().unwrap();
            state.channels.push(Channel {
                id: id.to_string(),
                partner_public_key: partner.to_string(),
                local_csv: 144,
                local_min_htlc_mtokens: "1000".to_string(),
            });
            state.channel_infos.insert(
                id.to_string(),
                ChannelInfo {
                    id: id.to_string(),
                    policies: vec![
                        ChannelPolicy {
                            public_key: "02mock".to_string(),
                            base_fee_mtokens: "0".to_string(),
                            fee_rate: 0,
                            cltv_delta: 40,
                        },
                        ChannelPolicy {
                            public_key: partner.to_string(),
                            base_fee_mtokens: partner_fee_base_msat.to_string(),
                            fee_rate: partner_fee_rate,
                            cltv_delta: 40,
                        },
                    ],
                },
            );
        }
        self
    }

    /// Behave like a node that cannot derive `format` addresses.
    pub fn without_address_format(self, format: AddressFormat) -> Self {
        self.state
            .write()
            .unwrap()
            .unsupported_formats
            .insert(format);
        self
    }

    /// Make policy lookups for `channel_id` fail.
    pub fn fail_channel(&self, channel_id: &str) {
        self.state
            .write()
            .unwrap()
            .failing_channels
            .insert(channel_id.to_string());
    }

    /// Remove the partner's policy from `channel_id`.
    pub fn drop_partner_policy(&self, channel_id: &str) {
        let mut state = self.state.write().unwrap();
        let partner = state
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .map(|c| c.partner_public_key.clone());
        if let (Some(partner), Some(info)) = (partner, state.channel_infos.get_mut(channel_id)) {
            info.policies.retain(|p| p.public_key != partner);
        }
    }

    /// Make wallet info queries fail.
    pub fn fail_wallet_info(&self) {
        self.state.write().unwrap().wallet_fails = true;
    }

    /// Make invoice creation fail.
    pub fn fail_invoices(&self) {
        self.state.write().unwrap().invoice_fails = true;
    }

    /// Create invoices without a payment request.
    pub fn omit_invoice_requests(&self) {
        self.state.write().unwrap().omit_invoice_request = true;
    }

    /// Every invoice request received so far.
    pub fn created_invoices(&self) -> Vec<InvoiceRequest> {
        self.state.read().unwrap().created_invoices.clone()
    }

    /// Number of backend calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions on invoice `id`.
    pub fn invoice_watcher_count(&self, id: &str) -> usize {
        let mut watchers = self.invoice_watchers.lock().unwrap();
        let list = watchers.entry(id.to_string()).or_default();
        list.retain(|tx| !tx.is_closed());
        list.len()
    }

    /// Record `received` sats on invoice `id` and notify subscribers.
    /// Returns the number of subscriptions notified.
    pub fn pay_invoice(&self, id: &str, received: u64) -> usize {
        let update = {
            let mut state = self.state.write().unwrap();
            let Some(invoice) = state.invoices.get_mut(id) else {
                return 0;
            };
            invoice.received = received;
            invoice.is_confirmed = received > 0;
            invoice.clone()
        };
        notify(&self.invoice_watchers, id, update)
    }

    /// Record a confirmed payment to `address` and notify subscribers.
    pub fn confirm_address(&self, address: &str, transaction_id: &str, tokens: u64) -> usize {
        let event = ChainConfirmation {
            transaction_id: transaction_id.to_string(),
            tokens,
            confirmations: 1,
        };
        self.state
            .write()
            .unwrap()
            .confirmations
            .entry(address.to_string())
            .or_default()
            .push(event.clone());
        notify(&self.address_watchers, address, event)
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn next_id(&self) -> u64 {
        let mut state = self.state.write().unwrap();
        state.next_id += 1;
        state.next_id
    }
}

fn notify<T: Clone>(
    watchers: &Mutex<HashMap<String, Vec<mpsc::Sender<T>>>>,
    key: &str,
    event: T,
) -> usize {
    let mut watchers = watchers.lock().unwrap();
    let Some(list) = watchers.get_mut(key) else {
        return 0;
    };
    list.retain(|tx| !tx.is_closed());
    list.iter()
        .filter(|tx| tx.try_send(event.clone()).is_ok())
        .count()
}

#[async_trait]
impl PaymentBackend for MockBackend {
    async fn get_wallet_info(&self) -> Result<WalletInfo> {
        self.record_call();
        if self.state.read().unwrap().wallet_fails {
            return Err(SlashpayError::Backend("node unreachable".to_string()));
        }
        Ok(WalletInfo {
            public_key: "02mock".to_string(),
            alias: self.alias.clone(),
        })
    }

    async fn get_channels(&self) -> Result<Vec<Channel>> {
        self.record_call();
        Ok(self.state.read().unwrap().channels.clone())
    }

    async fn get_channel(&self, id: &str) -> Result<ChannelInfo> {
        self.record_call();
        let state = self.state.read().unwrap();
        if state.failing_channels.contains(id) {
            return Err(SlashpayError::Backend(format!("channel {} lookup failed", id)));
        }
        state
            .channel_infos
            .get(id)
            .cloned()
            .ok_or_else(|| SlashpayError::Backend(format!("unknown channel {}", id)))
    }

    async fn create_invoice(&self, request: InvoiceRequest) -> Result<CreatedInvoice> {
        self.record_call();
        let n = self.next_id();
        let mut state = self.state.write().unwrap();
        if state.invoice_fails {
            return Err(SlashpayError::Backend("invoice creation failed".to_string()));
        }
        let id = format!("{:064x}", n);
        state.invoices.insert(
            id.clone(),
            InvoiceUpdate {
                id: id.clone(),
                received: 0,
                description: request.description.clone(),
                is_confirmed: false,
            },
        );
        let bolt11 = format!("lnbcrt{}n1mock{}", request.tokens, n);
        state.created_invoices.push(request);

        Ok(CreatedInvoice {
            id,
            request: (!state.omit_invoice_request).then_some(bolt11),
        })
    }

    fn supports_address_format(&self, format: AddressFormat) -> bool {
        !self
            .state
            .read()
            .unwrap()
            .unsupported_formats
            .contains(&format)
    }

    async fn create_chain_address(&self, format: AddressFormat) -> Result<Option<String>> {
        self.record_call();
        if !self.supports_address_format(format) {
            return Err(SlashpayError::MethodNotSupported(format.to_string()));
        }
        let n = self.next_id();
        let prefix = match format {
            AddressFormat::P2wpkh => "bcrt1q",
            AddressFormat::P2sh => "2N",
            AddressFormat::P2pkh => "m",
            AddressFormat::P2tr => "bcrt1p",
        };
        Ok(Some(format!("{}mock{}", prefix, n)))
    }

    async fn subscribe_to_invoice(&self, id: &str) -> Result<Subscription<InvoiceUpdate>> {
        self.record_call();
        let current = self
            .state
            .read()
            .unwrap()
            .invoices
            .get(id)
            .cloned()
            .ok_or_else(|| SlashpayError::Backend(format!("unknown invoice {}", id)))?;

        let (tx, subscription) = Subscription::channel(SUBSCRIPTION_BUFFER);
        let _ = tx.try_send(current);
        self.invoice_watchers
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push(tx);
        Ok(subscription)
    }

    async fn subscribe_to_chain_address(
        &self,
        address: &str,
        _format: AddressFormat,
        _min_confirmations: u32,
    ) -> Result<Subscription<ChainConfirmation>> {
        self.record_call();
        let (tx, subscription) = Subscription::channel(SUBSCRIPTION_BUFFER);
        if let Some(events) = self.state.read().unwrap().confirmations.get(address) {
            for event in events {
                let _ = tx.try_send(event.clone());
            }
        }
        self.address_watchers
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .push(tx);
        Ok(subscription)
    }
}
