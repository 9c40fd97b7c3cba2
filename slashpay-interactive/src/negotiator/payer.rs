use super::{recv_within, NegotiationConfig, PayerState};
use crate::channel::{send_json, SecureChannel};
use crate::messages::PayeeMessage;
use crate::observer::{NegotiationObserver, NoopObserver};
use crate::{InteractiveError, Result};
use slashpay_lib::receipts::ReceiptStore;
use slashpay_lib::{MethodResult, PaymentRequest, Receipt};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Drives the payer side of one negotiation.
pub struct PayerNegotiator {
    config: NegotiationConfig,
    store: Option<Arc<ReceiptStore>>,
    observer: Arc<dyn NegotiationObserver>,
    state: PayerState,
    last_offer: Option<MethodResult>,
}

impl PayerNegotiator {
    pub fn new(config: NegotiationConfig) -> Self {
        Self {
            config,
            store: None,
            observer: Arc::new(NoopObserver),
            state: PayerState::Connecting,
            last_offer: None,
        }
    }

    /// Keep a copy of the receipt in `store`.
    pub fn with_store(mut self, store: Arc<ReceiptStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn NegotiationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> PayerState {
        self.state
    }

    /// Most recent offer received from the payee.
    pub fn last_offer(&self) -> Option<&MethodResult> {
        self.last_offer.as_ref()
    }

    /// Send `request` and wait for a receipt. The channel is closed when this
    /// returns.
    ///
    /// Offers are reported to the observer and do not end the negotiation.
    /// Any payee message with `error: true` fails it with
    /// [`InteractiveError::Rejected`].
    #[instrument(skip_all, fields(amount = request.amount))]
    pub async fn run<C>(&mut self, channel: &mut C, request: &PaymentRequest) -> Result<Receipt>
    where
        C: SecureChannel + ?Sized,
    {
        if self.state != PayerState::Connecting {
            return Err(InteractiveError::Protocol(format!(
                "negotiation already {}",
                self.state
            )));
        }
        self.observer.on_payer_state(self.state);

        let outcome = self.negotiate(channel, request).await;
        if let Err(e) = &outcome {
            self.transition(PayerState::Failed);
            self.observer.on_failure(&e.to_string());
        }
        if let Err(e) = channel.close().await {
            debug!("Closing channel failed: {}", e);
        }
        self.transition(PayerState::Closed);
        outcome
    }

    async fn negotiate<C>(&mut self, channel: &mut C, request: &PaymentRequest) -> Result<Receipt>
    where
        C: SecureChannel + ?Sized,
    {
        request.validate()?;
        send_json(channel, request).await?;
        self.transition(PayerState::RequestSent);

        loop {
            self.transition(PayerState::AwaitingResponse);
            let Some(bytes) =
                recv_within(channel, self.config.response_timeout, "payee response").await?
            else {
                return Err(InteractiveError::Transport(
                    "payee closed the channel before settlement".into(),
                ));
            };

            match PayeeMessage::classify(&bytes)? {
                PayeeMessage::Error(reason) => return Err(InteractiveError::Rejected(reason)),
                PayeeMessage::Settlement(receipt) => {
                    if let Some(store) = &self.store {
                        store.append(&receipt).await;
                    }
                    self.transition(PayerState::SettlementComplete);
                    self.observer.on_receipt(&receipt);
                    return Ok(receipt);
                }
                PayeeMessage::Offer(offer) => {
                    self.transition(PayerState::MethodOffer);
                    self.observer.on_offer(&offer);
                    self.last_offer = Some(offer);
                }
            }
        }
    }

    fn transition(&mut self, next: PayerState) {
        debug!("payer: {} -> {}", self.state, next);
        self.state = next;
        self.observer.on_payer_state(next);
    }
}
