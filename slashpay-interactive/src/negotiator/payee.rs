use super::{recv_within, NegotiationConfig, PayeeState};
use crate::channel::{send_json, SecureChannel};
use crate::messages::{parse_request, ErrorMessage, NO_SUPPORTED_METHOD};
use crate::observer::{NegotiationObserver, NoopObserver};
use crate::{InteractiveError, Result};
use slashpay_lib::backend::{BackendAdapter, PaymentBackend};
use slashpay_lib::receipts::ReceiptStore;
use slashpay_lib::{default_supported_methods, select_method, MethodId, Receipt};
use std::sync::Arc;
use tracing::{debug, instrument};

/// How a payee negotiation ended without a transport error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayeeOutcome {
    /// The payment settled and the receipt was sent.
    Settled(Receipt),
    /// The payer was sent `{error: true, data}` with this reason.
    Rejected(String),
}

/// Serves the payee side of negotiations.
///
/// One instance is shared by every connection; all per-connection state
/// lives in [`PayeeNegotiator::serve`].
pub struct PayeeNegotiator<B> {
    adapter: Arc<BackendAdapter<B>>,
    supported: Vec<MethodId>,
    store: Option<Arc<ReceiptStore>>,
    config: NegotiationConfig,
    observer: Arc<dyn NegotiationObserver>,
}

impl<B: PaymentBackend> PayeeNegotiator<B> {
    /// A payee supporting the default methods its backend can serve.
    pub fn new(adapter: Arc<BackendAdapter<B>>) -> Self {
        Self {
            adapter,
            supported: Vec::new(),
            store: None,
            config: NegotiationConfig::default(),
            observer: Arc::new(NoopObserver),
        }
        .with_supported_methods(default_supported_methods())
    }

    /// Offer `supported`, most preferred first. Methods the backend cannot
    /// serve are left out so payers fall back to their next choice.
    pub fn with_supported_methods(mut self, supported: Vec<MethodId>) -> Self {
        let (served, dropped): (Vec<_>, Vec<_>) = supported
            .into_iter()
            .partition(|method| self.adapter.supports(method));
        if !dropped.is_empty() {
            debug!("Backend cannot serve {:?}", dropped);
        }
        self.supported = served;
        self
    }

    /// Persist every receipt to `store` before sending it.
    pub fn with_store(mut self, store: Arc<ReceiptStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: NegotiationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn NegotiationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn supported_methods(&self) -> &[MethodId] {
        &self.supported
    }

    /// Serve one payer on `channel` until the negotiation ends, then close
    /// the channel.
    #[instrument(skip_all)]
    pub async fn serve<C>(&self, channel: &mut C) -> Result<PayeeOutcome>
    where
        C: SecureChannel + ?Sized,
    {
        let mut state = StateTracker::new(self.observer.as_ref());

        let outcome = self.negotiate(channel, &mut state).await;
        match &outcome {
            Ok(PayeeOutcome::Settled(_)) => {}
            Ok(PayeeOutcome::Rejected(reason)) => {
                state.enter(PayeeState::Failed);
                self.observer.on_failure(reason);
            }
            Err(e) => {
                state.enter(PayeeState::Failed);
                self.observer.on_failure(&e.to_string());
            }
        }
        if let Err(e) = channel.close().await {
            debug!("Closing channel failed: {}", e);
        }
        state.enter(PayeeState::Closed);
        outcome
    }

    async fn negotiate<C>(&self, channel: &mut C, state: &mut StateTracker<'_>) -> Result<PayeeOutcome>
    where
        C: SecureChannel + ?Sized,
    {
        let Some(bytes) =
            recv_within(channel, self.config.response_timeout, "payment request").await?
        else {
            return Err(InteractiveError::Transport(
                "payer closed the channel before sending a request".into(),
            ));
        };
        state.enter(PayeeState::RequestReceived);

        let request = match parse_request(&bytes) {
            Ok(request) => request,
            Err(reply) => return self.reject(channel, reply).await,
        };
        self.observer.on_request(&request);

        state.enter(PayeeState::MethodSelection);
        let Some(method) = select_method(&request.methods, &self.supported) else {
            return self
                .reject(channel, ErrorMessage::new(NO_SUPPORTED_METHOD))
                .await;
        };
        debug!("Selected {} from {:?}", method, request.methods);

        let offer = self.adapter.run_method(Some(method), &request).await;
        send_json(channel, &offer).await?;
        state.enter(PayeeState::ResponseSent);
        if offer.error {
            return Ok(PayeeOutcome::Rejected(offer.data));
        }
        self.observer.on_offer(&offer);

        state.enter(PayeeState::AwaitingSettlement);
        let settlement = self
            .adapter
            .await_settlement(
                method,
                &offer.id,
                self.config.amount_policy(&request),
                self.config.settlement_timeout,
            )
            .await;
        let receipt = match settlement {
            Ok(receipt) => receipt,
            Err(e) => {
                // Best effort: the payer may already be gone.
                if let Err(send_err) = send_json(channel, &ErrorMessage::new(e.to_string())).await
                {
                    debug!("Could not report settlement failure: {}", send_err);
                }
                return Err(e.into());
            }
        };

        if let Some(store) = &self.store {
            store.append(&receipt).await;
        }
        send_json(channel, &receipt).await?;
        state.enter(PayeeState::ReceiptSent);
        self.observer.on_receipt(&receipt);
        Ok(PayeeOutcome::Settled(receipt))
    }

    async fn reject<C>(&self, channel: &mut C, reply: ErrorMessage) -> Result<PayeeOutcome>
    where
        C: SecureChannel + ?Sized,
    {
        send_json(channel, &reply).await?;
        Ok(PayeeOutcome::Rejected(reply.data))
    }
}

struct StateTracker<'a> {
    state: PayeeState,
    observer: &'a dyn NegotiationObserver,
}

impl<'a> StateTracker<'a> {
    fn new(observer: &'a dyn NegotiationObserver) -> Self {
        observer.on_payee_state(PayeeState::Listening);
        Self {
            state: PayeeState::Listening,
            observer,
        }
    }

    fn enter(&mut self, next: PayeeState) {
        debug!("payee: {} -> {}", self.state, next);
        self.state = next;
        self.observer.on_payee_state(next);
    }
}
