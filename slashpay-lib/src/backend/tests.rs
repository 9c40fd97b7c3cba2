use super::*;
use crate::rate_limit::{BackendRateLimiter, RateLimitConfig};
use crate::test_utils::{unlimited_adapter, MockBackend};
use crate::{MethodId, PaymentRequest, SlashpayError};
use std::sync::Arc;
use std::time::Duration;

fn two_channel_backend() -> Arc<MockBackend> {
    Arc::new(
        MockBackend::new()
            .with_channel("100", "03alice", 1_000, 1)
            .with_channel("200", "03bob", 2_000, 250),
    )
}

#[tokio::test]
async fn invoice_carries_one_hint_per_channel() {
    let backend = two_channel_backend();
    let adapter = unlimited_adapter(backend.clone());

    let result = adapter.generate_invoice(5_000, "coffee").await;
    assert!(!result.error, "{}", result.data);
    assert_eq!(result.method, Some(MethodId::bolt11()));
    assert!(result.data.starts_with("lnbcrt5000"));
    assert!(!result.id.is_empty());

    let created = backend.created_invoices();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].tokens, 5_000);
    assert_eq!(created[0].description, "coffee");
    assert_eq!(created[0].routes.len(), 1);

    let hints = &created[0].routes[0];
    assert_eq!(hints.len(), 2);
    let bob = hints.iter().find(|h| h.channel == "200").unwrap();
    assert_eq!(bob.node, "03bob");
    assert_eq!(bob.base_fee_mtokens, "2000");
    assert_eq!(bob.fee_rate, 250);
    assert_eq!(bob.cltv_delta, 144);
    assert_eq!(bob.min_htlc_mtokens, "1000");
}

#[tokio::test]
async fn one_failed_policy_aborts_the_invoice() {
    let backend = two_channel_backend();
    backend.fail_channel("200");
    let adapter = unlimited_adapter(backend.clone());

    let result = adapter.generate_invoice(5_000, "coffee").await;
    assert!(result.error);
    assert!(result.data.contains("200"));
    assert!(backend.created_invoices().is_empty());
}

#[tokio::test]
async fn missing_partner_policy_aborts_the_invoice() {
    let backend = two_channel_backend();
    backend.drop_partner_policy("100");
    let adapter = unlimited_adapter(backend.clone());

    let result = adapter.generate_invoice(1, "").await;
    assert!(result.error);
    assert!(backend.created_invoices().is_empty());
}

#[tokio::test]
async fn missing_request_string_is_a_failure() {
    let backend = two_channel_backend();
    backend.omit_invoice_requests();
    let adapter = unlimited_adapter(backend);

    let result = adapter.generate_invoice(1, "").await;
    assert!(result.error);
}

#[tokio::test]
async fn no_channels_still_creates_invoice() {
    let backend = Arc::new(MockBackend::new());
    let adapter = unlimited_adapter(backend.clone());

    let result = adapter.generate_invoice(10, "").await;
    assert!(!result.error);
    assert_eq!(backend.created_invoices()[0].routes, vec![Vec::new()]);
}

#[tokio::test]
async fn address_id_is_the_address() {
    let adapter = unlimited_adapter(Arc::new(MockBackend::new()));

    let result = adapter.generate_address(crate::AddressFormat::P2wpkh).await;
    assert!(!result.error);
    assert_eq!(result.method, Some(MethodId::new("p2wpkh")));
    assert_eq!(result.id, result.data);
}

#[tokio::test]
async fn unknown_method_never_reaches_backend() {
    let backend = Arc::new(MockBackend::new());
    let adapter = unlimited_adapter(backend.clone());
    let request = PaymentRequest::new(vec![MethodId::from("zcash")], 100, "");

    let unknown = adapter
        .run_method(Some(&MethodId::from("zcash")), &request)
        .await;
    let absent = adapter.run_method(None, &request).await;

    for result in [unknown, absent] {
        assert!(result.error);
        assert_eq!(result.data, NO_SUPPORTED_PAYMENT_METHOD);
        assert_eq!(result.id, "");
    }
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn run_method_dispatches_chain_methods() {
    let adapter = unlimited_adapter(Arc::new(MockBackend::new()));
    let request = PaymentRequest::new(vec![MethodId::from("p2sh")], 100, "");

    let result = adapter
        .run_method(Some(&MethodId::from("p2sh")), &request)
        .await;
    assert!(!result.error);
    assert!(result.data.starts_with("2N"));
}

#[tokio::test]
async fn invoice_settles_on_first_positive_update() {
    let backend = two_channel_backend();
    let adapter = unlimited_adapter(backend.clone());
    let offer = adapter.generate_invoice(500, "coffee").await;

    let id = offer.id.clone();
    let payer = backend.clone();
    tokio::spawn(async move {
        while payer.invoice_watcher_count(&id) == 0 {
            tokio::task::yield_now().await;
        }
        payer.pay_invoice(&id, 500);
        payer.pay_invoice(&id, 700);
    });

    let receipt = adapter
        .await_settlement(&MethodId::bolt11(), &offer.id, AmountPolicy::AnyAmount, None)
        .await
        .unwrap();
    assert_eq!(receipt.data.id, offer.id);
    assert_eq!(receipt.data.sats, 500);
    assert_eq!(receipt.data.description, "coffee");
    assert!(!receipt.order_id.is_empty());
    assert!(!receipt.error);
}

#[tokio::test]
async fn subscription_is_dropped_after_settlement() {
    let backend = two_channel_backend();
    let adapter = unlimited_adapter(backend.clone());
    let offer = adapter.generate_invoice(500, "").await;
    backend.pay_invoice(&offer.id, 500);

    let mut receipts = Vec::new();
    adapter
        .run_subscribe(&MethodId::bolt11(), &offer.id, |r| receipts.push(r))
        .await
        .unwrap();

    assert_eq!(receipts.len(), 1);
    assert_eq!(backend.invoice_watcher_count(&offer.id), 0);
    assert_eq!(backend.pay_invoice(&offer.id, 900), 0);
}

#[tokio::test]
async fn exact_policy_waits_for_full_amount() {
    let backend = two_channel_backend();
    let adapter = unlimited_adapter(backend.clone());
    let offer = adapter.generate_invoice(1_000, "").await;
    backend.pay_invoice(&offer.id, 400);

    let id = offer.id.clone();
    let payer = backend.clone();
    tokio::spawn(async move {
        while payer.invoice_watcher_count(&id) == 0 {
            tokio::task::yield_now().await;
        }
        payer.pay_invoice(&id, 1_000);
    });

    let receipt = adapter
        .await_settlement(
            &MethodId::bolt11(),
            &offer.id,
            AmountPolicy::Exact(1_000),
            None,
        )
        .await
        .unwrap();
    assert_eq!(receipt.data.sats, 1_000);
}

#[tokio::test]
async fn address_settles_on_confirmation() {
    let backend = Arc::new(MockBackend::new());
    let adapter = unlimited_adapter(backend.clone());
    let offer = adapter.generate_address(crate::AddressFormat::P2wpkh).await;
    backend.confirm_address(&offer.id, "txid1", 21_000);

    let receipt = adapter
        .await_settlement(
            &MethodId::new("p2wpkh"),
            &offer.id,
            AmountPolicy::AnyAmount,
            None,
        )
        .await
        .unwrap();
    assert_eq!(receipt.data.id, "txid1");
    assert_eq!(receipt.data.sats, 21_000);
    assert_eq!(receipt.data.description, "");
}

#[tokio::test(start_paused = true)]
async fn settlement_timeout_is_reported() {
    let backend = two_channel_backend();
    let adapter = unlimited_adapter(backend.clone());
    let offer = adapter.generate_invoice(500, "").await;

    let err = adapter
        .await_settlement(
            &MethodId::bolt11(),
            &offer.id,
            AmountPolicy::AnyAmount,
            Some(Duration::from_secs(30)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SlashpayError::Timeout { .. }));
}

#[tokio::test]
async fn wallet_info_failure_is_an_error() {
    let backend = Arc::new(MockBackend::new());
    let adapter = unlimited_adapter(backend.clone());
    assert_eq!(adapter.get_wallet_info().await.unwrap().alias, "mock-node");

    backend.fail_wallet_info();
    assert!(adapter.get_wallet_info().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn every_backend_call_is_spaced() {
    let backend = two_channel_backend();
    let limiter = BackendRateLimiter::new_shared(RateLimitConfig::default());
    let adapter = BackendAdapter::new(backend.clone(), limiter);

    let start = tokio::time::Instant::now();
    let result = adapter.generate_invoice(10, "").await;
    assert!(!result.error);

    // get_channels, two policy lookups and create_invoice.
    assert_eq!(backend.call_count(), 4);
    assert!(start.elapsed() >= Duration::from_millis(3_000));
}

#[test]
fn supports_follows_backend_address_formats() {
    let backend = Arc::new(MockBackend::new().without_address_format(crate::AddressFormat::P2pkh));
    let adapter = unlimited_adapter(backend.clone());

    assert!(adapter.supports(&MethodId::bolt11()));
    assert!(adapter.supports(&MethodId::new("p2wpkh")));
    assert!(!adapter.supports(&MethodId::new("p2pkh")));
    assert!(!adapter.supports(&MethodId::new("zcash")));
    assert_eq!(backend.call_count(), 0);
}
