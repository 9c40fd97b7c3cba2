//! Integration tests for the LND REST backend against a mock HTTP server.
//!
//! ```bash
//! cargo test -p slashpay-lib --features http-executor --test lnd_backend
//! ```

#![cfg(feature = "http-executor")]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use slashpay_lib::backend::{AmountPolicy, BackendAdapter, PaymentBackend};
use slashpay_lib::executors::{LndBackend, LndConfig};
use slashpay_lib::rate_limit::{BackendRateLimiter, RateLimitConfig};
use slashpay_lib::{AddressFormat, MethodId, SlashpayError};
use wiremock::{
    matchers::{body_partial_json, header, method, path, path_regex, query_param},
    Mock, MockServer, ResponseTemplate,
};

const MACAROON: &str = "0201036c6e64";

fn backend(server: &MockServer) -> LndBackend {
    let config = LndConfig::new(server.uri(), MACAROON).with_poll_interval(10);
    LndBackend::new(config).unwrap()
}

fn adapter(server: &MockServer) -> BackendAdapter<LndBackend> {
    BackendAdapter::new(
        backend(server),
        BackendRateLimiter::new_shared(RateLimitConfig::unlimited()),
    )
}

async fn mount_channel_graph(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/channels"))
        .and(header("Grpc-Metadata-macaroon", MACAROON))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "channels": [{
                "chan_id": "778888999",
                "remote_pubkey": "03partner",
                "local_constraints": {"csv_delay": 144, "min_htlc_msat": "1000"}
            }]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/graph/edge/778888999"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "channel_id": "778888999",
            "node1_pub": "02ours",
            "node2_pub": "03partner",
            "node1_policy": {"time_lock_delta": 40, "fee_base_msat": "1000", "fee_rate_milli_msat": "1"},
            "node2_policy": {"time_lock_delta": 80, "fee_base_msat": "2500", "fee_rate_milli_msat": "350"}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_wallet_info_mock() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/getinfo"))
        .and(header("Grpc-Metadata-macaroon", MACAROON))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "identity_pubkey": "02abcdef",
            "alias": "regtest-node",
            "num_active_channels": 3
        })))
        .mount(&server)
        .await;

    let info = backend(&server).get_wallet_info().await.unwrap();
    assert_eq!(info.public_key, "02abcdef");
    assert_eq!(info.alias, "regtest-node");
}

#[tokio::test]
async fn test_channels_and_policies_mock() {
    let server = MockServer::start().await;
    mount_channel_graph(&server).await;
    let backend = backend(&server);

    let channels = backend.get_channels().await.unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].id, "778888999");
    assert_eq!(channels[0].partner_public_key, "03partner");
    assert_eq!(channels[0].local_csv, 144);
    assert_eq!(channels[0].local_min_htlc_mtokens, "1000");

    let info = backend.get_channel("778888999").await.unwrap();
    let partner = info.policy_of("03partner").unwrap();
    assert_eq!(partner.base_fee_mtokens, "2500");
    assert_eq!(partner.fee_rate, 350);
    assert_eq!(partner.cltv_delta, 80);
}

#[tokio::test]
async fn test_invoice_with_route_hints_mock() {
    let server = MockServer::start().await;
    mount_channel_graph(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/invoices"))
        .and(body_partial_json(json!({
            "memo": "coffee",
            "value": "5000",
            "private": true,
            "route_hints": [{"hop_hints": [{
                "node_id": "03partner",
                "chan_id": "778888999",
                "fee_base_msat": 2500,
                "fee_proportional_millionths": 350,
                "cltv_expiry_delta": 144
            }]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "r_hash": "cmhhc2g=",
            "payment_request": "lnbcrt50u1ptest",
            "add_index": "7"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/payreq/lnbcrt50u1ptest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payment_hash": "ab".repeat(32),
            "num_satoshis": "5000"
        })))
        .mount(&server)
        .await;

    let result = adapter(&server).generate_invoice(5_000, "coffee").await;
    assert!(!result.error, "{}", result.data);
    assert_eq!(result.method, Some(MethodId::bolt11()));
    assert_eq!(result.data, "lnbcrt50u1ptest");
    assert_eq!(result.id, "ab".repeat(32));
}

#[tokio::test]
async fn test_new_address_mock() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/newaddress"))
        .and(query_param("type", "WITNESS_PUBKEY_HASH"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"address": "bcrt1qmockaddress"})),
        )
        .mount(&server)
        .await;

    let result = adapter(&server).generate_address(AddressFormat::P2wpkh).await;
    assert!(!result.error);
    assert_eq!(result.data, "bcrt1qmockaddress");
    assert_eq!(result.id, "bcrt1qmockaddress");
}

#[tokio::test]
async fn test_legacy_address_is_a_failure_without_request() {
    let server = MockServer::start().await;

    let result = adapter(&server).generate_address(AddressFormat::P2pkh).await;
    assert!(result.error);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invoice_settlement_by_polling_mock() {
    let server = MockServer::start().await;
    let hash = "cd".repeat(32);

    // Unpaid on the first lookup, paid afterwards.
    Mock::given(method("GET"))
        .and(path(format!("/v1/invoice/{}", hash)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "memo": "tea",
            "amt_paid_sat": "0",
            "state": "OPEN"
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/invoice/{}", hash)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "memo": "tea",
            "amt_paid_sat": "800",
            "settled": true,
            "state": "SETTLED"
        })))
        .with_priority(2)
        .mount(&server)
        .await;

    let receipt = adapter(&server)
        .await_settlement(
            &MethodId::bolt11(),
            &hash,
            AmountPolicy::AnyAmount,
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert_eq!(receipt.data.id, hash);
    assert_eq!(receipt.data.sats, 800);
    assert_eq!(receipt.data.description, "tea");
}

#[tokio::test]
async fn test_settlement_polls_share_the_adapter_limiter() {
    let server = MockServer::start().await;
    let hash = "ef".repeat(32);

    Mock::given(method("GET"))
        .and(path(format!("/v1/invoice/{}", hash)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "amt_paid_sat": "0",
            "state": "OPEN"
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/invoice/{}", hash)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "amt_paid_sat": "300",
            "settled": true,
            "state": "SETTLED"
        })))
        .with_priority(2)
        .mount(&server)
        .await;

    let limiter = BackendRateLimiter::new_shared(RateLimitConfig::unlimited());
    let adapter = BackendAdapter::new(
        backend(&server).with_limiter(Arc::clone(&limiter)),
        Arc::clone(&limiter),
    );

    let receipt = adapter
        .await_settlement(
            &MethodId::bolt11(),
            &hash,
            AmountPolicy::AnyAmount,
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert_eq!(receipt.data.sats, 300);
    // The subscription itself plus at least one poll.
    assert!(limiter.dispatched() >= 2, "{}", limiter.dispatched());
}

#[tokio::test]
async fn test_address_settlement_mock() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transactions": [
                {
                    "tx_hash": "unconfirmed",
                    "amount": "1000",
                    "num_confirmations": 0,
                    "dest_addresses": ["bcrt1qwatched"]
                },
                {
                    "tx_hash": "elsewhere",
                    "amount": "5000",
                    "num_confirmations": 6,
                    "dest_addresses": ["bcrt1qother"]
                },
                {
                    "tx_hash": "confirmed",
                    "amount": "25000",
                    "num_confirmations": 2,
                    "output_details": [
                        {"address": "bcrt1qchange", "amount": "4000"},
                        {"address": "bcrt1qwatched", "amount": "21000"}
                    ]
                }
            ]
        })))
        .mount(&server)
        .await;

    let receipt = adapter(&server)
        .await_settlement(
            &MethodId::new("p2wpkh"),
            "bcrt1qwatched",
            AmountPolicy::AnyAmount,
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert_eq!(receipt.data.id, "confirmed");
    assert_eq!(receipt.data.sats, 21_000);
    assert_eq!(receipt.data.description, "");
}

#[tokio::test]
async fn test_status_error_mapping_mock() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/getinfo"))
        .respond_with(ResponseTemplate::new(500).set_body_string("wallet locked"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/v1/graph/edge/.*"))
        .respond_with(ResponseTemplate::new(404).set_body_string("edge not found"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/invoices"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad memo"))
        .mount(&server)
        .await;

    let backend = backend(&server);
    match backend.get_wallet_info().await {
        Err(SlashpayError::Backend(msg)) => assert!(msg.contains("wallet locked")),
        other => panic!("expected backend error, got {:?}", other.map(|i| i.alias)),
    }
    assert!(matches!(
        backend.get_channel("1").await,
        Err(SlashpayError::Backend(_))
    ));

    let result = adapter(&server).generate_invoice(1, "").await;
    assert!(result.error);
}

#[tokio::test]
async fn test_malformed_body_is_serialization_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/channels"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = backend(&server).get_channels().await.unwrap_err();
    assert!(matches!(err, SlashpayError::Serialization(_)));
}

/// Requires a running regtest LND node.
#[tokio::test]
#[ignore]
async fn test_lnd_real_wallet_info() {
    let Some(config) = LndConfig::from_env() else {
        eprintln!("SLASHPAY_LND_URL not set, skipping");
        return;
    };
    let backend = LndBackend::new(config).unwrap();
    let info = backend.get_wallet_info().await.unwrap();
    assert!(!info.public_key.is_empty());
}
