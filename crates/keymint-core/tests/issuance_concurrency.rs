mod common;

use std::sync::Arc;
use std::time::Duration;

use common::StubIssuer;
use keymint_core::{IssuanceService, IssueFailureKind, ServiceConfig, ServiceError};

fn test_config() -> ServiceConfig {
    ServiceConfig {
        worker_count: 2,
        key_bits: 512,
        shutdown_grace: Duration::from_secs(2),
        ..ServiceConfig::default()
    }
}

const WAITERS: usize = 32;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_for_one_name_generate_once() {
    let issuer = StubIssuer::new(Duration::from_millis(50));
    let service = IssuanceService::start(test_config(), issuer.clone()).expect("start service");

    let mut waiters = Vec::new();
    for _ in 0..WAITERS {
        let service = Arc::clone(&service);
        waiters.push(tokio::spawn(async move {
            let (slot, _) = service.request("alice").expect("request alice");
            slot.wait().await
        }));
    }

    let mut bundles = Vec::new();
    for waiter in waiters {
        let credential = waiter
            .await
            .expect("join waiter")
            .expect("issuance succeeds");
        bundles.push(credential.pem_bundle());
    }

    assert_eq!(issuer.calls_for("alice"), 1, "generation must be shared");
    for bundle in &bundles[1..] {
        assert_eq!(bundle, &bundles[0], "all waiters see identical PEM text");
    }

    let metrics = service.metrics();
    assert_eq!(metrics.cache_misses, 1);
    assert_eq!(metrics.cache_hits, WAITERS as u64 - 1);
    assert_eq!(metrics.credentials_issued, 1);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_names_get_distinct_credentials() {
    let issuer = StubIssuer::new(Duration::ZERO);
    let service = IssuanceService::start(test_config(), issuer.clone()).expect("start service");

    let (alice_slot, _) = service.request("alice").expect("request alice");
    let (bob_slot, _) = service.request("bob").expect("request bob");
    let alice = alice_slot.wait().await.expect("alice issued");
    let bob = bob_slot.wait().await.expect("bob issued");

    assert_ne!(alice.private_key_der(), bob.private_key_der());
    assert_eq!(issuer.calls_for("alice"), 1);
    assert_eq!(issuer.calls_for("bob"), 1);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resolved_entry_is_memoized_across_requests() {
    let issuer = StubIssuer::new(Duration::ZERO);
    let service = IssuanceService::start(test_config(), issuer.clone()).expect("start service");

    let (slot, _) = service.request("carol").expect("first request");
    let first = slot.wait().await.expect("issued");

    let (slot, _) = service.request("carol").expect("second request");
    let second = slot.wait().await.expect("cached");

    assert!(Arc::ptr_eq(&first, &second), "cache must hand out one value");
    assert_eq!(issuer.calls_for("carol"), 1);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failure_purges_entry_and_retry_generates_fresh() {
    let issuer = StubIssuer::new(Duration::ZERO);
    issuer.fail_next("dave", 1);
    let service = IssuanceService::start(test_config(), issuer.clone()).expect("start service");

    let (slot, _) = service.request("dave").expect("first request");
    let failure = slot.wait().await.expect_err("injected failure");
    assert_eq!(failure.kind, IssueFailureKind::Signing);

    let (slot, _) = service.request("dave").expect("retry request");
    let credential = slot.wait().await.expect("retry succeeds");
    assert!(!credential.private_key_der().is_empty());
    assert_eq!(issuer.calls_for("dave"), 2, "retry must be a fresh attempt");

    let metrics = service.metrics();
    assert_eq!(metrics.issuance_failures, 1);
    assert_eq!(metrics.credentials_issued, 1);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn requests_after_shutdown_are_refused() {
    let issuer = StubIssuer::new(Duration::ZERO);
    let service = IssuanceService::start(test_config(), issuer).expect("start service");

    service.shutdown().await;
    match service.request("late") {
        Err(ServiceError::ShuttingDown) => {}
        other => panic!("expected ShuttingDown, got {other:?}"),
    }
}
