// Integration tests for the dispatch engine
//
// Everything runs against the scriptable StubTransport; the tests that pin
// ordering run on the default current-thread runtime so that submissions
// complete before any background task gets to run.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dovecote_core::stub::{StubAuth, StubOutcome, StubTransport};
use dovecote_core::{ClientOptions, DeliveryError, DovecoteClient, EndpointOptions, OutputFormat};
use futures::future::join_all;

fn endpoint() -> EndpointOptions {
    EndpointOptions::new("http://127.0.0.1:8080/upload".parse().unwrap()).with_scene("default")
}

fn options() -> ClientOptions {
    ClientOptions::new(endpoint()).with_retry_wait(Duration::from_millis(5))
}

fn payload() -> Vec<u8> {
    b"file contents".to_vec()
}

#[tokio::test]
async fn test_priority_lane_dispatches_before_normal() {
    let stub = StubTransport::new();
    let client = DovecoteClient::with_transport(
        options().with_pool_cap(2).with_max_retries(0),
        stub.clone(),
    );

    // All six submissions enqueue before the engine's reaction tasks run.
    let normals = join_all((1..=5).map(|i| client.deliver(format!("n{i}.txt"), payload())));
    let urgent = client.deliver_priority("urgent.txt", payload());
    let (normals, urgent) = tokio::join!(normals, urgent);

    assert!(urgent.success);
    assert!(normals.iter().all(|r| r.success));

    let order = stub.sent_file_names();
    assert_eq!(order.len(), 6);
    let urgent_pos = order.iter().position(|n| n == "urgent.txt").unwrap();
    let normals_after = order[urgent_pos + 1..]
        .iter()
        .filter(|n| n.starts_with('n'))
        .count();
    assert!(
        normals_after >= 4,
        "priority envelope dispatched after normal lane: {order:?}"
    );
}

#[tokio::test]
async fn test_transport_failures_retry_until_success() {
    let stub = StubTransport::new();
    stub.push_outcomes([
        StubOutcome::Error("connection reset".into()),
        StubOutcome::Error("connection reset".into()),
    ]);
    let client = DovecoteClient::with_transport(options().with_max_retries(3), stub.clone());

    let receipt = client.deliver("report.txt", payload()).await;

    assert!(receipt.success);
    assert_eq!(stub.calls(), 3);
}

#[tokio::test]
async fn test_retry_budget_exhausted_yields_terminal_failure() {
    let stub = StubTransport::new();
    stub.push_outcomes(
        std::iter::repeat_with(|| StubOutcome::Status(500, "server error".into())).take(8),
    );
    let client = DovecoteClient::with_transport(options().with_max_retries(3), stub.clone());

    let receipt = client.deliver("report.txt", payload()).await;

    assert!(!receipt.success);
    assert_eq!(
        receipt.error,
        Some(DeliveryError::RetryExhausted { attempts: 3 })
    );
    // Strictly fewer than max_retries + 1 network calls.
    assert_eq!(stub.calls(), 3);
}

#[tokio::test]
async fn test_zero_retry_budget_still_attempts_once() {
    let stub = StubTransport::new();
    let client = DovecoteClient::with_transport(options().with_max_retries(0), stub.clone());

    let receipt = client.deliver("report.txt", payload()).await;

    assert!(receipt.success);
    assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn test_single_budget_fails_after_one_attempt() {
    let stub = StubTransport::new();
    stub.push_outcomes([StubOutcome::Status(403, "denied".into())]);
    let client = DovecoteClient::with_transport(options().with_max_retries(1), stub.clone());

    let receipt = client.deliver("report.txt", payload()).await;

    assert!(!receipt.success);
    assert_eq!(
        receipt.error,
        Some(DeliveryError::RetryExhausted { attempts: 1 })
    );
    assert_eq!(stub.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_cap_never_exceeded() {
    let stub = StubTransport::new();
    stub.set_delay(Duration::from_millis(20));
    let client = DovecoteClient::with_transport(
        options().with_pool_cap(4).with_max_retries(0),
        stub.clone(),
    );

    let files: Vec<(String, Vec<u8>)> = (0..40).map(|i| (format!("f{i}.txt"), payload())).collect();
    let batch = client.deliver_many(files).await;

    assert!(batch.all_succeeded());
    assert_eq!(batch.len(), 40);
    assert!(
        stub.max_in_flight() <= 4,
        "observed {} concurrent uploads",
        stub.max_in_flight()
    );
    assert!(stub.max_in_flight() >= 2, "pool never scaled up");

    // Workers exit once the queue is drained.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.dispatcher().active_workers(), 0);
}

#[tokio::test]
async fn test_every_envelope_resolves_exactly_once() {
    let stub = StubTransport::new();
    let client = DovecoteClient::with_transport(options().with_pool_cap(3), stub.clone());

    let files: Vec<(String, Vec<u8>)> = (0..25).map(|i| (format!("f{i}.txt"), payload())).collect();
    let batch = client.deliver_many(files).await;

    assert!(batch.all_succeeded());
    assert_eq!(batch.len(), 25);
    let ids: HashSet<_> = batch.iter().map(|r| r.envelope_id).collect();
    assert_eq!(ids.len(), 25);
    assert_eq!(stub.calls(), 25);
}

#[tokio::test]
async fn test_pool_reactivates_after_draining() {
    let stub = StubTransport::new();
    let client = DovecoteClient::with_transport(options(), stub.clone());

    assert!(client.deliver("first.txt", payload()).await.success);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.dispatcher().active_workers(), 0);

    // A fresh arrival must wake the dormant pool.
    assert!(client.deliver("second.txt", payload()).await.success);
    assert_eq!(stub.calls(), 2);
}

#[tokio::test]
async fn test_fault_mid_attempt_retries_same_envelope() {
    let stub = StubTransport::new();
    stub.push_outcomes([StubOutcome::Panic]);
    let client = DovecoteClient::with_transport(options().with_max_retries(2), stub.clone());

    let receipt = client.deliver("report.txt", payload()).await;

    assert!(receipt.success);
    // The replacement worker inherited the session and re-sent the same file.
    assert_eq!(stub.sent_file_names(), ["report.txt", "report.txt"]);
}

#[tokio::test]
async fn test_fault_budget_is_charged_to_the_session() {
    let stub = StubTransport::new();
    stub.push_outcomes([StubOutcome::Panic, StubOutcome::Panic, StubOutcome::Panic]);
    let client = DovecoteClient::with_transport(options().with_max_retries(2), stub.clone());

    let receipt = client.deliver("report.txt", payload()).await;

    assert!(!receipt.success);
    assert_eq!(
        receipt.error,
        Some(DeliveryError::RetryExhausted { attempts: 2 })
    );
    assert_eq!(stub.calls(), 2);
}

#[tokio::test]
async fn test_batch_receipts_partition_mixed_outcomes() {
    let stub = StubTransport::new();
    stub.push_outcomes([StubOutcome::Error("unreachable".into())]);
    let client = DovecoteClient::with_transport(
        options().with_pool_cap(1).with_max_retries(1),
        stub.clone(),
    );

    let batch = client
        .deliver_many(vec![
            ("f1.txt".to_string(), payload()),
            ("f2.txt".to_string(), payload()),
            ("f3.txt".to_string(), payload()),
        ])
        .await;

    assert!(!batch.all_succeeded());
    assert_eq!(batch.successes().count(), 2);
    let failed: Vec<&str> = batch.failures().map(|r| r.file_name.as_str()).collect();
    assert_eq!(failed, ["f1.txt"]);
}

#[tokio::test]
async fn test_text_output_accepts_url_body() {
    let stub = StubTransport::new();
    stub.push_outcomes([StubOutcome::Success(
        "http://storage.example.com/group1/default/report.txt".into(),
    )]);
    let client = DovecoteClient::with_transport(
        ClientOptions::new(endpoint().with_output(OutputFormat::Text))
            .with_retry_wait(Duration::from_millis(5)),
        stub.clone(),
    );

    let receipt = client.deliver("report.txt", payload()).await;

    assert!(receipt.success);
    assert_eq!(
        receipt.url(),
        Some("http://storage.example.com/group1/default/report.txt")
    );
}

#[tokio::test]
async fn test_auth_token_attached_and_cached_across_envelopes() {
    let stub = StubTransport::new();
    let auth = Arc::new(StubAuth::new("fp-upload").with_ttl_seconds(3600));
    let client = DovecoteClient::with_transport(
        ClientOptions::new(endpoint().with_auth(auth.clone()))
            .with_retry_wait(Duration::from_millis(5)),
        stub.clone(),
    );

    assert!(client.deliver("a.txt", payload()).await.success);
    assert!(client.deliver("b.txt", payload()).await.success);

    // One refresh serves both envelopes.
    assert_eq!(auth.calls(), 1);
    for request in stub.sent() {
        assert_eq!(request.field_value("auth_token"), Some("fp-upload-token-1"));
    }
}

#[tokio::test]
async fn test_token_failure_consumes_retry_budget_without_network_calls() {
    let stub = StubTransport::new();
    let auth = Arc::new(StubAuth::new("fp-broken").with_error("authority unreachable"));
    let client = DovecoteClient::with_transport(
        ClientOptions::new(endpoint().with_auth(auth))
            .with_max_retries(2)
            .with_retry_wait(Duration::from_millis(5)),
        stub.clone(),
    );

    let receipt = client.deliver("report.txt", payload()).await;

    assert!(!receipt.success);
    assert_eq!(
        receipt.error,
        Some(DeliveryError::RetryExhausted { attempts: 2 })
    );
    assert_eq!(stub.calls(), 0);
}

#[tokio::test]
async fn test_upload_form_carries_fixed_fields_and_file() {
    let stub = StubTransport::new();
    let client = DovecoteClient::with_transport(
        ClientOptions::new(
            endpoint()
                .with_file_path("reports/2026")
                .with_output(OutputFormat::Json),
        )
        .with_retry_wait(Duration::from_millis(5)),
        stub.clone(),
    );

    assert!(client.deliver("summary.txt", payload()).await.success);

    let sent = stub.sent();
    assert_eq!(sent.len(), 1);
    let request = &sent[0];
    assert_eq!(request.field_value("output"), Some("json"));
    assert_eq!(request.field_value("path"), Some("reports/2026"));
    assert_eq!(request.field_value("scene"), Some("default"));
    assert_eq!(request.file_name.as_deref(), Some("summary.txt"));
}

#[tokio::test]
async fn test_client_token_operation() {
    let stub = StubTransport::new();
    let auth = Arc::new(StubAuth::new("fp-token").with_ttl_seconds(60));
    let client = DovecoteClient::with_transport(
        ClientOptions::new(endpoint().with_auth(auth)).with_retry_wait(Duration::from_millis(5)),
        stub.clone(),
    );

    assert_eq!(client.token().await.unwrap(), "fp-token-token-1");

    let bare = DovecoteClient::with_transport(options(), stub);
    let err = bare.token().await.unwrap_err();
    assert!(err.is_configuration());
}
