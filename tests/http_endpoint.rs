//! HTTP endpoint against a mock server
//!
//! Covers reference parsing, bearer auth, retry of transient failures and
//! the permanent-failure short circuit.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;
use upload_queue::config::EndpointConfig;
use upload_queue::core::{
    BatchId, ItemId, Payload, ProgressSink, TransferErrorKind, TransferRequest, UploadEndpoint,
    UploadError,
};
use upload_queue::HttpUploadEndpoint;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn endpoint_config(server: &MockServer) -> EndpointConfig {
    EndpointConfig {
        url: format!("{}/api/upload", server.uri()),
        max_attempts: 3,
        retry_initial_delay_ms: 10,
        retry_max_delay_ms: 50,
        chunk_size: 1024,
        ..Default::default()
    }
}

fn request(cancellation: CancellationToken) -> TransferRequest {
    let mut metadata = HashMap::new();
    metadata.insert("entityId".to_string(), "f1".to_string());
    metadata.insert("fileIndex".to_string(), "1".to_string());

    TransferRequest {
        batch_id: BatchId::new(),
        item_id: ItemId::new(),
        payload: Payload::new("photo.jpg", "image/jpeg", vec![9u8; 4096]),
        metadata,
        cancellation,
    }
}

fn success_body() -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "files": [{ "url": "https://cdn.example.com/photo.jpg", "id": "file-1" }]
    })
}

#[tokio::test]
async fn test_upload_returns_reference_and_reports_progress() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .expect(1)
        .mount(&server)
        .await;

    let config = EndpointConfig {
        token: Some("secret".to_string()),
        ..endpoint_config(&server)
    };
    let endpoint = HttpUploadEndpoint::new(&config).unwrap();

    let last = Arc::new(AtomicU8::new(0));
    let sink = {
        let last = last.clone();
        ProgressSink::new(4096, move |p| last.store(p, Ordering::SeqCst))
    };

    let reference = endpoint.upload(request(CancellationToken::new()), sink).await.unwrap();

    assert_eq!(reference.url, "https://cdn.example.com/photo.jpg");
    assert_eq!(reference.id.as_deref(), Some("file-1"));
    assert_eq!(last.load(Ordering::SeqCst), 100);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = HttpUploadEndpoint::new(&endpoint_config(&server)).unwrap();
    let reference = endpoint
        .upload(request(CancellationToken::new()), ProgressSink::discard(4096))
        .await
        .unwrap();

    assert_eq!(reference.url, "https://cdn.example.com/photo.jpg");
}

#[tokio::test]
async fn test_validation_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "success": false,
                "error": "entity not found"
            })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = HttpUploadEndpoint::new(&endpoint_config(&server)).unwrap();
    let err = endpoint
        .upload(request(CancellationToken::new()), ProgressSink::discard(4096))
        .await
        .unwrap_err();

    match err {
        UploadError::Transfer { kind, status, message } => {
            assert_eq!(kind, TransferErrorKind::Validation);
            assert_eq!(status, Some(400));
            assert_eq!(message, "entity not found");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unauthorized_and_exhausted_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = HttpUploadEndpoint::new(&endpoint_config(&server)).unwrap();
    let err = endpoint
        .upload(request(CancellationToken::new()), ProgressSink::discard(4096))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Transfer { kind: TransferErrorKind::Unauthorized, .. }));

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let endpoint = HttpUploadEndpoint::new(&endpoint_config(&server)).unwrap();
    let err = endpoint
        .upload(request(CancellationToken::new()), ProgressSink::discard(4096))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Transfer { kind: TransferErrorKind::Server, .. }));
}

#[tokio::test]
async fn test_success_false_body_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "message": "storage full"
            })),
        )
        .mount(&server)
        .await;

    let endpoint = HttpUploadEndpoint::new(&endpoint_config(&server)).unwrap();
    let err = endpoint
        .upload(request(CancellationToken::new()), ProgressSink::discard(4096))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Transfer { kind: TransferErrorKind::Validation, .. }));
    assert!(err.to_string().contains("storage full"));
}

#[tokio::test]
async fn test_cancelled_request_never_hits_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .expect(0)
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    token.cancel();

    let endpoint = HttpUploadEndpoint::new(&endpoint_config(&server)).unwrap();
    let err = endpoint
        .upload(request(token), ProgressSink::discard(4096))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Cancelled));
}
