//! HTTP-level tests for the Ollama embedding backend.

use std::time::Duration;

use lorekeep_core::{EmbeddingBackend, Error};
use lorekeep_inference::{embed_with_retry, OllamaBackend, RetryPolicy};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn embeddings(count: usize, dim: usize) -> serde_json::Value {
    serde_json::json!({
        "model": "nomic-embed-text",
        "embeddings": vec![vec![0.25f32; dim]; count],
    })
}

#[tokio::test]
async fn test_embed_posts_batch_to_api_embed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(serde_json::json!({
            "model": "nomic-embed-text",
            "input": ["first chunk", "second chunk"],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(embeddings(2, 4)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = OllamaBackend::with_config(mock_server.uri(), "nomic-embed-text".into(), 4);
    let texts = vec!["first chunk".to_string(), "second chunk".to_string()];
    let vectors = backend.embed_texts(&texts).await.unwrap();

    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0].as_slice(), &[0.25, 0.25, 0.25, 0.25]);
}

#[tokio::test]
async fn test_embed_rejects_wrong_dimension() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embeddings(1, 3)))
        .mount(&mock_server)
        .await;

    let backend = OllamaBackend::with_config(mock_server.uri(), "nomic-embed-text".into(), 4);
    let err = backend
        .embed_texts(&["text".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Embedding(ref m) if m.contains("dimension")));
}

#[tokio::test]
async fn test_embed_rejects_count_mismatch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embeddings(1, 4)))
        .mount(&mock_server)
        .await;

    let backend = OllamaBackend::with_config(mock_server.uri(), "nomic-embed-text".into(), 4);
    let err = backend
        .embed_texts(&["a".to_string(), "b".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Embedding(_)));
}

#[tokio::test]
async fn test_server_error_is_transient_and_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model loading"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embeddings(1, 4)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = OllamaBackend::with_config(mock_server.uri(), "nomic-embed-text".into(), 4);
    let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(5));
    let vectors = embed_with_retry(&backend, &["text".to_string()], &policy)
        .await
        .unwrap();
    assert_eq!(vectors.len(), 1);
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(embeddings(1, 4))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let backend = OllamaBackend::with_config(mock_server.uri(), "nomic-embed-text".into(), 4)
        .with_timeout_secs(1);
    let err = backend
        .embed_texts(&["text".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_health_check() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
        .mount(&mock_server)
        .await;

    let backend = OllamaBackend::with_config(mock_server.uri(), "nomic-embed-text".into(), 4);
    assert!(backend.health_check().await.unwrap());

    let down = OllamaBackend::with_config("http://127.0.0.1:9".into(), "nomic-embed-text".into(), 4);
    assert!(!down.health_check().await.unwrap());
}
