//! Test utilities for sift-core
//!
//! This module provides a mock Ollama server that can be used for development
//! and integration tests of the external classification step.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::ai::{AIBackend, MockBackend};

/// Mock Ollama server for testing and development
pub struct MockOllamaServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[derive(Clone)]
struct MockState {
    /// Artificial latency before every generate response
    delay: Duration,
}

impl MockOllamaServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        Self::start_with_delay(Duration::ZERO).await
    }

    /// Start a server that waits `delay` before answering `/api/generate`
    pub async fn start_with_delay(delay: Duration) -> Self {
        let app = Router::new()
            .route("/api/tags", get(handle_tags))
            .route("/api/generate", post(handle_generate))
            .with_state(Arc::new(MockState { delay }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockOllamaServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ollama tags endpoint response (health check)
async fn handle_tags() -> Json<TagsResponse> {
    Json(TagsResponse {
        models: vec![ModelInfo {
            name: "llama3.2:latest".to_string(),
            modified_at: "2024-01-01T00:00:00Z".to_string(),
            size: 4_000_000_000,
        }],
    })
}

/// Ollama generate endpoint
///
/// Answers categorization prompts with the keyword logic of `MockBackend`.
async fn handle_generate(
    State(state): State<Arc<MockState>>,
    Json(request): Json<GenerateRequest>,
) -> Json<GenerateResponse> {
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }

    let description = extract_description(&request.prompt);
    let categories = extract_categories(&request.prompt);
    let response = match MockBackend::new()
        .classify_transaction(&description, &categories)
        .await
    {
        Ok(classification) => {
            // Wrap in prose the way real models tend to
            format!(
                "Here is the result:\n{}",
                serde_json::to_string(&classification).unwrap()
            )
        }
        Err(_) => "I could not classify that transaction.".to_string(),
    };

    Json(GenerateResponse {
        model: request.model,
        response,
        done: true,
    })
}

/// Pull the quoted description out of the prompt
fn extract_description(prompt: &str) -> String {
    const MARKER: &str = "Categorize this bank transaction: \"";
    if let Some(start) = prompt.find(MARKER) {
        let after = &prompt[start + MARKER.len()..];
        if let Some(end) = after.find('"') {
            return after[..end].to_string();
        }
    }
    prompt.to_string()
}

fn extract_categories(prompt: &str) -> Vec<String> {
    const MARKER: &str = "Allowed categories: ";
    match prompt.find(MARKER) {
        Some(start) => {
            let after = &prompt[start + MARKER.len()..];
            let line = &after[..after.find('\n').unwrap_or(after.len())];
            line.split(", ")
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect()
        }
        None => Vec::new(),
    }
}

// Request/Response types for the mock server

#[derive(Debug, Serialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
struct ModelInfo {
    name: String,
    modified_at: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[allow(dead_code)]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    model: String,
    response: String,
    done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::OllamaBackend;

    #[tokio::test]
    async fn test_mock_server_health_check() {
        let server = MockOllamaServer::start().await;
        let client = OllamaBackend::new(&server.url(), "test-model");

        assert!(client.health_check().await);
    }

    #[tokio::test]
    async fn test_mock_server_classify_netflix() {
        let server = MockOllamaServer::start().await;
        let client = OllamaBackend::new(&server.url(), "test-model");

        let result = client
            .classify_transaction("NETFLIX.COM SUBSCRIPTION -15.99", &["Entertainment".to_string()])
            .await
            .unwrap();
        assert_eq!(result.category, "Other");

        let result = client
            .classify_transaction("NETFLIX -15.99", &["Entertainment".to_string()])
            .await
            .unwrap();
        assert_eq!(result.category, "Entertainment");
    }

    #[test]
    fn test_prompt_extraction() {
        let prompt = "Categorize this bank transaction: \"BP 2GO -40.00\"\n\nAllowed categories: Transport, Other\n";
        assert_eq!(extract_description(prompt), "BP 2GO -40.00");
        assert_eq!(extract_categories(prompt), vec!["Transport", "Other"]);
    }
}
