//! Ollama backend implementation
//!
//! HTTP client for a locally hosted Ollama server (`POST /api/generate`).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

use super::parsing::parse_external_classification;
use super::types::ExternalClassification;
use super::AIBackend;

/// Ollama backend
#[derive(Clone)]
pub struct OllamaBackend {
    http_client: Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OLLAMA_HOST").ok()?;
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".to_string());
        Some(Self::new(&host, &model))
    }
}

/// Request to Ollama API
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
}

/// Response from Ollama API
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Build the categorization prompt
pub(crate) fn classification_prompt(description: &str, categories: &[String]) -> String {
    format!(
        "Categorize this bank transaction: \"{}\"\n\
         \n\
         Allowed categories: {}\n\
         \n\
         Decide whether it is a personal or business expense and pick exactly one \
         category from the list.\n\
         Respond with JSON only:\n\
         {{\"classification\": \"personal|business\", \"category\": \"<name>\", \
         \"confidence\": 0.0-1.0, \"explanation\": \"<short reason>\"}}",
        description,
        categories.join(", ")
    )
}

#[async_trait]
impl AIBackend for OllamaBackend {
    async fn classify_transaction(
        &self,
        description: &str,
        categories: &[String],
    ) -> Result<ExternalClassification> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: classification_prompt(description, categories),
            stream: false,
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let ollama_response: OllamaResponse = response.json().await?;
        debug!("Ollama response: {}", ollama_response.response);

        parse_external_classification(&ollama_response.response)
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}
