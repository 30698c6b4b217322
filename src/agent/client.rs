//! Ollama chat client implementing the `Reasoner` trait.

use crate::agent::{Reasoner, ReasoningRequest};
use crate::error::ExternalServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Configuration for the reasoning client.
#[derive(Debug, Clone)]
pub struct ReasonerConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2:latest".to_string(),
            temperature: 0.0,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Production reasoning client talking to an Ollama-compatible endpoint.
pub struct OllamaClient {
    config: ReasonerConfig,
    http_client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: ReasonerConfig) -> Result<Self, ExternalServiceError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ExternalServiceError::MalformedResponse(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl Reasoner for OllamaClient {
    async fn complete(&self, request: ReasoningRequest) -> Result<String, ExternalServiceError> {
        let url = format!("{}/api/chat", self.config.ollama_url);

        let body = OllamaChatRequest {
            model: self.config.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.instruction,
                },
                ChatMessage {
                    role: "user",
                    content: request.evidence.to_string(),
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        debug!("Sending reasoning request to {}", url);

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ExternalServiceError::from_reqwest(
                    e,
                    &self.config.ollama_url,
                    self.config.timeout_seconds,
                )
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ExternalServiceError::Api { status, message });
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| ExternalServiceError::MalformedResponse(e.to_string()))?;

        Ok(chat_response.message.content)
    }
}
