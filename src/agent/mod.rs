//! Reasoning-service boundary.
//!
//! The pipeline depends only on the `Reasoner` trait: a request carrying
//! an instruction template plus structured evidence, answered with text
//! that embeds a JSON object. The production implementation talks to an
//! Ollama-compatible chat endpoint; tests script their own.

pub mod client;
pub mod prompts;

pub use client::{OllamaClient, ReasonerConfig};

use crate::error::ExternalServiceError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// One request to the external reasoning service.
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    /// Kind-specific instruction template (system prompt).
    pub instruction: String,
    /// Structured evidence payload, serialized into the user message.
    pub evidence: Value,
}

/// External reasoning collaborator. Stateless per call.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn complete(&self, request: ReasoningRequest) -> Result<String, ExternalServiceError>;
}

/// Issue a reasoning call and parse its JSON payload, with one bounded
/// retry covering the whole attempt.
///
/// A malformed response body counts as a failed attempt the same way a
/// transport error does, so it gets the retry too. The second failure is
/// returned to the caller, which degrades per its own policy
/// (undetermined finding, degraded report, or fatal for the executive
/// stage).
pub async fn reason_json<T: DeserializeOwned>(
    reasoner: &dyn Reasoner,
    request: ReasoningRequest,
    backoff: Duration,
) -> Result<T, ExternalServiceError> {
    match attempt(reasoner, request.clone()).await {
        Ok(parsed) => Ok(parsed),
        Err(first) => {
            warn!("Reasoning call failed, retrying once: {}", first);
            tokio::time::sleep(backoff).await;
            attempt(reasoner, request).await
        }
    }
}

async fn attempt<T: DeserializeOwned>(
    reasoner: &dyn Reasoner,
    request: ReasoningRequest,
) -> Result<T, ExternalServiceError> {
    let body = reasoner.complete(request).await?;
    let value = extract_json_object(&body)?;
    serde_json::from_value(value).map_err(|e| ExternalServiceError::MalformedResponse(e.to_string()))
}

/// Extract the first JSON object embedded in a response body.
///
/// Models wrap their output in prose or markdown fences often enough that
/// strict parsing of the whole body is not workable.
pub fn extract_json_object(response: &str) -> Result<Value, ExternalServiceError> {
    let start = response.find('{').ok_or_else(|| {
        ExternalServiceError::MalformedResponse("no JSON object in response".to_string())
    })?;

    // Walk to the matching close brace, respecting strings.
    let bytes = response.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &response[start..=i];
                    return serde_json::from_str(candidate).map_err(|e| {
                        ExternalServiceError::MalformedResponse(e.to_string())
                    });
                }
            }
            _ => {}
        }
    }

    Err(ExternalServiceError::MalformedResponse(
        "unterminated JSON object in response".to_string(),
    ))
}
