//! Model gateway — single and batched chat calls to named backends.
//!
//! The gateway's failure policy is deliberate: network errors, non-2xx
//! statuses, malformed payloads and timeouts all collapse into
//! `ModelResponse { failed: true }`. The cause is logged, never typed —
//! the pipeline treats failed peers as absent, not fatal, and a batch
//! always settles every call before returning.

pub mod catalog;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use catalog::{CatalogCache, ModelCatalog, ModelInfo};

/// Default per-call timeout, matching the upstream provider's ceiling.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenRouter chat-completions endpoint.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// One turn of a chat transcript, in provider wire format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// The outcome of one model call. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Provider model identifier (e.g. `openai/gpt-4o`).
    pub model_id: String,
    /// Answer text; `None` when the call failed.
    pub content: Option<String>,
    /// Provider-reported reasoning trace, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<serde_json::Value>,
    /// True when the backend did not answer within its timeout or
    /// returned a malformed payload.
    pub failed: bool,
}

impl ModelResponse {
    pub fn failed(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            content: None,
            reasoning: None,
            failed: true,
        }
    }

    /// A response counts as successful only if it carries non-empty text.
    pub fn succeeded(&self) -> bool {
        !self.failed
            && self
                .content
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty())
    }
}

/// Seam for model backends. Production uses [`OpenRouterGateway`];
/// tests substitute scripted fakes.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send one prompt to one named backend. Never errors — failure is
    /// recorded on the returned [`ModelResponse`].
    async fn send(&self, model: &str, messages: &[ChatMessage]) -> ModelResponse;

    /// Issue one independent request per model, concurrently, and wait
    /// for every one to settle. Results come back in input order; one
    /// slow or failing backend never blocks or cancels a sibling.
    async fn send_all(&self, models: &[String], messages: &[ChatMessage]) -> Vec<ModelResponse> {
        let calls = models.iter().map(|model| self.send(model, messages));
        futures::future::join_all(calls).await
    }
}

/// Internal call failure; logged at the gateway boundary, never
/// propagated to callers.
#[derive(Debug, Error)]
enum CallError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("response carried no content")]
    MissingContent,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantPayload,
}

#[derive(Debug, Deserialize)]
struct AssistantPayload {
    content: Option<String>,
    #[serde(default)]
    reasoning_details: Option<serde_json::Value>,
}

/// Gateway speaking the OpenRouter chat-completions wire format.
pub struct OpenRouterGateway {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenRouterGateway {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn post_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ModelResponse, CallError> {
        let payload = serde_json::json!({
            "model": model,
            "messages": messages,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Status { status, body });
        }

        let completion: ChatCompletion = response.json().await?;
        let message = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(CallError::MissingContent)?;

        let content = message.content.ok_or(CallError::MissingContent)?;

        Ok(ModelResponse {
            model_id: model.to_string(),
            content: Some(content),
            reasoning: message.reasoning_details,
            failed: false,
        })
    }
}

#[async_trait]
impl ModelBackend for OpenRouterGateway {
    async fn send(&self, model: &str, messages: &[ChatMessage]) -> ModelResponse {
        debug!(model, messages = messages.len(), "dispatching model call");
        match tokio::time::timeout(self.timeout, self.post_chat(model, messages)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(model, error = %e, "model call failed");
                ModelResponse::failed(model)
            }
            Err(_) => {
                warn!(model, timeout_secs = self.timeout.as_secs(), "model call timed out");
                ModelResponse::failed(model)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeded_requires_nonempty_content() {
        let ok = ModelResponse {
            model_id: "a/b".into(),
            content: Some("answer".into()),
            reasoning: None,
            failed: false,
        };
        assert!(ok.succeeded());

        let blank = ModelResponse {
            model_id: "a/b".into(),
            content: Some("   ".into()),
            reasoning: None,
            failed: false,
        };
        assert!(!blank.succeeded());

        assert!(!ModelResponse::failed("a/b").succeeded());
    }

    #[test]
    fn failed_marker_carries_model_identity() {
        let r = ModelResponse::failed("openai/gpt-4o");
        assert_eq!(r.model_id, "openai/gpt-4o");
        assert!(r.failed);
        assert!(r.content.is_none());
    }

    #[test]
    fn chat_message_roles() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
        assert_eq!(ChatMessage::assistant("a").role, "assistant");
    }
}
