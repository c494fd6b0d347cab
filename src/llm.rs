//! Generation backends.
//!
//! [`PlanSynthesizer`] returns raw assistant text only; extracting a
//! valid plan from it is the coercer's job. The remote client never
//! retries: generation is non-idempotent and cost-bearing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};

use crate::config::Settings;
use crate::error::{OrchestratorError, Result};
use crate::prompt::SYSTEM_PROMPT;

/// Trait for the text-generation backend.
#[async_trait]
pub trait PlanSynthesizer: Send + Sync {
    /// Send the assembled prompt, return the raw assistant text.
    async fn synthesize(&self, prompt: &str) -> Result<String>;
}

pub type SharedSynthesizer = Arc<dyn PlanSynthesizer>;

/// Remote chat-completions client.
pub struct RemoteSynthesizer {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl RemoteSynthesizer {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| OrchestratorError::UpstreamUnavailable {
                service: "generation",
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: settings.llm_url.clone(),
            model: settings.llm_model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            timeout: settings.request_timeout,
        })
    }
}

#[async_trait]
impl PlanSynthesizer for RemoteSynthesizer {
    async fn synthesize(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": prompt},
                ],
                "temperature": self.temperature,
                "max_tokens": self.max_tokens,
            }))
            .send()
            .await
            .map_err(|e| OrchestratorError::from_reqwest("generation", self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, "generation backend returned non-success");
            return Err(OrchestratorError::UpstreamUnavailable {
                service: "generation",
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::UpstreamUnavailable {
                service: "generation",
                reason: format!("malformed response: {e}"),
            })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OrchestratorError::UpstreamUnavailable {
                service: "generation",
                reason: "no choices in response".to_string(),
            })?;

        debug!(chars = content.len(), model = %self.model, "generation complete");
        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Canned generation output for SIM mode: a fixed, well-formed plan
/// so the rest of the pipeline can be exercised without a backend.
pub struct SimSynthesizer;

pub(crate) const SIM_RESPONSE: &str = r#"{
  "budget": {"essentials": 0.5, "wants": 0.2, "savings": 0.3},
  "cards": {"groceries": "Amex Gold", "dining": "Amex Gold"},
  "actions": [
    "Set auto-save $500/month",
    "Use Amex for groceries/dining"
  ],
  "explain": "SIM mode stub: replace with hosted inference in production."
}"#;

#[async_trait]
impl PlanSynthesizer for SimSynthesizer {
    async fn synthesize(&self, _prompt: &str) -> Result<String> {
        Ok(SIM_RESPONSE.to_string())
    }
}
