//! Gemini API client
//!
//! Calls `models/{model}:generateContent` over a long-lived reqwest::Client
//! so connections are pooled across chat turns.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use super::AdviceGateway;
use crate::config::{ModelConfig, SafetySetting};
use crate::error::AdvisorError;
use crate::Result;

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl AdviceGateway for GeminiClient {
    async fn submit(
        &self,
        prompt: &str,
        model: &ModelConfig,
        safety: &[SafetySetting],
    ) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(AdvisorError::Gateway("GEMINI_API_KEY not configured".to_string()));
        }

        let request = build_request(prompt, model, safety);

        info!(model = %model.model, prompt_len = prompt.len(), "Calling Gemini API");

        let response = self
            .client
            .post(self.endpoint(&model.model))
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                AdvisorError::Gateway(format!("Gemini API request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(AdvisorError::Gateway(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            AdvisorError::Gateway(format!("Gemini parse error: {}", e))
        })?;

        let answer = extract_text(gemini_response)?;
        info!(model = %model.model, answer_len = answer.len(), "Gemini response received");

        Ok(answer)
    }
}

fn build_request(prompt: &str, model: &ModelConfig, safety: &[SafetySetting]) -> GeminiRequest {
    let generation_config = if model.temperature.is_some()
        || model.top_p.is_some()
        || model.top_k.is_some()
        || model.max_output_tokens.is_some()
    {
        Some(GenerationConfig {
            temperature: model.temperature,
            top_p: model.top_p,
            top_k: model.top_k,
            max_output_tokens: model.max_output_tokens,
        })
    } else {
        None
    };

    GeminiRequest {
        contents: vec![Content {
            parts: vec![Part {
                text: prompt.to_string(),
            }],
        }],
        generation_config,
        safety_settings: safety.to_vec(),
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: GeminiResponse) -> Result<String> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(AdvisorError::Gateway(format!("Prompt blocked: {}", reason)));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AdvisorError::Gateway("No response from Gemini API".to_string()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AdvisorError::Gateway(format!(
            "Empty response from Gemini (finish_reason={})",
            candidate.finish_reason.unwrap_or_else(|| "unknown".to_string())
        )));
    }

    Ok(text)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}
