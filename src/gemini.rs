//! Gemini `generateContent` client implementing [`Generator`].
//!
//! Every context block becomes one `text` part; a loaded image additionally
//! becomes an `inline_data` part right after its caption. Requests are sent
//! once. Rate limits, timeouts and safety blocks are surfaced as errors
//! instead of being retried.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

use mmrag_core::context::ContextBlock;
use mmrag_core::generator::Generator;

use crate::config::GeneratorConfig;

pub struct GeminiGenerator {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
}

impl GeminiGenerator {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the environment variable named by `api_key_env` is unset or
    /// empty, so a missing credential is caught before any query runs.
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        if api_key.trim().is_empty() {
            bail!("{} environment variable not set", config.api_key_env);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, blocks: &[ContextBlock]) -> Result<String> {
        let body = request_body(blocks);
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Gemini connection error: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Gemini API error {}: {}", status, body_text);
        }

        let json: Value = response.json().await?;
        parse_response_text(&json)
    }
}

/// Build the `generateContent` request body.
pub fn request_body(blocks: &[ContextBlock]) -> Value {
    let mut parts = Vec::with_capacity(blocks.len() + 4);
    for block in blocks {
        parts.push(json!({ "text": block.render() }));
        if let ContextBlock::Image { image, .. } = block {
            parts.push(json!({
                "inline_data": {
                    "mime_type": image.mime_type,
                    "data": STANDARD.encode(&image.data),
                }
            }));
        }
    }
    json!({
        "contents": [
            { "role": "user", "parts": parts }
        ]
    })
}

/// Concatenate the text parts of the first candidate.
pub fn parse_response_text(json: &Value) -> Result<String> {
    let candidate = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(|r| r.as_str())
                .unwrap_or("no candidates returned");
            anyhow!("Gemini returned no candidates: {}", reason)
        })?;

    let parts = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            let reason = candidate
                .get("finishReason")
                .and_then(|r| r.as_str())
                .unwrap_or("missing content");
            anyhow!("Gemini candidate has no content: {}", reason)
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    Ok(text)
}
