//! Vision-language API client.
//!
//! Turns a camera snapshot into a short scene description by calling a
//! chat-completions endpoint with the JPEG inlined as a base64 data URL.

use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::VisionConfig;
use crate::error::{Error, Result};

pub struct VisionClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    prompt: String,
}

impl VisionClient {
    /// Build a client from configuration. Returns `None` when the API key
    /// environment variable is unset; vision queries are then answered with
    /// an error message over the bus instead of an API call.
    #[must_use]
    pub fn from_config(config: &VisionConfig) -> Option<Self> {
        let api_key = std::env::var(&config.api_key_env).ok()?;
        Some(Self {
            http: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            prompt: config.prompt.clone(),
        })
    }

    /// Describe the scene in `jpeg`. Errors carry the upstream message so the
    /// caller can report them over the bus.
    pub async fn describe_scene(&self, jpeg: &[u8]) -> Result<String> {
        let payload = build_request_payload(&self.model, &self.prompt, jpeg, self.max_tokens);

        debug!(model = %self.model, "Sending vision query");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        extract_response_text(&body)
            .ok_or_else(|| Error::Vision("response carried no content".to_string()))
    }
}

fn build_request_payload(model: &str, prompt: &str, jpeg: &[u8], max_tokens: u32) -> Value {
    let image_b64 = base64::engine::general_purpose::STANDARD.encode(jpeg);
    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                {"type": "text", "text": prompt},
                {"type": "image_url", "image_url": {
                    "url": format!("data:image/jpeg;base64,{image_b64}")
                }}
            ]
        }],
        "max_tokens": max_tokens
    })
}

fn extract_response_text(body: &Value) -> Option<String> {
    body.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}
