//! Image captioning collaborator
//!
//! Sends a single keyframe to an OpenAI-compatible chat completions endpoint
//! as an inline data URL and returns the model's free-text caption.

use base64::Engine;
use std::time::Duration;
use tracing::info;

use crate::config::CaptioningConfig;
use crate::error::{RelayError, Result};

pub struct CaptionClient {
    config: CaptioningConfig,
    client: reqwest::Client,
}

impl CaptionClient {
    pub fn new(config: CaptioningConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { config, client }
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Caption one image
    pub async fn caption(&self, image: &[u8], mime_type: &str) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| RelayError::Collaborator("captioning API key not configured".to_string()))?;

        let body = self.request_body(image, mime_type);
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Collaborator(format!("caption request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RelayError::Collaborator(format!(
                "captioning API error {}: {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RelayError::Collaborator(format!("invalid caption response: {}", e)))?;

        let caption = extract_caption(&response_json)
            .ok_or_else(|| RelayError::Collaborator("caption response had no content".to_string()))?;
        info!("🖼️ Captioned image ({} bytes): {}", image.len(), caption);
        Ok(caption)
    }

    fn request_body(&self, image: &[u8], mime_type: &str) -> serde_json::Value {
        let data_url = format!(
            "data:{};base64,{}",
            mime_type,
            base64::engine::general_purpose::STANDARD.encode(image)
        );

        serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": self.config.prompt},
                    {"type": "image_url", "image_url": {"url": data_url}}
                ]
            }]
        })
    }
}

/// Pull the first choice's message text out of a chat completion
fn extract_caption(response: &serde_json::Value) -> Option<String> {
    let content = response["choices"][0]["message"]["content"].as_str()?.trim();
    (!content.is_empty()).then(|| content.to_string())
}

/// MIME type for a keyframe image path
pub fn image_mime_type(path: &str) -> &'static str {
    match path.rsplit('.').next().map(|ext| ext.to_ascii_lowercase()).as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}
