use std::time::Duration;
use tracing::{info, warn};

use super::{Transcript, TranscriptSegment};
use crate::config::TranscriptionConfig;
use crate::error::{RelayError, Result};

/// Client for an OpenAI-compatible speech-to-text endpoint
pub struct TranscriptionClient {
    config: TranscriptionConfig,
    client: reqwest::Client,
}

impl TranscriptionClient {
    pub fn new(config: TranscriptionConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { config, client }
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Transcribe in-memory audio
    pub async fn transcribe_bytes(&self, audio_data: Vec<u8>, file_name: &str) -> Result<Transcript> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| RelayError::Collaborator("transcription API key not configured".to_string()))?;

        info!("🤖 Transcribing {} ({} bytes) with {}", file_name, audio_data.len(), self.config.model);

        let part = reqwest::multipart::Part::bytes(audio_data).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json");

        let form = if let Some(language) = &self.config.language {
            form.text("language", language.clone())
        } else {
            form
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelayError::Collaborator(format!("transcription request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!("Transcription API returned {}", status);
            return Err(RelayError::Collaborator(format!(
                "transcription API error {}: {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RelayError::Collaborator(format!("invalid transcription response: {}", e)))?;

        let transcript = parse_verbose_json(&response_json);
        info!(
            "✅ Transcription completed: {} segments, {} characters",
            transcript.segments.len(),
            transcript.text.len()
        );
        Ok(transcript)
    }
}

/// Parse a `verbose_json` transcription response
pub fn parse_verbose_json(response: &serde_json::Value) -> Transcript {
    let segments = response["segments"]
        .as_array()
        .map(|segments| {
            segments
                .iter()
                .filter_map(|segment| {
                    Some(TranscriptSegment {
                        start: segment["start"].as_f64()?,
                        end: segment["end"].as_f64()?,
                        text: segment["text"].as_str()?.trim().to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Transcript {
        text: response["text"].as_str().unwrap_or("").trim().to_string(),
        language: response["language"].as_str().map(|s| s.to_string()),
        segments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verbose_json() {
        let response = serde_json::json!({
            "text": " Hello there. General Kenobi. ",
            "language": "english",
            "segments": [
                {"id": 0, "start": 0.0, "end": 1.5, "text": " Hello there."},
                {"id": 1, "start": 1.5, "end": 3.25, "text": " General Kenobi."},
                {"id": 2, "start": "bad", "end": 4.0, "text": "skipped"}
            ]
        });

        let transcript = parse_verbose_json(&response);
        assert_eq!(transcript.text, "Hello there. General Kenobi.");
        assert_eq!(transcript.language.as_deref(), Some("english"));
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.segments[1].start, 1.5);
        assert_eq!(transcript.segments[1].text, "General Kenobi.");
    }

    #[test]
    fn test_parse_plain_json() {
        let transcript = parse_verbose_json(&serde_json::json!({"text": "hi"}));
        assert_eq!(transcript.text, "hi");
        assert!(transcript.segments.is_empty());
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = TranscriptionClient::new(TranscriptionConfig::default());
        assert!(!client.is_configured());
        let result = client.transcribe_bytes(vec![0u8; 4], "audio.opus").await;
        assert!(matches!(result, Err(RelayError::Collaborator(_))));
    }
}
