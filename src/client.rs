//! HTTP client for a vidscribe server
//!
//! Uploads a media file to one of the extraction endpoints and exposes the
//! response body as an [`EventSource`].

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::pin::Pin;
use tracing::{debug, info};
use url::Url;

use crate::consumer::EventSource;
use crate::error::{RelayError, Result};
use crate::event::StreamEvent;
use crate::sse::SseDecoder;

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

/// Progress channel read from an HTTP server-push response
pub struct SseEventSource {
    body: ByteStream,
    decoder: SseDecoder,
    ready: VecDeque<String>,
    closed: bool,
}

impl SseEventSource {
    pub fn from_response(response: reqwest::Response) -> Self {
        let body = response.bytes_stream().map(|chunk| chunk.map(|bytes| bytes.to_vec()));
        Self::from_byte_stream(body)
    }

    /// Wrap any byte stream carrying server-push frames
    pub fn from_byte_stream<S>(body: S) -> Self
    where
        S: Stream<Item = reqwest::Result<Vec<u8>>> + Send + 'static,
    {
        Self {
            body: Box::pin(body),
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
            closed: false,
        }
    }
}

impl fmt::Debug for SseEventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseEventSource")
            .field("ready", &self.ready.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventSource for SseEventSource {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(data) = self.ready.pop_front() {
                return StreamEvent::from_json(&data).map(Some);
            }
            if self.closed {
                return Ok(None);
            }

            match self.body.next().await {
                Some(Ok(bytes)) => self.ready.extend(self.decoder.feed(&bytes)),
                Some(Err(e)) => {
                    self.closed = true;
                    return Err(RelayError::Transport(e.to_string()));
                }
                None => {
                    self.closed = true;
                    self.ready.extend(self.decoder.finish());
                }
            }
        }
    }
}

/// Client for the `/audio` and `/keyframes` endpoints
#[derive(Debug, Clone)]
pub struct RelayClient {
    client: reqwest::Client,
    base_url: Url,
}

impl RelayClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| RelayError::Config(format!("invalid server url {}: {}", base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Upload `video` for audio extraction
    pub async fn extract_audio(&self, video: &Path, bitrate: Option<&str>) -> Result<SseEventSource> {
        let mut query = Vec::new();
        if let Some(bitrate) = bitrate {
            query.push(("bitrate", bitrate.to_string()));
        }
        self.open("audio", video, &query).await
    }

    /// Upload `video` for keyframe extraction
    pub async fn extract_keyframes(&self, video: &Path, gap: Option<f64>) -> Result<SseEventSource> {
        let mut query = Vec::new();
        if let Some(gap) = gap {
            query.push(("gap", gap.to_string()));
        }
        self.open("keyframes", video, &query).await
    }

    /// Absolute URL for an output path reported by a terminal event
    pub fn resolve_output(&self, output: &str) -> Result<Url> {
        self.endpoint(output.trim_start_matches('/'))
    }

    /// Download a server-relative output (an audio track or keyframe image)
    pub async fn fetch_output(&self, output: &str) -> Result<Vec<u8>> {
        let url = self.resolve_output(output)?;
        let response = self.client.get(url).send().await?;
        let response = reject_unless_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RelayError::Config(format!("invalid path {}: {}", path, e)))
    }

    async fn open(&self, endpoint: &str, video: &Path, query: &[(&str, String)]) -> Result<SseEventSource> {
        let file_name = video
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| RelayError::InvalidUpload(format!("{} has no file name", video.display())))?;
        let bytes = tokio::fs::read(video).await?;

        info!("📤 Uploading {} ({} bytes) to /{}", file_name, bytes.len(), endpoint);

        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(self.endpoint(endpoint)?)
            .query(query)
            .multipart(form)
            .send()
            .await?;

        let response = reject_unless_success(response).await?;
        debug!("Progress channel opened on /{}", endpoint);
        Ok(SseEventSource::from_response(response))
    }
}

async fn reject_unless_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RelayError::Rejected {
        status: status.as_u16(),
        body,
    })
}
