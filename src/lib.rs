//! vidscribe - video keyframe and transcript extraction
//!
//! Uploads are handed to ffmpeg for audio and keyframe extraction; the tool's
//! output is relayed live to the client as a server-push event stream, where
//! incremental consumers turn it into keyframe markers and a completion.

pub mod api;
pub mod caption;
pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod job;
pub mod session;
pub mod sse;
pub mod storage;
pub mod transcription;

// Re-export main types for easy access
pub use crate::caption::CaptionClient;
pub use crate::client::{RelayClient, SseEventSource};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::consumer::{await_completion, EventSource, KeyframeMarker, KeyframeMarkers, MarkerScanner};
pub use crate::error::{RelayError, Result};
pub use crate::event::{Completion, StreamEvent};
pub use crate::job::{JobKind, JobRunner, ProcessRequest};
pub use crate::session::{Keyframe, Session};
pub use crate::storage::{StoredUpload, UploadStore};
pub use crate::transcription::{Transcript, TranscriptSegment, TranscriptionClient};
