//! Speech-to-text collaborator and subtitle output

pub mod client;
pub mod srt;

use serde::{Deserialize, Serialize};

pub use client::TranscriptionClient;
pub use srt::{SRTEntry, SRTGenerator};

/// One timed piece of a transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Transcription result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub language: Option<String>,
    pub segments: Vec<TranscriptSegment>,
}
