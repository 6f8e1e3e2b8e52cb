//! Per-upload session document
//!
//! Collects the keyframes and transcript produced for one upload, supports
//! light editing and exports a synchronized document.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

use crate::consumer::KeyframeMarker;
use crate::error::{RelayError, Result};
use crate::transcription::{SRTGenerator, Transcript, TranscriptSegment};

/// One extracted keyframe with its image location and optional caption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub marker: KeyframeMarker,
    pub image: String,
    pub caption: Option<String>,
}

impl Keyframe {
    /// Image path for a marker: ffmpeg numbers the image sequence from 1
    pub fn image_for(pattern: &str, frame_index: u64) -> String {
        expand_sequence_pattern(pattern, frame_index + 1)
    }
}

fn counter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"%(0?)(\d*)d").expect("valid counter regex"))
}

/// Expand the first printf-style `%d` / `%0Nd` counter in `pattern`
pub fn expand_sequence_pattern(pattern: &str, number: u64) -> String {
    counter_pattern()
        .replacen(pattern, 1, |caps: &regex::Captures<'_>| {
            let width: usize = caps[2].parse().unwrap_or(0);
            if &caps[1] == "0" {
                format!("{:0width$}", number, width = width)
            } else {
                format!("{:width$}", number, width = width)
            }
        })
        .into_owned()
}

/// Everything produced for one uploaded video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub source_name: String,
    pub created_at: DateTime<Utc>,
    pub audio_output: Option<String>,
    pub keyframe_pattern: Option<String>,
    pub keyframes: Vec<Keyframe>,
    pub transcript: Vec<TranscriptSegment>,
    pub language: Option<String>,
}

impl Session {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            created_at: Utc::now(),
            audio_output: None,
            keyframe_pattern: None,
            keyframes: Vec::new(),
            transcript: Vec::new(),
            language: None,
        }
    }

    pub fn set_audio_output(&mut self, output: impl Into<String>) {
        self.audio_output = Some(output.into());
    }

    pub fn set_keyframe_pattern(&mut self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        for keyframe in &mut self.keyframes {
            keyframe.image = Keyframe::image_for(&pattern, keyframe.marker.frame_index);
        }
        self.keyframe_pattern = Some(pattern);
    }

    /// Record a keyframe; images resolve against the keyframe pattern once known
    pub fn push_keyframe(&mut self, marker: KeyframeMarker) -> &Keyframe {
        let image = self
            .keyframe_pattern
            .as_deref()
            .map(|pattern| Keyframe::image_for(pattern, marker.frame_index))
            .unwrap_or_default();
        self.keyframes.push(Keyframe {
            marker,
            image,
            caption: None,
        });
        &self.keyframes[self.keyframes.len() - 1]
    }

    pub fn set_transcript(&mut self, transcript: Transcript) {
        self.language = transcript.language;
        self.transcript = transcript.segments;
    }

    pub fn set_caption(&mut self, index: usize, caption: impl Into<String>) -> Result<()> {
        let keyframe = self
            .keyframes
            .get_mut(index)
            .ok_or_else(|| RelayError::InvalidParameter {
                name: "keyframe",
                value: index.to_string(),
            })?;
        keyframe.caption = Some(caption.into());
        Ok(())
    }

    pub fn edit_segment(&mut self, index: usize, text: impl Into<String>) -> Result<()> {
        let segment = self
            .transcript
            .get_mut(index)
            .ok_or_else(|| RelayError::InvalidParameter {
                name: "segment",
                value: index.to_string(),
            })?;
        segment.text = text.into();
        Ok(())
    }

    /// Markdown document: each keyframe followed by the speech until the next one
    pub fn to_markdown(&self) -> String {
        let mut keyframes: Vec<&Keyframe> = self.keyframes.iter().collect();
        keyframes.sort_by(|a, b| a.marker.timestamp_seconds.total_cmp(&b.marker.timestamp_seconds));

        let mut doc = String::new();
        let _ = writeln!(doc, "# {}\n", self.source_name);
        if let Some(audio) = &self.audio_output {
            let _ = writeln!(doc, "Audio: [{}]({})\n", audio, audio);
        }

        let first_keyframe = keyframes
            .first()
            .map(|k| k.marker.timestamp_seconds)
            .unwrap_or(f64::INFINITY);
        write_segments(&mut doc, self.segments_between(f64::NEG_INFINITY, first_keyframe));

        for (i, keyframe) in keyframes.iter().enumerate() {
            let start = keyframe.marker.timestamp_seconds;
            let end = keyframes
                .get(i + 1)
                .map(|k| k.marker.timestamp_seconds)
                .unwrap_or(f64::INFINITY);

            let _ = writeln!(
                doc,
                "## [{}] Frame {}\n",
                format_clock(start),
                keyframe.marker.frame_index
            );
            if !keyframe.image.is_empty() {
                let _ = writeln!(doc, "![Frame {}]({})\n", keyframe.marker.frame_index, keyframe.image);
            }
            if let Some(caption) = &keyframe.caption {
                let _ = writeln!(doc, "*{}*\n", caption);
            }
            write_segments(&mut doc, self.segments_between(start, end));
        }

        doc
    }

    pub fn to_srt(&self) -> String {
        SRTGenerator::from_segments(&self.transcript).generate()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write `session.md`, `session.srt` and `session.json` into `dir`
    pub async fn save(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dir).await?;

        let outputs = [
            (dir.join("session.md"), self.to_markdown()),
            (dir.join("session.srt"), self.to_srt()),
            (dir.join("session.json"), self.to_json()?),
        ];

        let mut written = Vec::new();
        for (path, content) in outputs {
            tokio::fs::write(&path, content).await?;
            written.push(path);
        }

        info!("💾 Saved session for {} to {}", self.source_name, dir.display());
        Ok(written)
    }

    fn segments_between(&self, start: f64, end: f64) -> impl Iterator<Item = &TranscriptSegment> {
        self.transcript
            .iter()
            .filter(move |s| s.start >= start && s.start < end)
    }
}

fn write_segments<'a>(doc: &mut String, segments: impl Iterator<Item = &'a TranscriptSegment>) {
    let mut wrote = false;
    for segment in segments {
        let _ = writeln!(doc, "[{}] {}", format_clock(segment.start), segment.text.trim());
        wrote = true;
    }
    if wrote {
        doc.push('\n');
    }
}

/// `mm:ss.ss`, with hours when needed
fn format_clock(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let whole = seconds.floor() as u64;
    let hours = whole / 3600;
    let minutes = (whole % 3600) / 60;
    let secs = seconds - (hours * 3600 + minutes * 60) as f64;
    if hours > 0 {
        format!("{}:{:02}:{:05.2}", hours, minutes, secs)
    } else {
        format!("{:02}:{:05.2}", minutes, secs)
    }
}
