use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::TranscriptSegment;

/// SRT (SubRip Subtitle) entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SRTEntry {
    /// Sequential number
    pub index: u32,
    /// Start timestamp
    pub start: Duration,
    /// End timestamp
    pub end: Duration,
    /// Subtitle text
    pub text: String,
}

impl SRTEntry {
    pub fn new(index: u32, start: Duration, end: Duration, text: String) -> Self {
        Self {
            index,
            start,
            end,
            text: clean_text(&text),
        }
    }
}

impl fmt::Display for SRTEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n{} --> {}\n{}\n",
            self.index,
            format_timestamp(self.start),
            format_timestamp(self.end),
            self.text
        )
    }
}

/// SRT file generator
#[derive(Debug, Clone, Default)]
pub struct SRTGenerator {
    entries: Vec<SRTEntry>,
}

impl SRTGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build entries from transcript segments, skipping empty text
    pub fn from_segments(segments: &[TranscriptSegment]) -> Self {
        let mut generator = Self::new();
        for segment in segments.iter().filter(|s| !s.text.trim().is_empty()) {
            generator.add_entry(SRTEntry::new(
                0,
                seconds(segment.start),
                seconds(segment.end.max(segment.start)),
                segment.text.clone(),
            ));
        }
        generator.sort_entries();
        generator
    }

    pub fn add_entry(&mut self, entry: SRTEntry) {
        self.entries.push(entry);
    }

    /// Sort entries by start time and renumber from 1
    pub fn sort_entries(&mut self) {
        self.entries.sort_by(|a, b| a.start.cmp(&b.start));
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.index = (i + 1) as u32;
        }
    }

    /// Generate SRT content as string
    pub fn generate(&self) -> String {
        let mut srt_content = String::new();
        for entry in &self.entries {
            srt_content.push_str(&entry.to_string());
            srt_content.push('\n');
        }
        srt_content
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn seconds(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

/// Collapse whitespace so each entry stays on one line
fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Format duration as SRT timestamp (HH:MM:SS,mmm)
pub fn format_timestamp(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let milliseconds = duration.subsec_millis();

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, milliseconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, end: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_timestamp_formatting() {
        assert_eq!(format_timestamp(Duration::from_secs(3661)), "01:01:01,000");
        assert_eq!(format_timestamp(Duration::from_millis(1500)), "00:00:01,500");
        assert_eq!(format_timestamp(Duration::from_secs(0)), "00:00:00,000");
    }

    #[test]
    fn test_from_segments_sorts_and_numbers() {
        let generator = SRTGenerator::from_segments(&[
            segment(5.0, 7.5, "second  line"),
            segment(0.0, 5.0, "first\nline"),
            segment(8.0, 9.0, "   "),
        ]);

        assert_eq!(generator.len(), 2);
        let content = generator.generate();
        assert!(content.starts_with("1\n00:00:00,000 --> 00:00:05,000\nfirst line\n"));
        assert!(content.contains("2\n00:00:05,000 --> 00:00:07,500\nsecond line\n"));
    }
}
