//! Incremental consumers for the progress channel
//!
//! [`KeyframeMarkers`] turns the relayed ffmpeg output into an ordered,
//! lazily produced sequence of [`KeyframeMarker`]s that ends exactly when the
//! terminal event arrives. [`await_completion`] is the no-parsing variant:
//! it hands every chunk to a log sink and resolves once with the outcome.

use async_trait::async_trait;
use futures::stream::{self, Stream};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::event::{Completion, StreamEvent};

/// A channel of relayed job events
#[async_trait]
pub trait EventSource: Send {
    /// Suspend until the next event; `None` once the transport has closed
    async fn next_event(&mut self) -> Result<Option<StreamEvent>>;
}

#[async_trait]
impl EventSource for mpsc::UnboundedReceiver<StreamEvent> {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        Ok(self.recv().await)
    }
}

/// Frame index and presentation time of one selected keyframe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyframeMarker {
    pub frame_index: u64,
    pub timestamp_seconds: f64,
}

impl KeyframeMarker {
    /// Parse the first marker found in `text`
    pub fn parse(text: &str) -> Option<Self> {
        marker_pattern()
            .captures(text)
            .and_then(|caps| Self::from_captures(&caps))
    }

    fn from_captures(caps: &Captures<'_>) -> Option<Self> {
        Some(Self {
            frame_index: caps.get(1)?.as_str().parse().ok()?,
            timestamp_seconds: caps.get(2)?.as_str().parse().ok()?,
        })
    }
}

// Matches ffmpeg showinfo lines: `n:   3 pts:    100 pts_time:1.25 ...`
fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"n: *(\d+)\s*pts: *\d+\s*pts_time:(\d+\.?\d*)").expect("valid marker regex")
    })
}

/// Finds markers in chunked stdout/stderr text.
///
/// Each stream keeps its own pending tail, so a marker split across chunks
/// (or across lines) is still found. A match touching the end of a stream's
/// text is held back while its timestamp may continue in the next chunk. It
/// settles once any later event arrives or the streams end.
#[derive(Debug, Default)]
pub struct MarkerScanner {
    stdout: String,
    stderr: String,
}

impl MarkerScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan one event's text, appending settled markers to `out`
    pub fn feed(&mut self, event: &StreamEvent, out: &mut VecDeque<KeyframeMarker>) {
        let (text, pending, other) = match event {
            StreamEvent::Stdout { stdout } => (stdout, &mut self.stdout, &mut self.stderr),
            StreamEvent::Stderr { stderr } => (stderr, &mut self.stderr, &mut self.stdout),
            StreamEvent::Exit { .. } => return,
        };

        // Output moved on, so a match held at the end of the other stream is complete
        scan(other, out, true);

        pending.push_str(text);
        scan(pending, out, false);
    }

    /// End of both streams: emit everything still held back
    pub fn finish(&mut self, out: &mut VecDeque<KeyframeMarker>) {
        for pending in [&mut self.stdout, &mut self.stderr] {
            scan(pending, out, true);
            pending.clear();
        }
    }
}

fn scan(pending: &mut String, out: &mut VecDeque<KeyframeMarker>, settle: bool) {
    let mut consumed = 0;

    for caps in marker_pattern().captures_iter(pending) {
        let Some(whole) = caps.get(0) else { continue };
        if !settle && whole.end() == pending.len() {
            break;
        }
        if let Some(marker) = KeyframeMarker::from_captures(&caps) {
            out.push_back(marker);
        }
        consumed = whole.end();
    }

    // Every later match starts at an `n:`, so text before the last one can go
    let tail = &pending[consumed..];
    let keep_from = match tail.rfind("n:") {
        Some(offset) => consumed + offset,
        None if tail.ends_with('n') => pending.len() - 1,
        None => pending.len(),
    };
    pending.drain(..keep_from);
}

/// Lazily yields keyframe markers until the terminal event
pub struct KeyframeMarkers<S> {
    source: S,
    scanner: MarkerScanner,
    queue: VecDeque<KeyframeMarker>,
    completion: Option<Completion>,
}

impl<S: EventSource> KeyframeMarkers<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            scanner: MarkerScanner::new(),
            queue: VecDeque::new(),
            completion: None,
        }
    }

    /// Next marker in arrival order, or `None` once the job has finished.
    ///
    /// Returns [`RelayError::Transport`] if the channel closes without a
    /// terminal event.
    pub async fn next_marker(&mut self) -> Result<Option<KeyframeMarker>> {
        loop {
            if let Some(marker) = self.queue.pop_front() {
                return Ok(Some(marker));
            }
            if self.completion.is_some() {
                return Ok(None);
            }

            match self.source.next_event().await? {
                Some(event) => match event.completion() {
                    Some(completion) => {
                        self.scanner.finish(&mut self.queue);
                        debug!("Keyframe stream finished with code {}", completion.code);
                        self.completion = Some(completion);
                    }
                    None => self.scanner.feed(&event, &mut self.queue),
                },
                None => {
                    return Err(RelayError::Transport(
                        "progress channel closed before the terminal event".to_string(),
                    ))
                }
            }
        }
    }

    /// The terminal event, once observed
    pub fn completion(&self) -> Option<&Completion> {
        self.completion.as_ref()
    }

    /// Drain every remaining marker, returning them with the completion
    pub async fn collect_all(mut self) -> Result<(Vec<KeyframeMarker>, Completion)> {
        let mut markers = Vec::new();
        while let Some(marker) = self.next_marker().await? {
            markers.push(marker);
        }
        let completion = self
            .completion
            .ok_or_else(|| RelayError::Transport("missing terminal event".to_string()))?;
        Ok((markers, completion))
    }

    /// Adapt into a `Stream`; a transport error is yielded once and ends the stream
    pub fn into_stream(self) -> impl Stream<Item = Result<KeyframeMarker>> {
        stream::unfold(Some(self), |state| async move {
            let mut this = state?;
            match this.next_marker().await {
                Ok(Some(marker)) => Some((Ok(marker), Some(this))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

/// Wait for the terminal event, passing every output chunk to `log_sink`
pub async fn await_completion<S, F>(source: &mut S, mut log_sink: F) -> Result<Completion>
where
    S: EventSource + ?Sized,
    F: FnMut(&str),
{
    while let Some(event) = source.next_event().await? {
        if let Some(completion) = event.completion() {
            return Ok(completion);
        }
        if let Some(text) = event.text() {
            log_sink(text);
        }
    }

    Err(RelayError::Transport(
        "progress channel closed before the terminal event".to_string(),
    ))
}

/// Log sink that forwards process output to `tracing` at debug level
pub fn trace_sink(text: &str) {
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        debug!(target: "vidscribe::ffmpeg", "{}", line);
    }
}
