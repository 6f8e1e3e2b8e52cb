//! Job Runner: spawns the external media tool and relays its output
//!
//! A job builds a fixed argument list for its kind, starts exactly one
//! process, forwards every stdout/stderr chunk as a [`StreamEvent`] and
//! finishes with a single terminal event carrying the exit code and the
//! normalized output path.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::FfmpegConfig;
use crate::error::{RelayError, Result};
use crate::event::StreamEvent;
use crate::storage::StoredUpload;

const READ_CHUNK_SIZE: usize = 8192;

/// Kind of extraction plus its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    /// Extract the audio track at the given bitrate
    Audio { bitrate: String },
    /// Extract keyframes at least `min_gap_seconds` apart
    Keyframes { min_gap_seconds: f64 },
}

impl JobKind {
    /// Audio job from an optional raw bitrate parameter
    pub fn audio(bitrate: Option<&str>, profile: &FfmpegConfig) -> Result<Self> {
        let bitrate = match bitrate.map(str::trim).filter(|b| !b.is_empty()) {
            Some(raw) => parse_bitrate(raw)?,
            None => profile.audio.default_bitrate.clone(),
        };
        Ok(JobKind::Audio { bitrate })
    }

    /// Keyframe job from an optional raw gap parameter
    pub fn keyframes(gap: Option<&str>, profile: &FfmpegConfig) -> Result<Self> {
        let min_gap_seconds = match gap.map(str::trim).filter(|g| !g.is_empty()) {
            Some(raw) => parse_gap(raw)?,
            None => profile.keyframes.default_gap,
        };
        Ok(JobKind::Keyframes { min_gap_seconds })
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Audio { .. } => "audio",
            JobKind::Keyframes { .. } => "keyframes",
        }
    }
}

/// A stored upload plus the extraction to run on it
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub upload: StoredUpload,
    pub kind: JobKind,
}

impl ProcessRequest {
    /// Build a request; the store yields no upload for a missing or empty payload
    pub fn new(upload: Option<StoredUpload>, kind: JobKind) -> Result<Self> {
        match upload {
            Some(upload) => Ok(Self { upload, kind }),
            None => Err(RelayError::NoFile),
        }
    }
}

fn bitrate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+[kKmM]?$").expect("valid bitrate regex"))
}

fn parse_bitrate(raw: &str) -> Result<String> {
    if bitrate_pattern().is_match(raw) {
        Ok(raw.to_string())
    } else {
        Err(RelayError::InvalidParameter {
            name: "bitrate",
            value: raw.to_string(),
        })
    }
}

fn parse_gap(raw: &str) -> Result<f64> {
    match raw.parse::<f64>() {
        Ok(gap) if gap.is_finite() && gap >= 0.0 => Ok(gap),
        _ => Err(RelayError::InvalidParameter {
            name: "gap",
            value: raw.to_string(),
        }),
    }
}

/// Encoding flags for audio extraction
pub fn audio_args(bitrate: &str, profile: &FfmpegConfig) -> Vec<String> {
    let audio = &profile.audio;
    let mut args = vec![
        "-vn".to_string(),
        "-c:a".to_string(),
        audio.codec.clone(),
        "-b:a".to_string(),
        bitrate.to_string(),
        "-ar".to_string(),
        audio.sample_rate.to_string(),
    ];
    if let Some(channels) = audio.channels {
        args.push("-ac".to_string());
        args.push(channels.to_string());
    }
    args
}

/// Frame selection flags: key frames spaced at least `gap` seconds apart
pub fn keyframe_args(gap: f64, profile: &FfmpegConfig) -> Vec<String> {
    let keyframes = &profile.keyframes;
    let mut filter = format!(
        "select='key*(isnan(prev_selected_t)+gte(t-prev_selected_t,{}))',setpts='PTS-STARTPTS'",
        gap
    );
    if let Some(scale) = &keyframes.scale {
        filter.push_str(",scale=");
        filter.push_str(scale);
    }
    filter.push_str(",showinfo");

    vec![
        "-vf".to_string(),
        filter,
        "-vsync".to_string(),
        "vfr".to_string(),
        "-compression_level".to_string(),
        keyframes.compression_level.to_string(),
    ]
}

/// Output location for a job, next to the uploaded file
pub fn output_path(kind: &JobKind, input: &Path, profile: &FfmpegConfig) -> PathBuf {
    let dir = input.parent().unwrap_or_else(|| Path::new(""));
    match kind {
        JobKind::Audio { .. } => dir.join(&profile.audio.output_name),
        JobKind::Keyframes { .. } => dir.join(&profile.keyframes.output_pattern),
    }
}

/// Full argument list: `-y -i <input> <kind flags> <output>`
pub fn build_args(kind: &JobKind, input: &Path, output: &Path, profile: &FfmpegConfig) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
    ];
    match kind {
        JobKind::Audio { bitrate } => args.extend(audio_args(bitrate, profile)),
        JobKind::Keyframes { min_gap_seconds } => args.extend(keyframe_args(*min_gap_seconds, profile)),
    }
    args.push(output.to_string_lossy().to_string());
    args
}

/// Convert separators to `/` and strip the leading storage root
pub fn normalize_output_path(raw: &str, storage_root: &str) -> String {
    let path = raw.replace('\\', "/");
    let root = storage_root.replace('\\', "/");
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return path;
    }

    match path.strip_prefix(root).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) => rest.to_string(),
        None => path,
    }
}

/// Spawns one external process per request and relays its output
#[derive(Debug, Clone)]
pub struct JobRunner {
    profile: FfmpegConfig,
    limiter: Option<Arc<Semaphore>>,
}

impl JobRunner {
    /// `max_concurrent_jobs == 0` leaves concurrency unbounded
    pub fn new(profile: FfmpegConfig, max_concurrent_jobs: usize) -> Self {
        let limiter = (max_concurrent_jobs > 0).then(|| Arc::new(Semaphore::new(max_concurrent_jobs)));
        Self { profile, limiter }
    }

    pub fn profile(&self) -> &FfmpegConfig {
        &self.profile
    }

    /// Start a job on an already stored input file
    pub async fn start(&self, kind: &JobKind, input: &Path) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        let permit = match &self.limiter {
            Some(limiter) => Some(
                limiter
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| RelayError::Config("job limiter closed".to_string()))?,
            ),
            None => None,
        };

        let output = output_path(kind, input, &self.profile);
        let args = build_args(kind, input, &output, &self.profile);
        let reported = normalize_output_path(&output.to_string_lossy(), &self.profile.storage_root);

        info!(
            "🎬 Starting {} job for {} -> {}",
            kind.name(),
            input.display(),
            reported
        );
        debug!("{} {}", self.profile.binary, args.join(" "));

        let mut command = Command::new(&self.profile.binary);
        command.args(&args);
        spawn_relay(command, reported, permit)
    }
}

/// Spawn `command` and relay its output; the terminal event reports `output`
pub fn relay_process(command: Command, output: impl Into<String>) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
    spawn_relay(command, output.into(), None)
}

fn spawn_relay(
    mut command: Command,
    output: String,
    permit: Option<OwnedSemaphorePermit>,
) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
    let program = command.as_std().get_program().to_string_lossy().to_string();
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|source| RelayError::Spawn {
        program: program.clone(),
        source,
    })?;

    let (tx, rx) = mpsc::unbounded_channel();

    let stdout_task = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(forward(pipe, tx.clone(), |stdout| StreamEvent::Stdout { stdout })));
    let stderr_task = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(forward(pipe, tx.clone(), |stderr| StreamEvent::Stderr { stderr })));

    tokio::spawn(async move {
        // Both pipes must be drained before the terminal event goes out
        for task in [stdout_task, stderr_task].into_iter().flatten() {
            if let Err(e) = task.await {
                warn!("Output relay task failed: {}", e);
            }
        }

        let code = match child.wait().await {
            Ok(status) => status.code().unwrap_or_else(|| {
                warn!("{} terminated without an exit code", program);
                -1
            }),
            Err(e) => {
                warn!("Failed to wait for {}: {}", program, e);
                -1
            }
        };

        if code == 0 {
            info!("✅ {} finished: {}", program, output);
        } else {
            warn!("❌ {} exited with code {}: {}", program, code, output);
        }

        let _ = tx.send(StreamEvent::exit(code, output));
        drop(permit);
    });

    Ok(rx)
}

/// Forward every chunk read from `pipe` as one event
async fn forward<R>(mut pipe: R, tx: mpsc::UnboundedSender<StreamEvent>, wrap: fn(String) -> StreamEvent)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                // A closed receiver means the client went away; keep draining so the process can finish
                let _ = tx.send(wrap(text));
            }
            Err(e) => {
                warn!("Error reading process output: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> FfmpegConfig {
        FfmpegConfig::default()
    }

    #[test]
    fn test_audio_args_default_profile() {
        let args = audio_args("8000", &profile());
        assert_eq!(
            args,
            vec!["-vn", "-c:a", "libopus", "-b:a", "8000", "-ar", "8000", "-ac", "1"]
        );
    }

    #[test]
    fn test_keyframe_args() {
        let args = keyframe_args(2.5, &profile());
        assert_eq!(args[0], "-vf");
        assert_eq!(
            args[1],
            "select='key*(isnan(prev_selected_t)+gte(t-prev_selected_t,2.5))',setpts='PTS-STARTPTS',showinfo"
        );
        assert_eq!(&args[2..], &["-vsync", "vfr", "-compression_level", "10"]);
    }

    #[test]
    fn test_keyframe_args_with_scale() {
        let mut profile = profile();
        profile.keyframes.scale = Some("640:-1".to_string());
        let args = keyframe_args(1.0, &profile);
        assert!(args[1].ends_with(",setpts='PTS-STARTPTS',scale=640:-1,showinfo"));
    }

    #[test]
    fn test_build_args_layout() {
        let input = Path::new("static/uploads/a.mp4/a.mp4");
        let kind = JobKind::Keyframes { min_gap_seconds: 1.0 };
        let output = output_path(&kind, input, &profile());
        assert_eq!(output, PathBuf::from("static/uploads/a.mp4/%04d.jpg"));

        let args = build_args(&kind, input, &output, &profile());
        assert_eq!(&args[..3], &["-y", "-i", "static/uploads/a.mp4/a.mp4"]);
        assert_eq!(args.last().unwrap(), "static/uploads/a.mp4/%04d.jpg");
    }

    #[test]
    fn test_job_kind_parameters() {
        let profile = profile();
        assert_eq!(
            JobKind::audio(None, &profile).unwrap(),
            JobKind::Audio { bitrate: "8000".to_string() }
        );
        assert_eq!(
            JobKind::audio(Some("32k"), &profile).unwrap(),
            JobKind::Audio { bitrate: "32k".to_string() }
        );
        assert!(JobKind::audio(Some("8000,showinfo"), &profile).is_err());

        assert_eq!(
            JobKind::keyframes(Some("0.5"), &profile).unwrap(),
            JobKind::Keyframes { min_gap_seconds: 0.5 }
        );
        assert_eq!(
            JobKind::keyframes(Some(""), &profile).unwrap(),
            JobKind::Keyframes { min_gap_seconds: 1.0 }
        );
        assert!(JobKind::keyframes(Some("-1"), &profile).is_err());
        assert!(JobKind::keyframes(Some("1)+1"), &profile).is_err());
    }

    #[test]
    fn test_request_requires_file() {
        let kind = JobKind::Audio { bitrate: "8000".to_string() };
        assert!(matches!(ProcessRequest::new(None, kind.clone()), Err(RelayError::NoFile)));

        let upload = StoredUpload {
            file_name: "a.mp4".to_string(),
            path: PathBuf::from("static/uploads/a.mp4/a.mp4"),
            size: 1,
        };
        let request = ProcessRequest::new(Some(upload.clone()), kind).unwrap();
        assert_eq!(request.upload, upload);
    }

    #[test]
    fn test_normalize_output_path() {
        assert_eq!(
            normalize_output_path("static\\uploads\\x.mp4\\audio.opus", "static"),
            "uploads/x.mp4/audio.opus"
        );
        assert_eq!(
            normalize_output_path("static\\uploads\\x.mp4\\%04d.jpg", "static"),
            "uploads/x.mp4/%04d.jpg"
        );
        assert_eq!(
            normalize_output_path("static/uploads/x/audio.opus", "static/"),
            "uploads/x/audio.opus"
        );
        // Only a whole leading segment is stripped
        assert_eq!(
            normalize_output_path("staticfiles/uploads/x/audio.opus", "static"),
            "staticfiles/uploads/x/audio.opus"
        );
        assert_eq!(normalize_output_path("uploads/x/a.opus", ""), "uploads/x/a.opus");
    }

    #[cfg(unix)]
    async fn collect(mut rx: mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_relay_orders_streams_and_ends_with_exit() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo one; echo two 1>&2; echo three; exit 3"]);

        let events = collect(relay_process(command, "uploads/x/audio.opus").unwrap()).await;

        let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(events.last().unwrap(), &StreamEvent::exit(3, "uploads/x/audio.opus"));

        let stdout: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Stdout { stdout } => Some(stdout.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(stdout, "one\nthree\n");

        let stderr: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Stderr { stderr } => Some(stderr.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(stderr, "two\n");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let command = Command::new("/nonexistent/vidscribe-test-binary");
        let err = relay_process(command, "x").unwrap_err();
        assert!(matches!(err, RelayError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_limiter_serializes_jobs() {
        let mut profile = profile();
        profile.binary = "true".to_string();
        let runner = JobRunner::new(profile, 1);

        let input = Path::new("static/uploads/a.mp4/a.mp4");
        let kind = JobKind::Audio { bitrate: "8000".to_string() };
        let first = runner.start(&kind, input).await.unwrap();
        let events = collect(first).await;
        assert_eq!(events.last().unwrap(), &StreamEvent::exit(0, "uploads/a.mp4/audio.opus"));

        // The permit was released with the first terminal event
        let second = runner.start(&kind, input).await.unwrap();
        assert!(collect(second).await.last().unwrap().is_terminal());
    }
}
