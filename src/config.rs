use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the vidscribe server and client
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Upload storage layout
    pub storage: StorageConfig,

    /// External media tool settings
    pub ffmpeg: FfmpegConfig,

    /// Speech-to-text service settings
    pub transcription: TranscriptionConfig,

    /// Image captioning service settings
    pub captioning: CaptioningConfig,

    /// Settings for the `process` client
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Listen port
    pub port: u16,

    /// Maximum simultaneous ffmpeg processes (0 = no limit)
    pub max_concurrent_jobs: usize,

    /// Maximum accepted request body size in bytes
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory served as static content; stripped from reported output paths
    pub static_dir: PathBuf,

    /// Upload directory name inside `static_dir`
    pub uploads_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    /// Media tool executable
    pub binary: String,

    /// Audio extraction profile
    pub audio: AudioProfile,

    /// Keyframe extraction profile
    pub keyframes: KeyframeProfile,

    /// Storage root stripped from output paths in terminal events
    #[serde(skip)]
    pub storage_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioProfile {
    /// Audio codec passed to `-c:a`
    pub codec: String,

    /// Bitrate used when the request does not name one
    pub default_bitrate: String,

    /// Output sample rate
    pub sample_rate: u32,

    /// Output channel count (None keeps the source layout)
    pub channels: Option<u32>,

    /// Output file name inside the upload directory
    pub output_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyframeProfile {
    /// Minimum gap between selected frames in seconds
    pub default_gap: f64,

    /// Image compression level
    pub compression_level: u32,

    /// Optional scale filter arguments, e.g. `640:-1`
    pub scale: Option<String>,

    /// printf-style image sequence pattern inside the upload directory
    pub output_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// OpenAI-compatible transcription endpoint
    pub endpoint: String,

    /// Bearer token
    pub api_key: Option<String>,

    /// Model to use for transcription
    pub model: String,

    /// Language hint
    pub language: Option<String>,

    /// Request timeout (seconds)
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptioningConfig {
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,

    /// Bearer token
    pub api_key: Option<String>,

    /// Vision-capable model
    pub model: String,

    /// Instruction sent alongside each keyframe
    pub prompt: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Request timeout (seconds)
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of a running vidscribe server
    pub server_url: String,

    /// Where `process` writes its session exports
    pub output_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_concurrent_jobs: 0,
            max_upload_bytes: 2 * 1024 * 1024 * 1024, // 2GB
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("static"),
            uploads_dir: "uploads".to_string(),
        }
    }
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            audio: AudioProfile::default(),
            keyframes: KeyframeProfile::default(),
            storage_root: "static".to_string(),
        }
    }
}

impl Default for AudioProfile {
    fn default() -> Self {
        Self {
            codec: "libopus".to_string(),
            default_bitrate: "8000".to_string(),
            sample_rate: 8000,
            channels: Some(1),
            output_name: "audio.opus".to_string(),
        }
    }
}

impl Default for KeyframeProfile {
    fn default() -> Self {
        Self {
            default_gap: 1.0,
            compression_level: 10,
            scale: None,
            output_pattern: "%04d.jpg".to_string(),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1/audio/transcriptions".to_string(),
            api_key: None,
            model: "distil-whisper-large-v3-en".to_string(),
            language: Some("en".to_string()),
            timeout: 600,
        }
    }
}

impl Default for CaptioningConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            prompt: "Describe this video frame in one short sentence.".to_string(),
            max_tokens: 120,
            timeout: 120,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".to_string(),
            output_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Load configuration from an explicit file, or from the first default location found
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let config = Self::from_file(path)?;
            return Ok(config.with_env_overrides());
        }

        let config_paths = [
            "vidscribe.toml",
            "config/vidscribe.toml",
            "/etc/vidscribe/config.toml",
        ];

        for path in &config_paths {
            let path = Path::new(path);
            if path.exists() {
                match Self::from_file(path) {
                    Ok(config) => return Ok(config.with_env_overrides()),
                    Err(e) => tracing::warn!("Failed to parse config file {}: {:#}", path.display(), e),
                }
            }
        }

        Ok(Self::default().with_env_overrides())
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: Config = toml::from_str(&config_str)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.sync_storage_root();
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT value: {}", port),
            }
        }

        if let Ok(host) = std::env::var("VIDSCRIBE_HOST") {
            self.server.host = host;
        }

        if let Ok(dir) = std::env::var("VIDSCRIBE_STATIC_DIR") {
            self.storage.static_dir = PathBuf::from(dir);
        }

        if let Ok(binary) = std::env::var("VIDSCRIBE_FFMPEG") {
            self.ffmpeg.binary = binary;
        }

        if let Ok(jobs) = std::env::var("VIDSCRIBE_MAX_JOBS") {
            match jobs.parse() {
                Ok(jobs) => self.server.max_concurrent_jobs = jobs,
                Err(_) => tracing::warn!("Ignoring invalid VIDSCRIBE_MAX_JOBS value: {}", jobs),
            }
        }

        if let Ok(api_key) = std::env::var("VIDSCRIBE_API_KEY") {
            self.transcription.api_key = Some(api_key.clone());
            self.captioning.api_key = Some(api_key);
        }

        if let Ok(url) = std::env::var("VIDSCRIBE_SERVER_URL") {
            self.client.server_url = url;
        }

        self.sync_storage_root();
        self
    }

    /// Keep the path prefix stripped from output paths in step with `static_dir`
    pub fn sync_storage_root(&mut self) {
        self.ffmpeg.storage_root = self.storage.static_dir.to_string_lossy().to_string();
    }

    /// Directory uploads are written into
    pub fn uploads_root(&self) -> PathBuf {
        self.storage.static_dir.join(&self.storage.uploads_dir)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.ffmpeg.binary.trim().is_empty() {
            return Err(anyhow!("ffmpeg.binary must not be empty"));
        }

        if self.storage.uploads_dir.trim().is_empty() {
            return Err(anyhow!("storage.uploads_dir must not be empty"));
        }

        if !self.ffmpeg.keyframes.output_pattern.contains('%') {
            return Err(anyhow!(
                "ffmpeg.keyframes.output_pattern must contain a printf-style counter, got {}",
                self.ffmpeg.keyframes.output_pattern
            ));
        }

        if !self.ffmpeg.keyframes.default_gap.is_finite() || self.ffmpeg.keyframes.default_gap < 0.0 {
            return Err(anyhow!("ffmpeg.keyframes.default_gap must be a non-negative number"));
        }

        if self.ffmpeg.audio.sample_rate == 0 {
            return Err(anyhow!("ffmpeg.audio.sample_rate must be greater than 0"));
        }

        if self.server.max_upload_bytes == 0 {
            return Err(anyhow!("server.max_upload_bytes must be greater than 0"));
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "vidscribe configuration:\n\
            - Listen: {}:{}\n\
            - Static dir: {}\n\
            - Uploads: {}\n\
            - ffmpeg: {}\n\
            - Max jobs: {}\n\
            - Audio: {} @ {} ({} Hz)\n\
            - Keyframe gap: {}s",
            self.server.host,
            self.server.port,
            self.storage.static_dir.display(),
            self.uploads_root().display(),
            self.ffmpeg.binary,
            if self.server.max_concurrent_jobs == 0 {
                "unlimited".to_string()
            } else {
                self.server.max_concurrent_jobs.to_string()
            },
            self.ffmpeg.audio.codec,
            self.ffmpeg.audio.default_bitrate,
            self.ffmpeg.audio.sample_rate,
            self.ffmpeg.keyframes.default_gap
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_static_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.static_dir = dir;
        self
    }

    pub fn with_ffmpeg_binary(mut self, binary: impl Into<String>) -> Self {
        self.config.ffmpeg.binary = binary.into();
        self
    }

    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.config.server.max_concurrent_jobs = jobs;
        self
    }

    pub fn build(mut self) -> Config {
        self.config.sync_storage_root();
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.ffmpeg.audio.default_bitrate, "8000");
        assert_eq!(config.ffmpeg.keyframes.output_pattern, "%04d.jpg");
        assert_eq!(config.ffmpeg.storage_root, "static");
        assert_eq!(config.uploads_root(), PathBuf::from("static/uploads"));
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_port(8080)
            .with_static_dir(PathBuf::from("/srv/media"))
            .with_max_concurrent_jobs(2)
            .build();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.max_concurrent_jobs, 2);
        assert_eq!(config.ffmpeg.storage_root, "/srv/media");
    }

    #[test]
    fn test_invalid_max_jobs_override_is_ignored() {
        let config = ConfigBuilder::new().with_max_concurrent_jobs(3).build();

        std::env::set_var("VIDSCRIBE_MAX_JOBS", "lots");
        let ignored = config.clone().with_env_overrides();
        std::env::set_var("VIDSCRIBE_MAX_JOBS", "2");
        let applied = config.with_env_overrides();
        std::env::remove_var("VIDSCRIBE_MAX_JOBS");

        assert_eq!(ignored.server.max_concurrent_jobs, 3);
        assert_eq!(applied.server.max_concurrent_jobs, 2);
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.ffmpeg.keyframes.output_pattern = "frame.jpg".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vidscribe.toml");
        std::fs::write(
            &path,
            "[server]\nport = 4100\n\n[storage]\nstatic_dir = \"public\"\n\n[ffmpeg.keyframes]\nscale = \"640:-1\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.port, 4100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.ffmpeg.storage_root, "public");
        assert_eq!(config.ffmpeg.keyframes.scale.as_deref(), Some("640:-1"));
        assert_eq!(config.ffmpeg.keyframes.compression_level, 10);
    }
}
