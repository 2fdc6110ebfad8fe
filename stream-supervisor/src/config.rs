use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credentials::Credentials;
use crate::error::ConfigError;
use crate::quality::QualityProfile;

/// Supervisor configuration.
///
/// The health thresholds are tunable policy; the defaults match the
/// values the live-view page was tuned against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Root directory for per-stream output (`<root>/<id>/<manifest>`)
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// URL prefix under which `output_root` is served
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,

    /// Transcoder executable (default: ffmpeg on PATH)
    #[serde(default = "default_transcoder_path")]
    pub transcoder_path: PathBuf,
    /// Arguments placed before the generated command line, for wrappers
    /// such as `nice -n 10 ffmpeg`
    #[serde(default)]
    pub transcoder_prefix_args: Vec<String>,

    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Manifest older than this counts as a strike
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    /// Strikes tolerated before a stale stream is recovered
    #[serde(default = "default_max_health_strikes")]
    pub max_health_strikes: u32,
    /// How long a new stream may run without producing a manifest
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    /// Wait after spawn before declaring the launch successful
    #[serde(default = "default_spawn_grace_ms")]
    pub spawn_grace_ms: u64,
    /// Wait after SIGTERM before escalating to SIGKILL
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Connect/read timeout for the source connection
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    #[serde(default = "default_chunk_duration_secs")]
    pub chunk_duration_secs: u32,
    #[serde(default = "default_retained_chunks")]
    pub retained_chunks: u32,
    /// Stderr lines kept per stream
    #[serde(default = "default_diagnostic_lines")]
    pub diagnostic_lines: usize,

    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,
    #[serde(default = "default_segment_max_age_secs")]
    pub segment_max_age_secs: u64,

    /// Streams started by the `run` command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<StreamSpec>,
}

/// A stream declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSpec {
    pub id: String,
    pub source_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub quality: QualityProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate_kbps: Option<u32>,
}

impl StreamSpec {
    /// Pass-through stream with no credentials
    pub fn new(id: impl Into<String>, source_uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_uri: source_uri.into(),
            credentials: None,
            quality: QualityProfile::Auto,
            max_bitrate_kbps: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_quality(mut self, quality: QualityProfile) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_max_bitrate(mut self, kbps: u32) -> Self {
        self.max_bitrate_kbps = Some(kbps);
        self
    }
}

fn default_output_root() -> PathBuf {
    PathBuf::from("streams")
}

fn default_public_prefix() -> String {
    "/streams".to_string()
}

fn default_manifest_name() -> String {
    "stream.m3u8".to_string()
}

fn default_transcoder_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_check_interval_ms() -> u64 {
    10_000
}

fn default_stale_after_ms() -> u64 {
    3_000
}

fn default_max_health_strikes() -> u32 {
    2
}

fn default_startup_grace_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_restart_delay_ms() -> u64 {
    2_000
}

fn default_spawn_grace_ms() -> u64 {
    500
}

fn default_stop_timeout_ms() -> u64 {
    3_000
}

fn default_source_timeout_ms() -> u64 {
    5_000
}

fn default_chunk_duration_secs() -> u32 {
    2
}

fn default_retained_chunks() -> u32 {
    10
}

fn default_diagnostic_lines() -> usize {
    50
}

fn default_janitor_interval_secs() -> u64 {
    3600
}

fn default_segment_max_age_secs() -> u64 {
    24 * 3600
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::new(default_output_root())
    }
}

impl SupervisorConfig {
    /// Create a config with defaults, writing output under `output_root`
    pub fn new(output_root: PathBuf) -> Self {
        Self {
            output_root,
            public_prefix: default_public_prefix(),
            manifest_name: default_manifest_name(),
            transcoder_path: default_transcoder_path(),
            transcoder_prefix_args: Vec::new(),
            check_interval_ms: default_check_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
            max_health_strikes: default_max_health_strikes(),
            startup_grace_ms: default_startup_grace_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            restart_delay_ms: default_restart_delay_ms(),
            spawn_grace_ms: default_spawn_grace_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            source_timeout_ms: default_source_timeout_ms(),
            chunk_duration_secs: default_chunk_duration_secs(),
            retained_chunks: default_retained_chunks(),
            diagnostic_lines: default_diagnostic_lines(),
            janitor_interval_secs: default_janitor_interval_secs(),
            segment_max_age_secs: default_segment_max_age_secs(),
            streams: Vec::new(),
        }
    }

    /// Default config location: `~/.config/stream-supervisor/supervisor.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join("stream-supervisor").join("supervisor.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load config from a TOML file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manifest_name.is_empty()
            || self.manifest_name.contains('/')
            || self.manifest_name.contains('\\')
        {
            return Err(ConfigError::Invalid(format!(
                "manifest_name must be a plain file name, got {:?}",
                self.manifest_name
            )));
        }
        if self.check_interval_ms == 0 {
            return Err(ConfigError::Invalid("check_interval_ms must be > 0".into()));
        }
        if self.janitor_interval_secs == 0 {
            return Err(ConfigError::Invalid("janitor_interval_secs must be > 0".into()));
        }
        if self.chunk_duration_secs == 0 {
            return Err(ConfigError::Invalid("chunk_duration_secs must be > 0".into()));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn spawn_grace(&self) -> Duration {
        Duration::from_millis(self.spawn_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }

    pub fn segment_max_age(&self) -> Duration {
        Duration::from_secs(self.segment_max_age_secs)
    }

    /// Output directory for one stream
    pub fn stream_dir(&self, id: &str) -> PathBuf {
        self.output_root.join(id)
    }

    /// Absolute manifest path for one stream
    pub fn manifest_path(&self, id: &str) -> PathBuf {
        self.stream_dir(id).join(&self.manifest_name)
    }

    /// Manifest path relative to `output_root`
    pub fn relative_manifest(&self, id: &str) -> String {
        format!("{}/{}", id, self.manifest_name)
    }

    /// Public URL of a stream's manifest
    pub fn playlist_url(&self, id: &str) -> String {
        format!(
            "{}/{}",
            self.public_prefix.trim_end_matches('/'),
            self.relative_manifest(id)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.check_interval(), Duration::from_secs(10));
        assert_eq!(config.stale_after(), Duration::from_secs(3));
        assert_eq!(config.max_health_strikes, 2);
        assert_eq!(config.startup_grace(), Duration::from_secs(30));
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.restart_delay(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_paths() {
        let config = SupervisorConfig::new(PathBuf::from("/var/hls"));
        assert_eq!(
            config.manifest_path("cam1_p0"),
            PathBuf::from("/var/hls/cam1_p0/stream.m3u8")
        );
        assert_eq!(config.playlist_url("cam1_p0"), "/streams/cam1_p0/stream.m3u8");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SupervisorConfig = toml::from_str(
            r#"
            output_root = "/tmp/out"
            stale_after_ms = 5000

            [[streams]]
            id = "cam1"
            source_uri = "rtsp://10.0.0.5/ch1"
            quality = "low"
            "#,
        )
        .unwrap();

        assert_eq!(config.output_root, PathBuf::from("/tmp/out"));
        assert_eq!(config.stale_after_ms, 5000);
        assert_eq!(config.check_interval_ms, 10_000);
        assert_eq!(config.streams.len(), 1);
        assert_eq!(config.streams[0].quality, QualityProfile::Low);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("supervisor.toml");

        let mut config = SupervisorConfig::new(dir.path().join("out"));
        config.max_reconnect_attempts = 5;
        config.save_to(&path).unwrap();

        let loaded = SupervisorConfig::load_from(&path).unwrap();
        assert_eq!(loaded.max_reconnect_attempts, 5);
        assert_eq!(loaded.output_root, dir.path().join("out"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = SupervisorConfig::load_from(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_validate_rejects_bad_manifest_name() {
        let mut config = SupervisorConfig::default();
        config.manifest_name = "../escape.m3u8".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
