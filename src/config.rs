//! Configuration for the EmotiPlay agent.

use crate::capture::CaptureConfig;
use crate::core::HistoryConfig;
use crate::stream::StreamConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default base URL of the backend HTTP API.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Link to the classification service
    pub stream: StreamConfig,

    /// Camera settings
    pub capture: CaptureConfig,

    /// History retention and dedup
    pub history: HistoryConfig,

    /// Music actuation
    pub playlist: PlaylistConfig,

    /// Path for exporting session summaries
    pub export_path: PathBuf,

    /// Path for storing telemetry
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("emotiplay-agent");

        Self {
            stream: StreamConfig::default(),
            capture: CaptureConfig::default(),
            history: HistoryConfig::default(),
            playlist: PlaylistConfig::default(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location, then apply environment
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, falling back to defaults when it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("emotiplay-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Apply `EMOTIPLAY_*` overrides read through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var("EMOTIPLAY_STREAM_URL") {
            self.stream.url = url;
        }
        if let Some(url) = var("EMOTIPLAY_API_URL") {
            self.playlist.base_url = url;
        }
        if let Some(ms) = var("EMOTIPLAY_SEND_INTERVAL_MS") {
            self.stream.send_interval = Duration::from_millis(parse_env("EMOTIPLAY_SEND_INTERVAL_MS", &ms)?);
        }
        if let Some(capacity) = var("EMOTIPLAY_HISTORY_CAPACITY") {
            self.history.capacity = parse_env("EMOTIPLAY_HISTORY_CAPACITY", &capacity)?;
        }
        Ok(())
    }

    /// Reject settings the agent cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history.capacity == 0 {
            return Err(ConfigError::Invalid("history.capacity must be at least 1".into()));
        }
        if self.stream.send_interval.is_zero() {
            return Err(ConfigError::Invalid("stream.send_interval must be positive".into()));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(ConfigError::Invalid("capture.jpeg_quality must be within 1..=100".into()));
        }
        if self.stream.backoff.base > self.stream.backoff.cap {
            return Err(ConfigError::Invalid("stream.backoff.base exceeds stream.backoff.cap".into()));
        }
        if self.stream.url.is_empty() {
            return Err(ConfigError::Invalid("stream.url is empty".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}: cannot parse {value:?}")))
}

/// Settings for the music actuation API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    pub enabled: bool,
    pub base_url: String,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
