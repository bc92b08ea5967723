use crate::error::StreamError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Number of chunks drained before playback output starts
pub const DEFAULT_WARMUP_CHUNKS: usize = 7;

/// Application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Platform connection settings
    pub server: ServerConfig,

    /// Device identity
    pub device: DeviceConfig,

    /// Stream session behaviour
    pub session: SessionConfig,

    /// Capture and playback format
    pub audio: AudioConfig,

    /// Transport retry policy
    pub retry: RetryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Platform address to connect to
    pub address: String,

    /// Platform port
    pub port: u16,

    /// Name presented during the TLS handshake
    pub server_name: String,

    /// Connection idle timeout
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub idle_timeout: Duration,

    /// Keep-alive interval
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub keep_alive_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Hardware id sent with every message
    pub hardware_id: String,

    /// Specification token; when set the device registers before streaming
    pub specification_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Content type label of the created stream
    pub content_type: String,

    /// How long the recording loop pushes chunks
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub capture_window: Duration,

    /// Chunks drained before playback starts
    pub warmup_chunks: usize,

    /// Maximum chunks held between receive and playback
    pub buffer_capacity: usize,

    /// How long to wait for any acknowledgement or pulled chunk
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub ack_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Interleaved channel count
    pub channels: u16,

    /// Frames captured per chunk
    pub frames_per_chunk: usize,

    /// Frequency of the synthetic capture tone
    pub tone_hz: f32,

    /// Write played audio as raw PCM to this file instead of discarding it
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,

    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub base_delay: Duration,

    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub max_delay: Duration,

    pub backoff_multiplier: f64,

    /// Fraction of the delay randomised in either direction
    pub jitter_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8443,
            server_name: "localhost".to_string(),
            idle_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(5),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            hardware_id: "device_001".to_string(),
            specification_token: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            content_type: common::CONTENT_TYPE_AUDIO_L16.to_string(),
            capture_window: Duration::from_secs(10),
            warmup_chunks: DEFAULT_WARMUP_CHUNKS,
            buffer_capacity: 64,
            ack_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            frames_per_chunk: 4096,
            tone_hz: 440.0,
            output_path: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AudioConfig {
    /// Bytes in one captured chunk of 16-bit PCM
    pub fn chunk_bytes(&self) -> usize {
        self.frames_per_chunk * self.channels as usize * 2
    }

    /// Wall-clock length of one chunk
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames_per_chunk as f64 / self.sample_rate as f64)
    }
}

impl AppConfig {
    pub fn server_addr(&self) -> Result<SocketAddr, StreamError> {
        format!("{}:{}", self.server.address, self.server.port)
            .parse()
            .map_err(|e| StreamError::Configuration {
                message: format!("Invalid server address: {}", e),
            })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.server.address.is_empty() {
            return Err(config_error("Server address cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(config_error("Server port must be greater than 0"));
        }

        if self.device.hardware_id.is_empty() {
            return Err(config_error("Hardware id cannot be empty"));
        }

        if self.session.content_type.is_empty() {
            return Err(config_error("Content type cannot be empty"));
        }

        if self.session.warmup_chunks == 0 {
            return Err(config_error("Warm-up chunk count must be greater than 0"));
        }

        if self.session.buffer_capacity == 0 {
            return Err(config_error("Buffer capacity must be greater than 0"));
        }

        if self.session.ack_timeout.is_zero() {
            return Err(config_error("Acknowledgement timeout must be greater than 0"));
        }

        if self.audio.sample_rate == 0 || self.audio.channels == 0 || self.audio.frames_per_chunk == 0 {
            return Err(config_error("Audio format values must be greater than 0"));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(config_error("Backoff multiplier must be at least 1.0"));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(config_error("Jitter factor must be between 0 and 1"));
        }

        Ok(())
    }
}

fn config_error(message: &str) -> StreamError {
    StreamError::Configuration {
        message: message.to_string(),
    }
}

/// Configuration manager for loading, saving, and validating configurations
pub struct ConfigManager {
    config_path: PathBuf,
    config: AppConfig,
}

impl ConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            config: AppConfig::default(),
        }
    }

    /// Load configuration from file, writing the defaults if it does not exist
    pub async fn load(&mut self) -> Result<(), StreamError> {
        if !self.config_path.exists() {
            self.save().await?;
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| StreamError::Configuration {
                message: format!("Failed to read config file: {}", e),
            })?;

        self.config = toml::from_str(&content).map_err(|e| StreamError::Configuration {
            message: format!("Failed to parse config file: {}", e),
        })?;

        self.config.validate()
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<(), StreamError> {
        let content =
            toml::to_string_pretty(&self.config).map_err(|e| StreamError::Configuration {
                message: format!("Failed to serialize config: {}", e),
            })?;

        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StreamError::Configuration {
                        message: format!("Failed to create config directory: {}", e),
                    })?;
            }
        }

        tokio::fs::write(&self.config_path, content)
            .await
            .map_err(|e| StreamError::Configuration {
                message: format!("Failed to write config file: {}", e),
            })?;

        Ok(())
    }

    pub fn get_config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    pub fn into_config(self) -> AppConfig {
        self.config
    }
}

/// Environment-based configuration override
pub struct EnvConfigOverride;

impl EnvConfigOverride {
    /// Apply `DEVICE_STREAMER_*` environment variables to the configuration
    pub fn apply_overrides(config: &mut AppConfig) {
        Self::apply_from(config, |key| std::env::var(key).ok());
    }

    fn apply_from<F>(config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("DEVICE_STREAMER_SERVER_ADDRESS") {
            config.server.address = addr;
        }
        if let Some(port) = lookup("DEVICE_STREAMER_SERVER_PORT").and_then(|p| p.parse().ok()) {
            config.server.port = port;
        }
        if let Some(id) = lookup("DEVICE_STREAMER_HARDWARE_ID") {
            config.device.hardware_id = id;
        }
        if let Some(token) = lookup("DEVICE_STREAMER_SPECIFICATION_TOKEN") {
            config.device.specification_token = Some(token);
        }
        if let Some(secs) = lookup("DEVICE_STREAMER_CAPTURE_SECS").and_then(|s| s.parse().ok()) {
            config.session.capture_window = Duration::from_secs(secs);
        }
        if let Some(warmup) = lookup("DEVICE_STREAMER_WARMUP_CHUNKS").and_then(|w| w.parse().ok()) {
            config.session.warmup_chunks = warmup;
        }
        if let Some(level) = lookup("DEVICE_STREAMER_LOG_LEVEL") {
            config.logging.level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.warmup_chunks, 7);
        assert_eq!(config.session.content_type, "audio/L16");
        assert_eq!(config.server_addr().unwrap().port(), 8443);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.session.buffer_capacity = 0;
        assert!(matches!(config.validate(), Err(StreamError::Configuration { .. })));

        let mut config = AppConfig::default();
        config.session.warmup_chunks = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retry.jitter_factor = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.address = "not an address".to_string();
        assert!(config.server_addr().is_err());
    }

    #[test]
    fn test_chunk_geometry() {
        let audio = AudioConfig {
            sample_rate: 8_000,
            channels: 2,
            frames_per_chunk: 800,
            ..AudioConfig::default()
        };
        assert_eq!(audio.chunk_bytes(), 3200);
        assert_eq!(audio.chunk_duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DEVICE_STREAMER_SERVER_ADDRESS", "10.0.0.5"),
            ("DEVICE_STREAMER_SERVER_PORT", "9000"),
            ("DEVICE_STREAMER_SPECIFICATION_TOKEN", "spec-1"),
            ("DEVICE_STREAMER_CAPTURE_SECS", "3"),
            ("DEVICE_STREAMER_WARMUP_CHUNKS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        EnvConfigOverride::apply_from(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.address, "10.0.0.5");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.device.specification_token.as_deref(), Some("spec-1"));
        assert_eq!(config.session.capture_window, Duration::from_secs(3));
        // Unparseable values leave the default in place
        assert_eq!(config.session.warmup_chunks, DEFAULT_WARMUP_CHUNKS);
    }

    #[tokio::test]
    async fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamer.toml");

        // Missing file is created with defaults
        let mut manager = ConfigManager::new(path.clone());
        manager.load().await.unwrap();
        assert!(path.exists());

        manager.get_config_mut().session.capture_window = Duration::from_millis(2500);
        manager.get_config_mut().device.specification_token = Some("spec-42".to_string());
        manager.save().await.unwrap();

        let mut reloaded = ConfigManager::new(path);
        reloaded.load().await.unwrap();
        let config = reloaded.into_config();
        assert_eq!(config.session.capture_window, Duration::from_millis(2500));
        assert_eq!(config.device.specification_token.as_deref(), Some("spec-42"));
    }

    #[tokio::test]
    async fn test_invalid_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        tokio::fs::write(&path, "server = 12").await.unwrap();

        let mut manager = ConfigManager::new(path);
        assert!(matches!(manager.load().await, Err(StreamError::Configuration { .. })));
    }
}
