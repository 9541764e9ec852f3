use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::buffer::DeliveryMode;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_density_dpi")]
    pub density_dpi: u32,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Sub-rectangle to encode. Absent means the full frame.
    #[serde(default)]
    pub crop: Option<CropConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CropConfig {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub delivery: DeliveryMode,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// How `/video_feed` frames its body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// `multipart/x-mixed-replace` with one part per frame.
    #[default]
    Mjpeg,
    /// Payloads concatenated with no per-frame framing.
    Raw,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_video_port")]
    pub port: u16,
    #[serde(default)]
    pub mode: StreamMode,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_raw_content_type")]
    pub raw_content_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_snapshot_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            density_dpi: default_density_dpi(),
            tick_interval_ms: default_tick_interval_ms(),
            crop: None,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            delivery: DeliveryMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_video_port(),
            mode: StreamMode::default(),
            jpeg_quality: default_jpeg_quality(),
            raw_content_type: default_raw_content_type(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_snapshot_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CaptureConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl BufferConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer.capacity == 0 {
            return Err(ConfigError::Invalid("buffer.capacity must be at least 1".into()));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::Invalid(
                "capture.width and capture.height must be positive".into(),
            ));
        }
        if self.capture.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("capture.tick_interval_ms must be positive".into()));
        }
        if self.buffer.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("buffer.poll_interval_ms must be positive".into()));
        }
        if !(1..=100).contains(&self.video.jpeg_quality) {
            return Err(ConfigError::Invalid("video.jpeg_quality must be within 1..=100".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_density_dpi() -> u32 {
    320
}
fn default_tick_interval_ms() -> u64 {
    10
}
fn default_capacity() -> usize {
    10
}
fn default_poll_interval_ms() -> u64 {
    33
}
fn default_enabled() -> bool {
    true
}
fn default_video_port() -> u16 {
    8888
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_raw_content_type() -> String {
    "video/h264".into()
}
fn default_snapshot_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.capture.tick_interval(), Duration::from_millis(10));
        assert_eq!(config.buffer.capacity, 10);
        assert_eq!(config.buffer.delivery, DeliveryMode::Broadcast);
        assert_eq!(config.buffer.poll_interval(), Duration::from_millis(33));
        assert_eq!(config.video.port, 8888);
        assert_eq!(config.video.mode, StreamMode::Mjpeg);
        assert_eq!(config.video.jpeg_quality, 80);
        assert_eq!(config.snapshot.port, 8080);
        assert_eq!(config.logging.level, "info");
        assert!(config.capture.crop.is_none());
    }

    #[test]
    fn parses_sections() {
        let config = Config::parse(
            r#"
            [capture]
            width = 640
            height = 480
            crop = { x = 0, y = 100, width = 640, height = 70 }

            [buffer]
            capacity = 4
            delivery = "shared"

            [video]
            mode = "raw"
            raw_content_type = "video/mp4"

            [snapshot]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.width, 640);
        assert_eq!(
            config.capture.crop,
            Some(CropConfig { x: 0, y: 100, width: 640, height: 70 })
        );
        assert_eq!(config.buffer.capacity, 4);
        assert_eq!(config.buffer.delivery, DeliveryMode::Shared);
        assert_eq!(config.video.mode, StreamMode::Raw);
        assert_eq!(config.video.raw_content_type, "video/mp4");
        assert!(!config.snapshot.enabled);
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = Config::parse("[buffer]\ncapacity = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_intervals() {
        for content in [
            "[buffer]\npoll_interval_ms = 0\n",
            "[capture]\ntick_interval_ms = 0\n",
        ] {
            let err = Config::parse(content).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{content}");
        }
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = Config::parse("[video]\nmode = \"webm\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
