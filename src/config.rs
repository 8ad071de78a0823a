//! Configuration management for the emotion streaming server

use crate::constants::{
    DEFAULT_BIND_ADDRESS, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH, DEFAULT_JPEG_QUALITY, DEFAULT_PATTERN_FPS,
    DEFAULT_READ_TIMEOUT_MS, DEFAULT_SKIP_INTERVAL,
};
use crate::pipeline::PipelineSettings;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera selection
    pub camera: CameraConfig,

    /// Capture loop behaviour
    pub pipeline: PipelineConfig,

    /// Model file paths
    pub models: ModelConfig,

    /// Overlay and encoding
    pub display: DisplayConfig,

    /// HTTP transport
    pub server: ServerConfig,
}

/// Frame source kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Physical webcam through `OpenCV`
    #[default]
    Camera,
    /// Synthetic moving gradient
    Pattern,
}

impl std::str::FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "camera" => Ok(Self::Camera),
            "pattern" => Ok(Self::Pattern),
            other => Err(Error::InvalidInput(format!("Unknown source: {other}"))),
        }
    }
}

/// Camera configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Where frames come from
    pub source: SourceKind,

    /// Webcam device index
    pub device: i32,

    /// Requested frame width
    pub width: u32,

    /// Requested frame height
    pub height: u32,

    /// Upper bound on one frame pull, in milliseconds
    pub read_timeout_ms: u64,

    /// Frame rate of the pattern source
    pub pattern_fps: u32,
}

/// Capture loop configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Cycles between two inference runs
    pub skip_interval: u32,

    /// Flip frames horizontally
    pub mirror: bool,
}

/// Model file paths configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Haar cascade XML for face detection
    pub face_cascade: PathBuf,

    /// ONNX emotion classifier
    pub emotion_classifier: PathBuf,
}

/// Display configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,

    /// TrueType font for overlay text; shapes only without one
    pub font: Option<PathBuf>,

    /// Draw the per-emotion side panel
    pub show_panel: bool,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,

    /// Start capturing as soon as the server is up
    pub autostart: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Camera,
            device: 0,
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            pattern_fps: DEFAULT_PATTERN_FPS,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            skip_interval: DEFAULT_SKIP_INTERVAL,
            mirror: true,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            face_cascade: PathBuf::from("models/haarcascade_frontalface_default.xml"),
            emotion_classifier: PathBuf::from("models/emotion-ferplus.onnx"),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            font: None,
            show_panel: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND_ADDRESS.to_string(),
            autostart: true,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the text does not parse
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Capture loop settings derived from this configuration
    #[must_use]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            skip_interval: self.pipeline.skip_interval,
            mirror: self.pipeline.mirror,
            read_timeout: Duration::from_millis(self.camera.read_timeout_ms),
            jpeg_quality: self.display.jpeg_quality,
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] naming the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.skip_interval == 0 {
            return Err(Error::ConfigError("Skip interval must be greater than 0".to_string()));
        }

        if !(1..=100).contains(&self.display.jpeg_quality) {
            return Err(Error::ConfigError("JPEG quality must be between 1 and 100".to_string()));
        }

        if self.camera.read_timeout_ms == 0 {
            return Err(Error::ConfigError("Read timeout must be greater than 0".to_string()));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(Error::ConfigError("Frame dimensions must be non-zero".to_string()));
        }
        if self.camera.pattern_fps == 0 {
            return Err(Error::ConfigError("Pattern FPS must be greater than 0".to_string()));
        }
        if self.camera.device < 0 {
            return Err(Error::ConfigError(format!(
                "Camera device index must be non-negative, got {}",
                self.camera.device
            )));
        }

        if let Some(font) = &self.display.font {
            if !font.exists() {
                return Err(Error::ConfigError(format!("Font not found: {}", font.display())));
            }
        }

        if self.server.bind.trim().is_empty() {
            return Err(Error::ConfigError("Bind address must not be empty".to_string()));
        }

        Ok(())
    }

    /// Whether both model files are present on disk
    #[must_use]
    pub fn models_available(&self) -> bool {
        self.models.face_cascade.exists() && self.models.emotion_classifier.exists()
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Emotion Stream Configuration

# Frame source
camera:
  source: camera        # camera | pattern
  device: 0
  width: 1280
  height: 720
  read_timeout_ms: 2000
  pattern_fps: 30

# Capture loop
pipeline:
  skip_interval: 3      # run inference on every 3rd frame
  mirror: true

# Model paths
models:
  face_cascade: "models/haarcascade_frontalface_default.xml"
  emotion_classifier: "models/emotion-ferplus.onnx"

# Overlay and encoding
display:
  jpeg_quality: 85
  font: null
  show_panel: true

# HTTP server
server:
  bind: "0.0.0.0:5000"
  autostart: true
"#;
