use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use crate::validate_enum;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub window: WindowSettings,
}

/// General daemon settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Ingest socket override (defaults to `$XDG_RUNTIME_DIR/projector.sock`)
    #[serde(default)]
    pub socket_path: Option<String>,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            socket_path: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Decode/render element choices
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineSettings {
    #[serde(default = "default_decoder")]
    pub decoder: String,

    #[serde(default = "default_converter")]
    pub converter: String,

    #[serde(default = "default_video_sink")]
    pub video_sink: String,

    #[serde(default = "default_true")]
    pub queue: bool,

    #[serde(default = "default_config_interval")]
    pub config_interval: i32,

    #[serde(default)]
    pub sync: bool,

    #[serde(default)]
    pub source_timestamps: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            decoder: default_decoder(),
            converter: default_converter(),
            video_sink: default_video_sink(),
            queue: true,
            config_interval: default_config_interval(),
            sync: false,
            source_timestamps: false,
        }
    }
}

fn default_decoder() -> String {
    "avdec_h264".to_string()
}
fn default_converter() -> String {
    "videoconvert".to_string()
}
fn default_video_sink() -> String {
    "autovideosink".to_string()
}
fn default_true() -> bool {
    true
}
fn default_config_interval() -> i32 {
    -1
}

/// Window placement for the standalone surface host
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WindowSettings {
    #[serde(default)]
    pub x: Option<i32>,

    #[serde(default)]
    pub y: Option<i32>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    /// Native window to embed the video into
    #[serde(default)]
    pub handle: Option<u64>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        config.validate()?;

        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("projector");

        Ok(config_dir.join("config.toml"))
    }

    /// Resolve the ingest socket path, expanding `~`
    pub fn socket_path(&self) -> PathBuf {
        match self.general.socket_path {
            Some(ref path) => PathBuf::from(shellexpand::tilde(path).to_string()),
            None => common::get_socket_path(),
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        self.validate_log_level(&self.general.log_level)?;

        self.validate_element("decoder", &self.pipeline.decoder)?;
        self.validate_element("converter", &self.pipeline.converter)?;
        self.validate_element("video_sink", &self.pipeline.video_sink)?;

        if self.pipeline.config_interval < -1 {
            anyhow::bail!(
                "Invalid config_interval: {} (must be -1 or greater)",
                self.pipeline.config_interval
            );
        }

        if self.window.width == Some(0) || self.window.height == Some(0) {
            anyhow::bail!("Window width and height must be non-zero");
        }

        Ok(())
    }

    fn validate_log_level(&self, level: &str) -> Result<()> {
        validate_enum!(level, "trace", "debug", "info", "warn", "error")
    }

    fn validate_element(&self, key: &str, element: &str) -> Result<()> {
        let element = element.trim();
        if element.is_empty() {
            anyhow::bail!("Pipeline {} must not be empty", key);
        }
        if element.contains('!') {
            anyhow::bail!(
                "Pipeline {} must name a single element, got: {}",
                key,
                element
            );
        }
        Ok(())
    }
}
