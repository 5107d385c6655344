//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value parsed but is outside its allowed range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Raster format a HEIC/HEIF source is converted into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    #[serde(alias = "jpg", alias = "image/jpeg")]
    Jpeg,
    #[serde(alias = "image/png")]
    Png,
    #[serde(alias = "image/webp")]
    Webp,
}

impl TargetFormat {
    /// MIME type of the produced bytes
    pub fn mime_type(self) -> &'static str {
        match self {
            TargetFormat::Jpeg => "image/jpeg",
            TargetFormat::Png => "image/png",
            TargetFormat::Webp => "image/webp",
        }
    }

    /// File extension appended to output names, including the leading dot
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Jpeg => ".jpg",
            TargetFormat::Png => ".png",
            TargetFormat::Webp => ".webp",
        }
    }
}

impl Default for TargetFormat {
    fn default() -> Self {
        Self::Jpeg
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetFormat::Jpeg => write!(f, "jpeg"),
            TargetFormat::Png => write!(f, "png"),
            TargetFormat::Webp => write!(f, "webp"),
        }
    }
}

impl FromStr for TargetFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "jpeg" | "jpg" | "image/jpeg" => Ok(TargetFormat::Jpeg),
            "png" | "image/png" => Ok(TargetFormat::Png),
            "webp" | "image/webp" => Ok(TargetFormat::Webp),
            other => Err(ConfigError::Invalid(format!("unknown target format '{}'", other))),
        }
    }
}

/// Device class pin; `Auto` probes the host at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClassSetting {
    Auto,
    Constrained,
    Standard,
}

impl Default for DeviceClassSetting {
    fn default() -> Self {
        Self::Auto
    }
}

impl FromStr for DeviceClassSetting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(DeviceClassSetting::Auto),
            "constrained" | "mobile" => Ok(DeviceClassSetting::Constrained),
            "standard" | "desktop" => Ok(DeviceClassSetting::Standard),
            other => Err(ConfigError::Invalid(format!("unknown device class '{}'", other))),
        }
    }
}

/// Execution backend behind the worker contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerBackend {
    /// One child process per conversion
    Process,
    /// Blocking thread pool inside the current process
    InProcess,
}

impl Default for WorkerBackend {
    fn default() -> Self {
        Self::Process
    }
}

impl FromStr for WorkerBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "process" => Ok(WorkerBackend::Process),
            "in_process" | "inprocess" | "thread" => Ok(WorkerBackend::InProcess),
            other => Err(ConfigError::Invalid(format!("unknown worker backend '{}'", other))),
        }
    }
}

/// Device-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeviceConfig {
    #[serde(default)]
    pub class: DeviceClassSetting,
}

/// Scheduler tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PipelineConfig {
    /// Maximum simultaneous conversions (0 = derive from device class)
    #[serde(default)]
    pub max_concurrent_conversions: u32,
    /// Per-conversion deadline in seconds (0 = derive from device class)
    #[serde(default)]
    pub conversion_timeout_secs: u64,
}

/// Default output settings for submitted batches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionConfig {
    #[serde(default)]
    pub format: TargetFormat,
    /// Encoder quality in (0, 1]
    #[serde(default = "default_quality")]
    pub quality: f32,
}

fn default_quality() -> f32 {
    0.8
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            format: TargetFormat::default(),
            quality: default_quality(),
        }
    }
}

/// Metadata transplant configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetadataConfig {
    /// Copy capture metadata into JPEG outputs (default true)
    #[serde(default = "default_preserve")]
    pub preserve: bool,
}

fn default_preserve() -> bool {
    true
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            preserve: default_preserve(),
        }
    }
}

/// Worker backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkerConfig {
    #[serde(default)]
    pub backend: WorkerBackend,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - HEIC_BATCH_DEVICE_CLASS -> device.class
    /// - HEIC_BATCH_MAX_CONCURRENT -> pipeline.max_concurrent_conversions
    /// - HEIC_BATCH_TIMEOUT_SECS -> pipeline.conversion_timeout_secs
    /// - HEIC_BATCH_FORMAT -> conversion.format
    /// - HEIC_BATCH_QUALITY -> conversion.quality
    /// - HEIC_BATCH_PRESERVE_METADATA -> metadata.preserve
    /// - HEIC_BATCH_WORKER_BACKEND -> worker.backend
    ///
    /// Unparseable values are ignored and the existing value is kept.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("HEIC_BATCH_DEVICE_CLASS") {
            if let Ok(class) = val.parse::<DeviceClassSetting>() {
                self.device.class = class;
            }
        }

        if let Ok(val) = env::var("HEIC_BATCH_MAX_CONCURRENT") {
            if let Ok(max) = val.parse::<u32>() {
                self.pipeline.max_concurrent_conversions = max;
            }
        }

        if let Ok(val) = env::var("HEIC_BATCH_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.pipeline.conversion_timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("HEIC_BATCH_FORMAT") {
            if let Ok(format) = val.parse::<TargetFormat>() {
                self.conversion.format = format;
            }
        }

        if let Ok(val) = env::var("HEIC_BATCH_QUALITY") {
            if let Ok(quality) = val.parse::<f32>() {
                self.conversion.quality = quality;
            }
        }

        if let Ok(val) = env::var("HEIC_BATCH_PRESERVE_METADATA") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.metadata.preserve = true,
                "false" | "0" | "no" => self.metadata.preserve = false,
                _ => {}
            }
        }

        if let Ok(val) = env::var("HEIC_BATCH_WORKER_BACKEND") {
            if let Ok(backend) = val.parse::<WorkerBackend>() {
                self.worker.backend = backend;
            }
        }
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let q = self.conversion.quality;
        if !(q > 0.0 && q <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "conversion.quality must be in (0, 1], got {}",
                q
            )));
        }
        Ok(())
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
