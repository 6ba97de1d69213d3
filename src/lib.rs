pub mod api;
pub mod capture;
pub mod pipeline;
pub mod transform;

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transform::colormap::UnknownColormap;
use crate::transform::{Colormap, TransformerKind, Visualization};

/// Prefix for environment overrides, e.g. `NAUTILUS__SERVER__BIND`
pub const ENV_PREFIX: &str = "NAUTILUS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    UnknownVariant(#[from] UnknownColormap),
}

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub transform: TransformConfig,
    pub codec: CodecConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
        }
    }
}

/// Worker timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Idle wait when no input frame is pending
    pub poll_interval_ms: u64,
    /// Minimum time between the starts of two transformations
    pub process_interval_ms: u64,
    /// Upper bound on how long `stop` waits for the worker
    pub stop_timeout_ms: u64,
    /// Pause after a failed transformation
    pub failure_backoff_ms: u64,
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            process_interval_ms: 100,
            stop_timeout_ms: 2000,
            failure_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub kind: TransformerKind,
    pub visualization: Visualization,
    /// Gray depth levels instead of the current colormap
    pub grayscale: bool,
    /// Colormap names in rotation order
    pub variants: Vec<String>,
}

impl TransformConfig {
    pub fn colormaps(&self) -> Result<Vec<Colormap>, UnknownColormap> {
        self.variants.iter().map(|name| name.parse()).collect()
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            kind: TransformerKind::PseudoDepth,
            visualization: Visualization::DepthOnly,
            grayscale: false,
            variants: Colormap::ALL.iter().map(|c| c.name().to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub jpeg_quality: u8,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self { jpeg_quality: 80 }
    }
}

/// Local V4L2 camera, only used with the `v4l2-capture` feature
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    /// Empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_count: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device: String::new(),
            width: 640,
            height: 480,
            fps: 30,
            buffer_count: 4,
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `NAUTILUS__*` variables.
    /// Keys missing from every source keep their `Default` value.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("transform.variants"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let timing = &self.pipeline;
        for (name, value) in [
            ("poll_interval_ms", timing.poll_interval_ms),
            ("process_interval_ms", timing.process_interval_ms),
            ("stop_timeout_ms", timing.stop_timeout_ms),
            ("failure_backoff_ms", timing.failure_backoff_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("pipeline.{name} must be > 0")));
            }
        }

        if !(1..=100).contains(&self.codec.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "codec.jpeg_quality must be in 1..=100, got {}",
                self.codec.jpeg_quality
            )));
        }

        if self.transform.variants.is_empty() {
            return Err(ConfigError::Invalid("transform.variants is empty".into()));
        }
        self.transform.colormaps()?;

        Ok(())
    }
}
