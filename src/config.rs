//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **#[serde(default)]**: Missing keys fall back to the section's `Default` impl
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` environment variables
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_FLUCTUATION__SEED`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impls)
//!
//! Nested keys use a double underscore so that field names containing a single
//! underscore (`models_dir`, `pitch_variation`) survive the mapping.

use crate::audio::{NoiseType, StitcherConfig};
use crate::conversion::{ConversionDefaults, RegistrySettings};
use crate::device::DevicePreference;
use crate::fluctuation::FluctuationConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - `server`: where the HTTP server listens
/// - `models`: where voice models live and which device loads them
/// - `conversion`: RVC parameters shared by every engine
/// - `fluctuation`: naturalism drift applied after conversion
/// - `noise`: background noise defaults and ambience assets
/// - `streaming`: chunk cross-fade settings
/// - `audio`: input decoding defaults
/// - `performance`: limits, deadlines and session housekeeping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub conversion: ConversionDefaults,
    #[serde(default)]
    pub fluctuation: FluctuationConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default)]
    pub streaming: StitcherConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Voice model configuration settings.
///
/// ## Fields:
/// - `models_dir`: Root of the model tree; a model named `alice` lives at `<models_dir>/alice/model.pth`
/// - `default_model`: Model used when a request does not name one
/// - `device`: `auto`, `cpu`, `cuda` or `metal`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub models_dir: String,
    pub default_model: String,
    pub device: DevicePreference,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            models_dir: "models".to_string(),
            default_model: "default".to_string(),
            device: DevicePreference::Auto,
        }
    }
}

/// Background noise defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub default_type: NoiseType,
    pub default_level: f32,
    /// Directory holding `<type>.wav` ambience beds; white noise is used when absent
    pub ambience_dir: Option<String>,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            default_type: NoiseType::Cafe,
            default_level: 0.02,
            ambience_dir: Some("assets/ambience".to_string()),
        }
    }
}

/// Input decoding defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate assumed for headerless PCM uploads
    pub default_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            default_sample_rate: 16000,
        }
    }
}

/// Performance tuning configuration.
///
/// ## Fields:
/// - `max_sessions`: Live streaming sessions kept before the least recently used is dropped
/// - `session_idle_secs`: Sessions untouched this long are swept away
/// - `sweep_interval_secs`: How often the idle sweep runs
/// - `conversion_timeout_ms`: Deadline for one conversion before falling back to demo mode
/// - `fail_on_conversion_error`: Return 500 on conversion failure instead of passing audio through
/// - `max_upload_bytes`: Largest accepted audio upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_sessions: usize,
    pub session_idle_secs: u64,
    pub sweep_interval_secs: u64,
    pub conversion_timeout_ms: u64,
    pub fail_on_conversion_error: bool,
    pub max_upload_bytes: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_sessions: 256,
            session_idle_secs: 900,
            sweep_interval_secs: 60,
            conversion_timeout_ms: 10_000,
            fail_on_conversion_error: true,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_MODELS__DEVICE=cpu`: Force CPU model loading
    /// - `APP_FLUCTUATION__TEMPORAL_SMOOTHNESS=0.5`: Faster drift
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Model directory and default model are named
    /// - Conversion ratios, fluctuation variances and smoothness are in range
    /// - Overlap window, noise level and limits are usable
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.models.models_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Models directory cannot be empty"));
        }

        if self.models.default_model.trim().is_empty() {
            return Err(anyhow::anyhow!("Default model name cannot be empty"));
        }

        self.conversion.validate()?;
        self.fluctuation.validate()?;
        self.streaming.validate().map_err(|e| anyhow::anyhow!(e))?;

        if !self.noise.default_level.is_finite() || self.noise.default_level < 0.0 {
            return Err(anyhow::anyhow!("Default noise level must be a non-negative number"));
        }

        if self.audio.default_sample_rate == 0 {
            return Err(anyhow::anyhow!("Default sample rate must be greater than 0"));
        }

        if self.performance.max_sessions == 0 {
            return Err(anyhow::anyhow!("Max sessions must be greater than 0"));
        }

        if self.performance.conversion_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Conversion timeout must be greater than 0"));
        }

        if self.performance.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        Ok(())
    }

    /// Settings for the engine registry derived from this configuration.
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            models_dir: PathBuf::from(&self.models.models_dir),
            device: self.models.device,
            conversion: self.conversion.clone(),
            fluctuation: self.fluctuation.clone(),
            stitcher: self.streaming.clone(),
            max_sessions: self.performance.max_sessions,
        }
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_millis(self.performance.conversion_timeout_ms)
    }

    pub fn session_idle_limit(&self) -> Duration {
        Duration::from_secs(self.performance.session_idle_secs)
    }
}
