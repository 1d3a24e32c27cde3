//! Renderer configuration.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `FRAMEFLOW_*` environment variables. [`RendererConfig::validate`] must
//! pass before the values reach the renderer.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on frames in flight accepted by validation.
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: u32 = 4;

const MIB: u64 = 1024 * 1024;

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ParseError(String),

    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Window creation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "frameflow".to_string(),
        }
    }
}

/// Locations of the compiled SPIR-V shaders for the draw pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderPaths {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/instanced.vert.spv"),
            fragment: PathBuf::from("shaders/instanced.frag.spv"),
        }
    }
}

/// Tunables for frame pipelining and upload budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frame slots (N). Bounds outstanding GPU work.
    pub frames_in_flight: u32,
    /// Per-frame staging budget of the long-lived upload lane (meshes, textures, materials).
    pub static_staging_bytes: u64,
    /// Per-frame staging budget of the transient upload lane (instance data).
    pub transient_staging_bytes: u64,
    /// Requested instance capacity of one frame's slice of the instance buffer.
    pub max_instances_per_frame: u32,
    /// Capacity of the material table.
    pub max_materials: u32,
    /// Swapchain acquisition timeout.
    pub acquire_timeout_ms: u64,
    /// Whether a suboptimal present result rebuilds the swapchain.
    pub recreate_on_suboptimal: bool,
    /// FIFO presentation when set, otherwise MAILBOX where available.
    pub vsync: bool,
    pub enable_validation: bool,
    pub window: WindowConfig,
    pub shaders: ShaderPaths,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            static_staging_bytes: 16 * MIB,
            transient_staging_bytes: 4 * MIB,
            max_instances_per_frame: 16_384,
            max_materials: 1024,
            acquire_timeout_ms: 1000,
            recreate_on_suboptimal: true,
            vsync: true,
            enable_validation: cfg!(debug_assertions),
            window: WindowConfig::default(),
            shaders: ShaderPaths::default(),
        }
    }
}

impl RendererConfig {
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Loads `path` if it exists, otherwise the defaults, then applies
    /// environment overrides and validates the result.
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            tracing::info!("Loading renderer config from {}", path.display());
            Self::from_toml_file(path)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies `FRAMEFLOW_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(env::vars());
    }

    /// Applies overrides from key/value pairs. Unknown keys and unparsable
    /// values are ignored with a warning.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            let Some(name) = key.strip_prefix("FRAMEFLOW_") else {
                continue;
            };

            let applied = match name {
                "FRAMES_IN_FLIGHT" => parse_into(value, &mut self.frames_in_flight),
                "STATIC_STAGING_BYTES" => parse_into(value, &mut self.static_staging_bytes),
                "TRANSIENT_STAGING_BYTES" => parse_into(value, &mut self.transient_staging_bytes),
                "MAX_INSTANCES_PER_FRAME" => parse_into(value, &mut self.max_instances_per_frame),
                "MAX_MATERIALS" => parse_into(value, &mut self.max_materials),
                "ACQUIRE_TIMEOUT_MS" => parse_into(value, &mut self.acquire_timeout_ms),
                "RECREATE_ON_SUBOPTIMAL" => parse_into(value, &mut self.recreate_on_suboptimal),
                "VSYNC" => parse_into(value, &mut self.vsync),
                "ENABLE_VALIDATION" => parse_into(value, &mut self.enable_validation),
                "WINDOW_WIDTH" => parse_into(value, &mut self.window.width),
                "WINDOW_HEIGHT" => parse_into(value, &mut self.window.height),
                _ => {
                    tracing::warn!("Ignoring unknown config override {}", key);
                    continue;
                }
            };

            if !applied {
                tracing::warn!("Ignoring unparsable value {:?} for {}", value, key);
            }
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT_LIMIT, self.frames_in_flight
            )));
        }
        if self.static_staging_bytes == 0 || self.transient_staging_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "staging budgets must be non-zero".to_string(),
            ));
        }
        if self.max_instances_per_frame == 0 {
            return Err(ConfigError::ValidationError(
                "max_instances_per_frame must be non-zero".to_string(),
            ));
        }
        if self.max_materials == 0 {
            return Err(ConfigError::ValidationError(
                "max_materials must be non-zero".to_string(),
            ));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::ValidationError(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        Ok(())
    }

    /// Acquisition timeout in nanoseconds, as Vulkan expects it.
    pub fn acquire_timeout_ns(&self) -> u64 {
        self.acquire_timeout_ms.saturating_mul(1_000_000)
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) -> bool {
    match value.trim().parse() {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.acquire_timeout_ns(), 1_000_000_000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RendererConfig::from_toml_str(
            r#"
            frames_in_flight = 3
            static_staging_bytes = 1048576

            [window]
            title = "demo"
            "#,
        )
        .unwrap();

        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.static_staging_bytes, MIB);
        assert_eq!(config.transient_staging_bytes, 4 * MIB);
        assert_eq!(config.window.title, "demo");
        assert_eq!(config.window.width, 1280);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = RendererConfig {
            max_materials: 64,
            recreate_on_suboptimal: false,
            ..Default::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(RendererConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let result = RendererConfig::from_toml_str("frames_in_flight = \"two\"");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_rejects_bad_frame_count() {
        let mut config = RendererConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        config.frames_in_flight = MAX_FRAMES_IN_FLIGHT_LIMIT + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        let config = RendererConfig {
            transient_staging_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = RendererConfig::default();
        config.apply_overrides([
            ("FRAMEFLOW_FRAMES_IN_FLIGHT", "3"),
            ("FRAMEFLOW_RECREATE_ON_SUBOPTIMAL", "false"),
            ("FRAMEFLOW_VSYNC", "false"),
            ("FRAMEFLOW_WINDOW_WIDTH", "not-a-number"),
            ("FRAMEFLOW_UNKNOWN", "1"),
            ("PATH", "/usr/bin"),
        ]);

        assert_eq!(config.frames_in_flight, 3);
        assert!(!config.recreate_on_suboptimal);
        assert!(!config.vsync);
        assert_eq!(config.window.width, 1280);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("frameflow-config-does-not-exist.toml");
        let config = RendererConfig::load(&path).unwrap();
        assert!(config.frames_in_flight >= 1);
    }
}
