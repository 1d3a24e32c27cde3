//! Core utilities shared by every frameflow crate.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Renderer configuration (TOML + environment overrides)

mod config;
mod error;
mod logging;
mod timer;

pub use config::{
    ConfigError, RendererConfig, ShaderPaths, WindowConfig, MAX_FRAMES_IN_FLIGHT_LIMIT,
};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
