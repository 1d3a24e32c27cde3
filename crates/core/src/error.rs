//! Error types shared across the workspace.

use thiserror::Error;

use crate::config::ConfigError;

/// Top-level error type for platform and application plumbing.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan errors surfaced outside the RHI crate (surface creation).
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias using the workspace's Error type.
pub type Result<T> = std::result::Result<T, Error>;
