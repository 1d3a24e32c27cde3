//! Error types for asset loading.

use std::path::PathBuf;

use thiserror::Error;

/// Error type for asset decoding and validation.
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Decoded data that does not satisfy the renderer's layout rules.
    #[error("Invalid {kind} data: {message}")]
    InvalidData {
        kind: &'static str,
        message: String,
    },
}

impl AssetError {
    pub(crate) fn invalid(kind: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidData {
            kind,
            message: message.into(),
        }
    }
}

/// Result type alias for asset operations.
pub type AssetResult<T> = Result<T, AssetError>;
