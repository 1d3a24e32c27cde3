//! Error types for the renderer core.

use thiserror::Error;

use frameflow_assets::AssetError;
use frameflow_core::ConfigError;
use frameflow_rhi::RhiError;

/// Errors surfaced by [`Renderer`](crate::Renderer) and its subsystems.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Window and surface plumbing from the platform crate.
    #[error(transparent)]
    Platform(#[from] frameflow_core::Error),

    /// A payload larger than a whole frame's staging budget.
    #[error("Staging exhausted: {requested} bytes requested, per-frame budget is {budget} bytes")]
    StagingExhausted { requested: u64, budget: u64 },

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Material table is full ({0} materials)")]
    MaterialTableFull(u32),
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;
