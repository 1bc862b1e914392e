//! Top-level error type for the rendering core.
//!
//! Individual subsystems define their own `thiserror` enums (`VulkanError`,
//! `ConfigError`, `PresentError`, `CacheError`) and this type stitches them
//! together for callers that cross subsystem boundaries.

use crate::caches::CacheError;
use crate::config::ConfigError;
use crate::device::VulkanError;
use crate::presentation::PresentError;

/// Errors that can surface from the public Graphic façade.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// A Vulkan API call failed, or a lower-level invariant was violated.
    #[error("vulkan error: {0}")]
    Vulkan(#[from] VulkanError),

    /// Swapchain/present path failed past its retry budget.
    #[error("presentation error: {0}")]
    Present(#[from] PresentError),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A texture/buffer cache operation failed (unsupported conversion,
    /// unknown handle).
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// The device was lost. This is fatal: the process should flush logs and abort.
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// No physical device satisfied the mandatory extension/feature requirements.
    #[error("no suitable device: {0}")]
    DeviceSelection(String),
}

/// Result alias used throughout the public API.
pub type EngineResult<T> = Result<T, EngineError>;
