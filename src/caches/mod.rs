//! Render pass, pipeline, texture and buffer caches.

pub mod buffer;
pub mod pipeline;
pub mod render_pass;
pub mod texture;

use crate::device::VulkanError;

/// Errors raised by the texture and buffer caches.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// A lower-level Vulkan call failed.
    #[error(transparent)]
    Vulkan(#[from] VulkanError),

    /// A conversion or blit was attempted that the negotiated device
    /// features don't support.
    #[error("conversion unsupported: {0}")]
    ConvertFailed(String),

    /// A `TextureId`/`ModelId`/buffer handle did not resolve to a live entry,
    /// e.g. after eviction.
    #[error("unknown resource handle")]
    UnknownHandle,
}
