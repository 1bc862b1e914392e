//! Presentation.
//!
//! Owns the swapchain lifecycle, a pool of presentation [`Frame`]s moving
//! between free/active/present queues, and the window-adapt pass that blits
//! the engine's render target into the acquired swapchain image.

mod blit_screen;
mod frame;
mod manager;
mod swapchain;

pub use blit_screen::{BlendMode, BlitScreen, FramebufferConfig};
pub use frame::Frame;
pub use manager::PresentationManager;
pub use swapchain::Swapchain;

/// Errors surfaced by the presentation path.
#[derive(thiserror::Error, Debug)]
pub enum PresentError {
    /// `vkAcquireNextImageKHR`/`vkQueuePresentKHR` returned `ERROR_SURFACE_LOST_KHR`
    /// past the bounded retry budget.
    #[error("surface lost after {attempts} recreate attempts")]
    SurfaceLost {
        /// Number of recreate-and-retry attempts made before giving up.
        attempts: u32,
    },

    /// The swapchain could not be (re)created, e.g. a zero-size surface.
    #[error("swapchain creation failed: {0}")]
    SwapchainCreationFailed(String),

    /// A Vulkan call in the present path failed for a reason other than
    /// `SURFACE_LOST_KHR`/`OUT_OF_DATE_KHR`/`SUBOPTIMAL_KHR`.
    #[error("vulkan error: {0}")]
    Vulkan(#[from] crate::device::VulkanError),

    /// Depth/stencil blit attempted without `VK_EXT_shader_stencil_export`.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result alias for presentation operations.
pub type PresentResult<T> = Result<T, PresentError>;

/// Bound on `ErrorSurfaceLostKHR` recreate-and-retry attempts before a
/// present failure is surfaced as fatal.
pub const MAX_SURFACE_LOST_RETRIES: u32 = 3;
