//! # vk-render-core
//!
//! A deferred, multi-threaded Vulkan rendering core: device/memory setup,
//! a command scheduler that records on the caller's thread and replays on a
//! worker, render pass/pipeline/texture/buffer caches, and a presentation
//! path that composites registered layers onto the swapchain.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use vk_render_core::config::RendererConfig;
//! use vk_render_core::device::Device;
//! use vk_render_core::facade::Graphic;
//!
//! fn build(device: std::sync::Arc<Device>, config: &RendererConfig) -> vk_render_core::error::EngineResult<Graphic> {
//!     Graphic::new(device, config)
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod caches;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod facade;
pub mod format;
pub mod foundation;
pub mod mesh_cache;
pub mod presentation;
pub mod resource_pool;
pub mod scheduler;
pub mod staging;
pub mod timeline;

pub use error::{EngineError, EngineResult};
pub use facade::{Graphic, Renderer};
