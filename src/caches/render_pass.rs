//! Render Pass Cache.
//!
//! Keyed by color/depth formats, sample count, and whether a resolve
//! attachment is needed. Render passes are never mutated after insertion, so
//! lookups only need a shared path through the mutex long enough to clone the
//! handle out of the map.

use crate::device::{Device, VulkanError, VulkanResult};
use ash::vk;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Maximum simultaneous color attachments a single render pass built by this
/// cache supports. Matches the data model's "≤8 color formats".
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// Lookup key for a cached render pass: everything that changes a render
/// pass's attachment compatibility or subpass structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassKey {
    /// Color attachment formats, in binding order; unused slots are `UNDEFINED`.
    pub color_formats: [vk::Format; MAX_COLOR_ATTACHMENTS],
    /// Number of `color_formats` entries actually in use.
    pub color_count: u8,
    /// Depth/stencil attachment format, or `UNDEFINED` if none.
    pub depth_format: vk::Format,
    /// Sample count shared by every attachment.
    pub samples: vk::SampleCountFlags,
    /// True if a resolve attachment is required (multisampled color resolved
    /// to single-sample for presentation/sampling).
    pub needs_resolve: bool,
    /// True if the depth attachment should be preserved (`STORE`) rather
    /// than discarded after the subpass.
    pub store_depth: bool,
}

impl RenderPassKey {
    /// Build a key from a slice of in-use color formats (must be `<= MAX_COLOR_ATTACHMENTS`).
    #[must_use]
    pub fn new(
        colors: &[vk::Format],
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
        needs_resolve: bool,
        store_depth: bool,
    ) -> Self {
        debug_assert!(colors.len() <= MAX_COLOR_ATTACHMENTS);
        let mut color_formats = [vk::Format::UNDEFINED; MAX_COLOR_ATTACHMENTS];
        for (slot, format) in color_formats.iter_mut().zip(colors.iter()) {
            *slot = *format;
        }
        Self {
            color_formats,
            color_count: colors.len() as u8,
            depth_format,
            samples,
            needs_resolve,
            store_depth,
        }
    }

    fn colors(&self) -> &[vk::Format] {
        &self.color_formats[..self.color_count as usize]
    }
}

/// Insert-or-get cache of `vk::RenderPass` handles keyed by [`RenderPassKey`].
pub struct RenderPassCache {
    device: std::sync::Arc<Device>,
    passes: Mutex<HashMap<RenderPassKey, vk::RenderPass>>,
}

impl RenderPassCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(device: std::sync::Arc<Device>) -> Self {
        Self {
            device,
            passes: Mutex::new(HashMap::new()),
        }
    }

    /// Return the render pass for `key`, building it on first request.
    ///
    /// # Errors
    /// Returns [`VulkanError::Api`] if `vkCreateRenderPass` fails.
    pub fn get(&self, key: RenderPassKey) -> VulkanResult<vk::RenderPass> {
        if let Some(pass) = self.passes.lock().get(&key) {
            return Ok(*pass);
        }

        let pass = self.build(&key)?;

        let mut passes = self.passes.lock();
        // Another thread may have built the same key while we were building ours.
        match passes.get(&key) {
            Some(existing) => {
                unsafe { self.device.raw().destroy_render_pass(pass, None) };
                Ok(*existing)
            }
            None => {
                passes.insert(key, pass);
                Ok(pass)
            }
        }
    }

    fn build(&self, key: &RenderPassKey) -> VulkanResult<vk::RenderPass> {
        let mut attachments = Vec::new();
        let mut color_refs = Vec::new();

        for &format in key.colors() {
            color_refs.push(vk::AttachmentReference {
                attachment: attachments.len() as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(format)
                    .samples(key.samples)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .build(),
            );
        }

        let depth_ref = if key.depth_format != vk::Format::UNDEFINED {
            let attachment = attachments.len() as u32;
            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(key.depth_format)
                    .samples(key.samples)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(if key.store_depth {
                        vk::AttachmentStoreOp::STORE
                    } else {
                        vk::AttachmentStoreOp::DONT_CARE
                    })
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .build(),
            );
            Some(vk::AttachmentReference {
                attachment,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            })
        } else {
            None
        };

        let resolve_refs = if key.needs_resolve {
            let mut refs = Vec::with_capacity(color_refs.len());
            for &format in key.colors() {
                let attachment = attachments.len() as u32;
                attachments.push(
                    vk::AttachmentDescription::builder()
                        .format(format)
                        .samples(vk::SampleCountFlags::TYPE_1)
                        .load_op(vk::AttachmentLoadOp::DONT_CARE)
                        .store_op(vk::AttachmentStoreOp::STORE)
                        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                        .initial_layout(vk::ImageLayout::UNDEFINED)
                        .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                        .build(),
                );
                refs.push(vk::AttachmentReference {
                    attachment,
                    layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                });
            }
            Some(refs)
        } else {
            None
        };

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = &depth_ref {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        if let Some(resolve_refs) = &resolve_refs {
            subpass = subpass.resolve_attachments(resolve_refs);
        }

        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let subpasses = [subpass.build()];
        let dependencies = [dependency.build()];
        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        unsafe { self.device.raw().create_render_pass(&create_info, None) }.map_err(VulkanError::Api)
    }
}

impl Drop for RenderPassCache {
    fn drop(&mut self) {
        for (_, pass) in self.passes.lock().drain() {
            unsafe { self.device.raw().destroy_render_pass(pass, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_different_color_counts_are_distinct() {
        let a = RenderPassKey::new(&[vk::Format::R8G8B8A8_UNORM], vk::Format::UNDEFINED, vk::SampleCountFlags::TYPE_1, false, false);
        let b = RenderPassKey::new(
            &[vk::Format::R8G8B8A8_UNORM, vk::Format::R8G8B8A8_UNORM],
            vk::Format::UNDEFINED,
            vk::SampleCountFlags::TYPE_1,
            false,
            false,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn colors_slice_respects_color_count() {
        let key = RenderPassKey::new(&[vk::Format::R8G8B8A8_UNORM], vk::Format::D32_SFLOAT, vk::SampleCountFlags::TYPE_1, false, true);
        assert_eq!(key.colors(), &[vk::Format::R8G8B8A8_UNORM]);
    }
}
