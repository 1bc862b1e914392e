//! Presentation frame.
//!
//! One `Frame` is the unit the render thread hands to the presentation
//! manager: an image the Graphic façade rendered into, plus everything
//! needed to blit it onto a swapchain image and know when it's safe to
//! reuse (`present_done`).

use crate::device::{Device, VulkanError, VulkanResult};
use ash::vk;
use std::sync::Arc;

/// Image + view + command buffer + synchronization for one in-flight
/// presentation slot. Moves between a presentation manager's `free_queue`,
/// the render thread (while the façade is drawing into it), and
/// `present_queue`.
pub struct Frame {
    device: Arc<Device>,
    /// Color image the façade renders the frame into.
    pub image: vk::Image,
    /// View over `image`, bound as the window-adapt pass's sample source.
    pub image_view: vk::ImageView,
    allocation: Option<vk_mem::Allocation>,
    /// One-shot command buffer used by [`crate::presentation::PresentationManager::copy_to_swapchain`].
    pub command_buffer: vk::CommandBuffer,
    /// Signaled by the façade once rendering into `image` has been submitted.
    pub render_ready: vk::Semaphore,
    /// Signaled once the swapchain copy/blit has been submitted; the
    /// swapchain's own present then waits on this.
    pub render_done: vk::Semaphore,
    /// Signaled when the GPU has finished presenting this frame, so the
    /// slot is safe to reuse. `get_render_frame` blocks on this.
    pub present_done: vk::Fence,
    /// Current image extent; compared against the swapchain's extent on
    /// every present to detect a required resize.
    pub width: u32,
    /// See [`Self::width`].
    pub height: u32,
}

impl Frame {
    /// Allocate a new frame's image, view, command buffer, and sync objects.
    ///
    /// # Errors
    /// Returns [`VulkanError::Api`] if any underlying Vulkan call fails, or
    /// [`VulkanError::OutOfMemory`] if the image commitment cannot be made.
    pub fn new(device: Arc<Device>, command_pool: vk::CommandPool, width: u32, height: u32, format: vk::Format) -> VulkanResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::SAMPLED)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let alloc_info = crate::device::MemoryClass::DeviceLocal.allocation_create_info();
        let (image, allocation) = unsafe { device.allocator().create_image(&image_info, &alloc_info) }
            .map_err(|_| VulkanError::OutOfMemory {
                requested: u64::from(width) * u64::from(height) * 4,
            })?;

        let subresource = vk::ImageSubresourceRange::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(1)
            .layer_count(1)
            .build();
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(subresource);
        let image_view = unsafe { device.raw().create_image_view(&view_info, None) }.map_err(VulkanError::Api)?;

        let alloc_cmdbuf = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.raw().allocate_command_buffers(&alloc_cmdbuf) }.map_err(VulkanError::Api)?[0];

        let render_ready = unsafe { device.raw().create_semaphore(&vk::SemaphoreCreateInfo::builder(), None) }.map_err(VulkanError::Api)?;
        let render_done = unsafe { device.raw().create_semaphore(&vk::SemaphoreCreateInfo::builder(), None) }.map_err(VulkanError::Api)?;
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let present_done = unsafe { device.raw().create_fence(&fence_info, None) }.map_err(VulkanError::Api)?;

        Ok(Self {
            device,
            image,
            image_view,
            allocation: Some(allocation),
            command_buffer,
            render_ready,
            render_done,
            present_done,
            width,
            height,
        })
    }

    /// True if `width`/`height` no longer match `(w, h)`, meaning this frame
    /// must be recreated at the new size before reuse.
    #[must_use]
    pub fn needs_resize(&self, w: u32, h: u32) -> bool {
        self.width != w || self.height != h
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_image_view(self.image_view, None);
            if let Some(mut allocation) = self.allocation.take() {
                self.device.allocator().destroy_image(self.image, &mut allocation);
            }
            self.device.raw().destroy_semaphore(self.render_ready, None);
            self.device.raw().destroy_semaphore(self.render_done, None);
            self.device.raw().destroy_fence(self.present_done, None);
        }
    }
}
