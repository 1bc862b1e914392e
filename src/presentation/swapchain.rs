//! Swapchain lifecycle.
//!
//! Mirrors the original `Swapchain::create`/`acquireNextImage`/`present`
//! triad: negotiate format/present-mode/image-count once at create time,
//! then track `is_outdated`/`is_suboptimal` flags that the presentation
//! manager consults to decide when to recreate.

use crate::config::VsyncMode;
use crate::device::Device;
use crate::presentation::{PresentError, PresentResult};
use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;
use std::sync::Arc;

/// Preferred swapchain color format; falls back to the first format the
/// surface reports if this exact (format, color space) pair isn't offered.
pub const DEFAULT_COLOR_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;
const DEFAULT_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// Owns the `VkSwapchainKHR`, its images/views, and per-image present
/// semaphores. Recreated wholesale on resize, format change, or
/// suboptimal/out-of-date results.
pub struct Swapchain {
    device: Arc<Device>,
    loader: SwapchainLoader,
    surface_loader: ash::extensions::khr::Surface,
    handle: vk::SwapchainKHR,
    surface: vk::SurfaceKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    present_semaphores: Vec<vk::Semaphore>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    configured_vsync: VsyncMode,
    extent: vk::Extent2D,
    image_index: u32,
    frame_index: usize,
    is_outdated: bool,
    is_suboptimal: bool,
}

impl Swapchain {
    /// Create a swapchain for `surface` at `(width, height)`, negotiating
    /// format and present mode from `vsync_mode`'s priority list.
    ///
    /// # Errors
    /// Returns [`PresentError::SwapchainCreationFailed`] if the surface
    /// reports a zero-size extent or swapchain creation fails.
    pub fn create(
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        vsync_mode: VsyncMode,
    ) -> PresentResult<Self> {
        let loader = SwapchainLoader::new(device.instance(), device.raw());
        let surface_loader = ash::extensions::khr::Surface::new(device.entry(), device.instance());

        let mut swapchain = Self {
            device,
            loader,
            surface_loader,
            handle: vk::SwapchainKHR::null(),
            surface,
            images: Vec::new(),
            views: Vec::new(),
            present_semaphores: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            configured_vsync: vsync_mode,
            extent: vk::Extent2D { width, height },
            image_index: 0,
            frame_index: 0,
            is_outdated: false,
            is_suboptimal: false,
        };
        swapchain.recreate(width, height)?;
        Ok(swapchain)
    }

    /// Recreate the swapchain at a new size (or after a present-mode config
    /// change). Destroys the previous swapchain's images/views first.
    ///
    /// # Errors
    /// Returns [`PresentError::SwapchainCreationFailed`] if the surface
    /// capabilities report a zero-size extent, or the underlying Vulkan
    /// swapchain/image-view creation fails.
    pub fn recreate(&mut self, width: u32, height: u32) -> PresentResult<()> {
        self.is_outdated = false;
        self.is_suboptimal = false;

        let physical = self.device.physical().device;
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical, self.surface)
        }
        .map_err(crate::device::VulkanError::Api)?;

        if capabilities.max_image_extent.width == 0 || capabilities.max_image_extent.height == 0 {
            return Err(PresentError::SwapchainCreationFailed(
                "surface reports zero max image extent".into(),
            ));
        }

        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(physical, self.surface)
        }
        .map_err(crate::device::VulkanError::Api)?;
        self.format = Self::choose_surface_format(&formats);

        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(physical, self.surface)
        }
        .map_err(crate::device::VulkanError::Api)?;
        self.present_mode = Self::choose_present_mode(self.configured_vsync, &present_modes);

        let extent = Self::choose_extent(&capabilities, width, height);
        self.extent = extent;

        let min_count = capabilities.min_image_count + 1;
        let image_count = if capabilities.max_image_count > 0 {
            min_count.clamp(
                capabilities.min_image_count,
                capabilities.max_image_count.min(3.max(capabilities.min_image_count)),
            )
        } else {
            min_count.max(3)
        };

        let old_swapchain = self.handle;

        let graphics_family = self.device.physical().graphics_family;
        let present_family = self.device.physical().present_family;
        let queue_families = [graphics_family, present_family];
        let sharing_mode = if graphics_family == present_family {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        };

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing_mode)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        if sharing_mode == vk::SharingMode::CONCURRENT {
            create_info = create_info.queue_family_indices(&queue_families);
        }

        let handle = unsafe { self.loader.create_swapchain(&create_info, None) }
            .map_err(crate::device::VulkanError::Api)?;

        self.destroy_images_and_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }

        self.handle = handle;
        self.images = unsafe { self.loader.get_swapchain_images(handle) }.map_err(crate::device::VulkanError::Api)?;
        self.views = self.create_views()?;
        self.present_semaphores = self.create_semaphores()?;
        self.frame_index = 0;

        log::info!(
            "swapchain recreated: {}x{} format={:?} present_mode={:?} images={}",
            extent.width,
            extent.height,
            self.format.format,
            self.present_mode,
            self.images.len()
        );
        Ok(())
    }

    fn create_views(&self) -> PresentResult<Vec<vk::ImageView>> {
        self.images
            .iter()
            .map(|&image| {
                let subresource = vk::ImageSubresourceRange::builder()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1)
                    .build();
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(self.format.format)
                    .subresource_range(subresource);
                unsafe { self.device.raw().create_image_view(&create_info, None) }.map_err(|e| PresentError::Vulkan(crate::device::VulkanError::Api(e)))
            })
            .collect()
    }

    fn create_semaphores(&self) -> PresentResult<Vec<vk::Semaphore>> {
        self.images
            .iter()
            .map(|_| {
                let create_info = vk::SemaphoreCreateInfo::builder();
                unsafe { self.device.raw().create_semaphore(&create_info, None) }.map_err(|e| PresentError::Vulkan(crate::device::VulkanError::Api(e)))
            })
            .collect()
    }

    fn destroy_images_and_views(&mut self) {
        for view in self.views.drain(..) {
            unsafe { self.device.raw().destroy_image_view(view, None) };
        }
        for semaphore in self.present_semaphores.drain(..) {
            unsafe { self.device.raw().destroy_semaphore(semaphore, None) };
        }
        self.images.clear();
    }

    fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
        if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
            return vk::SurfaceFormatKHR {
                format: DEFAULT_COLOR_FORMAT,
                color_space: DEFAULT_COLOR_SPACE,
            };
        }
        formats
            .iter()
            .find(|f| f.format == DEFAULT_COLOR_FORMAT && f.color_space == DEFAULT_COLOR_SPACE)
            .copied()
            .unwrap_or(formats[0])
    }

    /// Negotiate a present mode from `vsync_mode`'s priority list,
    /// falling back to `Fifo` (always supported) if nothing else matches.
    fn choose_present_mode(vsync_mode: VsyncMode, available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
        for candidate in vsync_mode.priority() {
            let vk_mode = match candidate {
                VsyncMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
                VsyncMode::Mailbox => vk::PresentModeKHR::MAILBOX,
                VsyncMode::Fifo => vk::PresentModeKHR::FIFO,
                VsyncMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
            };
            if available.contains(&vk_mode) {
                return vk_mode;
            }
        }
        vk::PresentModeKHR::FIFO
    }

    fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
        if capabilities.current_extent.width != u32::MAX {
            return capabilities.current_extent;
        }
        vk::Extent2D {
            width: width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
            height: height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
        }
    }

    /// True if the negotiated present mode no longer matches `desired`,
    /// meaning a present-mode configuration change needs a recreate.
    #[must_use]
    pub fn needs_present_mode_update(&self, desired: VsyncMode) -> bool {
        self.configured_vsync != desired
    }

    /// Update the configured vsync preference; takes effect on the next recreate.
    pub fn set_vsync_mode(&mut self, vsync_mode: VsyncMode) {
        self.configured_vsync = vsync_mode;
    }

    /// Acquire the next swapchain image, signaling the per-frame present
    /// semaphore. Returns `true` if the swapchain is now suboptimal or
    /// out-of-date and the caller should recreate before presenting.
    ///
    /// # Errors
    /// Returns [`PresentError::Vulkan`] if `vkAcquireNextImageKHR` fails for
    /// a reason other than `SUBOPTIMAL_KHR`/`OUT_OF_DATE_KHR`.
    pub fn acquire_next_image(&mut self) -> PresentResult<bool> {
        let semaphore = self.present_semaphores[self.frame_index];
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => {
                self.image_index = index;
                self.is_suboptimal = suboptimal;
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.is_outdated = true;
            }
            Err(err) => return Err(PresentError::Vulkan(crate::device::VulkanError::Api(err))),
        }
        Ok(self.is_outdated || self.is_suboptimal)
    }

    /// Present the currently acquired image, waiting on `render_semaphore`.
    ///
    /// # Errors
    /// Returns [`PresentError::SurfaceLost`] on `ERROR_SURFACE_LOST_KHR`
    /// (with `attempts: 0`; the presentation manager fills in the retry
    /// count) and [`PresentError::Vulkan`] for any other failure. Sets
    /// `is_outdated` rather than erroring on `OUT_OF_DATE_KHR`.
    pub fn present(&mut self, render_semaphore: vk::Semaphore) -> PresentResult<()> {
        let semaphores = [render_semaphore];
        let swapchains = [self.handle];
        let indices = [self.image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let result = unsafe { self.loader.queue_present(self.device.present_queue(), &present_info) };
        self.frame_index = (self.frame_index + 1) % self.present_semaphores.len().max(1);

        match result {
            Ok(suboptimal) => {
                self.is_suboptimal = suboptimal;
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.is_outdated = true;
                Ok(())
            }
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Err(PresentError::SurfaceLost { attempts: 0 }),
            Err(err) => Err(PresentError::Vulkan(crate::device::VulkanError::Api(err))),
        }
    }

    /// True if the swapchain must be recreated before the next acquire/present.
    #[must_use]
    pub fn needs_recreate(&self) -> bool {
        self.is_outdated || self.is_suboptimal
    }

    /// Color format of the swapchain images.
    #[must_use]
    pub fn image_format(&self) -> vk::Format {
        self.format.format
    }

    /// Current negotiated present mode.
    #[must_use]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Current swapchain extent.
    #[must_use]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of images in the swapchain.
    #[must_use]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// The currently acquired image handle.
    #[must_use]
    pub fn current_image(&self) -> vk::Image {
        self.images[self.image_index as usize]
    }

    /// The currently acquired image's view.
    #[must_use]
    pub fn current_image_view(&self) -> vk::ImageView {
        self.views[self.image_index as usize]
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_images_and_views();
        if self.handle != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.handle, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_mode_falls_back_to_fifo_when_unsupported() {
        let available = [vk::PresentModeKHR::FIFO];
        assert_eq!(
            Swapchain::choose_present_mode(VsyncMode::Mailbox, &available),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn present_mode_prefers_mailbox_when_available() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            Swapchain::choose_present_mode(VsyncMode::Mailbox, &available),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn surface_format_prefers_bgra_srgb_nonlinear() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: DEFAULT_COLOR_FORMAT,
                color_space: DEFAULT_COLOR_SPACE,
            },
        ];
        assert_eq!(Swapchain::choose_surface_format(&formats).format, DEFAULT_COLOR_FORMAT);
    }
}
