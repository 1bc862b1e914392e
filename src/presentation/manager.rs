//! Presentation Manager.
//!
//! Owns the [`Frame`] pool and the free/present queue hand-off between the
//! render thread and an optional dedicated present thread. The protocol
//! (`get_render_frame` → `present` → `wait_present`) is identical whether or
//! not a present thread is active; only the `present` call's blocking
//! behavior differs.

use crate::device::{Device, VulkanError};
use crate::presentation::{Frame, PresentError, PresentResult, Swapchain, MAX_SURFACE_LOST_RETRIES};
use ash::vk;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Default size of the frame pool absent an explicit override.
pub const DEFAULT_FRAME_POOL_SIZE: usize = 7;

struct Shared {
    free_queue: Mutex<VecDeque<Box<Frame>>>,
    free_cv: Condvar,
    present_queue: Mutex<VecDeque<Box<Frame>>>,
    present_cv: Condvar,
    swapchain: Mutex<Swapchain>,
    submit_mutex: Mutex<()>,
    shutdown: std::sync::atomic::AtomicBool,
}

/// Owns the frame pool and drives frames from "being rendered into" to
/// "presented", either inline on the caller's thread or via a dedicated
/// present thread (`use_present_thread`).
pub struct PresentationManager {
    device: Arc<Device>,
    command_pool: vk::CommandPool,
    shared: Arc<Shared>,
    present_thread: Mutex<Option<JoinHandle<()>>>,
    use_present_thread: bool,
    blit_supported: bool,
}

impl PresentationManager {
    /// Build the frame pool (`pool_size` frames at `width`x`height`/`format`)
    /// and, if `use_present_thread`, spawn the dedicated present thread.
    ///
    /// # Errors
    /// Returns [`VulkanError`] if command pool or frame allocation fails.
    pub fn new(
        device: Arc<Device>,
        swapchain: Swapchain,
        pool_size: usize,
        width: u32,
        height: u32,
        frame_format: vk::Format,
        use_present_thread: bool,
    ) -> Result<Self, VulkanError> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.physical().graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.raw().create_command_pool(&pool_info, None) }.map_err(VulkanError::Api)?;

        let blit_supported = Self::can_blit_to_swapchain(&device, swapchain.image_format());

        let mut free_queue = VecDeque::with_capacity(pool_size);
        for _ in 0..pool_size.max(1) {
            free_queue.push_back(Box::new(Frame::new(device.clone(), command_pool, width, height, frame_format)?));
        }

        let shared = Arc::new(Shared {
            free_queue: Mutex::new(free_queue),
            free_cv: Condvar::new(),
            present_queue: Mutex::new(VecDeque::new()),
            present_cv: Condvar::new(),
            swapchain: Mutex::new(swapchain),
            submit_mutex: Mutex::new(()),
            shutdown: std::sync::atomic::AtomicBool::new(false),
        });

        let present_thread = if use_present_thread {
            let shared = shared.clone();
            let device = device.clone();
            Some(
                std::thread::Builder::new()
                    .name("vk-render-core-present".into())
                    .spawn(move || Self::present_thread_main(&device, &shared))
                    .expect("failed to spawn present thread"),
            )
        } else {
            None
        };

        Ok(Self {
            device,
            command_pool,
            shared,
            present_thread: Mutex::new(present_thread),
            use_present_thread,
            blit_supported,
        })
    }

    fn can_blit_to_swapchain(device: &Device, format: vk::Format) -> bool {
        let props = device.format_properties(format);
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::BLIT_DST)
    }

    /// Pop a frame from the free queue, blocking on its `present_done` fence
    /// so every prior GPU use of its resources is guaranteed complete, then
    /// reset the fence for reuse.
    ///
    /// # Errors
    /// Returns [`VulkanError::Api`] if waiting on or resetting the fence fails.
    pub fn get_render_frame(&self) -> Result<Box<Frame>, VulkanError> {
        let frame = {
            let mut free = self.shared.free_queue.lock().unwrap();
            while free.is_empty() {
                free = self.shared.free_cv.wait(free).unwrap();
            }
            free.pop_front().expect("checked non-empty above")
        };

        unsafe { self.device.raw().wait_for_fences(&[frame.present_done], true, u64::MAX) }.map_err(VulkanError::Api)?;
        unsafe { self.device.raw().reset_fences(&[frame.present_done]) }.map_err(VulkanError::Api)?;
        Ok(frame)
    }

    /// Hand a finished frame off for presentation: pushed to the present
    /// queue and the present thread notified (threaded mode), or blitted
    /// inline on the caller's thread (`use_present_thread = false`).
    ///
    /// # Errors
    /// Returns [`PresentError`] if the inline copy/present fails; in
    /// threaded mode the error is instead logged by the present thread.
    pub fn present(&self, frame: Box<Frame>) -> PresentResult<()> {
        if self.use_present_thread {
            self.shared.present_queue.lock().unwrap().push_back(frame);
            self.shared.present_cv.notify_one();
            Ok(())
        } else {
            let _submit_guard = self.shared.submit_mutex.lock().unwrap();
            let result = Self::copy_to_swapchain(&self.device, &self.shared, self.command_pool, self.blit_supported, &frame);
            self.shared.free_queue.lock().unwrap().push_back(frame);
            self.shared.free_cv.notify_one();
            result
        }
    }

    /// Block until the present queue has drained (all previously submitted
    /// frames have completed presenting). A no-op in inline mode, where
    /// [`Self::present`] already blocks.
    pub fn wait_present(&self) {
        if !self.use_present_thread {
            return;
        }
        let mut queue = self.shared.present_queue.lock().unwrap();
        while !queue.is_empty() {
            queue = self.shared.present_cv.wait(queue).unwrap();
        }
        // Ensure the last frame has actually finished its copy/present, not
        // merely left the queue: the present thread holds `submit_mutex`
        // for the duration of `copy_to_swapchain`, so taking it here blocks
        // until that call returns.
        drop(queue);
        drop(self.shared.submit_mutex.lock().unwrap());
    }

    fn present_thread_main(device: &Device, shared: &Arc<Shared>) {
        while !shared.shutdown.load(std::sync::atomic::Ordering::Acquire) {
            let frame = {
                let mut queue = shared.present_queue.lock().unwrap();
                loop {
                    if shared.shutdown.load(std::sync::atomic::Ordering::Acquire) {
                        return;
                    }
                    if let Some(frame) = queue.pop_front() {
                        shared.present_cv.notify_all();
                        break frame;
                    }
                    queue = shared.present_cv.wait(queue).unwrap();
                }
            };

            let submit_guard = shared.submit_mutex.lock().unwrap();
            let blit_supported = {
                let swapchain = shared.swapchain.lock().unwrap();
                Self::can_blit_to_swapchain(device, swapchain.image_format())
            };
            if let Err(err) = Self::copy_to_swapchain(device, shared, vk::CommandPool::null(), blit_supported, &frame) {
                log::error!("present thread: copy_to_swapchain failed: {err}");
            }
            drop(submit_guard);

            shared.free_queue.lock().unwrap().push_back(frame);
            shared.free_cv.notify_one();
        }
    }

    /// `copy_to_swapchain`: recreate if needed, acquire, blit
    /// or copy the frame image into the swapchain image, submit, present.
    /// Retries on `SurfaceLost` up to [`MAX_SURFACE_LOST_RETRIES`] times.
    fn copy_to_swapchain(
        device: &Device,
        shared: &Shared,
        command_pool: vk::CommandPool,
        blit_supported: bool,
        frame: &Frame,
    ) -> PresentResult<()> {
        let mut attempts = 0;
        loop {
            match Self::try_copy_to_swapchain(device, shared, command_pool, blit_supported, frame) {
                Ok(()) => return Ok(()),
                Err(PresentError::SurfaceLost { .. }) => {
                    attempts += 1;
                    if attempts >= MAX_SURFACE_LOST_RETRIES {
                        return Err(PresentError::SurfaceLost { attempts });
                    }
                    log::warn!("presentation: surface lost, recreating (attempt {attempts}/{MAX_SURFACE_LOST_RETRIES})");
                    let mut swapchain = shared.swapchain.lock().unwrap();
                    swapchain.recreate(frame.width, frame.height)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn try_copy_to_swapchain(
        device: &Device,
        shared: &Shared,
        command_pool: vk::CommandPool,
        blit_supported: bool,
        frame: &Frame,
    ) -> PresentResult<()> {
        {
            let mut swapchain = shared.swapchain.lock().unwrap();
            let extent = swapchain.extent();
            if swapchain.needs_recreate() || extent.width != frame.width || extent.height != frame.height {
                swapchain.recreate(frame.width, frame.height)?;
            }

            loop {
                let needs_recreate = swapchain.acquire_next_image()?;
                if !needs_recreate {
                    break;
                }
                swapchain.recreate(frame.width, frame.height)?;
            }
        }

        let swapchain_image;
        let swapchain_extent;
        {
            let swapchain = shared.swapchain.lock().unwrap();
            swapchain_image = swapchain.current_image();
            swapchain_extent = swapchain.extent();
        }

        Self::record_and_submit_copy(device, command_pool, frame, swapchain_image, swapchain_extent, blit_supported)?;

        let mut swapchain = shared.swapchain.lock().unwrap();
        swapchain.present(frame.render_done)?;
        Ok(())
    }

    fn record_and_submit_copy(
        device: &Device,
        command_pool: vk::CommandPool,
        frame: &Frame,
        swapchain_image: vk::Image,
        swapchain_extent: vk::Extent2D,
        blit_supported: bool,
    ) -> PresentResult<()> {
        let command_buffer = frame.command_buffer;
        let _ = command_pool;

        unsafe { device.raw().reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty()) }.map_err(VulkanError::Api)?;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.raw().begin_command_buffer(command_buffer, &begin_info) }.map_err(VulkanError::Api)?;

        let subresource = vk::ImageSubresourceRange::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(1)
            .layer_count(1)
            .build();
        let to_transfer_src = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
            .old_layout(vk::ImageLayout::GENERAL)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .image(frame.image)
            .subresource_range(subresource)
            .build();
        let to_transfer_dst = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .image(swapchain_image)
            .subresource_range(subresource)
            .build();
        unsafe {
            device.raw().cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer_src, to_transfer_dst],
            );
        }

        let subresource_layers = vk::ImageSubresourceLayers::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .layer_count(1)
            .build();
        if blit_supported {
            let blit = vk::ImageBlit::builder()
                .src_subresource(subresource_layers)
                .src_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: frame.width as i32,
                        y: frame.height as i32,
                        z: 1,
                    },
                ])
                .dst_subresource(subresource_layers)
                .dst_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: swapchain_extent.width as i32,
                        y: swapchain_extent.height as i32,
                        z: 1,
                    },
                ]);
            unsafe {
                device.raw().cmd_blit_image(
                    command_buffer,
                    frame.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    swapchain_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit.build()],
                    vk::Filter::LINEAR,
                );
            }
        } else {
            let extent = vk::Extent3D {
                width: frame.width.min(swapchain_extent.width),
                height: frame.height.min(swapchain_extent.height),
                depth: 1,
            };
            let copy = vk::ImageCopy::builder()
                .src_subresource(subresource_layers)
                .dst_subresource(subresource_layers)
                .extent(extent);
            unsafe {
                device.raw().cmd_copy_image(
                    command_buffer,
                    frame.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    swapchain_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[copy.build()],
                );
            }
        }

        let to_present = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::empty())
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .image(swapchain_image)
            .subresource_range(subresource)
            .build();
        let back_to_general = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_READ)
            .dst_access_mask(vk::AccessFlags::empty())
            .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .new_layout(vk::ImageLayout::GENERAL)
            .image(frame.image)
            .subresource_range(subresource)
            .build();
        unsafe {
            device.raw().cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_present, back_to_general],
            );
        }

        unsafe { device.raw().end_command_buffer(command_buffer) }.map_err(VulkanError::Api)?;

        let wait_semaphores = [frame.render_ready];
        let wait_stages = [vk::PipelineStageFlags::TRANSFER];
        let signal_semaphores = [frame.render_done];
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            device
                .raw()
                .queue_submit(device.graphics_queue(), &[submit_info.build()], frame.present_done)
        }
        .map_err(VulkanError::Api)?;

        Ok(())
    }
}

impl Drop for PresentationManager {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, std::sync::atomic::Ordering::Release);
        self.shared.present_cv.notify_all();
        if let Some(handle) = self.present_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        let _ = self.device.wait_idle();
        unsafe { self.device.raw().destroy_command_pool(self.command_pool, None) };
    }
}
