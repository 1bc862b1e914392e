//! Master Timeline.
//!
//! Tracks a monotonically increasing "tick" per submitted batch of work so the
//! rest of the core can ask "has the GPU finished tick N yet?" without
//! blocking. Two strategies implement the same interface: a timeline
//! semaphore on devices that support `VK_KHR_timeline_semaphore`, and a
//! fence-per-submission fallback with a dedicated wait thread elsewhere.

use crate::device::{Device, VulkanError, VulkanResult};
use ash::vk;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// A GPU-completion tick. Ticks are issued by [`MasterTimeline::next_tick`]
/// and become "known complete" once the GPU retires the matching submission.
pub type Tick = u64;

const FENCE_RESERVE_SIZE: usize = 8;
const WAIT_STAGE_MASKS: [vk::PipelineStageFlags; 2] = [
    vk::PipelineStageFlags::ALL_COMMANDS,
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
];

enum Strategy {
    Timeline {
        semaphore: vk::Semaphore,
    },
    FenceEmulated {
        free_fences: Mutex<Vec<vk::Fence>>,
        in_flight: Mutex<VecDeque<(Tick, vk::Fence)>>,
        wait_cv: Condvar,
        wait_thread: Mutex<Option<JoinHandle<()>>>,
        shutdown: std::sync::atomic::AtomicBool,
    },
}

/// Orders and tracks GPU submissions relative to a single monotonic counter.
///
/// Mirrors the `MasterSemaphore` split: a timeline-semaphore fast path when
/// `VK_KHR_timeline_semaphore` is present, a fence-and-wait-thread emulation
/// otherwise. Callers only ever see [`MasterTimeline::current_tick`],
/// [`MasterTimeline::known_gpu_tick`], [`MasterTimeline::is_free`] and
/// [`MasterTimeline::wait`]; the strategy split is an implementation detail.
pub struct MasterTimeline {
    device: Arc<Device>,
    current_tick: AtomicU64,
    gpu_tick: AtomicU64,
    strategy: Strategy,
}

impl MasterTimeline {
    /// Create a new timeline, preferring the timeline-semaphore strategy when
    /// `device` negotiated `VK_KHR_timeline_semaphore`.
    ///
    /// # Errors
    /// Returns [`VulkanError::Api`] if semaphore/fence creation fails.
    pub fn new(device: &Arc<Device>) -> VulkanResult<Arc<Self>> {
        let strategy = if device.features().timeline_semaphore {
            let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
                .semaphore_type(vk::SemaphoreType::TIMELINE)
                .initial_value(0);
            let create_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);
            let semaphore = unsafe { device.raw().create_semaphore(&create_info, None) }
                .map_err(VulkanError::Api)?;
            Strategy::Timeline { semaphore }
        } else {
            let mut free_fences = Vec::with_capacity(FENCE_RESERVE_SIZE);
            for _ in 0..FENCE_RESERVE_SIZE {
                let create_info = vk::FenceCreateInfo::builder();
                free_fences.push(unsafe { device.raw().create_fence(&create_info, None) }.map_err(VulkanError::Api)?);
            }
            Strategy::FenceEmulated {
                free_fences: Mutex::new(free_fences),
                in_flight: Mutex::new(VecDeque::new()),
                wait_cv: Condvar::new(),
                wait_thread: Mutex::new(None),
                shutdown: std::sync::atomic::AtomicBool::new(false),
            }
        };

        let timeline = Arc::new(Self {
            device: device.clone(),
            current_tick: AtomicU64::new(1),
            gpu_tick: AtomicU64::new(0),
            strategy,
        });

        if matches!(timeline.strategy, Strategy::FenceEmulated { .. }) {
            timeline.clone().spawn_wait_thread(device.clone());
        }

        Ok(timeline)
    }

    fn spawn_wait_thread(self: Arc<Self>, device: Arc<Device>) {
        let Strategy::FenceEmulated { wait_thread, .. } = &self.strategy else {
            return;
        };
        let timeline = self.clone();
        let handle = std::thread::Builder::new()
            .name("vk-render-core-timeline-wait".into())
            .spawn(move || timeline.wait_thread_main(&device))
            .expect("failed to spawn timeline wait thread");
        *wait_thread.lock().unwrap() = Some(handle);
    }

    fn wait_thread_main(&self, device: &Device) {
        let Strategy::FenceEmulated {
            free_fences,
            in_flight,
            wait_cv,
            shutdown,
            ..
        } = &self.strategy
        else {
            return;
        };

        loop {
            let (tick, fence) = {
                let mut guard = in_flight.lock().unwrap();
                loop {
                    if shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    if let Some(front) = guard.pop_front() {
                        break front;
                    }
                    guard = wait_cv.wait(guard).unwrap();
                }
            };

            let wait_result = unsafe { device.raw().wait_for_fences(&[fence], true, u64::MAX) };
            if let Err(err) = wait_result {
                log::error!("timeline wait thread: vkWaitForFences failed: {err:?}");
            }
            let _ = unsafe { device.raw().reset_fences(&[fence]) };

            self.gpu_tick.fetch_max(tick, Ordering::Release);
            free_fences.lock().unwrap().push(fence);
        }
    }

    /// The tick that will be assigned to the next submission.
    #[must_use]
    pub fn current_tick(&self) -> Tick {
        self.current_tick.load(Ordering::Acquire)
    }

    /// The highest tick the GPU is known to have completed.
    ///
    /// For the fence strategy this lags reality until the wait thread catches
    /// up; callers that need a precise answer should use [`Self::refresh`].
    #[must_use]
    pub fn known_gpu_tick(&self) -> Tick {
        self.gpu_tick.load(Ordering::Acquire)
    }

    /// Reserve and return the tick the next submission will use.
    ///
    /// Only the thread that is about to submit should call this: the value
    /// returned here is exactly what [`Self::current_tick`] predicted a
    /// moment ago, so resource stampers that only ever read
    /// [`Self::current_tick`] still land on the tick this call hands out.
    pub fn next_tick(&self) -> Tick {
        self.current_tick.fetch_add(1, Ordering::AcqRel)
    }

    /// True if the GPU has completed `tick` as of the last [`Self::refresh`].
    #[must_use]
    pub fn is_free(&self, tick: Tick) -> bool {
        self.known_gpu_tick() >= tick
    }

    /// Re-query the GPU-side completion value without blocking.
    ///
    /// On the timeline-semaphore path this issues `vkGetSemaphoreCounterValue`.
    /// On the fence path the wait thread keeps `gpu_tick` current already, so
    /// this is a no-op fast read.
    ///
    /// # Errors
    /// Returns [`VulkanError::Api`] if the semaphore query fails.
    pub fn refresh(&self, device: &Device) -> VulkanResult<Tick> {
        if let Strategy::Timeline { semaphore } = &self.strategy {
            let value = unsafe { device.raw().get_semaphore_counter_value(*semaphore) }
                .map_err(VulkanError::Api)?;
            self.gpu_tick.fetch_max(value, Ordering::Release);
        }
        Ok(self.known_gpu_tick())
    }

    /// Block the calling thread until `tick` completes.
    ///
    /// # Errors
    /// Returns [`VulkanError::Api`] if the underlying wait call fails or times out.
    pub fn wait(&self, device: &Device, tick: Tick) -> VulkanResult<()> {
        if self.is_free(tick) {
            return Ok(());
        }
        match &self.strategy {
            Strategy::Timeline { semaphore } => {
                let semaphores = [*semaphore];
                let values = [tick];
                let wait_info = vk::SemaphoreWaitInfo::builder()
                    .semaphores(&semaphores)
                    .values(&values);
                unsafe { device.raw().wait_semaphores(&wait_info, u64::MAX) }.map_err(VulkanError::Api)?;
                self.gpu_tick.fetch_max(tick, Ordering::Release);
                Ok(())
            }
            Strategy::FenceEmulated { .. } => {
                while !self.is_free(tick) {
                    std::thread::yield_now();
                }
                Ok(())
            }
        }
    }

    /// Submit `command_buffers` to `queue`, tagging the submission with
    /// `tick`. `tick` must have been reserved by the caller via
    /// [`Self::next_tick`] before any resource referenced by these command
    /// buffers was stamped, so that the stamp and the submission agree.
    ///
    /// # Errors
    /// Returns [`VulkanError::Api`] if `vkQueueSubmit`, or fence/semaphore
    /// bookkeeping around it, fails.
    pub fn submit_queue(
        &self,
        device: &Device,
        queue: vk::Queue,
        command_buffers: &[vk::CommandBuffer],
        wait_semaphores: &[vk::Semaphore],
        signal_semaphores: &[vk::Semaphore],
        tick: Tick,
    ) -> VulkanResult<Tick> {
        match &self.strategy {
            Strategy::Timeline { semaphore } => {
                let mut signal = signal_semaphores.to_vec();
                signal.push(*semaphore);
                let mut signal_values = vec![0u64; signal_semaphores.len()];
                signal_values.push(tick);

                let wait_stages = vec![WAIT_STAGE_MASKS[0]; wait_semaphores.len()];
                let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&signal_values);

                let submit_info = vk::SubmitInfo::builder()
                    .wait_semaphores(wait_semaphores)
                    .wait_dst_stage_mask(&wait_stages)
                    .command_buffers(command_buffers)
                    .signal_semaphores(&signal)
                    .push_next(&mut timeline_info);

                unsafe { device.raw().queue_submit(queue, &[submit_info.build()], vk::Fence::null()) }
                    .map_err(VulkanError::Api)?;
            }
            Strategy::FenceEmulated {
                free_fences,
                in_flight,
                wait_cv,
                ..
            } => {
                let fence = free_fences
                    .lock()
                    .unwrap()
                    .pop()
                    .ok_or(VulkanError::InvalidOperation {
                        reason: "fence-emulated timeline exhausted its fence reserve".into(),
                    })?;

                let wait_stages = vec![WAIT_STAGE_MASKS[0]; wait_semaphores.len()];
                let submit_info = vk::SubmitInfo::builder()
                    .wait_semaphores(wait_semaphores)
                    .wait_dst_stage_mask(&wait_stages)
                    .command_buffers(command_buffers)
                    .signal_semaphores(signal_semaphores);

                unsafe { device.raw().queue_submit(queue, &[submit_info.build()], fence) }
                    .map_err(VulkanError::Api)?;

                in_flight.lock().unwrap().push_back((tick, fence));
                wait_cv.notify_one();
            }
        }

        Ok(tick)
    }
}

impl Drop for MasterTimeline {
    fn drop(&mut self) {
        match &self.strategy {
            Strategy::Timeline { semaphore } => unsafe {
                self.device.raw().destroy_semaphore(*semaphore, None);
            },
            Strategy::FenceEmulated {
                shutdown,
                wait_cv,
                wait_thread,
                free_fences,
                in_flight,
            } => {
                shutdown.store(true, Ordering::Release);
                wait_cv.notify_all();
                if let Some(handle) = wait_thread.lock().unwrap().take() {
                    let _ = handle.join();
                }
                let mut fences = free_fences.lock().unwrap();
                fences.extend(in_flight.lock().unwrap().drain(..).map(|(_, f)| f));
                for fence in fences.drain(..) {
                    unsafe { self.device.raw().destroy_fence(fence, None) };
                }
            }
        }
    }
}
