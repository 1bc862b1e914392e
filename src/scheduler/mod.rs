//! Scheduler.
//!
//! Records Vulkan commands into bump-allocated [`CommandChunk`]s on the
//! caller's thread, then hands finished chunks to a worker thread that
//! replays them into real `vk::CommandBuffer`s and submits. This keeps
//! command recording off the critical submission path and lets the caller
//! keep issuing draw calls while the previous chunk is still being replayed.
//!
//! Each chunk carries two command lists: the main one, and an upload list
//! recorded via [`Scheduler::record_upload`]. The worker replays both into a
//! persistent pair of command buffers and only ends/submits/reallocates that
//! pair when a chunk was produced by [`Scheduler::flush`] (a real submission
//! point, as opposed to [`Scheduler::dispatch_work`]'s mid-stream handoff).
//! On a real submission the upload buffer gets one transfer-to-all-commands
//! write barrier appended before it ends, so buffer uploads recorded through
//! `record_upload` are visible to whatever in the main buffer reads them.

mod chunk;
mod state;

pub use chunk::{Command, CommandChunk};
pub use state::RenderPassState;

use crate::device::{Device, VulkanError, VulkanResult};
use crate::timeline::{MasterTimeline, Tick};
use ash::vk;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Deferred, multi-threaded command recorder and submitter.
///
/// Callers record into the current chunk via [`Self::record`], request
/// render-pass/barrier transitions via [`Self::request_render_pass`] and
/// friends, and call [`Self::flush`] to submit the chunk. [`Self::finish`]
/// additionally blocks until the GPU has retired it, used before presenting
/// or reading back GPU memory.
pub struct Scheduler {
    device: Arc<Device>,
    timeline: Arc<MasterTimeline>,
    command_pool: vk::CommandPool,
    current_chunk: Mutex<CommandChunk>,
    state: Mutex<RenderPassState>,
    chunk_tx: Sender<WorkItem>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_idle: Arc<std::sync::Condvar>,
    worker_idle_flag: Arc<Mutex<bool>>,
}

enum WorkItem {
    /// A chunk to replay, plus the semaphores its submission should wait on
    /// and signal. `tick` is `Some` only for a real submission point
    /// ([`Scheduler::flush`]); `None` means this is a mid-stream handoff
    /// ([`Scheduler::dispatch_work`]) and the worker must not end or submit
    /// its persistent command buffers yet.
    Chunk {
        chunk: CommandChunk,
        signal: Vec<vk::Semaphore>,
        wait: Vec<vk::Semaphore>,
        tick: Option<Tick>,
    },
    Shutdown,
}

impl Scheduler {
    /// Create the scheduler's command pool, worker thread, and initial chunk.
    ///
    /// # Errors
    /// Returns [`VulkanError::Api`] if the command pool cannot be created.
    pub fn new(device: Arc<Device>, timeline: Arc<MasterTimeline>) -> VulkanResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.physical().graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.raw().create_command_pool(&pool_info, None) }
            .map_err(VulkanError::Api)?;

        let (chunk_tx, chunk_rx) = std::sync::mpsc::channel();
        let worker_idle = Arc::new(std::sync::Condvar::new());
        let worker_idle_flag = Arc::new(Mutex::new(true));

        let worker = {
            let device = device.clone();
            let timeline = timeline.clone();
            let queue = device.graphics_queue();
            let command_pool = command_pool;
            let worker_idle = worker_idle.clone();
            let worker_idle_flag = worker_idle_flag.clone();
            std::thread::Builder::new()
                .name("vk-render-core-scheduler-worker".into())
                .spawn(move || {
                    Self::worker_main(
                        &device,
                        &timeline,
                        queue,
                        command_pool,
                        &chunk_rx,
                        &worker_idle,
                        &worker_idle_flag,
                    );
                })
                .expect("failed to spawn scheduler worker thread")
        };

        Ok(Self {
            device,
            timeline,
            command_pool,
            current_chunk: Mutex::new(CommandChunk::new()),
            state: Mutex::new(RenderPassState::default()),
            chunk_tx,
            worker: Mutex::new(Some(worker)),
            worker_idle,
            worker_idle_flag,
        })
    }

    /// Allocate and begin (`ONE_TIME_SUBMIT`) a fresh main/upload command
    /// buffer pair from `command_pool`.
    fn allocate_command_buffer_pair(device: &Device, command_pool: vk::CommandPool) -> (vk::CommandBuffer, vk::CommandBuffer) {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(2);
        let buffers = unsafe { device.raw().allocate_command_buffers(&alloc_info) }
            .expect("failed to allocate scheduler command buffers");

        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        for &buffer in &buffers {
            unsafe { device.raw().begin_command_buffer(buffer, &begin_info) }
                .expect("failed to begin scheduler command buffer");
        }

        (buffers[0], buffers[1])
    }

    /// Record the write barrier that protects this submission's buffer
    /// uploads (`record_upload`'s `CopyBuffer`s) from a later read in the
    /// main command buffer of the same batch. Texture uploads insert their
    /// own layout-transition barriers already and don't need this.
    fn record_submit_barrier(device: &Device, upload_command_buffer: vk::CommandBuffer) {
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_WRITE | vk::AccessFlags::MEMORY_READ)
            .build();
        unsafe {
            device.raw().cmd_pipeline_barrier(
                upload_command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    fn worker_main(
        device: &Device,
        timeline: &MasterTimeline,
        queue: vk::Queue,
        command_pool: vk::CommandPool,
        chunk_rx: &Receiver<WorkItem>,
        worker_idle: &std::sync::Condvar,
        worker_idle_flag: &Mutex<bool>,
    ) {
        let (mut command_buffer, mut upload_command_buffer) = Self::allocate_command_buffer_pair(device, command_pool);

        while let Ok(item) = chunk_rx.recv() {
            let (chunk, signal, wait, tick) = match item {
                WorkItem::Chunk { chunk, signal, wait, tick } => (chunk, signal, wait, tick),
                WorkItem::Shutdown => break,
            };

            *worker_idle_flag.lock().unwrap() = false;

            chunk.replay_upload(device, upload_command_buffer);
            chunk.replay(device, command_buffer);

            if let Some(tick) = tick {
                Self::record_submit_barrier(device, upload_command_buffer);

                unsafe { device.raw().end_command_buffer(upload_command_buffer) }
                    .expect("failed to end scheduler upload command buffer");
                unsafe { device.raw().end_command_buffer(command_buffer) }
                    .expect("failed to end scheduler command buffer");

                let submit_result = timeline.submit_queue(
                    device,
                    queue,
                    &[upload_command_buffer, command_buffer],
                    &wait,
                    &signal,
                    tick,
                );
                if let Err(err) = submit_result {
                    log::error!("scheduler worker: submit failed: {err}");
                }

                let pair = Self::allocate_command_buffer_pair(device, command_pool);
                command_buffer = pair.0;
                upload_command_buffer = pair.1;
            }

            *worker_idle_flag.lock().unwrap() = true;
            worker_idle.notify_all();
        }
    }

    /// Append `command` to the main list of the chunk currently being
    /// recorded.
    pub fn record(&self, command: Command) {
        let mut chunk = self.current_chunk.lock().unwrap();
        if !chunk.push(command) {
            drop(chunk);
            self.dispatch_work();
            self.current_chunk.lock().unwrap().push(command);
        }
    }

    /// Append `command` to the upload list of the chunk currently being
    /// recorded. Upload commands replay on a separate command buffer,
    /// submitted ahead of the main one in the same batch.
    pub fn record_upload(&self, command: Command) {
        let mut chunk = self.current_chunk.lock().unwrap();
        if !chunk.push_upload(command) {
            drop(chunk);
            self.dispatch_work();
            self.current_chunk.lock().unwrap().push_upload(command);
        }
    }

    /// Record `upload` onto the upload list and `command` onto the main list
    /// of the chunk currently being recorded.
    pub fn record_with_upload_buf(&self, upload: Command, command: Command) {
        self.record_upload(upload);
        self.record(command);
    }

    /// Begin (or continue, if attachments are unchanged) a render pass with
    /// the given color/depth attachments and render area.
    pub fn request_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
    ) {
        let mut state = self.state.lock().unwrap();
        if state.matches_render_pass(render_pass, framebuffer, render_area) {
            return;
        }
        state.begin_render_pass(render_pass, framebuffer, render_area);
        self.record(Command::BeginRenderPass {
            render_pass,
            framebuffer,
            render_area,
        });
    }

    /// Begin (or continue) dynamic rendering with the given attachments, for
    /// devices that negotiated `VK_KHR_dynamic_rendering`.
    pub fn request_rendering(&self, render_area: vk::Rect2D, color_formats: &[vk::Format]) {
        let mut state = self.state.lock().unwrap();
        if state.matches_rendering(render_area, color_formats) {
            return;
        }
        state.begin_rendering(render_area, color_formats);
        self.record(Command::BeginRendering {
            render_area,
            color_formats: color_formats.to_vec(),
        });
    }

    /// End whatever render pass/dynamic rendering is currently active, if any.
    /// Required before barriers that touch attachments currently bound, and
    /// before any submission.
    pub fn request_outside_render_pass(&self) {
        let mut state = self.state.lock().unwrap();
        if state.end_render_pass() {
            self.record(Command::EndRenderPass);
        }
    }

    /// Drop cached render-pass/pipeline state, forcing the next
    /// `request_*`/`update_graphics_pipeline` call to re-bind unconditionally.
    /// Used after a swapchain resize or descriptor layout change invalidates
    /// assumptions the state cache was relying on.
    pub fn invalidate_state(&self) {
        *self.state.lock().unwrap() = RenderPassState::default();
    }

    /// Bind `pipeline`, skipping the command if it's already bound (the
    /// common case: consecutive draws with the same material).
    pub fn update_graphics_pipeline(&self, pipeline: vk::Pipeline) {
        let mut state = self.state.lock().unwrap();
        if state.matches_graphics_pipeline(pipeline) {
            return;
        }
        state.set_graphics_pipeline(pipeline);
        self.record(Command::BindGraphicsPipeline(pipeline));
    }

    /// Hand the current chunk to the worker thread without submitting it: a
    /// mid-stream capacity handoff, not a real submission point. A no-op if
    /// the current chunk is empty. The replayed commands stay queued on the
    /// worker's still-open persistent command buffers until a later
    /// [`Self::flush`] ends and submits them.
    pub fn dispatch_work(&self) {
        let mut chunk = self.current_chunk.lock().unwrap();
        if chunk.is_empty() {
            return;
        }
        let finished = std::mem::replace(&mut *chunk, CommandChunk::new());
        drop(chunk);
        self.send_chunk(finished, Vec::new(), Vec::new(), None);
    }

    /// End any open render pass, reserve the next tick, and submit the
    /// current chunk (even if empty, so `signal` is always signaled exactly
    /// once per call). Returns the tick this submission was stamped with.
    pub fn flush(&self, signal: &[vk::Semaphore], wait: &[vk::Semaphore]) -> Tick {
        self.request_outside_render_pass();
        self.invalidate_state();

        let tick = self.timeline.next_tick();

        let mut chunk = self.current_chunk.lock().unwrap();
        let mut finished = std::mem::replace(&mut *chunk, CommandChunk::new());
        drop(chunk);
        finished.mark_submit();

        self.send_chunk(finished, signal.to_vec(), wait.to_vec(), Some(tick));
        tick
    }

    fn send_chunk(&self, chunk: CommandChunk, signal: Vec<vk::Semaphore>, wait: Vec<vk::Semaphore>, tick: Option<Tick>) {
        if self
            .chunk_tx
            .send(WorkItem::Chunk { chunk, signal, wait, tick })
            .is_err()
        {
            log::error!("scheduler: worker thread is gone, dropping chunk");
        }
    }

    /// Block until the worker has replayed and submitted every chunk sent so
    /// far.
    pub fn wait_worker(&self) {
        let mut idle = self.worker_idle_flag.lock().unwrap();
        while !*idle {
            idle = self.worker_idle.wait(idle).unwrap();
        }
    }

    /// [`Self::flush`], then block until the GPU has retired the submission.
    /// Called before present and before the scheduler is torn down.
    ///
    /// # Errors
    /// Returns [`VulkanError::Api`] if the wait on the submitted tick fails.
    pub fn finish(&self, signal: &[vk::Semaphore], wait: &[vk::Semaphore]) -> VulkanResult<Tick> {
        let tick = self.flush(signal, wait);
        self.wait_worker();
        self.timeline.wait(&self.device, tick)?;
        Ok(tick)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(err) = self.finish(&[], &[]) {
            log::error!("scheduler: final finish failed: {err}");
        }
        let _ = self.chunk_tx.send(WorkItem::Shutdown);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        unsafe { self.device.raw().destroy_command_pool(self.command_pool, None) };
    }
}
