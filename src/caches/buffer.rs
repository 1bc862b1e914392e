//! Buffer Cache.
//!
//! Owns vertex, index, uniform, storage and texel buffers, uploads them via
//! the staging pool, and tracks which byte ranges have been written with a
//! bitset over 64 KiB pages. Also builds the two
//! index-buffer compute passes the façade leans on for topologies the device
//! can't draw natively: quad-to-triangle expansion and `u8` index upconversion.

use super::pipeline::{ComputePipelineKey, PipelineCache};
use super::CacheError;
use crate::device::{Device, MemoryClass, VulkanError};
use crate::scheduler::{Command, Scheduler};
use crate::staging::StagingPool;
use ash::vk;
use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};
use std::sync::Arc;

new_key_type! {
    /// Stable handle to a cached vertex/index/uniform/storage/texel buffer.
    pub struct BufferId;
}

/// Page size the written-region tracker bitsets over; matches the data
/// model's "bitset over 64 KiB pages".
const PAGE_SIZE: vk::DeviceSize = 64 * 1024;

/// Broad role a cached buffer plays; determines its usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Vertex attribute data.
    Vertex,
    /// Index data (`u16`/`u32`).
    Index,
    /// Uniform block data.
    Uniform,
    /// Shader storage buffer data.
    Storage,
    /// Texel (buffer-view-sampled) data.
    Texel,
}

impl BufferKind {
    fn usage_flags(self) -> vk::BufferUsageFlags {
        let base = vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC;
        base | match self {
            Self::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            Self::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            Self::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
            Self::Texel => vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER,
        }
    }
}

/// Tracks which 64 KiB pages of a buffer have been written at least once, so
/// the façade can tell a partially-initialized buffer from a fully-uploaded
/// one without re-scanning its contents.
#[derive(Debug, Default)]
struct WrittenPages {
    pages: Vec<bool>,
}

impl WrittenPages {
    fn new(size: vk::DeviceSize) -> Self {
        let page_count = size.div_ceil(PAGE_SIZE) as usize;
        Self { pages: vec![false; page_count] }
    }

    fn mark(&mut self, offset: vk::DeviceSize, size: vk::DeviceSize) {
        let first = (offset / PAGE_SIZE) as usize;
        let last = ((offset + size).saturating_sub(1) / PAGE_SIZE) as usize;
        for page in &mut self.pages[first..=last.min(self.pages.len().saturating_sub(1))] {
            *page = true;
        }
    }

    fn is_fully_written(&self) -> bool {
        self.pages.iter().all(|&written| written)
    }
}

struct Buffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    kind: BufferKind,
    written: WrittenPages,
}

/// Owns the buffer pool and the lazily-built index-expansion compute passes.
pub struct BufferCache {
    device: Arc<Device>,
    pipelines: Arc<PipelineCache>,
    buffers: Mutex<SlotMap<BufferId, Buffer>>,
    quad_expand: Mutex<Option<ExpandPipeline>>,
    u8_expand: Mutex<Option<ExpandPipeline>>,
}

#[derive(Clone, Copy)]
struct ExpandPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layout: vk::DescriptorSetLayout,
    module: vk::ShaderModule,
}

impl BufferCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(device: Arc<Device>, pipelines: Arc<PipelineCache>) -> Self {
        Self {
            device,
            pipelines,
            buffers: Mutex::new(SlotMap::with_key()),
            quad_expand: Mutex::new(None),
            u8_expand: Mutex::new(None),
        }
    }

    /// Commit a new buffer of `size` bytes for `kind`, uninitialized.
    ///
    /// # Errors
    /// Returns [`CacheError::Vulkan`] if buffer creation fails.
    pub fn create(&self, kind: BufferKind, size: vk::DeviceSize) -> Result<BufferId, CacheError> {
        let create_info = vk::BufferCreateInfo::builder().size(size).usage(kind.usage_flags()).sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_info = MemoryClass::DeviceLocal.allocation_create_info();
        let (buffer, allocation) = unsafe { self.device.allocator().create_buffer(&create_info, &alloc_info) }
            .map_err(|_| CacheError::Vulkan(VulkanError::OutOfMemory { requested: size }))?;

        let id = self.buffers.lock().insert(Buffer {
            buffer,
            allocation,
            size,
            kind,
            written: WrittenPages::new(size),
        });
        Ok(id)
    }

    /// Upload `data` at `offset` into `id` via the given staging pool,
    /// marking the written pages it covers.
    ///
    /// # Errors
    /// Returns [`CacheError::UnknownHandle`] if `id` has been evicted, or
    /// [`CacheError::Vulkan`] if the staging request or copy fails.
    pub fn upload(&self, id: BufferId, offset: vk::DeviceSize, data: &[u8], staging: &mut StagingPool, scheduler: &Scheduler) -> Result<(), CacheError> {
        let dst = {
            let buffers = self.buffers.lock();
            let buffer = buffers.get(id).ok_or(CacheError::UnknownHandle)?;
            buffer.buffer
        };

        let mut staging_ref = staging.request(data.len() as vk::DeviceSize, false).map_err(CacheError::Vulkan)?;
        unsafe { staging_ref.mapped_slice() }.copy_from_slice(data);

        scheduler.record_upload(Command::CopyBuffer {
            src: staging_ref.buffer,
            dst,
            regions: vec![vk::BufferCopy {
                src_offset: staging_ref.offset,
                dst_offset: offset,
                size: data.len() as vk::DeviceSize,
            }],
        });

        if let Some(buffer) = self.buffers.lock().get_mut(id) {
            buffer.written.mark(offset, data.len() as vk::DeviceSize);
        }
        Ok(())
    }

    /// True if every page of `id` has been written at least once.
    ///
    /// # Errors
    /// Returns [`CacheError::UnknownHandle`] if `id` has been evicted.
    pub fn is_fully_written(&self, id: BufferId) -> Result<bool, CacheError> {
        let buffers = self.buffers.lock();
        let buffer = buffers.get(id).ok_or(CacheError::UnknownHandle)?;
        Ok(buffer.written.is_fully_written())
    }

    /// Raw handle for `id`, for binding into vertex/index/descriptor commands.
    ///
    /// # Errors
    /// Returns [`CacheError::UnknownHandle`] if `id` has been evicted.
    pub fn handle(&self, id: BufferId) -> Result<vk::Buffer, CacheError> {
        let buffers = self.buffers.lock();
        Ok(buffers.get(id).ok_or(CacheError::UnknownHandle)?.buffer)
    }

    /// Expand `quad_count` quads worth of quad-topology indices in `src` into
    /// a triangle-list index buffer in `dst` (6 indices per quad, 2 triangles).
    /// Builds the compute pipeline on first use.
    ///
    /// # Errors
    /// Returns [`CacheError::UnknownHandle`] if either handle has been evicted,
    /// or [`CacheError::Vulkan`] if pipeline construction fails.
    pub fn expand_quad_indices(&self, src: BufferId, dst: BufferId, quad_count: u32, scheduler: &Scheduler) -> Result<(), CacheError> {
        let src_buf = self.handle(src)?;
        let dst_buf = self.handle(dst)?;
        let pipeline = self.ensure_expand_pipeline(&self.quad_expand, "quad_index_expand")?;
        self.dispatch_expand(pipeline, src_buf, dst_buf, quad_count, scheduler);
        Ok(())
    }

    /// Upconvert `index_count` `u8` indices in `src` into `u16` indices in
    /// `dst`. Builds the compute pipeline on first use.
    ///
    /// # Errors
    /// Returns [`CacheError::UnknownHandle`] if either handle has been evicted,
    /// or [`CacheError::Vulkan`] if pipeline construction fails.
    pub fn expand_u8_indices(&self, src: BufferId, dst: BufferId, index_count: u32, scheduler: &Scheduler) -> Result<(), CacheError> {
        let src_buf = self.handle(src)?;
        let dst_buf = self.handle(dst)?;
        let pipeline = self.ensure_expand_pipeline(&self.u8_expand, "u8_index_expand")?;
        // 4 indices packed per invocation keeps the dispatch grid the same
        // shape as the quad-expansion pass; workgroup size is baked into the shader.
        self.dispatch_expand(pipeline, src_buf, dst_buf, index_count.div_ceil(4), scheduler);
        Ok(())
    }

    fn dispatch_expand(&self, pipeline: ExpandPipeline, src: vk::Buffer, dst: vk::Buffer, element_count: u32, scheduler: &Scheduler) {
        let descriptor_pool_info = vk::DescriptorPoolSize::builder().ty(vk::DescriptorType::STORAGE_BUFFER).descriptor_count(2).build();
        let pool_sizes = [descriptor_pool_info];
        let pool_info = vk::DescriptorPoolCreateInfo::builder().max_sets(1).pool_sizes(&pool_sizes);
        let descriptor_pool = unsafe { self.device.raw().create_descriptor_pool(&pool_info, None) };
        let Ok(descriptor_pool) = descriptor_pool else {
            log::error!("buffer cache: failed to allocate scratch descriptor pool for index expansion");
            return;
        };

        let layouts = [pipeline.set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder().descriptor_pool(descriptor_pool).set_layouts(&layouts);
        let set = match unsafe { self.device.raw().allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(err) => {
                log::error!("buffer cache: index expansion descriptor set allocation failed: {err}");
                unsafe { self.device.raw().destroy_descriptor_pool(descriptor_pool, None) };
                return;
            }
        };

        let src_info = vk::DescriptorBufferInfo::builder().buffer(src).range(vk::WHOLE_SIZE).build();
        let dst_info = vk::DescriptorBufferInfo::builder().buffer(dst).range(vk::WHOLE_SIZE).build();
        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(std::slice::from_ref(&src_info))
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(std::slice::from_ref(&dst_info))
                .build(),
        ];
        unsafe { self.device.raw().update_descriptor_sets(&writes, &[]) };

        scheduler.record(Command::BindComputePipeline(pipeline.pipeline));
        scheduler.record(Command::BindDescriptorSets {
            bind_point: vk::PipelineBindPoint::COMPUTE,
            layout: pipeline.layout,
            first_set: 0,
            sets: vec![set],
        });
        scheduler.record(Command::Dispatch {
            x: element_count.div_ceil(64),
            y: 1,
            z: 1,
        });

        // The descriptor pool only needs to live until the dispatch above
        // retires; freeing it on a timeline tick callback would need a hook
        // the scheduler doesn't expose, so this submits and blocks on the
        // GPU instead.
        if let Err(err) = scheduler.finish(&[], &[]) {
            log::error!("buffer cache: failed to submit index expansion dispatch: {err}");
        }
        unsafe { self.device.raw().destroy_descriptor_pool(descriptor_pool, None) };
    }

    fn ensure_expand_pipeline(&self, slot: &Mutex<Option<ExpandPipeline>>, shader_name: &str) -> Result<ExpandPipeline, CacheError> {
        let mut guard = slot.lock();
        if guard.is_none() {
            *guard = Some(self.build_expand_pipeline(shader_name)?);
        }
        Ok(*guard.as_ref().unwrap())
    }

    fn build_expand_pipeline(&self, shader_name: &str) -> Result<ExpandPipeline, CacheError> {
        let spirv: &[u8] = match shader_name {
            "quad_index_expand" => include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/target/shaders/quad_index_expand.comp.spv")),
            "u8_index_expand" => include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/target/shaders/u8_index_expand.comp.spv")),
            _ => unreachable!("unknown index expansion shader"),
        };

        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
        ];
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let set_layout = unsafe { self.device.raw().create_descriptor_set_layout(&set_layout_info, None) }.map_err(|e| CacheError::Vulkan(VulkanError::Api(e)))?;

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = unsafe { self.device.raw().create_pipeline_layout(&layout_info, None) }.map_err(|e| CacheError::Vulkan(VulkanError::Api(e)))?;

        let words = ash::util::read_spv(&mut std::io::Cursor::new(spirv)).map_err(|e| CacheError::ConvertFailed(format!("invalid SPIR-V for {shader_name}: {e}")))?;
        let module_info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let module = unsafe { self.device.raw().create_shader_module(&module_info, None) }.map_err(|e| CacheError::Vulkan(VulkanError::Api(e)))?;

        let key = ComputePipelineKey {
            shader_hash: xxhash_rust::xxh3::xxh3_64(spirv),
            shared_memory_size: 0,
            workgroup_size: [64, 1, 1],
        };
        let pipeline = self.pipelines.current_compute_pipeline(key, layout, module).map_err(CacheError::Vulkan)?;

        Ok(ExpandPipeline { pipeline, layout, set_layout, module })
    }
}

impl Drop for BufferCache {
    fn drop(&mut self) {
        let raw = self.device.raw();
        for slot in [&self.quad_expand, &self.u8_expand] {
            if let Some(pipeline) = slot.lock().take() {
                unsafe {
                    raw.destroy_shader_module(pipeline.module, None);
                    raw.destroy_pipeline_layout(pipeline.layout, None);
                    raw.destroy_descriptor_set_layout(pipeline.set_layout, None);
                }
            }
        }
        for (_, mut buffer) in self.buffers.lock().drain() {
            unsafe { self.device.allocator().destroy_buffer(buffer.buffer, &mut buffer.allocation) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_pages_tracks_partial_coverage() {
        let mut pages = WrittenPages::new(3 * PAGE_SIZE);
        assert!(!pages.is_fully_written());
        pages.mark(0, PAGE_SIZE);
        assert!(!pages.is_fully_written());
        pages.mark(PAGE_SIZE, 2 * PAGE_SIZE);
        assert!(pages.is_fully_written());
    }

    #[test]
    fn written_pages_mark_spanning_a_boundary() {
        let mut pages = WrittenPages::new(2 * PAGE_SIZE);
        pages.mark(PAGE_SIZE / 2, PAGE_SIZE);
        assert!(pages.pages[0]);
        assert!(pages.pages[1]);
    }

    #[test]
    fn buffer_kind_always_carries_transfer_usage() {
        for kind in [BufferKind::Vertex, BufferKind::Index, BufferKind::Uniform, BufferKind::Storage, BufferKind::Texel] {
            let flags = kind.usage_flags();
            assert!(flags.contains(vk::BufferUsageFlags::TRANSFER_DST));
            assert!(flags.contains(vk::BufferUsageFlags::TRANSFER_SRC));
        }
    }
}
