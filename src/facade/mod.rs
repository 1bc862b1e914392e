//! Graphic façade.
//!
//! Public surface: upload mesh/texture data, record draws and compute
//! dispatches, clear the bound render target, advance to the next frame, and
//! (on [`Renderer`]) composite the registered layers onto the swapchain.
//! Everything below this module is an implementation detail the façade wires
//! together — the caller never touches a cache or the scheduler directly.

pub mod model;
pub mod pipeline_state;

pub use model::{IndexWidth, MeshData, ModelId, TextureData, VertexAttribute, VertexBinding};
pub use pipeline_state::{ClearValue, ComputeInstance, DrawInstance, PipelineState, ShaderStage, Topology};

use crate::caches::buffer::{BufferCache, BufferId, BufferKind};
use crate::caches::pipeline::{ComputePipelineKey, GraphicsPipelineKey, PipelineCache, VertexAttributeKey};
use crate::caches::render_pass::{RenderPassCache, RenderPassKey};
use crate::caches::texture::{FramebufferKey, SamplerKey, TextureCache, TextureId};
use crate::caches::CacheError;
use crate::config::{RendererConfig, ScalingFilter};
use crate::descriptor::{DescriptorBankInfo, DescriptorPool};
use crate::device::{Device, VulkanError};
use crate::error::{EngineError, EngineResult};
use crate::format::PixelFormat;
use crate::presentation::{BlitScreen, Frame, FramebufferConfig, PresentationManager};
use crate::scheduler::{Command, Scheduler};
use crate::staging::StagingPool;
use crate::timeline::MasterTimeline;
use ash::vk;
use parking_lot::Mutex;
use slotmap::SlotMap;
use std::path::PathBuf;
use std::sync::Arc;

const PIPELINE_CACHE_FILE: &str = "data/cache/pipeline/vulkan.bin";
const PIPELINE_WORKER_THREADS: usize = 2;
const DRAW_UNIFORM_RING_CAPACITY: vk::DeviceSize = 1024 * 1024;
const DRAW_UNIFORM_ALIGNMENT: vk::DeviceSize = 256;
const MAX_COMPUTE_STORAGE_BUFFERS: usize = 8;

/// Registry entry behind a [`ModelId`]: the buffers and vertex layout needed
/// to bind and draw it.
struct ModelEntry {
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    index_count: u32,
    index_type: vk::IndexType,
    vertex_attrs: Vec<VertexAttribute>,
    vertex_bindings: Vec<VertexBinding>,
}

/// Render target state shared by `draw` and `clean`: the render pass and
/// framebuffer [`Graphic::bind_render_target`] last built, plus the inputs
/// the graphics pipeline key needs.
struct RenderTarget {
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    render_area: vk::Rect2D,
    color_formats: Vec<vk::Format>,
    has_depth: bool,
    samples: vk::SampleCountFlags,
}

struct UniformRing {
    buffer: BufferId,
    cursor: vk::DeviceSize,
}

/// The public rendering-core API surface an application drives.
///
/// Owns every cache, the scheduler, and the descriptor pool. Dropping a
/// `Graphic` waits for the device to go idle before anything underneath it
/// is torn down (each owned cache's own `Drop` handles that).
pub struct Graphic {
    device: Arc<Device>,
    timeline: Arc<MasterTimeline>,
    scheduler: Scheduler,
    render_passes: Arc<RenderPassCache>,
    pipelines: Arc<PipelineCache>,
    descriptors: DescriptorPool,
    buffers: BufferCache,
    textures: TextureCache,
    upload_staging: Mutex<StagingPool>,
    download_staging: Mutex<StagingPool>,
    models: Mutex<SlotMap<ModelId, ModelEntry>>,
    render_target: Mutex<Option<RenderTarget>>,

    draw_set_layout: vk::DescriptorSetLayout,
    draw_pipeline_layout: vk::PipelineLayout,
    draw_descriptor_allocator: Mutex<crate::descriptor::DescriptorAllocator>,
    uniform_ring: Mutex<UniformRing>,
    default_texture: TextureId,

    compute_set_layout: vk::DescriptorSetLayout,
    compute_pipeline_layout: vk::PipelineLayout,
    compute_descriptor_allocator: Mutex<crate::descriptor::DescriptorAllocator>,
}

impl Graphic {
    /// Stand up every cache, the scheduler, and the descriptor pool against
    /// `device`, honoring `config`'s cache/async-shader/worker-thread settings.
    ///
    /// # Errors
    /// Returns [`EngineError`] if any owned Vulkan object fails to create.
    pub fn new(device: Arc<Device>, config: &RendererConfig) -> EngineResult<Self> {
        let timeline = MasterTimeline::new(&device)?;
        let scheduler = Scheduler::new(device.clone(), timeline.clone())?;
        let render_passes = Arc::new(RenderPassCache::new(device.clone()));
        let cache_file = config.use_pipeline_cache.then(|| PathBuf::from(PIPELINE_CACHE_FILE));
        let pipelines = Arc::new(PipelineCache::new(
            device.clone(),
            render_passes.clone(),
            cache_file,
            config.use_pipeline_cache,
            config.use_asynchronous_shaders,
            PIPELINE_WORKER_THREADS,
        )?);
        let descriptors = DescriptorPool::new(device.clone(), timeline.clone());
        let buffers = BufferCache::new(device.clone(), pipelines.clone());
        let textures = TextureCache::new(device.clone());
        let upload_staging = Mutex::new(StagingPool::new(device.clone(), timeline.clone(), crate::device::MemoryClass::Upload));
        let download_staging = Mutex::new(StagingPool::new(device.clone(), timeline.clone(), crate::device::MemoryClass::Download));

        let (draw_set_layout, draw_pipeline_layout) = build_draw_layout(&device)?;
        let draw_bank_info = DescriptorBankInfo {
            uniform_buffers: 1,
            textures: 1,
            ..DescriptorBankInfo::default()
        };
        let draw_descriptor_allocator = Mutex::new(descriptors.allocator(draw_set_layout, draw_bank_info));

        let uniform_buffer = buffers.create(BufferKind::Uniform, DRAW_UNIFORM_RING_CAPACITY)?;
        let uniform_ring = Mutex::new(UniformRing { buffer: uniform_buffer, cursor: 0 });

        let default_texture = create_default_texture(&textures, &upload_staging, &scheduler)?;

        let (compute_set_layout, compute_pipeline_layout) = build_compute_layout(&device)?;
        let compute_bank_info = DescriptorBankInfo {
            storage_buffers: MAX_COMPUTE_STORAGE_BUFFERS as u32,
            ..DescriptorBankInfo::default()
        };
        let compute_descriptor_allocator = Mutex::new(descriptors.allocator(compute_set_layout, compute_bank_info));

        Ok(Self {
            device,
            timeline,
            scheduler,
            render_passes,
            pipelines,
            descriptors,
            buffers,
            textures,
            upload_staging,
            download_staging,
            models: Mutex::new(SlotMap::with_key()),
            render_target: Mutex::new(None),
            draw_set_layout,
            draw_pipeline_layout,
            draw_descriptor_allocator,
            uniform_ring,
            default_texture,
            compute_set_layout,
            compute_pipeline_layout,
            compute_descriptor_allocator,
        })
    }

    /// Build (or reuse, from cache) a render pass and framebuffer for
    /// `color_targets` (and an optional depth target), and make it the
    /// target subsequent [`Self::draw`]/[`Self::clean`] calls render into.
    ///
    /// # Errors
    /// Returns [`EngineError`] if any referenced texture handle is unknown or
    /// render pass/framebuffer construction fails.
    pub fn bind_render_target(
        &self,
        color_targets: &[(TextureId, vk::Format)],
        depth_target: Option<(TextureId, vk::Format)>,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> EngineResult<()> {
        let mut color_views = Vec::with_capacity(color_targets.len());
        let mut color_formats = Vec::with_capacity(color_targets.len());
        for &(id, format) in color_targets {
            color_views.push(self.textures.view(id, vk::ImageViewType::TYPE_2D)?);
            color_formats.push(format);
        }
        let (depth_view, depth_format) = match depth_target {
            Some((id, format)) => (Some(self.textures.view(id, vk::ImageViewType::TYPE_2D)?), format),
            None => (None, vk::Format::UNDEFINED),
        };

        let render_pass_key = RenderPassKey::new(&color_formats, depth_format, samples, false, depth_target.is_some());
        let render_pass = self.render_passes.get(render_pass_key)?;

        let framebuffer_key = FramebufferKey {
            color_views,
            depth_view,
            render_pass,
            width: extent.width,
            height: extent.height,
        };
        let framebuffer = self.textures.framebuffer(framebuffer_key)?;
        let render_area = vk::Rect2D { offset: vk::Offset2D::default(), extent };

        *self.render_target.lock() = Some(RenderTarget {
            render_pass,
            framebuffer,
            render_area,
            color_formats,
            has_depth: depth_target.is_some(),
            samples,
        });
        self.scheduler.request_render_pass(render_pass, framebuffer, render_area);
        Ok(())
    }

    /// Upload `mesh`'s vertex/index data into fresh GPU buffers and register
    /// a [`ModelId`] for it. `u8`-width indices are upconverted to `u16` via
    /// the buffer cache's index-expansion compute pass before the model is
    /// usable.
    ///
    /// # Errors
    /// Returns [`EngineError`] if buffer creation or upload fails.
    pub fn upload_model(&self, mesh: MeshData<'_>) -> EngineResult<ModelId> {
        let index_width = IndexWidth::from_byte_ratio(mesh.indices_bytes.len(), mesh.indices_count);

        let vertex_bytes: &[u8] = bytemuck::cast_slice(mesh.mesh_bytes);
        let vertex_buffer = self.buffers.create(BufferKind::Vertex, vertex_bytes.len() as vk::DeviceSize)?;
        {
            let mut staging = self.upload_staging.lock();
            self.buffers.upload(vertex_buffer, 0, vertex_bytes, &mut staging, &self.scheduler)?;
        }

        let (index_buffer, index_count, index_type) = if index_width == IndexWidth::U8 {
            let count = mesh.indices_count as u32;
            let raw = self.buffers.create(BufferKind::Index, mesh.indices_bytes.len() as vk::DeviceSize)?;
            {
                let mut staging = self.upload_staging.lock();
                self.buffers.upload(raw, 0, mesh.indices_bytes, &mut staging, &self.scheduler)?;
            }
            let expanded = self.buffers.create(BufferKind::Index, vk::DeviceSize::from(count) * 2)?;
            self.buffers.expand_u8_indices(raw, expanded, count, &self.scheduler)?;
            (expanded, count, vk::IndexType::UINT16)
        } else {
            let buffer = self.buffers.create(BufferKind::Index, mesh.indices_bytes.len() as vk::DeviceSize)?;
            {
                let mut staging = self.upload_staging.lock();
                self.buffers.upload(buffer, 0, mesh.indices_bytes, &mut staging, &self.scheduler)?;
            }
            (buffer, mesh.indices_count as u32, index_width.to_vk())
        };

        let id = self.models.lock().insert(ModelEntry {
            vertex_buffer,
            index_buffer,
            index_count,
            index_type,
            vertex_attrs: mesh.vertex_attrs,
            vertex_bindings: mesh.vertex_bindings,
        });
        Ok(id)
    }

    /// Create a GPU texture from `tex` and upload its pixel data through the
    /// upload staging pool.
    ///
    /// # Errors
    /// Returns [`EngineError`] if texture creation or upload fails.
    pub fn upload_texture(&self, tex: TextureData<'_>) -> EngineResult<TextureId> {
        if tex.layer_count > 1 {
            log::warn!("upload_texture: array textures are not yet supported, uploading layer 0 only");
        }
        let extent = vk::Extent3D { width: tex.width, height: tex.height, depth: 1 };
        let usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        let id = self.textures.create(tex.format, extent, usage)?;
        let mut staging = self.upload_staging.lock();
        self.textures.upload(id, tex.pixels, &mut staging, &self.scheduler)?;
        Ok(id)
    }

    /// Record one draw call: resolves `instance.model`'s buffers, resolves
    /// (building asynchronously if needed) a pipeline compatible with the
    /// bound render target, and binds the per-draw texture/uniform/push
    /// constant data before issuing an indexed draw.
    ///
    /// Silently skips the draw if the pipeline's asynchronous build hasn't
    /// finished yet (or failed outright — logged once at build time).
    ///
    /// # Errors
    /// Returns [`EngineError`] if no render target is bound, `instance.model`
    /// is unknown, or a synchronous Vulkan call fails.
    pub fn draw(&self, instance: DrawInstance<'_>) -> EngineResult<()> {
        let models = self.models.lock();
        let model = models.get(instance.model).ok_or(CacheError::UnknownHandle)?;
        let vertex_buffer = self.buffers.handle(model.vertex_buffer)?;
        let index_buffer = self.buffers.handle(model.index_buffer)?;
        let index_count = model.index_count;
        let index_type = model.index_type;
        let vertex_attributes: Vec<VertexAttributeKey> = model
            .vertex_attrs
            .iter()
            .map(|a| VertexAttributeKey {
                location: a.location,
                binding: a.binding,
                format: a.format,
                offset: a.offset,
            })
            .collect();
        let vertex_bindings: Vec<vk::VertexInputBindingDescription> = model
            .vertex_bindings
            .iter()
            .map(|b| vk::VertexInputBindingDescription {
                binding: b.binding,
                stride: b.stride,
                input_rate: b.input_rate,
            })
            .collect();
        drop(models);

        let render_pass_key = {
            let target = self.render_target.lock();
            let target = target.as_ref().ok_or_else(no_render_target_bound)?;
            RenderPassKey::new(&target.color_formats, vk::Format::UNDEFINED, target.samples, false, target.has_depth)
        };

        let key = GraphicsPipelineKey {
            vertex_shader_hash: instance.vertex_shader.spirv_hash,
            fragment_shader_hash: instance.fragment_shader.spirv_hash,
            vertex_attributes,
            topology: instance.state.topology.native(),
            render_pass: render_pass_key,
            samples: {
                let target = self.render_target.lock();
                target.as_ref().ok_or_else(no_render_target_bound)?.samples
            },
            dynamic_state3: self.device.features().extended_dynamic_state3,
            cull_mode: instance.state.cull_mode,
            depth_compare_op: instance.state.depth_compare_op,
            depth_test_enable: instance.state.depth_test_enable,
            depth_write_enable: instance.state.depth_write_enable,
            blend_enable: instance.state.blend_enable,
        };

        let Some(pipeline) = self.pipelines.current_graphics_pipeline(
            key,
            self.draw_pipeline_layout,
            &vertex_bindings,
            instance.vertex_shader.module,
            instance.fragment_shader.module,
        )?
        else {
            return Ok(());
        };

        self.scheduler.update_graphics_pipeline(pipeline);
        self.scheduler.record(Command::SetViewport(instance.state.viewport));
        self.scheduler.record(Command::SetScissor(instance.state.scissor));
        self.scheduler.record(Command::BindVertexBuffers {
            first_binding: 0,
            buffers: vec![vertex_buffer],
            offsets: vec![0],
        });
        self.scheduler.record(Command::BindIndexBuffer {
            buffer: index_buffer,
            offset: 0,
            index_type,
        });

        let descriptor_set = self.write_draw_descriptor_set(instance.texture, instance.uniform_data)?;
        self.scheduler.record(Command::BindDescriptorSets {
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            layout: self.draw_pipeline_layout,
            first_set: 0,
            sets: vec![descriptor_set],
        });
        if !instance.push_constants.is_empty() {
            self.scheduler.record(Command::PushConstants {
                layout: self.draw_pipeline_layout,
                stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                offset: 0,
                data: instance.push_constants.to_vec(),
            });
        }

        self.scheduler.record(Command::DrawIndexed {
            index_count,
            instance_count: instance.instance_count.max(1),
            first_index: 0,
            vertex_offset: 0,
            first_instance: 0,
        });
        Ok(())
    }

    fn write_draw_descriptor_set(&self, texture: Option<TextureId>, uniform_data: &[u8]) -> EngineResult<vk::DescriptorSet> {
        let offset = {
            let mut ring = self.uniform_ring.lock();
            let size = (uniform_data.len() as vk::DeviceSize).max(1);
            let aligned = size.div_ceil(DRAW_UNIFORM_ALIGNMENT) * DRAW_UNIFORM_ALIGNMENT;
            if ring.cursor + aligned > DRAW_UNIFORM_RING_CAPACITY {
                ring.cursor = 0;
            }
            let offset = ring.cursor;
            ring.cursor += aligned;
            offset
        };
        let uniform_buffer = self.uniform_ring.lock().buffer;
        if !uniform_data.is_empty() {
            let mut staging = self.upload_staging.lock();
            self.buffers.upload(uniform_buffer, offset, uniform_data, &mut staging, &self.scheduler)?;
        }

        let descriptor_set = self.draw_descriptor_allocator.lock().commit(self.timeline.current_tick())?;

        let texture_id = texture.unwrap_or(self.default_texture);
        let image_view = self.textures.view(texture_id, vk::ImageViewType::TYPE_2D)?;
        let sampler = self.textures.sampler(SamplerKey {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_lod: 0,
            max_anisotropy: 0,
            border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        })?;
        let uniform_buffer_handle = self.buffers.handle(uniform_buffer)?;

        let image_info = [vk::DescriptorImageInfo::builder()
            .sampler(sampler)
            .image_view(image_view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build()];
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: uniform_buffer_handle,
            offset,
            range: (uniform_data.len() as vk::DeviceSize).max(1),
        }];
        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(descriptor_set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(descriptor_set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build(),
        ];
        unsafe { self.device.raw().update_descriptor_sets(&writes, &[]) };

        Ok(descriptor_set)
    }

    /// Record one compute dispatch: binds `instance.storage_buffers` at
    /// consecutive bindings starting at 0, dispatches `instance.dispatch`
    /// workgroups, and inserts a memory barrier separating it from whatever
    /// the next draw reads.
    ///
    /// # Errors
    /// Returns [`EngineError`] if `instance.storage_buffers` exceeds the
    /// compute layout's binding count, a referenced buffer is unknown, or
    /// pipeline construction fails.
    pub fn dispatch_compute(&self, instance: ComputeInstance<'_>) -> EngineResult<()> {
        if instance.storage_buffers.len() > MAX_COMPUTE_STORAGE_BUFFERS {
            return Err(EngineError::Vulkan(VulkanError::InvalidOperation {
                reason: format!("dispatch_compute: {} storage buffers exceeds the {MAX_COMPUTE_STORAGE_BUFFERS}-binding compute layout", instance.storage_buffers.len()),
            }));
        }

        let key = ComputePipelineKey {
            shader_hash: instance.shader.spirv_hash,
            shared_memory_size: instance.shared_memory_size,
            workgroup_size: instance.workgroup_size,
        };
        let pipeline = self.pipelines.current_compute_pipeline(key, self.compute_pipeline_layout, instance.shader.module)?;

        let descriptor_set = self.compute_descriptor_allocator.lock().commit(self.timeline.current_tick())?;
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = instance
            .storage_buffers
            .iter()
            .map(|&id| self.buffers.handle(id).map(|buffer| vk::DescriptorBufferInfo { buffer, offset: 0, range: vk::WHOLE_SIZE }))
            .collect::<Result<_, _>>()?;
        let writes: Vec<vk::WriteDescriptorSet> = buffer_infos
            .iter()
            .enumerate()
            .map(|(binding, info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(descriptor_set)
                    .dst_binding(binding as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
                    .build()
            })
            .collect();
        unsafe { self.device.raw().update_descriptor_sets(&writes, &[]) };

        self.scheduler.request_outside_render_pass();
        self.scheduler.record(Command::BindComputePipeline(pipeline));
        self.scheduler.record(Command::BindDescriptorSets {
            bind_point: vk::PipelineBindPoint::COMPUTE,
            layout: self.compute_pipeline_layout,
            first_set: 0,
            sets: vec![descriptor_set],
        });
        let [x, y, z] = instance.dispatch;
        self.scheduler.record(Command::Dispatch { x, y, z });
        self.scheduler.record(Command::MemoryBarrier {
            src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            dst_stage: vk::PipelineStageFlags::VERTEX_INPUT | vk::PipelineStageFlags::FRAGMENT_SHADER,
        });
        Ok(())
    }

    /// Clear the bound render target's color and/or depth/stencil attachments.
    ///
    /// # Errors
    /// Returns [`EngineError`] if no render target is currently bound.
    pub fn clean(&self, clear_value: ClearValue) -> EngineResult<()> {
        let target = self.render_target.lock();
        let target = target.as_ref().ok_or_else(no_render_target_bound)?;
        self.scheduler.request_render_pass(target.render_pass, target.framebuffer, target.render_area);

        let clear_color = clear_value.color.map(|c| vk::ClearColorValue { float32: c });
        let clear_depth_stencil = clear_value.depth.map(|depth| vk::ClearDepthStencilValue {
            depth,
            stencil: clear_value.stencil.unwrap_or(0),
        });
        if clear_color.is_some() || clear_depth_stencil.is_some() {
            self.scheduler.record(Command::ClearAttachments {
                clear_color,
                clear_depth_stencil,
                rect: target.render_area,
            });
        }
        Ok(())
    }

    /// Read back `region` of `texture`'s pixels through the download staging
    /// pool. Not part of the named upload/draw surface, but needed to verify
    /// an upload/download round trip.
    ///
    /// # Errors
    /// Returns [`EngineError`] if `texture` is unknown or the copy/wait fails.
    pub fn download(&self, texture: TextureId, region: vk::Rect2D) -> EngineResult<Vec<u8>> {
        let image = self.textures.image(texture)?;
        let (_, aspect, block_size) = PixelFormat::Abgr8Unorm.to_vk();
        let size = vk::DeviceSize::from(region.extent.width) * vk::DeviceSize::from(region.extent.height) * vk::DeviceSize::from(block_size);

        let staging_ref = {
            let mut staging = self.download_staging.lock();
            staging.request(size, true)?
        };

        let subresource_range = vk::ImageSubresourceRange::builder().aspect_mask(aspect).level_count(1).layer_count(1).build();
        let to_transfer_src = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::SHADER_READ)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
            .old_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .image(image)
            .subresource_range(subresource_range)
            .build();
        self.scheduler.record(Command::PipelineBarrier {
            src_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            image_barriers: vec![to_transfer_src],
        });

        let region_copy = vk::BufferImageCopy::builder()
            .buffer_offset(staging_ref.offset)
            .image_subresource(vk::ImageSubresourceLayers::builder().aspect_mask(aspect).layer_count(1).build())
            .image_offset(vk::Offset3D { x: region.offset.x, y: region.offset.y, z: 0 })
            .image_extent(vk::Extent3D { width: region.extent.width, height: region.extent.height, depth: 1 })
            .build();
        self.scheduler.record(Command::CopyImageToBuffer {
            src: image,
            src_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst: staging_ref.buffer,
            regions: vec![region_copy],
        });

        let back_to_shader_read = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_READ)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image(image)
            .subresource_range(subresource_range)
            .build();
        self.scheduler.record(Command::PipelineBarrier {
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            image_barriers: vec![back_to_shader_read],
        });

        self.scheduler.finish(&[], &[])?;

        let bytes = unsafe { staging_ref.mapped_slice() }.to_vec();
        self.download_staging.lock().free_deferred(&staging_ref);
        Ok(bytes)
    }

    /// Advance to the next frame: flush the scheduler's in-progress chunk,
    /// re-sample the GPU's completion tick, and drop the cached render
    /// target (the next frame must call [`Self::bind_render_target`] again).
    ///
    /// # Errors
    /// Returns [`EngineError`] if the timeline's completion query fails.
    pub fn end(&self) -> EngineResult<()> {
        self.scheduler.flush(&[], &[]);
        self.timeline.refresh(&self.device)?;
        *self.render_target.lock() = None;
        Ok(())
    }

    /// Alias for [`Self::end`], matching the per-frame "tick" naming used
    /// elsewhere in the core (resource pools, staging pool deferrals).
    ///
    /// # Errors
    /// See [`Self::end`].
    pub fn tick_frame(&self) -> EngineResult<()> {
        self.end()
    }

    fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    fn textures(&self) -> &TextureCache {
        &self.textures
    }
}

fn no_render_target_bound() -> EngineError {
    EngineError::Vulkan(VulkanError::InvalidOperation {
        reason: "no render target bound; call bind_render_target first".into(),
    })
}

fn build_draw_layout(device: &Arc<Device>) -> EngineResult<(vk::DescriptorSetLayout, vk::PipelineLayout)> {
    let bindings = [
        vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(1)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .build(),
    ];
    let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    let set_layout = unsafe { device.raw().create_descriptor_set_layout(&set_layout_info, None) }.map_err(VulkanError::Api)?;

    let push_constant_range = vk::PushConstantRange::builder()
        .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
        .offset(0)
        .size(128)
        .build();
    let set_layouts = [set_layout];
    let push_constant_ranges = [push_constant_range];
    let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts).push_constant_ranges(&push_constant_ranges);
    let pipeline_layout = unsafe { device.raw().create_pipeline_layout(&layout_info, None) }.map_err(VulkanError::Api)?;

    Ok((set_layout, pipeline_layout))
}

fn build_compute_layout(device: &Arc<Device>) -> EngineResult<(vk::DescriptorSetLayout, vk::PipelineLayout)> {
    let bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..MAX_COMPUTE_STORAGE_BUFFERS as u32)
        .map(|binding| {
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build()
        })
        .collect();
    let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    let set_layout = unsafe { device.raw().create_descriptor_set_layout(&set_layout_info, None) }.map_err(VulkanError::Api)?;

    let set_layouts = [set_layout];
    let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
    let pipeline_layout = unsafe { device.raw().create_pipeline_layout(&layout_info, None) }.map_err(VulkanError::Api)?;

    Ok((set_layout, pipeline_layout))
}

fn create_default_texture(textures: &TextureCache, upload_staging: &Mutex<StagingPool>, scheduler: &Scheduler) -> EngineResult<TextureId> {
    let extent = vk::Extent3D { width: 1, height: 1, depth: 1 };
    let usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
    let id = textures.create(PixelFormat::Abgr8Unorm, extent, usage)?;
    let mut staging = upload_staging.lock();
    textures.upload(id, &[255, 255, 255, 255], &mut staging, scheduler)?;
    Ok(id)
}

impl Drop for Graphic {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::warn!("graphic: wait_idle before teardown failed: {err}");
        }
        unsafe {
            self.device.raw().destroy_pipeline_layout(self.draw_pipeline_layout, None);
            self.device.raw().destroy_descriptor_set_layout(self.draw_set_layout, None);
            self.device.raw().destroy_pipeline_layout(self.compute_pipeline_layout, None);
            self.device.raw().destroy_descriptor_set_layout(self.compute_set_layout, None);
        }
        self.descriptors.destroy_all();
    }
}

/// Owns the [`Graphic`] core plus the presentation path, composing the
/// registered layers onto the swapchain.
pub struct Renderer {
    graphic: Graphic,
    presentation: PresentationManager,
    blit_screen: Mutex<BlitScreen>,
    layer_indices: Mutex<Vec<usize>>,
    command_pool: vk::CommandPool,
}

impl Renderer {
    /// Wrap an already-constructed [`Graphic`], presentation path, and blit
    /// pass into one renderer.
    ///
    /// # Errors
    /// Returns [`EngineError`] if the compose pass's command pool fails to create.
    pub fn new(graphic: Graphic, presentation: PresentationManager, blit_screen: BlitScreen) -> EngineResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(graphic.device().physical().graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { graphic.device().raw().create_command_pool(&pool_info, None) }.map_err(VulkanError::Api)?;

        Ok(Self {
            graphic,
            presentation,
            blit_screen: Mutex::new(blit_screen),
            layer_indices: Mutex::new(Vec::new()),
            command_pool,
        })
    }

    /// The rendering-core API surface the application drives per frame.
    #[must_use]
    pub fn graphic(&self) -> &Graphic {
        &self.graphic
    }

    /// Register `source_view` as a compositing layer for [`Self::compose`].
    /// Layers composite in registration order; the index returned matches
    /// the position the caller's `framebuffers` slice should key against.
    ///
    /// # Errors
    /// Returns [`EngineError`] if the layer's descriptor resources fail to build.
    pub fn add_layer(&self, source_view: vk::ImageView, filter: ScalingFilter, config: FramebufferConfig) -> EngineResult<usize> {
        let index = self.blit_screen.lock().add_layer(source_view, filter, config)?;
        self.layer_indices.lock().push(index);
        Ok(index)
    }

    /// Composite every registered layer per `framebuffers` onto the next
    /// presentation frame and hand it to the presentation manager. One call
    /// produces exactly one swapchain present.
    ///
    /// # Errors
    /// Returns [`EngineError`] if acquiring a frame, recording the blit pass,
    /// or presenting fails.
    pub fn compose(&self, framebuffers: &[FramebufferConfig]) -> EngineResult<()> {
        self.graphic.scheduler().finish(&[], &[])?;

        let frame = self.presentation.get_render_frame()?;
        let configs: Vec<(usize, FramebufferConfig)> = self
            .layer_indices
            .lock()
            .iter()
            .zip(framebuffers.iter())
            .map(|(&index, &config)| (index, config))
            .collect();

        self.record_compose_pass(&frame, &configs)?;
        self.presentation.present(frame)?;
        Ok(())
    }

    /// Records onto a command buffer allocated from `self.command_pool`
    /// rather than `frame.command_buffer`, which the presentation manager's
    /// own swapchain copy resets and re-records once this call's submission
    /// has signaled `frame.render_ready` — sharing one buffer between the
    /// two would race.
    fn record_compose_pass(&self, frame: &Frame, configs: &[(usize, FramebufferConfig)]) -> EngineResult<()> {
        let raw_device = self.graphic.device().raw();

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { raw_device.allocate_command_buffers(&alloc_info) }.map_err(VulkanError::Api)?[0];

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { raw_device.begin_command_buffer(command_buffer, &begin_info) }.map_err(VulkanError::Api)?;

        let blit_screen = self.blit_screen.lock();
        let framebuffer_key = FramebufferKey {
            color_views: vec![frame.image_view],
            depth_view: None,
            render_pass: blit_screen.render_pass(),
            width: frame.width,
            height: frame.height,
        };
        let framebuffer = self.graphic.textures().framebuffer(framebuffer_key)?;
        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: vk::Extent2D { width: frame.width, height: frame.height },
        };

        let clear_values = [vk::ClearValue { color: vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 1.0] } }];
        let begin_pass = vk::RenderPassBeginInfo::builder()
            .render_pass(blit_screen.render_pass())
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);
        unsafe { raw_device.cmd_begin_render_pass(command_buffer, &begin_pass, vk::SubpassContents::INLINE) };

        blit_screen.draw_to_frame(command_buffer, render_area.extent, configs);

        unsafe { raw_device.cmd_end_render_pass(command_buffer) };
        unsafe { raw_device.end_command_buffer(command_buffer) }.map_err(VulkanError::Api)?;

        let command_buffers = [command_buffer];
        let signal_semaphores = [frame.render_ready];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).signal_semaphores(&signal_semaphores);
        unsafe { raw_device.queue_submit(self.graphic.device().graphics_queue(), &[submit_info.build()], vk::Fence::null()) }.map_err(VulkanError::Api)?;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.graphic.device().wait_idle();
        unsafe { self.graphic.device().raw().destroy_command_pool(self.command_pool, None) };
    }
}
