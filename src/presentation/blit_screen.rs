//! Window-adapt pass.
//!
//! Composites one or more framebuffer configs onto the acquired frame image
//! via a dedicated full-screen-triangle pipeline per blend mode, sampling
//! each source through the filter selected by [`crate::config::ScalingFilter`].
//! Scale-force and FSR are the only filters that need more than a sampler
//! (a resize/sharpen compute prepass); everything else only changes which
//! `vk::Filter`/`vk::SamplerMipmapMode` the layer's sampler uses.

use crate::config::ScalingFilter;
use crate::device::{Device, VulkanError, VulkanResult};
use ash::vk;
use std::sync::Arc;

/// How a layer's source color is combined with what's already in the frame image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Source replaces destination outright.
    Opaque,
    /// Standard premultiplied-alpha `src + dst * (1 - src.a)`.
    Premultiplied,
    /// Alpha-to-coverage; used for MSAA-resolved overlays.
    Coverage,
}

impl BlendMode {
    fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        let base = vk::PipelineColorBlendAttachmentState::builder().color_write_mask(vk::ColorComponentFlags::RGBA);
        match self {
            Self::Opaque => base.blend_enable(false).build(),
            Self::Premultiplied => base
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::ONE)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build(),
            Self::Coverage => base
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ZERO)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build(),
        }
    }
}

/// Placement and blend configuration for one composited source image,
/// mirroring the original's per-layer framebuffer config.
#[derive(Debug, Clone, Copy)]
pub struct FramebufferConfig {
    /// How this layer combines with the frame image underneath it.
    pub blend_mode: BlendMode,
    /// Top-left corner, in destination pixels.
    pub offset: (i32, i32),
    /// Destination size, in pixels.
    pub width: u32,
    /// See [`Self::width`].
    pub height: u32,
    /// Source row stride in texels, for sources wider than their visible crop.
    pub stride: u32,
}

struct Layer {
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    sampler: vk::Sampler,
}

/// Owns the window-adapt pass's render pass, pipeline layout, one pipeline
/// per [`BlendMode`], and a [`Layer`] per composited source.
pub struct BlitScreen {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    pipelines: [vk::Pipeline; 3],
    vertex_shader: vk::ShaderModule,
    fragment_shader: vk::ShaderModule,
    layers: Vec<Layer>,
    warned_unsupported_filter: std::sync::atomic::AtomicBool,
}

impl BlitScreen {
    /// Build the pass's render pass and per-blend-mode pipelines against
    /// `color_format` (the swapchain/frame format being composited onto).
    ///
    /// # Errors
    /// Returns [`VulkanError::Api`] if shader module, render pass, or
    /// pipeline creation fails.
    pub fn new(device: Arc<Device>, color_format: vk::Format) -> VulkanResult<Self> {
        let vertex_shader = Self::load_shader_module(&device, BLIT_VERT_SPV)?;
        let fragment_shader = Self::load_shader_module(&device, BLIT_FRAG_SPV)?;

        let render_pass = Self::build_render_pass(&device, color_format)?;

        let binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build();
        let layout_bindings = [binding];
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
        let descriptor_set_layout_template = unsafe { device.raw().create_descriptor_set_layout(&set_layout_info, None) }.map_err(VulkanError::Api)?;

        let push_constant_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(std::mem::size_of::<[f32; 4]>() as u32)
            .build();
        let set_layouts = [descriptor_set_layout_template];
        let push_constants = [push_constant_range];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constants);
        let pipeline_layout = unsafe { device.raw().create_pipeline_layout(&layout_info, None) }.map_err(VulkanError::Api)?;
        unsafe { device.raw().destroy_descriptor_set_layout(descriptor_set_layout_template, None) };

        let pipelines = [
            Self::build_pipeline(&device, render_pass, pipeline_layout, vertex_shader, fragment_shader, BlendMode::Opaque)?,
            Self::build_pipeline(&device, render_pass, pipeline_layout, vertex_shader, fragment_shader, BlendMode::Premultiplied)?,
            Self::build_pipeline(&device, render_pass, pipeline_layout, vertex_shader, fragment_shader, BlendMode::Coverage)?,
        ];

        Ok(Self {
            device,
            render_pass,
            pipeline_layout,
            pipelines,
            vertex_shader,
            fragment_shader,
            layers: Vec::new(),
            warned_unsupported_filter: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Render pass a caller must bind before calling [`Self::draw_to_frame`]
    /// (and build a compatible framebuffer against, for a one-shot compose).
    #[must_use]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    fn load_shader_module(device: &Device, bytes: &[u8]) -> VulkanResult<vk::ShaderModule> {
        let words = ash::util::read_spv(&mut std::io::Cursor::new(bytes)).map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);
        unsafe { device.raw().create_shader_module(&create_info, None) }.map_err(VulkanError::Api)
    }

    fn build_render_pass(device: &Device, color_format: vk::Format) -> VulkanResult<vk::RenderPass> {
        let attachment = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let color_refs = [color_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .build();
        let attachments = [attachment];
        let subpasses = [subpass];
        let create_info = vk::RenderPassCreateInfo::builder().attachments(&attachments).subpasses(&subpasses);
        unsafe { device.raw().create_render_pass(&create_info, None) }.map_err(VulkanError::Api)
    }

    fn build_pipeline(
        device: &Device,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
        vertex_shader: vk::ShaderModule,
        fragment_shader: vk::ShaderModule,
        blend_mode: BlendMode,
    ) -> VulkanResult<vk::Pipeline> {
        let entry_point = std::ffi::CString::new("main").unwrap();
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_shader)
                .name(&entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_shader)
                .name(&entry_point)
                .build(),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder().topology(vk::PrimitiveTopology::TRIANGLE_STRIP);
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let attachment_state = blend_mode.attachment_state();
        let attachments = [attachment_state];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device
                .raw()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info.build()], None)
        }
        .map_err(|(_, e)| VulkanError::Api(e))?;
        Ok(pipelines[0])
    }

    fn sampler_create_info(filter: ScalingFilter) -> vk::SamplerCreateInfo {
        let (mag, min) = match filter {
            ScalingFilter::NearestNeighbor => (vk::Filter::NEAREST, vk::Filter::NEAREST),
            // Bicubic/Gaussian/ScaleForce/Fsr all need a dedicated compute
            // prepass to fully realize; until that prepass exists they fall
            // back to linear sampling (logged once via `warn_if_unsupported_filter`).
            ScalingFilter::Bilinear | ScalingFilter::Bicubic | ScalingFilter::Gaussian | ScalingFilter::ScaleForce | ScalingFilter::Fsr => {
                (vk::Filter::LINEAR, vk::Filter::LINEAR)
            }
        };
        vk::SamplerCreateInfo::builder()
            .mag_filter(mag)
            .min_filter(min)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .build()
    }

    fn warn_if_unsupported_filter(&self, filter: ScalingFilter) {
        let needs_compute_prepass = matches!(filter, ScalingFilter::Bicubic | ScalingFilter::Gaussian | ScalingFilter::ScaleForce | ScalingFilter::Fsr);
        if needs_compute_prepass && !self.warned_unsupported_filter.swap(true, std::sync::atomic::Ordering::Relaxed) {
            log::warn!("{filter:?} scaling filter has no compute prepass yet, falling back to bilinear");
        }
    }

    /// Register a layer sampling `source_view` with `filter`, composited
    /// per `config`. Returns the layer's index for later reconfiguration.
    ///
    /// # Errors
    /// Returns [`VulkanError::Api`] if descriptor pool/set allocation or
    /// sampler creation fails.
    pub fn add_layer(&mut self, source_view: vk::ImageView, filter: ScalingFilter, _config: FramebufferConfig) -> VulkanResult<usize> {
        self.warn_if_unsupported_filter(filter);

        let binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build();
        let bindings = [binding];
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let descriptor_set_layout = unsafe { self.device.raw().create_descriptor_set_layout(&set_layout_info, None) }.map_err(VulkanError::Api)?;

        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
        };
        let pool_sizes = [pool_size];
        let pool_info = vk::DescriptorPoolCreateInfo::builder().max_sets(1).pool_sizes(&pool_sizes);
        let descriptor_pool = unsafe { self.device.raw().create_descriptor_pool(&pool_info, None) }.map_err(VulkanError::Api)?;

        let set_layouts = [descriptor_set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&set_layouts);
        let descriptor_set = unsafe { self.device.raw().allocate_descriptor_sets(&alloc_info) }.map_err(VulkanError::Api)?[0];

        let sampler_info = Self::sampler_create_info(filter);
        let sampler = unsafe { self.device.raw().create_sampler(&sampler_info, None) }.map_err(VulkanError::Api)?;

        let image_info = vk::DescriptorImageInfo::builder()
            .sampler(sampler)
            .image_view(source_view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build();
        let image_infos = [image_info];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(descriptor_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_infos)
            .build();
        unsafe { self.device.raw().update_descriptor_sets(&[write], &[]) };

        self.layers.push(Layer {
            descriptor_set_layout,
            descriptor_pool,
            descriptor_set,
            sampler,
        });
        Ok(self.layers.len() - 1)
    }

    /// Record draw commands compositing every registered layer onto
    /// `target_view` (`target_extent` in pixels) within `command_buffer`,
    /// already inside a render pass instance bound to `self.render_pass`.
    pub fn draw_to_frame(&self, command_buffer: vk::CommandBuffer, target_extent: vk::Extent2D, configs: &[(usize, FramebufferConfig)]) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: target_extent.width as f32,
            height: target_extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: target_extent,
        };
        unsafe {
            self.device.raw().cmd_set_viewport(command_buffer, 0, &[viewport]);
            self.device.raw().cmd_set_scissor(command_buffer, 0, &[scissor]);
        }

        for &(layer_index, config) in configs {
            let Some(layer) = self.layers.get(layer_index) else {
                continue;
            };
            let pipeline = self.pipelines[config.blend_mode as usize];
            let push_constants = [
                config.offset.0 as f32,
                config.offset.1 as f32,
                config.width as f32,
                config.height as f32,
            ];
            unsafe {
                self.device.raw().cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
                self.device.raw().cmd_bind_descriptor_sets(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline_layout,
                    0,
                    &[layer.descriptor_set],
                    &[],
                );
                self.device.raw().cmd_push_constants(
                    command_buffer,
                    self.pipeline_layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    std::slice::from_raw_parts(push_constants.as_ptr().cast::<u8>(), std::mem::size_of_val(&push_constants)),
                );
                self.device.raw().cmd_draw(command_buffer, 4, 1, 0, 0);
            }
        }
    }
}

impl Drop for BlitScreen {
    fn drop(&mut self) {
        unsafe {
            for layer in &self.layers {
                self.device.raw().destroy_sampler(layer.sampler, None);
                self.device.raw().destroy_descriptor_pool(layer.descriptor_pool, None);
                self.device.raw().destroy_descriptor_set_layout(layer.descriptor_set_layout, None);
            }
            for &pipeline in &self.pipelines {
                self.device.raw().destroy_pipeline(pipeline, None);
            }
            self.device.raw().destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.raw().destroy_shader_module(self.vertex_shader, None);
            self.device.raw().destroy_shader_module(self.fragment_shader, None);
            self.device.raw().destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Compiled by `build.rs` from `resources/shaders/blit.vert`.
static BLIT_VERT_SPV: &[u8] = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/target/shaders/blit.vert.spv"));

/// Compiled by `build.rs` from `resources/shaders/blit.frag`.
static BLIT_FRAG_SPV: &[u8] = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/target/shaders/blit.frag.spv"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_blend_state_disables_blending() {
        let state = BlendMode::Opaque.attachment_state();
        assert_eq!(state.blend_enable, vk::FALSE);
    }

    #[test]
    fn premultiplied_blend_state_enables_blending() {
        let state = BlendMode::Premultiplied.attachment_state();
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::ONE);
    }
}
