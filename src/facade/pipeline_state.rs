//! Per-draw pipeline state and instance descriptions.
//!
//! Shader modules reach the façade pre-compiled — offline shader compilation
//! is a collaborator concern; [`ShaderStage::spirv_hash`]
//! is what the pipeline cache keys on, so the caller computes it once per
//! loaded shader rather than the façade re-hashing bytecode on every draw.

use crate::caches::buffer::BufferId;
use crate::caches::texture::TextureId;
use crate::facade::model::ModelId;
use ash::vk;

/// A pre-compiled shader module plus the hash of its SPIR-V bytecode, used as
/// the pipeline cache key's shader identity.
#[derive(Debug, Clone, Copy)]
pub struct ShaderStage {
    /// Compiled shader module.
    pub module: vk::ShaderModule,
    /// xxhash64 of the SPIR-V bytecode `module` was created from.
    pub spirv_hash: u64,
}

/// Primitive topology as the façade accepts it: either a native Vulkan
/// topology, or the quad-list convention (4 indices per quad, triangle-fan
/// winding) that gets expanded into a triangle-list index buffer by a compute
/// pass the first time a model is drawn with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Passed straight through to the pipeline key and `vkCmdDraw*`.
    Native(vk::PrimitiveTopology),
    /// Quad topology; expanded to `TRIANGLE_LIST` before the first draw.
    QuadList,
}

impl Topology {
    #[must_use]
    pub(crate) fn native(self) -> vk::PrimitiveTopology {
        match self {
            Self::Native(topology) => topology,
            Self::QuadList => vk::PrimitiveTopology::TRIANGLE_LIST,
        }
    }
}

/// The fixed-function pipeline state a draw call wants, compared against the
/// last-applied state to skip redundant dynamic-state commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineState {
    /// Primitive topology.
    pub topology: Topology,
    /// Dynamic viewport.
    pub viewport: vk::Viewport,
    /// Dynamic scissor.
    pub scissor: vk::Rect2D,
    /// Rasterizer cull mode.
    pub cull_mode: vk::CullModeFlags,
    /// Depth comparison function.
    pub depth_compare_op: vk::CompareOp,
    /// Whether depth testing is enabled.
    pub depth_test_enable: bool,
    /// Whether depth writes are enabled.
    pub depth_write_enable: bool,
    /// Whether alpha blending is enabled for the bound color attachment.
    pub blend_enable: bool,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            topology: Topology::Native(vk::PrimitiveTopology::TRIANGLE_LIST),
            viewport: vk::Viewport::default(),
            scissor: vk::Rect2D::default(),
            cull_mode: vk::CullModeFlags::BACK,
            depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
            depth_test_enable: true,
            depth_write_enable: true,
            blend_enable: false,
        }
    }
}

/// One draw call's full description: which model, what fixed-function state,
/// which shaders, and the per-draw uniform/push-constant/texture bindings.
pub struct DrawInstance<'a> {
    /// Model to draw.
    pub model: ModelId,
    /// Desired pipeline state for this draw.
    pub state: PipelineState,
    /// Vertex shader stage.
    pub vertex_shader: ShaderStage,
    /// Fragment shader stage.
    pub fragment_shader: ShaderStage,
    /// Bytes copied into the per-draw uniform buffer (descriptor binding 1).
    pub uniform_data: &'a [u8],
    /// Bytes pushed as push constants, visible to both shader stages.
    pub push_constants: &'a [u8],
    /// Texture sampled at descriptor binding 0, if any.
    pub texture: Option<TextureId>,
    /// Number of instances to draw.
    pub instance_count: u32,
}

/// One compute dispatch's description.
pub struct ComputeInstance<'a> {
    /// Compute shader stage.
    pub shader: ShaderStage,
    /// Declared shared ("workgroup") memory footprint in bytes.
    pub shared_memory_size: u32,
    /// Workgroup size in (x, y, z), part of the compute pipeline key.
    pub workgroup_size: [u32; 3],
    /// Storage buffers bound at consecutive descriptor bindings starting at 0.
    pub storage_buffers: &'a [BufferId],
    /// Dispatch grid size in (x, y, z) workgroups.
    pub dispatch: [u32; 3],
}

/// Clear parameters for [`super::Graphic::clean`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearValue {
    /// Color clear value, applied if the current framebuffer has a color attachment.
    pub color: Option<[f32; 4]>,
    /// Depth clear value, applied if the current framebuffer has a depth attachment.
    pub depth: Option<f32>,
    /// Stencil clear value, applied alongside `depth`.
    pub stencil: Option<u32>,
}
