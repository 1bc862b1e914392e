//! Pipeline cache keys.
//!
//! A graphics pipeline is fully determined by its shader hashes, the fixed
//! function state the façade has accumulated via dynamic-state-like calls
//! that aren't actually backed by a dynamic-state extension on this device,
//! the render pass it's compatible with, and the subset of extended
//! dynamic state 3 the device negotiated (folded into the key so two
//! pipelines built under different dynamic-state coverage never collide in
//! the cache).

use crate::caches::render_pass::RenderPassKey;
use crate::device::DynamicState3Support;
use ash::vk;

/// Vertex attribute binding description used by the graphics pipeline key
/// (mirrors what the façade records per [`crate::facade::ModelId`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttributeKey {
    /// Shader input location.
    pub location: u32,
    /// Vertex buffer binding this attribute reads from.
    pub binding: u32,
    /// Attribute format.
    pub format: vk::Format,
    /// Byte offset within the binding's stride.
    pub offset: u32,
}

/// Key identifying one compiled graphics pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphicsPipelineKey {
    /// Hash of the bound vertex shader's SPIR-V bytecode.
    pub vertex_shader_hash: u64,
    /// Hash of the bound fragment shader's SPIR-V bytecode.
    pub fragment_shader_hash: u64,
    /// Vertex input attribute layout.
    pub vertex_attributes: Vec<VertexAttributeKey>,
    /// Primitive topology.
    pub topology: vk::PrimitiveTopology,
    /// Render pass this pipeline must be compatible with.
    pub render_pass: RenderPassKey,
    /// Multisample count.
    pub samples: vk::SampleCountFlags,
    /// Subset of extended-dynamic-state-3 negotiated at device init; part of
    /// the key so caches built under different device capability never alias.
    pub dynamic_state3: DynamicState3Support,
    /// Cull mode, baked into the key when `VK_EXT_extended_dynamic_state` is
    /// unavailable (otherwise it would be a dynamic-state command instead).
    pub cull_mode: vk::CullModeFlags,
    /// Depth compare op, same caveat as `cull_mode`.
    pub depth_compare_op: vk::CompareOp,
    /// Whether depth testing is enabled for this pipeline.
    pub depth_test_enable: bool,
    /// Whether depth writes are enabled for this pipeline.
    pub depth_write_enable: bool,
    /// Whether alpha blending is enabled for the (sole) color attachment.
    pub blend_enable: bool,
}

/// Key identifying one compiled compute pipeline: shader hash, shared-memory
/// footprint, and workgroup size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputePipelineKey {
    /// Hash of the bound compute shader's SPIR-V bytecode.
    pub shader_hash: u64,
    /// Declared shared ("workgroup") memory size in bytes.
    pub shared_memory_size: u32,
    /// Workgroup size in (x, y, z).
    pub workgroup_size: [u32; 3],
}
