//! Façade-level mesh/texture description types.
//!
//! These are the shapes the application hands to [`super::Graphic::upload_model`]
//! and [`super::Graphic::upload_texture`]; everything past upload is owned by
//! the buffer/texture caches and addressed only by the handles defined here.

use ash::vk;
use slotmap::new_key_type;

new_key_type! {
    /// Stable handle to an uploaded model, returned by [`super::Graphic::upload_model`].
    pub struct ModelId;
}

/// One vertex shader input's binding description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader input location.
    pub location: u32,
    /// Vertex buffer binding this attribute reads from.
    pub binding: u32,
    /// Attribute format.
    pub format: vk::Format,
    /// Byte offset within the binding's stride.
    pub offset: u32,
}

/// One vertex buffer binding's stride/rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBinding {
    /// Binding slot.
    pub binding: u32,
    /// Bytes between consecutive elements.
    pub stride: u32,
    /// Per-vertex or per-instance.
    pub input_rate: vk::VertexInputRate,
}

/// Index element width a mesh's raw index bytes are encoded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWidth {
    /// One byte per index; upconverted to `u16` on upload.
    U8,
    /// Native `VK_INDEX_TYPE_UINT16`.
    U16,
    /// Native `VK_INDEX_TYPE_UINT32`.
    U32,
}

impl IndexWidth {
    /// Infer the width from a byte count and index count (`bytes / count`).
    ///
    /// # Panics
    /// Panics if `indices_count` is zero or the ratio isn't 1, 2, or 4.
    #[must_use]
    pub fn from_byte_ratio(indices_bytes_len: usize, indices_count: u64) -> Self {
        assert!(indices_count > 0, "cannot infer index width with zero indices");
        match indices_bytes_len as u64 / indices_count {
            1 => Self::U8,
            2 => Self::U16,
            4 => Self::U32,
            other => panic!("unsupported index byte width: {other}"),
        }
    }

    #[must_use]
    pub(super) fn to_vk(self) -> vk::IndexType {
        match self {
            Self::U8 | Self::U16 => vk::IndexType::UINT16,
            Self::U32 => vk::IndexType::UINT32,
        }
    }
}

/// Mesh data as handed to [`super::Graphic::upload_model`]: a float vertex blob, raw index bytes, and the vertex
/// attribute/binding layout describing how to interpret the former.
pub struct MeshData<'a> {
    /// Raw vertex attribute bytes (interpreted per `vertex_attrs`/`vertex_bindings`).
    pub mesh_bytes: &'a [f32],
    /// Raw index bytes, `u8`/`u16`/`u32` elements per [`IndexWidth::from_byte_ratio`].
    pub indices_bytes: &'a [u8],
    /// Number of indices encoded in `indices_bytes`.
    pub indices_count: u64,
    /// Number of vertices encoded in `mesh_bytes`.
    pub vertex_count: usize,
    /// Vertex shader input layout.
    pub vertex_attrs: Vec<VertexAttribute>,
    /// Vertex buffer binding layout.
    pub vertex_bindings: Vec<VertexBinding>,
}

/// Texture data as handed to [`super::Graphic::upload_texture`]. KTX-container
/// decoding is a collaborator concern; by the time pixels reach here they're already planar bytes in
/// `format`.
pub struct TextureData<'a> {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Array layer count (1 for a plain 2D texture).
    pub layer_count: u32,
    /// Pixel format of `pixels`.
    pub format: crate::format::PixelFormat,
    /// Raw planar pixel bytes.
    pub pixels: &'a [u8],
}
