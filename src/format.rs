//! Pixel format table.
//!
//! A pure mapping from an engine-level pixel format to the
//! `(vk::Format, aspect_mask, block_size)` triple the texture/buffer caches
//! and the format-conversion matrix key off, grounded on the original
//! engine's `format_to_vk` table.

use ash::vk;

/// Engine-level pixel format. Distinct from `vk::Format` because several of
/// these (the two depth/stencil packings, ASTC) don't map onto a single
/// Vulkan format on every device and instead route through the conversion
/// matrix or a decode compute pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit-per-channel RGBA, the façade's "decoded texture" color format.
    Abgr8Unorm,
    /// 32-bit float, single channel. Used as the blittable stand-in for `D32Float`.
    R32Float,
    /// 32-bit float depth, no stencil.
    D32Float,
    /// 16-bit unorm, single channel. Blittable stand-in for `D16Unorm`.
    R16Unorm,
    /// 16-bit unorm depth, no stencil.
    D16Unorm,
    /// 24-bit unorm depth + 8-bit stencil, packed depth-low.
    D24UnormS8Uint,
    /// 8-bit stencil + 24-bit unorm depth, packed stencil-low (the reversed
    /// packing some guest APIs expose alongside `D24UnormS8Uint`).
    S8UintD24Unorm,
    /// ASTC LDR, 4x4 blocks; decoded on upload when the device lacks native support.
    Astc4x4Unorm,
}

impl PixelFormat {
    /// The closest native `vk::Format`, plus its aspect mask and per-texel
    /// (or per-block, for ASTC) byte size.
    #[must_use]
    pub fn to_vk(self) -> (vk::Format, vk::ImageAspectFlags, u32) {
        match self {
            Self::Abgr8Unorm => (vk::Format::R8G8B8A8_UNORM, vk::ImageAspectFlags::COLOR, 4),
            Self::R32Float => (vk::Format::R32_SFLOAT, vk::ImageAspectFlags::COLOR, 4),
            Self::D32Float => (vk::Format::D32_SFLOAT, vk::ImageAspectFlags::DEPTH, 4),
            Self::R16Unorm => (vk::Format::R16_UNORM, vk::ImageAspectFlags::COLOR, 2),
            Self::D16Unorm => (vk::Format::D16_UNORM, vk::ImageAspectFlags::DEPTH, 2),
            Self::D24UnormS8Uint | Self::S8UintD24Unorm => {
                (vk::Format::D24_UNORM_S8_UINT, vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL, 4)
            }
            Self::Astc4x4Unorm => (vk::Format::ASTC_4X4_UNORM_BLOCK, vk::ImageAspectFlags::COLOR, 16),
        }
    }

    /// True if this format carries a depth and/or stencil aspect.
    #[must_use]
    pub fn is_depth_stencil(self) -> bool {
        matches!(self, Self::D32Float | Self::D16Unorm | Self::D24UnormS8Uint | Self::S8UintD24Unorm)
    }
}

/// One entry of the format-conversion matrix: each pairing gets
/// its own lazily-built pipeline rather than a generic "any format to any
/// format" shader, so unused pairings never pay for a pipeline build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionKind {
    /// `D32Float` → `R32Float`, a same-size reinterpret copy.
    D32ToR32,
    /// `R32Float` → `D32Float`, same-size reinterpret copy.
    R32ToD32,
    /// `D16Unorm` → `R16Unorm`, same-size reinterpret copy.
    D16ToR16,
    /// `R16Unorm` → `D16Unorm`, same-size reinterpret copy.
    R16ToD16,
    /// `Abgr8Unorm` → `D24UnormS8Uint`.
    Abgr8ToD24S8,
    /// `Abgr8Unorm` → `D32Float`.
    Abgr8ToD32F,
    /// `D32Float` → `Abgr8Unorm`.
    D32FToAbgr8,
    /// `D24UnormS8Uint` → `Abgr8Unorm`.
    D24S8ToAbgr8,
    /// `S8UintD24Unorm` → `Abgr8Unorm`.
    S8D24ToAbgr8,
}

impl ConversionKind {
    /// Resolve the conversion pairing for `(src, dst)`, if the matrix defines one.
    #[must_use]
    pub fn lookup(src: PixelFormat, dst: PixelFormat) -> Option<Self> {
        use PixelFormat::{Abgr8Unorm, D16Unorm, D24UnormS8Uint, D32Float, R16Unorm, R32Float, S8UintD24Unorm};
        match (src, dst) {
            (D32Float, R32Float) => Some(Self::D32ToR32),
            (R32Float, D32Float) => Some(Self::R32ToD32),
            (D16Unorm, R16Unorm) => Some(Self::D16ToR16),
            (R16Unorm, D16Unorm) => Some(Self::R16ToD16),
            (Abgr8Unorm, D24UnormS8Uint) => Some(Self::Abgr8ToD24S8),
            (Abgr8Unorm, D32Float) => Some(Self::Abgr8ToD32F),
            (D32Float, Abgr8Unorm) => Some(Self::D32FToAbgr8),
            (D24UnormS8Uint, Abgr8Unorm) => Some(Self::D24S8ToAbgr8),
            (S8UintD24Unorm, Abgr8Unorm) => Some(Self::S8D24ToAbgr8),
            _ => None,
        }
    }

    /// True if this pairing is a bit-identical reinterpret (same byte layout,
    /// different format/aspect) that the texture cache implements as a
    /// `CopyImageToBuffer`/`CopyBufferToImage` round trip instead of a shader
    /// pass — depth-format images can't portably carry `STORAGE_IMAGE` usage,
    /// so a compute shader isn't an option here, and no render pass is needed
    /// since no value conversion actually happens.
    #[must_use]
    pub fn is_reinterpret(self) -> bool {
        matches!(self, Self::D32ToR32 | Self::R32ToD32 | Self::D16ToR16 | Self::R16ToD16)
    }

    /// Fragment shader implementing this conversion's value translation.
    /// `None` for the reinterpret pairings, which never build a pipeline.
    #[must_use]
    pub fn fragment_spirv(self) -> Option<&'static [u8]> {
        match self {
            Self::D32ToR32 | Self::R32ToD32 | Self::D16ToR16 | Self::R16ToD16 => None,
            Self::Abgr8ToD24S8 => Some(include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/target/shaders/convert_color_to_depth24s8.frag.spv"))),
            Self::Abgr8ToD32F => Some(include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/target/shaders/convert_color_to_depth32.frag.spv"))),
            Self::D32FToAbgr8 | Self::D24S8ToAbgr8 | Self::S8D24ToAbgr8 => {
                Some(include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/target/shaders/convert_depth_stencil_to_color.frag.spv")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_covers_all_nine_named_pairs() {
        let pairs = [
            (PixelFormat::D32Float, PixelFormat::R32Float),
            (PixelFormat::R32Float, PixelFormat::D32Float),
            (PixelFormat::D16Unorm, PixelFormat::R16Unorm),
            (PixelFormat::R16Unorm, PixelFormat::D16Unorm),
            (PixelFormat::Abgr8Unorm, PixelFormat::D24UnormS8Uint),
            (PixelFormat::Abgr8Unorm, PixelFormat::D32Float),
            (PixelFormat::D32Float, PixelFormat::Abgr8Unorm),
            (PixelFormat::D24UnormS8Uint, PixelFormat::Abgr8Unorm),
            (PixelFormat::S8UintD24Unorm, PixelFormat::Abgr8Unorm),
        ];
        for (src, dst) in pairs {
            assert!(ConversionKind::lookup(src, dst).is_some(), "{src:?} -> {dst:?} missing");
        }
    }

    #[test]
    fn unrelated_pair_has_no_conversion() {
        assert_eq!(ConversionKind::lookup(PixelFormat::Abgr8Unorm, PixelFormat::R16Unorm), None);
    }

    #[test]
    fn depth_stencil_formats_flagged() {
        assert!(PixelFormat::D24UnormS8Uint.is_depth_stencil());
        assert!(!PixelFormat::Abgr8Unorm.is_depth_stencil());
    }
}
