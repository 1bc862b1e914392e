//! Memory usage classes, mapped onto `vk-mem` allocation hints.
//!
//! The original allocator distinguishes device-local, staging-upload,
//! staging-download and host-visible-streamed commitments; this module keeps
//! that distinction so the staging pool and buffer/texture caches can each
//! ask for the right heap without hard-coding `vk_mem::MemoryUsage` values.

use ash::vk;

/// Broad usage category for a buffer or image commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryClass {
    /// Device-local only; fastest to sample/read on the GPU, not host-visible.
    DeviceLocal,
    /// Host-visible, host-coherent; written by the CPU and read once by the GPU
    /// (staging uploads).
    Upload,
    /// Host-visible, cached; written by the GPU and read back by the CPU
    /// (readback/screenshot paths).
    Download,
    /// Host-visible and device-local when available (resizable BAR / UMA);
    /// falls back to a staging round trip otherwise. Used for per-frame
    /// uniform data that's rewritten every tick.
    Stream,
}

impl MemoryClass {
    /// Map to the `vk-mem` usage hint that achieves this class's intent.
    #[must_use]
    pub fn to_vk_mem_usage(self) -> vk_mem::MemoryUsage {
        match self {
            Self::DeviceLocal => vk_mem::MemoryUsage::AutoPreferDevice,
            Self::Upload => vk_mem::MemoryUsage::AutoPreferHost,
            Self::Download => vk_mem::MemoryUsage::AutoPreferHost,
            Self::Stream => vk_mem::MemoryUsage::Auto,
        }
    }

    fn required_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            Self::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Self::Upload => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            Self::Download => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
            Self::Stream => vk::MemoryPropertyFlags::HOST_VISIBLE,
        }
    }

    fn flags(self) -> vk_mem::AllocationCreateFlags {
        match self {
            Self::DeviceLocal => vk_mem::AllocationCreateFlags::empty(),
            Self::Upload => {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE
                    | vk_mem::AllocationCreateFlags::MAPPED
            }
            Self::Download => {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM | vk_mem::AllocationCreateFlags::MAPPED
            }
            Self::Stream => {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE
                    | vk_mem::AllocationCreateFlags::MAPPED
            }
        }
    }

    /// Build the `vk-mem` allocation-create-info this class requires.
    #[must_use]
    pub fn allocation_create_info(self) -> vk_mem::AllocationCreateInfo {
        vk_mem::AllocationCreateInfo {
            usage: self.to_vk_mem_usage(),
            flags: self.flags(),
            required_flags: self.required_flags(),
            ..Default::default()
        }
    }
}

/// A committed, allocator-backed resource: the raw handle plus the allocation
/// that must be freed alongside it. Buffer/image caches wrap this rather than
/// tracking raw `vk_mem::Allocation`s themselves.
pub struct MemoryCommitment<H> {
    /// The Vulkan handle (`vk::Buffer` or `vk::Image`) this commitment backs.
    pub handle: H,
    /// The `vk-mem` allocation backing `handle`.
    pub allocation: vk_mem::Allocation,
    /// Usage class this commitment was made under.
    pub class: MemoryClass,
}
