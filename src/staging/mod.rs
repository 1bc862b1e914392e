//! Staging Buffer Pool.
//!
//! One pool per [`MemoryClass`]; the render thread asks for a mapped,
//! host-visible span via [`StagingPool::request`], memcpies into (or, for
//! downloads, later reads out of) it, and the scheduler records the copy.
//! Slabs are reused once the GPU tick that last touched them has retired,
//! mirroring the resource pool's two-range scan but over
//! variably-sized byte slabs rather than homogeneous slot counts: staging
//! requests range from a few bytes of uniform data to a whole texture's
//! worth of pixels, so a fixed slot size would waste most requests.

use crate::device::{Device, MemoryClass, VulkanError, VulkanResult};
use crate::timeline::{MasterTimeline, Tick};
use ash::vk;
use std::sync::Arc;

/// A deferred download ref may stay outstanding at most this many ticks past
/// the one that produced it before the pool reclaims its slab regardless of
/// whether the caller has copied out of it yet.
pub const STAGING_DEFERRED_FRAME_LIMIT: u64 = 2;

const DEFAULT_SLAB_SIZE: vk::DeviceSize = 4 * 1024 * 1024;

struct Slab {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    mapped: *mut u8,
    capacity: vk::DeviceSize,
    tick: Tick,
    /// Set when a download ref into this slab was released deferred; the
    /// slab is not eligible for reuse until `known_gpu_tick` reaches this.
    deferred_until: Option<Tick>,
}

// The mapped pointer is only ever dereferenced through `StagingRef::mapped`
// while the slab is alive; the pool itself never reads through it.
unsafe impl Send for Slab {}
unsafe impl Sync for Slab {}

/// A committed staging region: a buffer/offset pair the scheduler can record
/// a copy against, plus the host-visible span backing it.
pub struct StagingRef {
    /// Backing buffer; valid for as long as the owning pool is alive.
    pub buffer: vk::Buffer,
    /// Byte offset of this ref within `buffer` (always 0: one slab per ref).
    pub offset: vk::DeviceSize,
    mapped: *mut u8,
    /// Size in bytes requested (not the slab's full capacity).
    pub size: vk::DeviceSize,
    slab_index: usize,
    tick: Tick,
}

impl StagingRef {
    /// The mapped host-visible span backing this ref, sized to the request.
    ///
    /// # Safety
    /// The caller must not read/write past a GPU operation that aliases this
    /// span without the appropriate `wait`/barrier; the pool only guarantees
    /// the memory is mapped and owned by this ref, not that it is race-free.
    #[must_use]
    pub unsafe fn mapped_slice(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.mapped, self.size as usize)
    }
}

/// Growable collection of mapped slabs for one [`MemoryClass`], reused once
/// their last-recorded tick has retired on the GPU.
pub struct StagingPool {
    device: Arc<Device>,
    timeline: Arc<MasterTimeline>,
    class: MemoryClass,
    slabs: Vec<Slab>,
    hint: usize,
}

impl StagingPool {
    /// Create an empty pool for `class`; slabs are allocated lazily on first request.
    #[must_use]
    pub fn new(device: Arc<Device>, timeline: Arc<MasterTimeline>, class: MemoryClass) -> Self {
        Self {
            device,
            timeline,
            class,
            slabs: Vec::new(),
            hint: 0,
        }
    }

    /// Acquire `size` bytes of mapped staging memory, stamped with the
    /// current tick. `deferred` marks the ref as a pending download: its
    /// slab is excluded from reuse until [`Self::release_deferred`] is
    /// called or [`STAGING_DEFERRED_FRAME_LIMIT`] ticks have passed,
    /// whichever comes first.
    ///
    /// # Errors
    /// Returns [`VulkanError::OutOfMemory`] if no existing slab fits and a
    /// new one cannot be allocated.
    pub fn request(&mut self, size: vk::DeviceSize, deferred: bool) -> VulkanResult<StagingRef> {
        let tick = self.timeline.current_tick();
        self.reclaim_expired_deferrals(tick);

        if let Some(index) = self.find_free_slab(size) {
            return Ok(self.commit(index, size, tick, deferred));
        }

        let slab_size = size.max(DEFAULT_SLAB_SIZE);
        match self.grow(slab_size) {
            Ok(index) => Ok(self.commit(index, size, tick, deferred)),
            Err(err) => {
                // No room to grow: wait out the oldest deferred slab rather
                // than fail the request outright, per the staging-pool open
                // question's "blocks past that only if the pool cannot grow".
                if let Some(index) = self.wait_for_oldest_deferral(size)? {
                    Ok(self.commit(index, size, tick, deferred))
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Mark `staging_ref`'s slab as a pending deferred download; it becomes
    /// reusable once `known_gpu_tick` reaches the submission tick that
    /// produced it, or after [`STAGING_DEFERRED_FRAME_LIMIT`] further ticks
    /// regardless, whichever comes first.
    pub fn free_deferred(&mut self, staging_ref: &StagingRef) {
        if let Some(slab) = self.slabs.get_mut(staging_ref.slab_index) {
            slab.deferred_until = Some(staging_ref.tick + STAGING_DEFERRED_FRAME_LIMIT);
        }
    }

    fn find_free_slab(&self, size: vk::DeviceSize) -> Option<usize> {
        let known_gpu = self.timeline.known_gpu_tick();
        let len = self.slabs.len();
        if len == 0 {
            return None;
        }
        (0..len)
            .map(|i| (self.hint + i) % len)
            .find(|&i| self.slab_free(i, known_gpu) && self.slabs[i].capacity >= size)
    }

    fn slab_free(&self, index: usize, known_gpu: Tick) -> bool {
        let slab = &self.slabs[index];
        if slab.tick > known_gpu {
            return false;
        }
        match slab.deferred_until {
            Some(until) => known_gpu >= until,
            None => true,
        }
    }

    fn reclaim_expired_deferrals(&mut self, current_tick: Tick) {
        for slab in &mut self.slabs {
            if let Some(until) = slab.deferred_until {
                if current_tick >= until {
                    log::warn!("staging pool: deferred ref outlived its {STAGING_DEFERRED_FRAME_LIMIT}-tick bound, reclaiming");
                    slab.deferred_until = None;
                }
            }
        }
    }

    fn wait_for_oldest_deferral(&mut self, size: vk::DeviceSize) -> VulkanResult<Option<usize>> {
        let oldest = self
            .slabs
            .iter()
            .enumerate()
            .filter(|(_, s)| s.deferred_until.is_some() && s.capacity >= size)
            .min_by_key(|(_, s)| s.deferred_until.unwrap());

        let Some((index, _)) = oldest else {
            return Ok(None);
        };
        let until = self.slabs[index].deferred_until.unwrap();
        self.timeline.wait(&self.device, until)?;
        self.slabs[index].deferred_until = None;
        Ok(Some(index))
    }

    fn commit(&mut self, index: usize, size: vk::DeviceSize, tick: Tick, deferred: bool) -> StagingRef {
        let slab = &mut self.slabs[index];
        slab.tick = tick;
        slab.deferred_until = None;
        self.hint = (index + 1) % self.slabs.len().max(1);
        let mapped = slab.mapped;
        let buffer = slab.buffer;
        let staging_ref = StagingRef {
            buffer,
            offset: 0,
            mapped,
            size,
            slab_index: index,
            tick,
        };
        if deferred {
            // Reserved until the caller explicitly calls `free_deferred`.
            self.slabs[index].deferred_until = Some(tick + STAGING_DEFERRED_FRAME_LIMIT);
        }
        staging_ref
    }

    fn grow(&mut self, capacity: vk::DeviceSize) -> VulkanResult<usize> {
        let usage = match self.class {
            MemoryClass::Upload | MemoryClass::Stream => vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryClass::Download => vk::BufferUsageFlags::TRANSFER_DST,
            MemoryClass::DeviceLocal => vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
        };
        let buffer_info = vk::BufferCreateInfo::builder().size(capacity).usage(usage).sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_info = self.class.allocation_create_info();

        let (buffer, mut allocation) = unsafe { self.device.allocator().create_buffer(&buffer_info, &alloc_info) }
            .map_err(|_| VulkanError::OutOfMemory { requested: capacity })?;

        let mapped = unsafe { self.device.allocator().map_memory(&mut allocation) }
            .map_err(|_| VulkanError::OutOfMemory { requested: capacity })?;

        self.slabs.push(Slab {
            buffer,
            allocation,
            mapped,
            capacity,
            tick: 0,
            deferred_until: None,
        });
        Ok(self.slabs.len() - 1)
    }
}

impl Drop for StagingPool {
    fn drop(&mut self) {
        for slab in &mut self.slabs {
            unsafe {
                self.device.allocator().unmap_memory(&mut slab.allocation);
                self.device.allocator().destroy_buffer(slab.buffer, &mut slab.allocation);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_deferred_frame_limit_is_two() {
        assert_eq!(STAGING_DEFERRED_FRAME_LIMIT, 2);
    }
}
