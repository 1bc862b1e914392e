//! Descriptor banks.
//!
//! A bank groups descriptor pools that were all sized for the same (or a
//! larger) per-type descriptor count. Any pool in a bank can satisfy any
//! allocator drawing from that bank, so long as the bank's sizing covers the
//! allocator's shader resource requirements.

use crate::device::{Device, VulkanError, VulkanResult};
use ash::vk;
use parking_lot::Mutex;

/// Per-type descriptor counts a bank was sized for, plus the cached total
/// ("score") used to break ties when several banks qualify.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorBankInfo {
    /// Uniform buffer descriptors required by one set.
    pub uniform_buffers: u32,
    /// Storage buffer descriptors required by one set.
    pub storage_buffers: u32,
    /// Uniform/storage texel buffer descriptors required by one set.
    pub texel_buffers: u32,
    /// Storage image ("image buffer") descriptors required by one set.
    pub image_buffers: u32,
    /// Combined image sampler descriptors required by one set.
    pub textures: u32,
    /// Sampled/storage image descriptors required by one set.
    pub images: u32,
}

impl DescriptorBankInfo {
    /// Total descriptor count across all types, used to prefer the
    /// tightest-fitting bank when several are supersets of `self`.
    #[must_use]
    pub fn score(&self) -> u32 {
        self.uniform_buffers + self.storage_buffers + self.texel_buffers + self.image_buffers + self.textures + self.images
    }

    /// True if `self` provides at least as many descriptors of every type as
    /// `subset` requires (component-wise `>=`).
    #[must_use]
    pub fn is_superset(&self, subset: &Self) -> bool {
        self.uniform_buffers >= subset.uniform_buffers
            && self.storage_buffers >= subset.storage_buffers
            && self.texel_buffers >= subset.texel_buffers
            && self.image_buffers >= subset.image_buffers
            && self.textures >= subset.textures
            && self.images >= subset.images
    }
}

/// Number of descriptor sets a freshly created pool page can hand out. Pool
/// pages are sized in multiples of this; a bank grows by appending another
/// page once its last one is exhausted.
pub const BANK_PAGE_SETS: u32 = 32;

struct PoolPage {
    pool: vk::DescriptorPool,
    capacity: u32,
    allocated: u32,
}

/// One sizing class of descriptor pools, plus the pool pages backing it.
pub struct DescriptorBank {
    info: DescriptorBankInfo,
    pages: Mutex<Vec<PoolPage>>,
}

impl DescriptorBank {
    pub(crate) fn new(info: DescriptorBankInfo) -> Self {
        Self {
            info,
            pages: Mutex::new(Vec::new()),
        }
    }

    /// Sizing this bank was created for.
    #[must_use]
    pub fn info(&self) -> &DescriptorBankInfo {
        &self.info
    }

    /// Allocate `count` descriptor sets of `layout` from this bank's pages,
    /// appending a fresh page if the last one can't satisfy the request.
    pub(crate) fn allocate_sets(
        &self,
        device: &Device,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let mut pages = self.pages.lock();

        if let Some(page) = pages.last_mut() {
            if page.capacity - page.allocated >= count {
                let sets = Self::allocate_from_page(device, page, layout, count)?;
                return Ok(sets);
            }
        }

        let page_sets = count.max(BANK_PAGE_SETS);
        let pool = self.create_pool(device, page_sets)?;
        pages.push(PoolPage {
            pool,
            capacity: page_sets,
            allocated: 0,
        });
        let page = pages.last_mut().expect("page was just pushed");
        Self::allocate_from_page(device, page, layout, count)
    }

    fn allocate_from_page(
        device: &Device,
        page: &mut PoolPage,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(page.pool)
            .set_layouts(&layouts);
        let sets = unsafe { device.raw().allocate_descriptor_sets(&alloc_info) }.map_err(VulkanError::Api)?;
        page.allocated += count;
        Ok(sets)
    }

    fn create_pool(&self, device: &Device, page_sets: u32) -> VulkanResult<vk::DescriptorPool> {
        let mut sizes = Vec::new();
        let mut push = |ty: vk::DescriptorType, per_set: u32| {
            if per_set > 0 {
                sizes.push(vk::DescriptorPoolSize {
                    ty,
                    descriptor_count: per_set * page_sets,
                });
            }
        };
        push(vk::DescriptorType::UNIFORM_BUFFER, self.info.uniform_buffers);
        push(vk::DescriptorType::STORAGE_BUFFER, self.info.storage_buffers);
        push(vk::DescriptorType::UNIFORM_TEXEL_BUFFER, self.info.texel_buffers);
        push(vk::DescriptorType::STORAGE_IMAGE, self.info.image_buffers);
        push(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, self.info.textures);
        push(vk::DescriptorType::SAMPLED_IMAGE, self.info.images);

        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(page_sets)
            .pool_sizes(&sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        unsafe { device.raw().create_descriptor_pool(&create_info, None) }.map_err(VulkanError::Api)
    }

    pub(crate) unsafe fn destroy(&self, device: &Device) {
        for page in self.pages.lock().drain(..) {
            device.raw().destroy_descriptor_pool(page.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superset_is_component_wise() {
        let big = DescriptorBankInfo {
            uniform_buffers: 4,
            storage_buffers: 2,
            texel_buffers: 0,
            image_buffers: 0,
            textures: 8,
            images: 0,
        };
        let small = DescriptorBankInfo {
            uniform_buffers: 2,
            storage_buffers: 2,
            texel_buffers: 0,
            image_buffers: 0,
            textures: 4,
            images: 0,
        };
        assert!(big.is_superset(&small));
        assert!(!small.is_superset(&big));
    }

    #[test]
    fn score_sums_all_types() {
        let info = DescriptorBankInfo {
            uniform_buffers: 1,
            storage_buffers: 2,
            texel_buffers: 3,
            image_buffers: 4,
            textures: 5,
            images: 6,
        };
        assert_eq!(info.score(), 21);
    }
}
