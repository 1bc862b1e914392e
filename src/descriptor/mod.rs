//! Descriptor Pool & Banks.
//!
//! Descriptor sets are never allocated one at a time against a fresh Vulkan
//! pool: callers ask [`DescriptorPool::allocator`] for a sizing requirement,
//! which is matched against existing [`DescriptorBank`]s (or a new one is
//! created), and get back a [`DescriptorAllocator`] that draws from that
//! bank's pool pages.

mod allocator;
mod bank;

pub use allocator::DescriptorAllocator;
pub use bank::{DescriptorBank, DescriptorBankInfo};

use crate::device::Device;
use crate::timeline::MasterTimeline;
use ash::vk;
use parking_lot::RwLock;
use std::sync::Arc;

/// Registry of [`DescriptorBank`]s, one per distinct sizing class encountered
/// so far. Lookups take a shared read lock; only creating a brand new bank
/// needs the exclusive path.
pub struct DescriptorPool {
    device: Arc<Device>,
    timeline: Arc<MasterTimeline>,
    banks: RwLock<Vec<Arc<DescriptorBank>>>,
}

impl DescriptorPool {
    /// Create an empty registry; banks are created lazily as allocators are requested.
    #[must_use]
    pub fn new(device: Arc<Device>, timeline: Arc<MasterTimeline>) -> Self {
        Self {
            device,
            timeline,
            banks: RwLock::new(Vec::new()),
        }
    }

    /// Find (or create) a bank whose sizing is a component-wise superset of
    /// `required`. Among qualifying existing banks, the tightest-fitting one
    /// (lowest [`DescriptorBankInfo::score`]) is preferred.
    pub fn bank(&self, required: DescriptorBankInfo) -> Arc<DescriptorBank> {
        if let Some(bank) = Self::best_fit(&self.banks.read(), &required) {
            return bank;
        }

        let mut banks = self.banks.write();
        // Re-check: another thread may have inserted a fitting bank while we
        // waited for the write lock.
        if let Some(bank) = Self::best_fit(&banks, &required) {
            return bank;
        }

        log::debug!("descriptor pool: creating new bank for {required:?}");
        let bank = Arc::new(DescriptorBank::new(required));
        banks.push(bank.clone());
        bank
    }

    fn best_fit(banks: &[Arc<DescriptorBank>], required: &DescriptorBankInfo) -> Option<Arc<DescriptorBank>> {
        banks
            .iter()
            .filter(|bank| bank.info().is_superset(required))
            .min_by_key(|bank| bank.info().score())
            .cloned()
    }

    /// Build an allocator for `set_layout` drawing from the bank matching `required`.
    #[must_use]
    pub fn allocator(&self, set_layout: vk::DescriptorSetLayout, required: DescriptorBankInfo) -> DescriptorAllocator {
        let bank = self.bank(required);
        DescriptorAllocator::new(self.device.clone(), self.timeline.clone(), bank, set_layout)
    }

    /// Destroy every descriptor pool page across every bank. Must be called
    /// before the owning device is torn down; descriptor sets allocated from
    /// these pools become invalid.
    pub fn destroy_all(&self) {
        for bank in self.banks.write().drain(..) {
            unsafe { bank.destroy(&self.device) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(score_parts: [u32; 6]) -> DescriptorBankInfo {
        DescriptorBankInfo {
            uniform_buffers: score_parts[0],
            storage_buffers: score_parts[1],
            texel_buffers: score_parts[2],
            image_buffers: score_parts[3],
            textures: score_parts[4],
            images: score_parts[5],
        }
    }

    #[test]
    fn best_fit_prefers_tightest_superset() {
        let loose = Arc::new(DescriptorBank::new(info([8, 8, 0, 0, 8, 0])));
        let tight = Arc::new(DescriptorBank::new(info([2, 2, 0, 0, 4, 0])));
        let banks = vec![loose, tight.clone()];
        let required = info([1, 1, 0, 0, 2, 0]);
        let chosen = DescriptorPool::best_fit(&banks, &required).unwrap();
        assert_eq!(chosen.info().score(), tight.info().score());
    }

    #[test]
    fn best_fit_returns_none_if_no_bank_qualifies() {
        let small = Arc::new(DescriptorBank::new(info([1, 0, 0, 0, 0, 0])));
        let banks = vec![small];
        let required = info([4, 0, 0, 0, 0, 0]);
        assert!(DescriptorPool::best_fit(&banks, &required).is_none());
    }
}
