//! Per-layout descriptor set allocator.
//!
//! A thin specialization of the generic resource-pool `commit` algorithm:
//! each slot is one `vk::DescriptorSet` bound to a fixed `vk::DescriptorSetLayout`,
//! drawn from a shared [`DescriptorBank`] when the pool needs to grow.

use super::bank::DescriptorBank;
use crate::device::{Device, VulkanResult};
use crate::resource_pool::ResourcePool;
use crate::timeline::{MasterTimeline, Tick};
use ash::vk;
use std::sync::Arc;

/// Hands out descriptor sets of a single layout, reusing sets whose last-use
/// tick the GPU has already completed and growing from `bank`'s pool pages
/// otherwise.
pub struct DescriptorAllocator {
    device: Arc<Device>,
    timeline: Arc<MasterTimeline>,
    bank: Arc<DescriptorBank>,
    layout: vk::DescriptorSetLayout,
    pool: ResourcePool,
    sets: Vec<vk::DescriptorSet>,
}

impl DescriptorAllocator {
    pub(crate) fn new(
        device: Arc<Device>,
        timeline: Arc<MasterTimeline>,
        bank: Arc<DescriptorBank>,
        layout: vk::DescriptorSetLayout,
    ) -> Self {
        let pool = ResourcePool::new(timeline.clone(), 0, super::bank::BANK_PAGE_SETS as usize);
        Self {
            device,
            timeline,
            bank,
            layout,
            pool,
            sets: Vec::new(),
        }
    }

    /// Hand back a free descriptor set, stamping it with `tick` and growing
    /// from the bank's pool pages if nothing is free yet.
    ///
    /// # Errors
    /// Returns the underlying `vkAllocateDescriptorSets` error if growth is
    /// needed and the bank's pages (including a freshly appended one) fail
    /// to satisfy it.
    pub fn commit(&mut self, tick: Tick) -> VulkanResult<vk::DescriptorSet> {
        let device = self.device.clone();
        let bank = self.bank.clone();
        let layout = self.layout;
        let mut store = SetsStore {
            device: &device,
            bank: &bank,
            layout,
            sets: &mut self.sets,
        };
        let index = self.pool.commit(&mut store, 1, tick)?;
        Ok(self.sets[index])
    }
}

struct SetsStore<'a> {
    device: &'a Device,
    bank: &'a DescriptorBank,
    layout: vk::DescriptorSetLayout,
    sets: &'a mut Vec<vk::DescriptorSet>,
}

impl crate::resource_pool::GrowableStore for SetsStore<'_> {
    type Error = crate::device::VulkanError;

    fn grow(&mut self, new_size: usize) -> Result<(), Self::Error> {
        let needed = (new_size - self.sets.len()) as u32;
        let allocated = self.bank.allocate_sets(self.device, self.layout, needed)?;
        self.sets.extend(allocated);
        Ok(())
    }
}
