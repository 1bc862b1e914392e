//! Generic Resource Pool.
//!
//! A resource pool is a growable ring of homogeneous GPU objects (command
//! buffers, descriptor sets, fences...) where each slot is stamped with the
//! tick that last used it. `commit` hands back a contiguous range of free
//! slots, growing the backing store when nothing is free yet.

use crate::timeline::{MasterTimeline, Tick};
use std::sync::Arc;

/// Something a [`ResourcePool`] can grow: given a new total size, allocate the
/// missing tail and return it (or enough information for the pool to track it).
pub trait GrowableStore {
    /// Error surfaced when the backing allocation underlying a grow fails
    /// (e.g. `vkAllocateCommandBuffers`/`vkAllocateDescriptorSets` running out
    /// of device memory).
    type Error;

    /// Grow the backing store so it holds `new_size` elements, allocating the
    /// `new_size - old_size` new ones.
    fn grow(&mut self, new_size: usize) -> Result<(), Self::Error>;
}

/// Tracks, per slot, the tick the slot was last committed under, and hands
/// out ranges of slots whose tick has since completed on the GPU.
///
/// Mirrors the original two-range free scan: starting from a hint index, scan
/// forward then wrap around to the start, looking for `count` consecutive
/// slots whose tick is known-free. If no such run exists, grow the pool by
/// `grow_step` and retry once.
pub struct ResourcePool {
    timeline: Arc<MasterTimeline>,
    ticks: Vec<Tick>,
    hint: usize,
    grow_step: usize,
}

impl ResourcePool {
    /// Create a pool with `initial_size` slots, all initially free (tick 0).
    #[must_use]
    pub fn new(timeline: Arc<MasterTimeline>, initial_size: usize, grow_step: usize) -> Self {
        Self {
            timeline,
            ticks: vec![0; initial_size],
            hint: 0,
            grow_step: grow_step.max(1),
        }
    }

    /// Number of slots currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// True if the pool currently tracks zero slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Find `count` consecutive free slots, growing the backing store
    /// (via `store`) if none are currently free, and stamp them with `tick`.
    /// Returns the starting index of the committed range.
    ///
    /// # Errors
    /// Returns whatever `store.grow` returns if growth was needed and failed;
    /// the pool's own slot bookkeeping is left unchanged in that case.
    pub fn commit<S: GrowableStore>(&mut self, store: &mut S, count: usize, tick: Tick) -> Result<usize, S::Error> {
        if let Some(begin) = self.find_free_range(count) {
            self.stamp(begin, count, tick);
            self.hint = (begin + count) % self.ticks.len().max(1);
            return Ok(begin);
        }

        let old_size = self.ticks.len();
        let needed = count.max(self.grow_step);
        let new_size = old_size + needed;
        store.grow(new_size)?;
        self.ticks.resize(new_size, 0);

        self.stamp(old_size, count, tick);
        self.hint = (old_size + count) % new_size;
        Ok(old_size)
    }

    fn find_free_range(&self, count: usize) -> Option<usize> {
        if count == 0 || self.ticks.is_empty() || count > self.ticks.len() {
            return None;
        }
        let len = self.ticks.len();
        let known_gpu_tick = self.timeline.known_gpu_tick();

        // First range: [hint, len), then wrap to [0, hint).
        Self::scan(&self.ticks, self.hint, len, count, known_gpu_tick)
            .or_else(|| Self::scan(&self.ticks, 0, self.hint, count, known_gpu_tick))
    }

    pub(crate) fn scan(ticks: &[Tick], start: usize, end: usize, count: usize, known_gpu_tick: Tick) -> Option<usize> {
        if end <= start {
            return None;
        }
        let mut run_start = start;
        let mut run_len = 0;
        for i in start..end {
            if ticks[i] <= known_gpu_tick {
                if run_len == 0 {
                    run_start = i;
                }
                run_len += 1;
                if run_len == count {
                    return Some(run_start);
                }
            } else {
                run_len = 0;
            }
        }
        None
    }

    fn stamp(&mut self, begin: usize, count: usize, tick: Tick) {
        for slot in &mut self.ticks[begin..begin + count] {
            *slot = tick;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_free_range_prefers_contiguous_run() {
        assert_eq!(ResourcePool::scan(&[5, 0, 0, 0, 5], 0, 5, 3, 2), Some(1));
    }

    #[test]
    fn scan_rejects_run_shorter_than_requested() {
        assert_eq!(ResourcePool::scan(&[0, 0, 5, 0], 0, 4, 3, 2), None);
    }

    #[test]
    fn scan_wraps_via_two_calls() {
        // [free, used, used, free] with hint=3: first scan(3,4) finds index 3,
        // but a 2-slot request needs the wrap-around scan(0,3) too.
        let ticks = [0, 5, 5, 0];
        assert_eq!(ResourcePool::scan(&ticks, 3, 4, 2, 2), None);
        assert_eq!(ResourcePool::scan(&ticks, 0, 3, 2, 2), None);
    }
}
