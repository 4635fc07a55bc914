// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{Bo, BoDomain, BoFlags, BoId, BoMapping, SubmitRequest, Winsys};
use crate::{device::QueueFamily, DeviceSize, VulkanError};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

/// Base of the fake GPU address space handed out by [`NullWinsys`]. Every address shares the
/// upper 32 bits [`NullWinsys::ADDRESS32_HI`] as long as less than 4 GiB are allocated.
const NULL_VA_BASE: u64 = 0x1_0000_0000;

struct HostMapping(Box<[u8]>);

impl BoMapping for HostMapping {
    fn bytes(&self) -> &[u8] {
        &self.0
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// A copy of one submission, as seen by [`NullWinsys`].
#[derive(Clone, Debug)]
pub struct SubmitRecord {
    pub queue_family: QueueFamily,
    pub queue_index: u32,
    pub streams: Vec<Vec<u32>>,
    pub initial_preamble: Option<Vec<u32>>,
    pub continue_preamble: Option<Vec<u32>>,
    pub wait_syncobjs: Vec<u32>,
    pub signal_syncobjs: Vec<u32>,
    /// Buffer objects made resident, either from the global list or from the streams.
    pub bo_ids: Vec<BoId>,
    pub can_patch: bool,
    pub has_fence: bool,
}

/// A winsys that allocates buffer objects in host memory and records submissions.
///
/// Submissions complete immediately: fences passed to `cs_submit` are signaled before it returns.
#[derive(Default)]
pub struct NullWinsys {
    next_id: AtomicU64,
    next_va: AtomicU64,
    next_syncobj: AtomicU32,
    live_bos: AtomicUsize,
    submissions: Mutex<Vec<SubmitRecord>>,
    fail_next_submit: AtomicBool,
    fail_buffer_create_after: Mutex<Option<usize>>,
    idle_waits: AtomicUsize,
}

impl NullWinsys {
    /// Upper 32 bits of the addresses handed out.
    pub const ADDRESS32_HI: u32 = (NULL_VA_BASE >> 32) as u32;

    #[inline]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next call to `cs_submit` fail as if the kernel had rejected it.
    pub fn fail_next_submit(&self) {
        self.fail_next_submit.store(true, Ordering::Relaxed);
    }

    /// Lets `count` more buffer creations succeed, then fails every following one with
    /// `OutOfDeviceMemory`. `None` removes the limit.
    pub fn fail_buffer_create_after(&self, count: Option<usize>) {
        *self.fail_buffer_create_after.lock() = count;
    }

    /// Returns the number of buffer objects that have been created but not destroyed.
    pub fn live_bo_count(&self) -> usize {
        self.live_bos.load(Ordering::Relaxed)
    }

    /// Returns a copy of every submission so far.
    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.submissions.lock().clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }

    /// Returns how many times a queue waited for idle.
    pub fn idle_wait_count(&self) -> usize {
        self.idle_waits.load(Ordering::Relaxed)
    }
}

impl Winsys for NullWinsys {
    fn buffer_create(
        &self,
        size: DeviceSize,
        alignment: DeviceSize,
        domain: BoDomain,
        flags: BoFlags,
    ) -> Result<Arc<Bo>, VulkanError> {
        {
            let mut budget = self.fail_buffer_create_after.lock();

            match budget.as_mut() {
                Some(0) => return Err(VulkanError::OutOfDeviceMemory),
                Some(remaining) => *remaining -= 1,
                None => (),
            }
        }

        let alignment = alignment.max(4096);
        let aligned_size = size.next_multiple_of(alignment);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        // Keep every allocation aligned by reserving the aligned size plus one alignment unit.
        let offset = self
            .next_va
            .fetch_add(aligned_size + alignment, Ordering::Relaxed);
        let va = (NULL_VA_BASE + offset).next_multiple_of(alignment);

        self.live_bos.fetch_add(1, Ordering::Relaxed);

        Ok(Arc::new(Bo::new(
            BoId(id),
            va,
            size,
            alignment,
            domain,
            flags,
        )))
    }

    fn buffer_map(&self, bo: &Bo) -> Result<(), VulkanError> {
        if bo.flags().intersects(BoFlags::NO_CPU_ACCESS) {
            return Err(VulkanError::MemoryMapFailed);
        }

        if !bo.is_mapped() {
            let len = usize::try_from(bo.size()).map_err(|_| VulkanError::OutOfHostMemory)?;
            bo.set_mapping(Box::new(HostMapping(vec![0; len].into_boxed_slice())));
        }

        Ok(())
    }

    fn buffer_destroy(&self, _bo: &Bo) {
        self.live_bos.fetch_sub(1, Ordering::Relaxed);
    }

    fn create_syncobj(&self) -> Result<u32, VulkanError> {
        Ok(self.next_syncobj.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn destroy_syncobj(&self, _syncobj: u32) {}

    fn cs_submit(&self, request: &SubmitRequest<'_>) -> Result<(), VulkanError> {
        if self.fail_next_submit.swap(false, Ordering::Relaxed) {
            return Err(VulkanError::DeviceLost);
        }

        let bo_ids = match request.bo_list {
            Some(list) => list.iter().map(|bo| bo.id()).collect(),
            None => {
                let mut ids: Vec<_> = request
                    .streams
                    .iter()
                    .chain(request.initial_preamble.iter())
                    .chain(request.continue_preamble.iter())
                    .flat_map(|cs| cs.buffers().iter().map(|bo| bo.id()))
                    .collect();
                ids.sort_unstable();
                ids.dedup();
                ids
            }
        };

        self.submissions.lock().push(SubmitRecord {
            queue_family: request.queue_family,
            queue_index: request.queue_index,
            streams: request.streams.iter().map(|cs| cs.words().to_vec()).collect(),
            initial_preamble: request.initial_preamble.map(|cs| cs.words().to_vec()),
            continue_preamble: request.continue_preamble.map(|cs| cs.words().to_vec()),
            wait_syncobjs: request.semaphores.wait_syncobjs.to_vec(),
            signal_syncobjs: request.semaphores.signal_syncobjs.to_vec(),
            bo_ids,
            can_patch: request.can_patch,
            has_fence: request.fence.is_some(),
        });

        if let Some(fence) = request.fence {
            fence.mark_signaled();
        }

        Ok(())
    }

    fn ctx_wait_idle(&self, _queue_family: QueueFamily, _queue_index: u32) -> Result<(), VulkanError> {
        self.idle_waits.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }
}
