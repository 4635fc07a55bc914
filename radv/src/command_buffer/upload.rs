// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Transient GPU-visible memory for a command buffer.
//!
//! Descriptor tables, push constants and vertex buffer descriptors are written by the host during
//! recording and read by the GPU when the command buffer executes. They are bump-allocated out of
//! a mapped upload buffer. When the buffer is full, a bigger one replaces it; the old one is
//! retired but kept alive, because packets recorded earlier still point into it. Retired buffers
//! are destroyed when the command buffer is reset or dropped.

use crate::{
    cs::CommandStream,
    winsys::{Bo, BoDomain, BoFlags, Winsys},
    DeviceSize, VulkanError,
};
use std::sync::Arc;

/// Minimum size of an upload buffer.
pub const MIN_UPLOAD_SIZE: DeviceSize = 16 * 1024;

/// A bump allocator over a chain of upload buffers.
#[derive(Debug, Default)]
pub struct UploadAllocator {
    bo: Option<Arc<Bo>>,
    size: DeviceSize,
    offset: DeviceSize,
    retired: Vec<Arc<Bo>>,
}

/// An allocation made by [`UploadAllocator::alloc`].
#[derive(Clone, Debug)]
pub struct UploadAllocation {
    pub bo: Arc<Bo>,
    /// Offset of the allocation in `bo`.
    pub offset: DeviceSize,
}

impl UploadAllocation {
    /// Returns the GPU address of the allocation.
    #[inline]
    pub fn va(&self) -> u64 {
        self.bo.va() + self.offset
    }

    /// Writes `data` at `offset` bytes into the allocation.
    pub fn write(&self, offset: DeviceSize, data: &[u8]) -> Result<(), VulkanError> {
        self.bo.write((self.offset + offset) as usize, data)
    }
}

impl UploadAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the capacity of the current upload buffer.
    #[inline]
    pub fn capacity(&self) -> DeviceSize {
        self.size
    }

    /// Returns the current upload buffer.
    #[inline]
    pub fn bo(&self) -> Option<&Arc<Bo>> {
        self.bo.as_ref()
    }

    /// Returns the upload buffers that were replaced and are waiting for a reset.
    #[inline]
    pub fn retired(&self) -> &[Arc<Bo>] {
        &self.retired
    }

    /// Allocates `size` bytes aligned to `alignment`. The upload buffer is registered with `cs`
    /// when it is created.
    pub fn alloc(
        &mut self,
        winsys: &dyn Winsys,
        cs: &mut CommandStream,
        size: DeviceSize,
        alignment: DeviceSize,
    ) -> Result<UploadAllocation, VulkanError> {
        let mut offset = self.offset.next_multiple_of(alignment.max(1));

        if self.bo.is_none() || offset + size > self.size {
            self.grow(winsys, cs, size)?;
            offset = 0;
        }

        let bo = self.bo.clone().ok_or(VulkanError::OutOfDeviceMemory)?;
        self.offset = offset + size;

        Ok(UploadAllocation { bo, offset })
    }

    /// Copies `data` into a new allocation and returns it.
    pub fn upload_data(
        &mut self,
        winsys: &dyn Winsys,
        cs: &mut CommandStream,
        data: &[u8],
        alignment: DeviceSize,
    ) -> Result<UploadAllocation, VulkanError> {
        let allocation = self.alloc(winsys, cs, data.len() as DeviceSize, alignment)?;
        allocation.write(0, data)?;

        Ok(allocation)
    }

    fn grow(
        &mut self,
        winsys: &dyn Winsys,
        cs: &mut CommandStream,
        min_needed: DeviceSize,
    ) -> Result<(), VulkanError> {
        let new_size = min_needed.max(MIN_UPLOAD_SIZE).max(2 * self.size);

        let bo = winsys
            .buffer_create(
                new_size,
                4096,
                BoDomain::Gtt,
                BoFlags::CPU_ACCESS | BoFlags::NO_INTERPROCESS_SHARING,
            )
            .map_err(|_| VulkanError::OutOfDeviceMemory)?;

        if let Err(err) = winsys.buffer_map(&bo) {
            winsys.buffer_destroy(&bo);
            return Err(err);
        }

        cs.add_buffer(&bo);

        log::debug!(
            "upload buffer grows from {} to {} bytes",
            self.size,
            new_size,
        );

        if let Some(old) = self.bo.replace(bo) {
            self.retired.push(old);
        }

        self.size = new_size;
        self.offset = 0;

        Ok(())
    }

    /// Destroys the retired buffers and rewinds the current one. The current buffer is registered
    /// again with `cs`, which is expected to have been reset.
    pub fn reset(&mut self, winsys: &dyn Winsys, cs: &mut CommandStream) {
        for bo in self.retired.drain(..) {
            winsys.buffer_destroy(&bo);
        }

        self.offset = 0;

        if let Some(bo) = &self.bo {
            cs.add_buffer(bo);
        }
    }

    /// Destroys every buffer.
    pub fn destroy(&mut self, winsys: &dyn Winsys) {
        for bo in self.retired.drain(..).chain(self.bo.take()) {
            winsys.buffer_destroy(&bo);
        }

        self.size = 0;
        self.offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::winsys::NullWinsys;
    use proptest::prelude::*;

    #[test]
    fn grows_and_retires() {
        let ws = NullWinsys::new();
        let mut cs = CommandStream::new();
        let mut upload = UploadAllocator::new();

        let first = upload.alloc(&*ws, &mut cs, 100, 4).unwrap();
        assert_eq!(first.offset, 0);
        assert_eq!(upload.capacity(), MIN_UPLOAD_SIZE);
        assert!(cs.has_buffer(first.bo.id()));

        let second = upload.alloc(&*ws, &mut cs, 64, 256).unwrap();
        assert_eq!(second.offset, 256);

        // Does not fit: a buffer of twice the size replaces the first one.
        let third = upload.alloc(&*ws, &mut cs, MIN_UPLOAD_SIZE, 4).unwrap();
        assert_eq!(third.offset, 0);
        assert_eq!(upload.capacity(), 2 * MIN_UPLOAD_SIZE);
        assert_eq!(upload.retired().len(), 1);
        assert_eq!(ws.live_bo_count(), 2);
        assert!(cs.has_buffer(first.bo.id()));
        assert!(cs.has_buffer(third.bo.id()));

        // A huge request gets exactly what it needs.
        upload.alloc(&*ws, &mut cs, 1 << 20, 4).unwrap();
        assert_eq!(upload.capacity(), 1 << 20);

        cs.reset();
        upload.reset(&*ws, &mut cs);
        assert_eq!(ws.live_bo_count(), 1);
        assert!(upload.retired().is_empty());
        assert!(cs.has_buffer(upload.bo().unwrap().id()));

        upload.destroy(&*ws);
        assert_eq!(ws.live_bo_count(), 0);
    }

    #[test]
    fn upload_data_is_readable() {
        let ws = NullWinsys::new();
        let mut cs = CommandStream::new();
        let mut upload = UploadAllocator::new();

        upload.upload_data(&*ws, &mut cs, &[1, 2, 3], 1).unwrap();
        let allocation = upload.upload_data(&*ws, &mut cs, &[9, 8, 7, 6], 16).unwrap();
        assert_eq!(allocation.offset, 16);
        assert_eq!(allocation.bo.read(16, 4).unwrap(), [9, 8, 7, 6]);
        assert_eq!(allocation.va(), allocation.bo.va() + 16);
    }

    #[test]
    fn allocation_failure() {
        let ws = NullWinsys::new();
        let mut cs = CommandStream::new();
        let mut upload = UploadAllocator::new();

        ws.fail_buffer_create_after(Some(0));
        assert_eq!(
            upload.alloc(&*ws, &mut cs, 16, 4).unwrap_err(),
            VulkanError::OutOfDeviceMemory,
        );
    }

    proptest! {
        #[test]
        fn allocations_are_disjoint(
            requests in prop::collection::vec((1u64..4096, 0u32..9), 1..64),
        ) {
            let ws = NullWinsys::new();
            let mut cs = CommandStream::new();
            let mut upload = UploadAllocator::new();
            let mut ranges: Vec<(u64, u64)> = Vec::new();
            let mut capacity = 0;

            for (size, align_log2) in requests {
                let alignment = 1u64 << align_log2;
                let allocation = upload.alloc(&*ws, &mut cs, size, alignment).unwrap();

                if upload.capacity() != capacity {
                    prop_assert!(upload.capacity() >= size.max(MIN_UPLOAD_SIZE).max(2 * capacity));
                    capacity = upload.capacity();
                }

                let start = allocation.va();
                let end = start + size;
                prop_assert_eq!(allocation.offset % alignment, 0);
                prop_assert!(allocation.offset + size <= upload.capacity());

                for &(other_start, other_end) in &ranges {
                    prop_assert!(end <= other_start || start >= other_end);
                }

                ranges.push((start, end));
            }

            // Every buffer that was ever used is still alive.
            prop_assert_eq!(ws.live_bo_count(), upload.retired().len() + 1);
        }
    }
}
