// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The boundary between the driver and the kernel.
//!
//! Everything the command buffer engine needs from the operating system goes through the
//! [`Winsys`] trait: creating and mapping buffer objects, creating synchronization objects, and
//! submitting command streams. [`NullWinsys`] implements it in process memory, which is what the
//! tests of this crate run against.

pub use self::null::{NullWinsys, SubmitRecord};
use crate::{
    cs::CommandStream,
    device::QueueFamily,
    macros::driver_bitflags,
    sync::Fence,
    DeviceSize, VulkanError,
};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{fmt, sync::Arc};

mod null;

/// Uniquely identifies a buffer object within a winsys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoId(pub u64);

/// The memory heap a buffer object lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoDomain {
    /// Device-local video memory.
    Vram,
    /// System memory visible to the GPU through the GART.
    Gtt,
}

driver_bitflags! {
    /// Creation flags of a buffer object.
    BoFlags = u32;

    /// The buffer object must be mappable by the host.
    CPU_ACCESS = 1 << 0,
    /// The buffer object is never mapped by the host.
    NO_CPU_ACCESS = 1 << 1,
    /// The buffer object is never shared with another process.
    NO_INTERPROCESS_SHARING = 1 << 2,
    /// The GPU only reads from the buffer object.
    READ_ONLY = 1 << 3,
}

/// Host memory backing a mapped buffer object.
pub trait BoMapping: Send {
    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];
}

/// A buffer object: an allocation of GPU-visible memory with a virtual address.
pub struct Bo {
    id: BoId,
    va: u64,
    size: DeviceSize,
    alignment: DeviceSize,
    domain: BoDomain,
    flags: BoFlags,
    mapping: Mutex<Option<Box<dyn BoMapping>>>,
}

impl Bo {
    /// Describes a freshly created buffer object. Called by winsys implementations.
    pub fn new(
        id: BoId,
        va: u64,
        size: DeviceSize,
        alignment: DeviceSize,
        domain: BoDomain,
        flags: BoFlags,
    ) -> Self {
        Bo {
            id,
            va,
            size,
            alignment,
            domain,
            flags,
            mapping: Mutex::new(None),
        }
    }

    #[inline]
    pub fn id(&self) -> BoId {
        self.id
    }

    /// Returns the GPU virtual address of the first byte.
    #[inline]
    pub fn va(&self) -> u64 {
        self.va
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    #[inline]
    pub fn alignment(&self) -> DeviceSize {
        self.alignment
    }

    #[inline]
    pub fn domain(&self) -> BoDomain {
        self.domain
    }

    #[inline]
    pub fn flags(&self) -> BoFlags {
        self.flags
    }

    /// Returns whether [`Winsys::buffer_map`] has succeeded for this buffer object.
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapping.lock().is_some()
    }

    /// Installs the host mapping. Called by winsys implementations from `buffer_map`.
    pub fn set_mapping(&self, mapping: Box<dyn BoMapping>) {
        *self.mapping.lock() = Some(mapping);
    }

    /// Runs `f` on the mapped bytes, or returns `MemoryMapFailed` if the buffer object is not
    /// mapped.
    pub fn with_mapped<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, VulkanError> {
        let mut mapping = self.mapping.lock();

        match mapping.as_mut() {
            Some(mapping) => Ok(f(mapping.bytes_mut())),
            None => Err(VulkanError::MemoryMapFailed),
        }
    }

    /// Copies `data` into the mapping at `offset`.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), VulkanError> {
        self.with_mapped(|bytes| bytes[offset..offset + data.len()].copy_from_slice(data))
    }

    /// Reads `len` bytes of the mapping starting at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, VulkanError> {
        self.with_mapped(|bytes| bytes[offset..offset + len].to_vec())
    }
}

impl fmt::Debug for Bo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bo")
            .field("id", &self.id)
            .field("va", &format_args!("{:#x}", self.va))
            .field("size", &self.size)
            .field("domain", &self.domain)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Semaphores to wait on before, and to signal after, a submission.
#[derive(Clone, Debug, Default)]
pub struct SemaphoreInfo {
    pub wait_syncobjs: SmallVec<[u32; 4]>,
    pub signal_syncobjs: SmallVec<[u32; 4]>,
}

impl SemaphoreInfo {
    #[inline]
    pub fn has_waits(&self) -> bool {
        !self.wait_syncobjs.is_empty()
    }
}

/// Everything the kernel needs for one submission.
pub struct SubmitRequest<'a> {
    pub queue_family: QueueFamily,
    pub queue_index: u32,
    pub streams: &'a [&'a CommandStream],
    /// Executed once before the streams.
    pub initial_preamble: Option<&'a CommandStream>,
    /// Executed before each chunk after the first one.
    pub continue_preamble: Option<&'a CommandStream>,
    pub semaphores: &'a SemaphoreInfo,
    /// Residency list to use instead of the per-stream registries.
    pub bo_list: Option<&'a [Arc<Bo>]>,
    pub can_patch: bool,
    pub fence: Option<&'a Fence>,
}

/// The kernel interface used by a device.
pub trait Winsys: Send + Sync {
    /// Creates a buffer object of at least `size` bytes.
    fn buffer_create(
        &self,
        size: DeviceSize,
        alignment: DeviceSize,
        domain: BoDomain,
        flags: BoFlags,
    ) -> Result<Arc<Bo>, VulkanError>;

    /// Maps a buffer object into host memory; see [`Bo::with_mapped`].
    fn buffer_map(&self, bo: &Bo) -> Result<(), VulkanError>;

    /// Releases the kernel allocation of a buffer object.
    fn buffer_destroy(&self, bo: &Bo);

    /// Creates a kernel synchronization object.
    fn create_syncobj(&self) -> Result<u32, VulkanError>;

    fn destroy_syncobj(&self, syncobj: u32);

    /// Submits command streams to a hardware queue. This may block if the kernel queue is full.
    fn cs_submit(&self, request: &SubmitRequest<'_>) -> Result<(), VulkanError>;

    /// Blocks until every submission made to a hardware queue has completed.
    fn ctx_wait_idle(&self, queue_family: QueueFamily, queue_index: u32) -> Result<(), VulkanError>;
}
