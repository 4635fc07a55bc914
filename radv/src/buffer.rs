// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Linear GPU memory.

use crate::{
    device::Device,
    macros::vulkan_bitflags,
    winsys::{Bo, BoDomain, BoFlags},
    DeviceSize, Validated, ValidationError, VulkanError,
};
use std::sync::Arc;

vulkan_bitflags! {
    /// Describes how a buffer is going to be used.
    BufferUsage = BufferUsageFlags(u32);

    TRANSFER_SRC = TRANSFER_SRC,
    TRANSFER_DST = TRANSFER_DST,
    UNIFORM_TEXEL_BUFFER = UNIFORM_TEXEL_BUFFER,
    STORAGE_TEXEL_BUFFER = STORAGE_TEXEL_BUFFER,
    UNIFORM_BUFFER = UNIFORM_BUFFER,
    STORAGE_BUFFER = STORAGE_BUFFER,
    INDEX_BUFFER = INDEX_BUFFER,
    VERTEX_BUFFER = VERTEX_BUFFER,
    INDIRECT_BUFFER = INDIRECT_BUFFER,
    TRANSFORM_FEEDBACK_BUFFER = TRANSFORM_FEEDBACK_BUFFER_EXT,
    TRANSFORM_FEEDBACK_COUNTER_BUFFER = TRANSFORM_FEEDBACK_COUNTER_BUFFER_EXT,
}

/// Parameters to create a new `Buffer`.
#[derive(Clone, Debug)]
pub struct BufferCreateInfo {
    pub size: DeviceSize,
    pub usage: BufferUsage,
    /// Whether the host maps the buffer.
    pub host_visible: bool,
}

impl Default for BufferCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            size: 0,
            usage: BufferUsage::empty(),
            host_visible: false,
        }
    }
}

/// A range of a buffer object used as a Vulkan buffer.
#[derive(Debug)]
pub struct Buffer {
    bo: Arc<Bo>,
    offset: DeviceSize,
    size: DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a buffer with its own buffer object.
    pub fn new(
        device: &Arc<Device>,
        create_info: BufferCreateInfo,
    ) -> Result<Arc<Buffer>, Validated<VulkanError>> {
        let BufferCreateInfo {
            size,
            usage,
            host_visible,
        } = create_info;

        if size == 0 {
            return Err(ValidationError::new("create_info.size", "is zero").into());
        }

        let (domain, flags) = if host_visible {
            (BoDomain::Gtt, BoFlags::CPU_ACCESS)
        } else {
            (BoDomain::Vram, BoFlags::NO_CPU_ACCESS)
        };

        let bo = device.winsys().buffer_create(size, 256, domain, flags)?;

        if host_visible {
            device.winsys().buffer_map(&bo)?;
        }

        Ok(Arc::new(Buffer {
            bo,
            offset: 0,
            size,
            usage,
        }))
    }

    /// Creates a buffer covering `size` bytes of an existing buffer object.
    pub fn from_bo(
        bo: Arc<Bo>,
        offset: DeviceSize,
        size: DeviceSize,
        usage: BufferUsage,
    ) -> Result<Arc<Buffer>, Box<ValidationError>> {
        if offset.checked_add(size).is_none_or(|end| end > bo.size()) {
            return Err(ValidationError::new(
                "offset + size",
                "is greater than the size of the buffer object",
            ));
        }

        Ok(Arc::new(Buffer {
            bo,
            offset,
            size,
            usage,
        }))
    }

    #[inline]
    pub fn bo(&self) -> &Arc<Bo> {
        &self.bo
    }

    /// Returns the offset of the buffer within its buffer object.
    #[inline]
    pub fn offset(&self) -> DeviceSize {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Returns the GPU address of the first byte of the buffer.
    #[inline]
    pub fn va(&self) -> u64 {
        self.bo.va() + self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create() {
        let (device, _) = gfx_device!();
        let buffer = Buffer::new(
            &device,
            BufferCreateInfo {
                size: 1024,
                usage: BufferUsage::VERTEX_BUFFER,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(buffer.va(), buffer.bo().va());

        let sub = Buffer::from_bo(buffer.bo().clone(), 256, 256, BufferUsage::INDEX_BUFFER).unwrap();
        assert_eq!(sub.va(), buffer.va() + 256);
        assert!(Buffer::from_bo(buffer.bo().clone(), 1000, 256, BufferUsage::empty()).is_err());
    }

    #[test]
    fn zero_size() {
        let (device, _) = gfx_device!();
        assert!(Buffer::new(&device, BufferCreateInfo::default())
            .unwrap_err()
            .is_validation_error());
    }
}
