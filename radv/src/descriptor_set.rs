// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Descriptor sets and pipeline layouts.
//!
//! Descriptors are written by the host into GPU-visible memory, and shaders find a set through a
//! pointer that the command buffer writes into their user SGPRs. Dynamic uniform and storage
//! buffers are the exception: their final address is only known when the set is bound, so their
//! descriptors are built by the command buffer and uploaded next to the push constants.

use crate::{
    buffer::Buffer,
    device::Device,
    registers::*,
    shader::{ShaderStages, MAX_SETS},
    winsys::{Bo, BoDomain, BoFlags},
    DeviceSize, Validated, ValidationError, VulkanError,
};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

/// Size of one buffer descriptor, in bytes.
pub const BUFFER_DESCRIPTOR_SIZE: u32 = 16;

/// Maximum number of bytes of push constants.
pub const MAX_PUSH_CONSTANTS_SIZE: u32 = 128;

/// Maximum number of dynamic buffers over all the sets of a layout.
pub const MAX_DYNAMIC_BUFFERS: u32 = 16;

/// Parameters to create a new `DescriptorSetLayout`.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSetLayoutCreateInfo {
    /// Size of the descriptor storage, in bytes.
    pub size: u32,
    /// Number of descriptors that reference a buffer object.
    pub buffer_count: u32,
    /// Number of dynamic uniform and storage buffers.
    pub dynamic_offset_count: u32,
    /// Stages that access the dynamic buffers.
    pub dynamic_shader_stages: ShaderStages,
    /// The set is pushed with `push_descriptor_set` instead of being allocated.
    pub push_descriptor: bool,
}

/// The shape of a descriptor set.
#[derive(Debug)]
pub struct DescriptorSetLayout {
    size: u32,
    buffer_count: u32,
    dynamic_offset_count: u32,
    dynamic_shader_stages: ShaderStages,
    push_descriptor: bool,
}

impl DescriptorSetLayout {
    pub fn new(
        create_info: DescriptorSetLayoutCreateInfo,
    ) -> Result<Arc<DescriptorSetLayout>, Box<ValidationError>> {
        let DescriptorSetLayoutCreateInfo {
            size,
            buffer_count,
            dynamic_offset_count,
            dynamic_shader_stages,
            push_descriptor,
        } = create_info;

        if size % 4 != 0 {
            return Err(ValidationError::new(
                "create_info.size",
                "is not a multiple of 4",
            ));
        }

        if dynamic_offset_count > MAX_DYNAMIC_BUFFERS {
            return Err(ValidationError::new(
                "create_info.dynamic_offset_count",
                "is greater than the maximum number of dynamic buffers",
            ));
        }

        if push_descriptor && dynamic_offset_count != 0 {
            return Err(ValidationError::new(
                "create_info.dynamic_offset_count",
                "is not zero for a push descriptor layout",
            ));
        }

        Ok(Arc::new(DescriptorSetLayout {
            size,
            buffer_count,
            dynamic_offset_count,
            dynamic_shader_stages,
            push_descriptor,
        }))
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    #[inline]
    pub fn dynamic_offset_count(&self) -> u32 {
        self.dynamic_offset_count
    }

    #[inline]
    pub fn dynamic_shader_stages(&self) -> ShaderStages {
        self.dynamic_shader_stages
    }

    #[inline]
    pub fn push_descriptor(&self) -> bool {
        self.push_descriptor
    }
}

/// Parameters to create a new `PipelineLayout`.
#[derive(Clone, Debug, Default)]
pub struct PipelineLayoutCreateInfo {
    pub set_layouts: Vec<Arc<DescriptorSetLayout>>,
    /// Size of the push constant range, in bytes.
    pub push_constant_size: u32,
}

/// The descriptor set layouts and push constants a pipeline is compiled against.
#[derive(Debug)]
pub struct PipelineLayout {
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
    dynamic_offset_starts: SmallVec<[u32; MAX_SETS]>,
    dynamic_offset_count: u32,
    push_constant_size: u32,
}

impl PipelineLayout {
    pub fn new(
        create_info: PipelineLayoutCreateInfo,
    ) -> Result<Arc<PipelineLayout>, Box<ValidationError>> {
        let PipelineLayoutCreateInfo {
            set_layouts,
            push_constant_size,
        } = create_info;

        if set_layouts.len() > MAX_SETS {
            return Err(ValidationError::new(
                "create_info.set_layouts",
                "has more elements than the maximum number of bound sets",
            ));
        }

        if push_constant_size > MAX_PUSH_CONSTANTS_SIZE || push_constant_size % 4 != 0 {
            return Err(ValidationError::new(
                "create_info.push_constant_size",
                "is greater than the maximum or not a multiple of 4",
            ));
        }

        let mut dynamic_offset_starts = SmallVec::new();
        let mut dynamic_offset_count = 0;

        for layout in &set_layouts {
            dynamic_offset_starts.push(dynamic_offset_count);
            dynamic_offset_count += layout.dynamic_offset_count();
        }

        if dynamic_offset_count > MAX_DYNAMIC_BUFFERS {
            return Err(ValidationError::new(
                "create_info.set_layouts",
                "use more dynamic buffers in total than the maximum",
            ));
        }

        Ok(Arc::new(PipelineLayout {
            set_layouts,
            dynamic_offset_starts,
            dynamic_offset_count,
            push_constant_size,
        }))
    }

    #[inline]
    pub fn set_layouts(&self) -> &[Arc<DescriptorSetLayout>] {
        &self.set_layouts
    }

    /// Returns the index of the first dynamic buffer of set `set`.
    #[inline]
    pub fn dynamic_offset_start(&self, set: usize) -> u32 {
        self.dynamic_offset_starts.get(set).copied().unwrap_or(0)
    }

    #[inline]
    pub fn dynamic_offset_count(&self) -> u32 {
        self.dynamic_offset_count
    }

    #[inline]
    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }
}

/// The range of a dynamic buffer, before the dynamic offset is added.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DescriptorRange {
    pub va: u64,
    pub size: u32,
}

/// A descriptor set in GPU memory.
#[derive(Debug)]
pub struct DescriptorSet {
    device: Arc<Device>,
    layout: Arc<DescriptorSetLayout>,
    bo: Option<Arc<Bo>>,
    state: Mutex<DescriptorSetState>,
}

#[derive(Debug, Default)]
struct DescriptorSetState {
    /// Buffer objects referenced by the descriptors, by descriptor index.
    descriptors: Vec<Option<Arc<Bo>>>,
    dynamic_descriptors: SmallVec<[DescriptorRange; 4]>,
}

impl DescriptorSet {
    /// Allocates a set with its own host-visible buffer object.
    pub fn new(
        device: &Arc<Device>,
        layout: Arc<DescriptorSetLayout>,
    ) -> Result<Arc<DescriptorSet>, Validated<VulkanError>> {
        if layout.push_descriptor() {
            return Err(ValidationError::new(
                "layout",
                "is a push descriptor layout, which cannot be allocated",
            )
            .into());
        }

        let bo = if layout.size() > 0 {
            let winsys = device.winsys();
            let bo = winsys.buffer_create(
                DeviceSize::from(layout.size()),
                32,
                BoDomain::Vram,
                BoFlags::CPU_ACCESS | BoFlags::READ_ONLY | BoFlags::NO_INTERPROCESS_SHARING,
            )?;

            if let Err(err) = winsys.buffer_map(&bo) {
                winsys.buffer_destroy(&bo);
                return Err(err.into());
            }

            if device.use_global_bo_list() {
                device.add_global_bo(&bo);
            }

            Some(bo)
        } else {
            None
        };

        let state = DescriptorSetState {
            descriptors: vec![None; layout.buffer_count() as usize],
            dynamic_descriptors: SmallVec::from_elem(
                DescriptorRange::default(),
                layout.dynamic_offset_count() as usize,
            ),
        };

        Ok(Arc::new(DescriptorSet {
            device: device.clone(),
            layout,
            bo,
            state: Mutex::new(state),
        }))
    }

    #[inline]
    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    #[inline]
    pub fn bo(&self) -> Option<&Arc<Bo>> {
        self.bo.as_ref()
    }

    /// Returns the GPU address of the descriptors. Zero for an empty set.
    #[inline]
    pub fn va(&self) -> u64 {
        self.bo.as_ref().map_or(0, |bo| bo.va())
    }

    /// Writes a uniform or storage buffer descriptor at `index`, in units of buffer descriptors.
    pub fn write_buffer(
        &self,
        index: u32,
        buffer: &Arc<Buffer>,
        offset: DeviceSize,
        range: DeviceSize,
    ) -> Result<(), Validated<VulkanError>> {
        if index >= self.layout.buffer_count()
            || (index + 1) * BUFFER_DESCRIPTOR_SIZE > self.layout.size()
        {
            return Err(ValidationError::new("index", "is out of range for the layout").into());
        }

        let words = buffer_descriptor(buffer.va() + offset, range as u32, 0);
        let bo = self.bo.as_ref().ok_or(VulkanError::MemoryMapFailed)?;
        bo.write(
            (index * BUFFER_DESCRIPTOR_SIZE) as usize,
            bytemuck::cast_slice(&words),
        )?;

        if self.device.use_global_bo_list() {
            self.device.add_global_bo(buffer.bo());
        }

        self.state.lock().descriptors[index as usize] = Some(buffer.bo().clone());

        Ok(())
    }

    /// Records the range of dynamic buffer `index`. The descriptor is built when the set is bound.
    pub fn write_dynamic_buffer(
        &self,
        index: u32,
        buffer: &Arc<Buffer>,
        offset: DeviceSize,
        range: DeviceSize,
    ) -> Result<(), Box<ValidationError>> {
        let mut state = self.state.lock();
        let slot = state
            .dynamic_descriptors
            .get_mut(index as usize)
            .ok_or_else(|| ValidationError::new("index", "is not a dynamic buffer of the layout"))?;

        *slot = DescriptorRange {
            va: buffer.va() + offset,
            size: range as u32,
        };

        Ok(())
    }

    /// Returns the buffer objects referenced by the descriptors.
    pub fn referenced_bos(&self) -> Vec<Arc<Bo>> {
        self.state.lock().descriptors.iter().flatten().cloned().collect()
    }

    /// Returns the ranges of the dynamic buffers.
    pub fn dynamic_descriptors(&self) -> SmallVec<[DescriptorRange; 4]> {
        self.state.lock().dynamic_descriptors.clone()
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        if let Some(bo) = &self.bo {
            if self.device.use_global_bo_list() {
                self.device.remove_global_bo(bo.id());
            }

            self.device.winsys().buffer_destroy(bo);
        }
    }
}

/// A descriptor set that lives in host memory until a draw uploads it.
#[derive(Clone, Debug, Default)]
pub struct PushDescriptorSet {
    /// The descriptors, as they will be uploaded.
    pub words: Vec<u32>,
    /// Buffer objects referenced by the descriptors.
    pub bos: Vec<Arc<Bo>>,
    /// GPU address of the last upload.
    pub va: u64,
}

impl PushDescriptorSet {
    /// Writes a buffer descriptor at `index`, growing the set as needed.
    pub fn write_buffer(&mut self, index: u32, buffer: &Arc<Buffer>, offset: DeviceSize, range: DeviceSize) {
        let start = (index * BUFFER_DESCRIPTOR_SIZE / 4) as usize;

        if self.words.len() < start + 4 {
            self.words.resize(start + 4, 0);
        }

        self.words[start..start + 4]
            .copy_from_slice(&buffer_descriptor(buffer.va() + offset, range as u32, 0));

        if !self.bos.iter().any(|bo| Arc::ptr_eq(bo, buffer.bo())) {
            self.bos.push(buffer.bo().clone());
        }
    }
}

/// Builds a raw buffer descriptor.
pub fn buffer_descriptor(va: u64, num_records: u32, stride: u32) -> [u32; 4] {
    [
        va as u32,
        s_008f04_base_address_hi((va >> 32) as u32) | s_008f04_stride(stride),
        num_records,
        BUFFER_DESCRIPTOR_WORD3,
    ]
}
