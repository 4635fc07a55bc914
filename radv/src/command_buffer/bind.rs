// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{CommandBuffer, DirtyState, IndexBufferState, PrefetchMask};
use crate::{
    buffer::Buffer,
    descriptor_set::{
        buffer_descriptor, DescriptorSet, PipelineLayout, PushDescriptorSet,
        MAX_PUSH_CONSTANTS_SIZE,
    },
    device::DebugFlags,
    macros::vulkan_enum,
    pipeline::{ComputePipeline, GraphicsPipeline, Pipeline, PipelineBindPoint, MAX_VBS},
    shader::{ShaderStage, ShaderStages, UserDataSlot},
    DeviceSize, ValidationError,
};
use smallvec::SmallVec;
use std::sync::Arc;

vulkan_enum! {
    /// The type of the indices in an index buffer.
    IndexType = IndexType(i32);

    U16 = UINT16,
    U32 = UINT32,
}

impl IndexType {
    /// Returns the size of one index in bytes.
    #[inline]
    pub fn size(self) -> DeviceSize {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

impl Default for IndexType {
    #[inline]
    fn default() -> Self {
        IndexType::U16
    }
}

/// A buffer descriptor written by [`CommandBuffer::push_descriptor_set`].
#[derive(Clone, Debug)]
pub struct DescriptorBufferWrite {
    /// Index of the descriptor in the set, in units of buffer descriptors.
    pub index: u32,
    pub buffer: Arc<Buffer>,
    pub offset: DeviceSize,
    pub range: DeviceSize,
}

/// # Commands to bind or push state for pipeline execution commands.
///
/// Nothing is written to the command stream here. The new state is recorded and marked dirty, and
/// the next draw or dispatch emits it.
impl CommandBuffer {
    /// Binds a graphics pipeline for future draws.
    pub fn bind_pipeline_graphics(
        &mut self,
        pipeline: Arc<GraphicsPipeline>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording()?;
        self.validate_queue_family(PipelineBindPoint::Graphics)?;

        if self
            .state
            .pipeline
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &pipeline))
        {
            return Ok(self);
        }

        self.mark_descriptor_sets_dirty(PipelineBindPoint::Graphics);

        // The draw parameters live in different registers now.
        let old_vtx_base = self.state.pipeline.as_deref().map(vtx_base_sgpr);
        if old_vtx_base.is_some_and(|old| old != vtx_base_sgpr(&pipeline)) {
            self.state.last_first_instance = None;
            self.state.last_vertex_offset = None;
        }

        self.state.dirty |= DirtyState::PIPELINE;
        self.push_constant_stages |= pipeline.active_stages();
        self.state.prefetch_mask |= PrefetchMask::SHADERS;

        let mask = DirtyState::DYNAMIC_ALL - pipeline.dynamic_states();
        let changed = self.state.dynamic.apply(pipeline.static_state(), mask);
        self.state.dirty |= changed;

        let requirements = &mut self.requirements;
        requirements.esgs_ring_size = requirements.esgs_ring_size.max(pipeline.esgs_ring_size());
        requirements.gsvs_ring_size = requirements.gsvs_ring_size.max(pipeline.gsvs_ring_size());
        requirements.scratch_size = requirements.scratch_size.max(pipeline.scratch_size());
        requirements.tess_rings |= pipeline.has_tess();
        requirements.sample_positions |= pipeline.rasterization_samples() > 1;

        let streamout = &mut self.state.streamout;
        for (stride_in_dw, &stride) in streamout
            .stride_in_dw
            .iter_mut()
            .zip(pipeline.streamout_strides())
        {
            *stride_in_dw = stride / 4;
        }
        streamout.enabled_stream_buffers_mask = pipeline.streamout_enabled_mask();

        if streamout.enabled_stream_buffers_mask != 0 {
            self.state.dirty |= DirtyState::STREAMOUT_BUFFER;
        }

        self.state.pipeline = Some(pipeline);

        Ok(self)
    }

    /// Binds a compute pipeline for future dispatches.
    pub fn bind_pipeline_compute(
        &mut self,
        pipeline: Arc<ComputePipeline>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording()?;
        self.validate_queue_family(PipelineBindPoint::Compute)?;

        if self
            .state
            .compute_pipeline
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &pipeline))
        {
            return Ok(self);
        }

        self.mark_descriptor_sets_dirty(PipelineBindPoint::Compute);
        self.push_constant_stages |= ShaderStages::COMPUTE;
        self.requirements.compute_scratch_size = self
            .requirements
            .compute_scratch_size
            .max(pipeline.scratch_size());
        self.state.compute_pipeline = Some(pipeline);

        Ok(self)
    }

    /// Binds an index buffer for future indexed draws.
    pub fn bind_index_buffer(
        &mut self,
        buffer: Arc<Buffer>,
        offset: DeviceSize,
        index_type: IndexType,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording()?;
        self.validate_queue_family(PipelineBindPoint::Graphics)?;

        if offset >= buffer.size() {
            return Err(ValidationError::new(
                "offset",
                "is not less than the size of `buffer`",
            ));
        }

        if offset % index_type.size() != 0 {
            return Err(ValidationError::new(
                "offset",
                "is not a multiple of the size of `index_type`",
            ));
        }

        self.state.index_buffer = IndexBufferState {
            va: buffer.va() + offset,
            max_index_count: ((buffer.size() - offset) / index_type.size()) as u32,
            index_type,
        };
        self.state.dirty |= DirtyState::INDEX_BUFFER;
        self.cs.add_buffer(buffer.bo());

        Ok(self)
    }

    /// Binds vertex buffers starting at binding `first_binding`.
    pub fn bind_vertex_buffers(
        &mut self,
        first_binding: u32,
        buffers: impl IntoIterator<Item = (Arc<Buffer>, DeviceSize)>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording()?;
        self.validate_queue_family(PipelineBindPoint::Graphics)?;

        let buffers: SmallVec<[_; 4]> = buffers.into_iter().collect();

        if first_binding as usize + buffers.len() > MAX_VBS {
            return Err(ValidationError::new(
                "first_binding + buffers.len()",
                format!("is greater than {}", MAX_VBS),
            ));
        }

        let mut changed = false;

        for (i, (buffer, offset)) in buffers.into_iter().enumerate() {
            let binding = &mut self.vertex_bindings[first_binding as usize + i];

            if !binding
                .buffer
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &buffer))
                || binding.offset != offset
            {
                changed = true;
            }

            self.cs.add_buffer(buffer.bo());
            binding.buffer = Some(buffer);
            binding.offset = offset;
        }

        if changed {
            self.state.dirty |= DirtyState::VERTEX_BUFFER;
        }

        Ok(self)
    }

    /// Binds descriptor sets starting at set number `first_set`.
    ///
    /// `dynamic_offsets` holds one offset per dynamic buffer of the sets, in order.
    pub fn bind_descriptor_sets(
        &mut self,
        bind_point: PipelineBindPoint,
        layout: &Arc<PipelineLayout>,
        first_set: u32,
        sets: &[Arc<DescriptorSet>],
        dynamic_offsets: &[u32],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_bind_descriptor_sets(bind_point, layout, first_set, sets, dynamic_offsets)?;

        let no_dynamic_bounds = self
            .device
            .debug_flags()
            .intersects(DebugFlags::NO_DYNAMIC_BOUNDS);
        let use_global_bo_list = self.device.use_global_bo_list();
        let descriptors = &mut self.descriptors[bind_point.index()];
        let mut dynamic_offsets = dynamic_offsets.iter();

        if descriptors.dynamic_buffers.len() < layout.dynamic_offset_count() as usize {
            descriptors
                .dynamic_buffers
                .resize(layout.dynamic_offset_count() as usize, [0; 4]);
        }

        for (i, set) in sets.iter().enumerate() {
            let index = first_set as usize + i;

            if !use_global_bo_list {
                for bo in set.referenced_bos() {
                    self.cs.add_buffer(&bo);
                }
            }

            if let Some(bo) = set.bo() {
                self.cs.add_buffer(bo);
            }

            let start = layout.dynamic_offset_start(index) as usize;
            for (j, range) in set.dynamic_descriptors().iter().enumerate() {
                let offset = dynamic_offsets.next().copied().unwrap_or(0);
                let num_records = if no_dynamic_bounds {
                    u32::MAX
                } else {
                    range.size
                };
                descriptors.dynamic_buffers[start + j] =
                    buffer_descriptor(range.va + u64::from(offset), num_records, 0);
            }

            if descriptors.push_set_index == Some(index) {
                descriptors.push_set_index = None;
            }

            descriptors.sets[index] = Some(set.clone());
            descriptors.valid |= 1 << index;
            descriptors.dirty |= 1 << index;

            self.push_constant_stages |= set.layout().dynamic_shader_stages();
        }

        Ok(self)
    }

    fn validate_bind_descriptor_sets(
        &self,
        bind_point: PipelineBindPoint,
        layout: &PipelineLayout,
        first_set: u32,
        sets: &[Arc<DescriptorSet>],
        dynamic_offsets: &[u32],
    ) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;
        self.validate_queue_family(bind_point)?;

        if first_set as usize + sets.len() > layout.set_layouts().len() {
            return Err(ValidationError::new(
                "first_set + sets.len()",
                "is greater than the number of sets in `layout`",
            ));
        }

        for (i, set) in sets.iter().enumerate() {
            if !Arc::ptr_eq(set.layout(), &layout.set_layouts()[first_set as usize + i]) {
                return Err(ValidationError::new(
                    format!("sets[{}]", i),
                    "was not allocated with the corresponding set layout of `layout`",
                ));
            }
        }

        let required: u32 = sets.iter().map(|s| s.layout().dynamic_offset_count()).sum();
        if dynamic_offsets.len() != required as usize {
            return Err(ValidationError::new(
                "dynamic_offsets",
                format!(
                    "has {} elements, but the sets contain {} dynamic buffers",
                    dynamic_offsets.len(),
                    required,
                ),
            ));
        }

        Ok(())
    }

    /// Writes buffer descriptors into a push descriptor set, bound as set `set`.
    pub fn push_descriptor_set(
        &mut self,
        bind_point: PipelineBindPoint,
        layout: &Arc<PipelineLayout>,
        set: u32,
        writes: &[DescriptorBufferWrite],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording()?;
        self.validate_queue_family(bind_point)?;

        let Some(set_layout) = layout.set_layouts().get(set as usize) else {
            return Err(ValidationError::new(
                "set",
                "is not less than the number of sets in `layout`",
            ));
        };

        if !set_layout.push_descriptor() {
            return Err(ValidationError::new(
                "set",
                "does not refer to a push descriptor set layout",
            ));
        }

        if let Some(i) = writes.iter().position(|w| w.index >= set_layout.buffer_count()) {
            return Err(ValidationError::new(
                format!("writes[{}].index", i),
                "is out of range for the set layout",
            ));
        }

        let mut push_set = PushDescriptorSet {
            words: vec![0; (set_layout.size() / 4) as usize],
            ..Default::default()
        };

        for write in writes {
            push_set.write_buffer(write.index, &write.buffer, write.offset, write.range);
            self.cs.add_buffer(write.buffer.bo());
        }

        let index = set as usize;
        let descriptors = &mut self.descriptors[bind_point.index()];
        descriptors.sets[index] = None;
        descriptors.push_set = Some(push_set);
        descriptors.push_set_index = Some(index);
        descriptors.push_dirty = true;
        descriptors.valid |= 1 << index;
        descriptors.dirty |= 1 << index;

        Ok(self)
    }

    /// Updates push constants for the shader `stages`.
    pub fn push_constants(
        &mut self,
        layout: &Arc<PipelineLayout>,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording()?;

        if offset % 4 != 0 || data.len() % 4 != 0 {
            return Err(ValidationError::new(
                "offset, data",
                "are not both multiples of 4 bytes",
            ));
        }

        let end = offset as usize + data.len();
        if end > layout.push_constant_size().min(MAX_PUSH_CONSTANTS_SIZE) as usize {
            return Err(ValidationError::new(
                "offset + data.len()",
                "is greater than the push constant size of `layout`",
            ));
        }

        self.push_constants[offset as usize..end].copy_from_slice(data);
        self.push_constant_stages |= stages;

        Ok(self)
    }
}

/// Returns the first register of the base vertex and start instance user SGPRs.
pub(super) fn vtx_base_sgpr(pipeline: &GraphicsPipeline) -> Option<u32> {
    let loc = pipeline
        .shader(ShaderStage::Vertex)?
        .user_sgprs()
        .get(UserDataSlot::BaseVertexStartInstance)?;

    Some(pipeline.user_data_0(ShaderStage::Vertex) + u32::from(loc.sgpr_idx) * 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::{BufferCreateInfo, BufferUsage},
        command_buffer::tests::recording,
        descriptor_set::{DescriptorSetLayout, DescriptorSetLayoutCreateInfo, PipelineLayoutCreateInfo},
        device::QueueFamily,
        tests::graphics_pipeline,
    };

    fn buffer(device: &Arc<crate::device::Device>, size: DeviceSize) -> Arc<Buffer> {
        Buffer::new(
            device,
            BufferCreateInfo {
                size,
                usage: BufferUsage::VERTEX_BUFFER | BufferUsage::INDEX_BUFFER,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn bind_same_pipeline_twice() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        let pipeline = graphics_pipeline(&device, |_| ());

        cb.bind_pipeline_graphics(pipeline.clone()).unwrap();
        assert!(cb.dirty_state().intersects(DirtyState::PIPELINE));

        cb.state.dirty = DirtyState::empty();
        cb.bind_pipeline_graphics(pipeline).unwrap();
        assert!(cb.dirty_state().is_empty());
    }

    #[test]
    fn static_state_marks_changes_only() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);

        let thick = graphics_pipeline(&device, |info| info.static_state.line_width = 2.0);
        let thick_again = graphics_pipeline(&device, |info| info.static_state.line_width = 2.0);

        cb.bind_pipeline_graphics(thick).unwrap();
        assert_eq!(cb.dynamic_state().line_width, 2.0);

        cb.state.dirty = DirtyState::empty();
        cb.bind_pipeline_graphics(thick_again).unwrap();
        assert_eq!(cb.dirty_state(), DirtyState::PIPELINE);
    }

    #[test]
    fn graphics_on_compute_queue() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::Compute);
        let pipeline = graphics_pipeline(&device, |_| ());
        assert!(cb.bind_pipeline_graphics(pipeline).is_err());
    }

    #[test]
    fn index_buffer() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        let ib = buffer(&device, 1024);

        cb.bind_index_buffer(ib.clone(), 24, IndexType::U32).unwrap();
        assert_eq!(cb.state.index_buffer.max_index_count, 250);
        assert_eq!(cb.state.index_buffer.va, ib.va() + 24);
        assert!(cb.dirty_state().intersects(DirtyState::INDEX_BUFFER));
        assert!(cb.cs().has_buffer(ib.bo().id()));

        assert!(cb.bind_index_buffer(ib.clone(), 3, IndexType::U16).is_err());
        assert!(cb.bind_index_buffer(ib, 1024, IndexType::U16).is_err());
    }

    #[test]
    fn vertex_buffers_dirty_on_change() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        let vb = buffer(&device, 256);

        cb.bind_vertex_buffers(0, [(vb.clone(), 0)]).unwrap();
        assert!(cb.dirty_state().intersects(DirtyState::VERTEX_BUFFER));

        cb.state.dirty = DirtyState::empty();
        cb.bind_vertex_buffers(0, [(vb.clone(), 0)]).unwrap();
        assert!(cb.dirty_state().is_empty());

        cb.bind_vertex_buffers(0, [(vb.clone(), 16)]).unwrap();
        assert!(cb.dirty_state().intersects(DirtyState::VERTEX_BUFFER));

        assert!(cb.bind_vertex_buffers(32, [(vb, 0)]).is_err());
    }

    #[test]
    fn dynamic_descriptors() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);

        let set_layout = DescriptorSetLayout::new(DescriptorSetLayoutCreateInfo {
            dynamic_offset_count: 1,
            dynamic_shader_stages: ShaderStages::FRAGMENT,
            ..Default::default()
        })
        .unwrap();
        let layout = PipelineLayout::new(PipelineLayoutCreateInfo {
            set_layouts: vec![set_layout.clone()],
            ..Default::default()
        })
        .unwrap();
        let set = DescriptorSet::new(&device, set_layout).unwrap();
        let ub = buffer(&device, 4096);
        set.write_dynamic_buffer(0, &ub, 0, 256).unwrap();

        assert!(cb
            .bind_descriptor_sets(PipelineBindPoint::Graphics, &layout, 0, &[set.clone()], &[])
            .is_err());

        cb.bind_descriptor_sets(PipelineBindPoint::Graphics, &layout, 0, &[set], &[512])
            .unwrap();

        let state = &cb.descriptors[PipelineBindPoint::Graphics.index()];
        assert_eq!(state.valid, 1);
        assert_eq!(state.dirty, 1);
        assert_eq!(state.dynamic_buffers[0], buffer_descriptor(ub.va() + 512, 256, 0));
        assert!(cb.push_constant_stages.intersects(ShaderStages::FRAGMENT));
    }

    #[test]
    fn push_constants_range() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        let layout = PipelineLayout::new(PipelineLayoutCreateInfo {
            push_constant_size: 16,
            ..Default::default()
        })
        .unwrap();

        cb.push_constants(&layout, ShaderStages::VERTEX, 4, &[1, 2, 3, 4])
            .unwrap();
        assert_eq!(&cb.push_constants[4..8], &[1, 2, 3, 4]);
        assert!(cb.push_constant_stages.intersects(ShaderStages::VERTEX));

        assert!(cb
            .push_constants(&layout, ShaderStages::VERTEX, 16, &[0; 4])
            .is_err());
        assert!(cb
            .push_constants(&layout, ShaderStages::VERTEX, 2, &[0; 4])
            .is_err());
    }
}
