// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Uploading descriptors and pointing the shaders at them.
//!
//! Shaders receive the address of every descriptor set, the push constants, the vertex buffer
//! descriptors and the streamout buffer descriptors in user SGPRs. Data that only exists on the
//! host side (push descriptors, push constants, dynamic buffer descriptors, vertex and streamout
//! descriptors) is copied to the upload buffer first.

use super::{state::bit_scan_consecutive_range, CommandBuffer, DirtyState, PrefetchMask};
use crate::{
    descriptor_set::{buffer_descriptor, BUFFER_DESCRIPTOR_SIZE},
    device::ChipClass,
    pipeline::{Pipeline, PipelineBindPoint, MAX_SO_BUFFERS},
    registers::*,
    shader::{ShaderStage, ShaderStages, UserDataSlot, MAX_SETS},
    DeviceSize,
};
use std::sync::Arc;

/// Alignment of uploaded descriptor data.
const DESCRIPTOR_UPLOAD_ALIGNMENT: DeviceSize = 256;

impl CommandBuffer {
    fn bound_pipeline(&self, bind_point: PipelineBindPoint) -> Option<Arc<dyn Pipeline>> {
        match bind_point {
            PipelineBindPoint::Graphics => self
                .state
                .pipeline
                .clone()
                .map(|p| p as Arc<dyn Pipeline>),
            PipelineBindPoint::Compute => self
                .state
                .compute_pipeline
                .clone()
                .map(|p| p as Arc<dyn Pipeline>),
        }
    }

    /// Writes a GPU address into the user SGPRs at `reg`. A single SGPR holds the low half of an
    /// address in the 32-bit address range.
    fn emit_shader_pointer(&mut self, reg: u32, va: u64, num_sgprs: u8) {
        if num_sgprs >= 2 {
            self.cs.set_sh_reg_seq(reg, 2);
            self.cs.emit(va as u32);
            self.cs.emit((va >> 32) as u32);
        } else {
            self.cs.set_sh_reg(reg, va as u32);
        }
    }

    /// Writes `va` into the user SGPRs of `slot` of every stage in `stages` that uses it.
    fn emit_userdata_address(
        &mut self,
        pipeline: &dyn Pipeline,
        stages: impl IntoIterator<Item = ShaderStage>,
        slot: UserDataSlot,
        va: u64,
    ) {
        for stage in stages {
            let Some(loc) = pipeline
                .shader(stage)
                .and_then(|shader| shader.user_sgprs().get(slot))
            else {
                continue;
            };

            let reg = pipeline.user_data_0(stage) + u32::from(loc.sgpr_idx) * 4;
            self.emit_shader_pointer(reg, va, loc.num_sgprs);
        }
    }

    fn flush_push_descriptors(&mut self, bind_point: PipelineBindPoint) {
        let descriptors = &self.descriptors[bind_point.index()];
        let Some(push_set) = descriptors.push_set.as_ref() else {
            return;
        };

        let data: Vec<u8> = bytemuck::cast_slice(&push_set.words).to_vec();
        let bos = push_set.bos.clone();

        let Some(allocation) = self.upload_data(&data, DESCRIPTOR_UPLOAD_ALIGNMENT) else {
            return;
        };

        if !self.device.use_global_bo_list() {
            for bo in &bos {
                self.cs.add_buffer(bo);
            }
        }

        let descriptors = &mut self.descriptors[bind_point.index()];
        if let Some(push_set) = descriptors.push_set.as_mut() {
            push_set.va = allocation.va();
        }
        descriptors.push_dirty = false;
    }

    /// Uploads the table of descriptor set addresses, for shaders that read it instead of having
    /// one SGPR per set.
    fn flush_indirect_descriptor_sets(&mut self, pipeline: &dyn Pipeline, stages: &[ShaderStage]) {
        let descriptors = &self.descriptors[pipeline.bind_point().index()];
        let table: Vec<u32> = (0..MAX_SETS)
            .flat_map(|i| {
                let va = descriptors.set_va(i);
                [va as u32, (va >> 32) as u32]
            })
            .collect();

        let Some(allocation) = self.upload_data(bytemuck::cast_slice(&table), 64) else {
            return;
        };

        self.emit_userdata_address(
            pipeline,
            stages.iter().copied(),
            UserDataSlot::IndirectDescriptorSets,
            allocation.va(),
        );
    }

    fn emit_descriptor_pointers(&mut self, pipeline: &dyn Pipeline, stage: ShaderStage) {
        let Some(shader) = pipeline.shader(stage) else {
            return;
        };

        let locs = *shader.user_sgprs();
        let sh_base = pipeline.user_data_0(stage);
        let descriptors = &self.descriptors[pipeline.bind_point().index()];
        let mut mask = descriptors.dirty & descriptors.valid & locs.descriptor_sets_enabled();

        while mask != 0 {
            let (start, count) = bit_scan_consecutive_range(&mut mask);
            let Some(loc) = locs.descriptor_sets[start as usize] else {
                continue;
            };

            let vas: Vec<u32> = (start..start + count)
                .map(|i| self.descriptors[pipeline.bind_point().index()].set_va(i as usize) as u32)
                .collect();

            self.cs
                .set_sh_reg_seq(sh_base + u32::from(loc.sgpr_idx) * 4, count);
            self.cs.emit_array(&vas);
        }
    }

    /// Writes the address of every dirty descriptor set for the pipeline bound to `bind_point`.
    pub(super) fn flush_descriptors(&mut self, bind_point: PipelineBindPoint) {
        let descriptors = &self.descriptors[bind_point.index()];
        if descriptors.dirty == 0 {
            return;
        }

        let Some(pipeline) = self.bound_pipeline(bind_point) else {
            return;
        };

        if self.descriptors[bind_point.index()].push_dirty {
            self.flush_push_descriptors(bind_point);
        }

        let stages: &[ShaderStage] = match bind_point {
            PipelineBindPoint::Graphics => &ShaderStage::GRAPHICS,
            PipelineBindPoint::Compute => &[ShaderStage::Compute],
        };

        if pipeline.need_indirect_descriptor_sets() {
            self.flush_indirect_descriptor_sets(&*pipeline, stages);
        }

        if !self.check_space(MAX_SETS * ShaderStage::COUNT * 4) {
            return;
        }

        for &stage in stages {
            self.emit_descriptor_pointers(&*pipeline, stage);
        }

        let descriptors = &mut self.descriptors[bind_point.index()];
        descriptors.dirty = 0;
        descriptors.push_dirty = false;
    }

    /// Uploads the push constants followed by the dynamic buffer descriptors, and writes their
    /// address for the stages that need them.
    pub(super) fn flush_constants(&mut self, bind_point: PipelineBindPoint) {
        let Some(pipeline) = self.bound_pipeline(bind_point) else {
            return;
        };

        let stages = match bind_point {
            PipelineBindPoint::Graphics => ShaderStages::ALL_GRAPHICS,
            PipelineBindPoint::Compute => ShaderStages::COMPUTE,
        } & self.push_constant_stages;

        let layout = pipeline.layout().clone();
        let push_constant_size = layout.push_constant_size() as usize;
        let dynamic_count = layout.dynamic_offset_count() as usize;

        if stages.is_empty() || (push_constant_size == 0 && dynamic_count == 0) {
            return;
        }

        let mut data = Vec::with_capacity(
            push_constant_size + dynamic_count * BUFFER_DESCRIPTOR_SIZE as usize,
        );
        data.extend_from_slice(&self.push_constants[..push_constant_size]);

        let dynamic_buffers = &self.descriptors[bind_point.index()].dynamic_buffers;
        for i in 0..dynamic_count {
            let descriptor = dynamic_buffers.get(i).copied().unwrap_or([0; 4]);
            data.extend_from_slice(bytemuck::cast_slice(&descriptor));
        }

        let Some(allocation) = self.upload_data(&data, DESCRIPTOR_UPLOAD_ALIGNMENT) else {
            return;
        };

        if !self.check_space(ShaderStage::COUNT * 4) {
            return;
        }

        self.emit_userdata_address(
            &*pipeline,
            stages.stages(),
            UserDataSlot::PushConstants,
            allocation.va(),
        );

        self.push_constant_stages -= stages;
    }

    /// Uploads one buffer descriptor per vertex attribute if the pipeline or the vertex buffers
    /// changed.
    pub(super) fn flush_vertex_descriptors(&mut self, pipeline_is_dirty: bool) {
        let Some(pipeline) = self.state.pipeline.clone() else {
            return;
        };

        let elements = pipeline.vertex_elements();

        if (pipeline_is_dirty || self.state.dirty.intersects(DirtyState::VERTEX_BUFFER))
            && !elements.is_empty()
        {
            let strides = pipeline.vertex_binding_strides();
            let clamp_to_records = self.device.chip_class() <= ChipClass::Cik;
            let mut words = Vec::with_capacity(elements.len() * 4);

            for element in elements {
                let binding = &self.vertex_bindings[element.binding as usize];
                let stride = strides[element.binding as usize];

                let Some(buffer) = binding.buffer.as_ref() else {
                    words.extend_from_slice(&[0; 4]);
                    continue;
                };

                let offset = binding.offset + DeviceSize::from(element.offset);
                let va = buffer.va() + offset;
                let remaining = buffer.size().saturating_sub(offset);

                // SI and CIK count records in units of the stride.
                let num_records = if clamp_to_records && stride != 0 {
                    match remaining.checked_sub(DeviceSize::from(element.format_size)) {
                        Some(bytes) => bytes / DeviceSize::from(stride) + 1,
                        None => 0,
                    }
                } else {
                    remaining
                };

                let mut descriptor = buffer_descriptor(va, num_records as u32, stride);
                descriptor[3] = element.rsrc_word3;
                words.extend_from_slice(&descriptor);
            }

            let Some(allocation) =
                self.upload_data(bytemuck::cast_slice(&words), DESCRIPTOR_UPLOAD_ALIGNMENT)
            else {
                return;
            };

            if !self.check_space(4) {
                return;
            }

            self.emit_userdata_address(
                &*pipeline,
                [ShaderStage::Vertex],
                UserDataSlot::VertexBuffers,
                allocation.va(),
            );

            self.state.vb_va = allocation.va();
            self.state.vb_size = (words.len() * 4) as u32;
            self.state.prefetch_mask |= PrefetchMask::VBO_DESCRIPTORS;
        }

        self.state.dirty -= DirtyState::VERTEX_BUFFER;
    }

    /// Uploads the descriptors of the bound transform feedback buffers.
    pub(super) fn flush_streamout_descriptors(&mut self) {
        if self.state.dirty.intersects(DirtyState::STREAMOUT_BUFFER) {
            if let Some(pipeline) = self.state.pipeline.clone() {
                let enabled_mask = self.state.streamout.enabled_mask;
                let mut words = [0u32; MAX_SO_BUFFERS * 4];

                for (i, binding) in self.streamout_bindings.iter().enumerate() {
                    let Some(buffer) = binding.buffer.as_ref().filter(|_| enabled_mask & 1 << i != 0)
                    else {
                        continue;
                    };

                    let va = buffer.va() + binding.offset;

                    // The hardware keeps track of the buffer size itself, so the descriptor
                    // never clamps.
                    words[i * 4..i * 4 + 4].copy_from_slice(&[
                        va as u32,
                        s_008f04_base_address_hi((va >> 32) as u32),
                        u32::MAX,
                        s_008f0c_dst_sel_x(V_008F0C_SQ_SEL_X)
                            | s_008f0c_dst_sel_y(V_008F0C_SQ_SEL_Y)
                            | s_008f0c_dst_sel_z(V_008F0C_SQ_SEL_Z)
                            | s_008f0c_dst_sel_w(V_008F0C_SQ_SEL_W)
                            | s_008f0c_data_format(V_008F0C_BUF_DATA_FORMAT_32),
                    ]);
                }

                let Some(allocation) =
                    self.upload_data(bytemuck::cast_slice(&words), DESCRIPTOR_UPLOAD_ALIGNMENT)
                else {
                    return;
                };

                if !self.check_space(ShaderStage::COUNT * 4) {
                    return;
                }

                self.emit_userdata_address(
                    &*pipeline,
                    ShaderStage::GRAPHICS,
                    UserDataSlot::StreamoutBuffers,
                    allocation.va(),
                );
            }
        }

        self.state.dirty -= DirtyState::STREAMOUT_BUFFER;
    }

    /// Uploads every descriptor a draw needs.
    pub(super) fn upload_graphics_shader_descriptors(&mut self, pipeline_is_dirty: bool) {
        self.flush_vertex_descriptors(pipeline_is_dirty);
        self.flush_streamout_descriptors();
        self.flush_descriptors(PipelineBindPoint::Graphics);
        self.flush_constants(PipelineBindPoint::Graphics);
    }

    /// Uploads every descriptor a dispatch needs.
    pub(super) fn upload_compute_shader_descriptors(&mut self) {
        self.flush_descriptors(PipelineBindPoint::Compute);
        self.flush_constants(PipelineBindPoint::Compute);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::{Buffer, BufferCreateInfo, BufferUsage},
        command_buffer::tests::recording,
        descriptor_set::{
            DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutCreateInfo, PipelineLayout,
            PipelineLayoutCreateInfo,
        },
        device::{Device, QueueFamily},
        pipeline::VertexElement,
        tests::{count_reg_writes, graphics_pipeline, packets},
    };

    fn two_set_layout() -> (Arc<PipelineLayout>, Arc<DescriptorSetLayout>) {
        let set_layout = DescriptorSetLayout::new(DescriptorSetLayoutCreateInfo {
            size: 64,
            buffer_count: 4,
            ..Default::default()
        })
        .unwrap();
        let layout = PipelineLayout::new(PipelineLayoutCreateInfo {
            set_layouts: vec![set_layout.clone(), set_layout.clone()],
            push_constant_size: 16,
        })
        .unwrap();

        (layout, set_layout)
    }

    fn vertex_buffer(device: &Arc<Device>, size: DeviceSize) -> Arc<Buffer> {
        Buffer::new(
            device,
            BufferCreateInfo {
                size,
                usage: BufferUsage::VERTEX_BUFFER,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn consecutive_sets_share_a_packet() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        let (layout, set_layout) = two_set_layout();
        let pipeline = graphics_pipeline(&device, |info| info.layout = layout.clone());
        let sets = [
            DescriptorSet::new(&device, set_layout.clone()).unwrap(),
            DescriptorSet::new(&device, set_layout).unwrap(),
        ];

        cb.bind_pipeline_graphics(pipeline).unwrap();
        cb.bind_descriptor_sets(PipelineBindPoint::Graphics, &layout, 0, &sets, &[])
            .unwrap();
        cb.flush_descriptors(PipelineBindPoint::Graphics);

        let words = cb.cs().words();
        let vs_sets = R_00B130_SPI_SHADER_USER_DATA_VS_0 + 2 * 4;
        let packet = packets(words)
            .into_iter()
            .find(|p| p.register() == Some(vs_sets))
            .unwrap();
        assert_eq!(packet.values(), &[sets[0].va() as u32, sets[1].va() as u32]);
        assert_eq!(
            count_reg_writes(words, R_00B030_SPI_SHADER_USER_DATA_PS_0 + 2 * 4),
            1
        );
        assert_eq!(cb.descriptors[0].dirty, 0);

        // Nothing changed since.
        let before = cb.cs().cdw();
        cb.flush_descriptors(PipelineBindPoint::Graphics);
        assert_eq!(cb.cs().cdw(), before);
    }

    #[test]
    fn push_constants_uploaded_per_stage() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        let (layout, _) = two_set_layout();
        let pipeline = graphics_pipeline(&device, |info| info.layout = layout.clone());

        cb.bind_pipeline_graphics(pipeline).unwrap();
        cb.push_constants(&layout, ShaderStages::VERTEX, 0, &[7; 16])
            .unwrap();
        cb.flush_constants(PipelineBindPoint::Graphics);

        let words = cb.cs().words();
        assert_eq!(count_reg_writes(words, R_00B130_SPI_SHADER_USER_DATA_VS_0 + 4 * 4), 1);
        assert_eq!(count_reg_writes(words, R_00B030_SPI_SHADER_USER_DATA_PS_0 + 4 * 4), 1);
        assert!(cb.push_constant_stages.is_empty());

        // Already flushed.
        let before = cb.cs().cdw();
        cb.flush_constants(PipelineBindPoint::Graphics);
        assert_eq!(cb.cs().cdw(), before);
    }

    fn first_vertex_descriptor(device: &Arc<Device>) -> ([u32; 4], u64) {
        let mut cb = recording(device, QueueFamily::General);
        let pipeline = graphics_pipeline(device, |info| {
            info.vertex_binding_strides = vec![12];
            info.vertex_elements = vec![VertexElement {
                binding: 0,
                offset: 4,
                format_size: 8,
                rsrc_word3: 0x1234,
            }];
        });
        let vb = vertex_buffer(device, 100);

        cb.bind_pipeline_graphics(pipeline).unwrap();
        cb.bind_vertex_buffers(0, [(vb.clone(), 0)]).unwrap();
        cb.flush_vertex_descriptors(true);

        assert_eq!(cb.state.vb_size, 16);
        assert!(cb.state.prefetch_mask.intersects(PrefetchMask::VBO_DESCRIPTORS));
        assert!(!cb.dirty_state().intersects(DirtyState::VERTEX_BUFFER));
        assert_eq!(
            count_reg_writes(cb.cs().words(), R_00B130_SPI_SHADER_USER_DATA_VS_0 + 5 * 4),
            1
        );

        let bo = cb.upload().bo().unwrap().clone();
        let bytes = bo.read((cb.state.vb_va - bo.va()) as usize, 16).unwrap();
        let descriptor: [u32; 4] = bytemuck::pod_read_unaligned(&bytes);

        (descriptor, vb.va())
    }

    #[test]
    fn vertex_descriptor_records_in_strides_on_cik() {
        let (device, _) = gfx_device!(Bonaire);
        let (descriptor, vb_va) = first_vertex_descriptor(&device);

        assert_eq!(descriptor[0], (vb_va + 4) as u32);
        // (100 - 4 - 8) / 12 + 1
        assert_eq!(descriptor[2], 8);
        assert_eq!(descriptor[3], 0x1234);
    }

    #[test]
    fn vertex_descriptor_records_in_bytes_on_vi() {
        let (device, _) = gfx_device!(Polaris10);
        let (descriptor, _) = first_vertex_descriptor(&device);

        assert_eq!(descriptor[2], 96);
        assert_eq!(descriptor[3], 0x1234);
    }

    #[test]
    fn streamout_descriptors_only_for_enabled_buffers() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        let pipeline = graphics_pipeline(&device, |_| {});
        cb.bind_pipeline_graphics(pipeline).unwrap();

        cb.state.dirty |= DirtyState::STREAMOUT_BUFFER;
        cb.flush_streamout_descriptors();
        assert!(!cb.dirty_state().intersects(DirtyState::STREAMOUT_BUFFER));

        // The test shaders have no streamout slot, so nothing points at the upload.
        assert!(packets(cb.cs().words())
            .iter()
            .all(|p| p.register() != Some(R_00B130_SPI_SHADER_USER_DATA_VS_0)));
    }
}
