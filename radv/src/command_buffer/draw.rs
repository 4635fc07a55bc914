// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Draws and dispatches.
//!
//! Every draw and dispatch goes through the same steps: write the dirty hardware state, emit the
//! pending cache flushes, upload and point to the descriptors, then append the draw packet. Two
//! orderings are used depending on whether the pending flushes make the GPU wait for idle:
//!
//! - If they do, the state is written first, so that the context registers are programmed while
//!   the pipeline drains. The shader prefetches go after the draw since nothing runs meanwhile.
//! - If they don't, the flush goes first, followed by the prefetch of the vertex shader, so that
//!   the memory fetches overlap with the state writes. The other stages are prefetched after the
//!   draw.

use super::{
    bind::vtx_base_sgpr, CommandBuffer, CommandBufferLevel, CommandBufferStatus, DirtyState,
    PrefetchMask,
};
use crate::{
    buffer::{Buffer, BufferUsage},
    device::ChipClass,
    pipeline::{GraphicsPipeline, Pipeline, PipelineBindPoint},
    registers::*,
    shader::{ShaderStage, UserDataSlot},
    sync::FlushBits,
    DeviceSize, ValidationError,
};
use bytemuck::{Pod, Zeroable};
use std::{mem::size_of, sync::Arc};

/// Parameters of a non-indexed indirect draw, as read by the GPU.
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod, PartialEq, Eq)]
#[repr(C)]
pub struct DrawIndirectCommand {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

/// Parameters of an indexed indirect draw, as read by the GPU.
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod, PartialEq, Eq)]
#[repr(C)]
pub struct DrawIndexedIndirectCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

/// Parameters of an indirect dispatch, as read by the GPU.
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod, PartialEq, Eq)]
#[repr(C)]
pub struct DispatchIndirectCommand {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// Where the GPU reads the parameters of an indirect draw.
#[derive(Clone, Debug)]
pub(super) struct IndirectDraw {
    pub(super) buffer: Arc<Buffer>,
    pub(super) offset: DeviceSize,
    /// Number of draws, or the maximum number of draws if `count_buffer` is set.
    pub(super) draw_count: u32,
    pub(super) stride: u32,
    pub(super) count_buffer: Option<(Arc<Buffer>, DeviceSize)>,
}

/// Everything a draw command passes down to the state emission.
#[derive(Clone, Debug, Default)]
pub(super) struct DrawInfo {
    /// Number of vertices, or of indices for indexed draws.
    pub(super) count: u32,
    pub(super) instance_count: u32,
    pub(super) first_instance: u32,
    /// Added to every vertex index, for indexed draws. The first vertex otherwise.
    pub(super) vertex_offset: u32,
    pub(super) first_index: u32,
    pub(super) indexed: bool,
    pub(super) indirect: Option<IndirectDraw>,
    /// Buffer holding the number of bytes written by transform feedback, for draws whose vertex
    /// count comes from there.
    pub(super) strmout_buffer: Option<(Arc<Buffer>, DeviceSize)>,
    /// Size of a vertex written by transform feedback, in bytes.
    pub(super) strmout_vertex_stride: u32,
}

#[derive(Clone, Debug, Default)]
struct DispatchInfo {
    blocks: [u32; 3],
    offsets: [u32; 3],
    indirect: Option<(Arc<Buffer>, DeviceSize)>,
}

/// # Commands to execute a bound pipeline.
impl CommandBuffer {
    fn validate_draw(&self) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;
        self.validate_queue_family(PipelineBindPoint::Graphics)?;

        if self.state.pipeline.is_none() {
            return Err(ValidationError::new(
                "self",
                "no graphics pipeline is currently bound",
            ));
        }

        Ok(())
    }

    fn validate_draw_indexed(&self) -> Result<(), Box<ValidationError>> {
        self.validate_draw()?;

        if self.state.index_buffer.va == 0 {
            return Err(ValidationError::new(
                "self",
                "no index buffer is currently bound",
            ));
        }

        Ok(())
    }

    fn validate_indirect_buffer(
        &self,
        buffer: &Buffer,
        offset: DeviceSize,
        draw_count: u32,
        stride: u32,
        command_size: usize,
    ) -> Result<(), Box<ValidationError>> {
        if !buffer.usage().intersects(BufferUsage::INDIRECT_BUFFER) {
            return Err(ValidationError::new(
                "buffer.usage()",
                "does not contain `BufferUsage::INDIRECT_BUFFER`",
            ));
        }

        if offset % 4 != 0 {
            return Err(ValidationError::new("offset", "is not a multiple of 4"));
        }

        if draw_count > 1 && (stride % 4 != 0 || (stride as usize) < command_size) {
            return Err(ValidationError::new(
                "stride",
                format!(
                    "is not a multiple of 4, or is less than the size of one command ({} bytes)",
                    command_size,
                ),
            ));
        }

        let end = offset
            + DeviceSize::from(draw_count.saturating_sub(1)) * DeviceSize::from(stride)
            + command_size as DeviceSize;

        if draw_count > 0 && end > buffer.size() {
            return Err(ValidationError::new(
                "offset",
                "plus the size of the commands is greater than the size of `buffer`",
            ));
        }

        Ok(())
    }

    fn validate_draw_parameters_sgprs(&self) -> Result<(), Box<ValidationError>> {
        let has_sgprs = self
            .state
            .pipeline
            .as_deref()
            .and_then(vtx_base_sgpr)
            .is_some();

        if !has_sgprs {
            return Err(ValidationError::new(
                "self",
                "the vertex shader of the bound pipeline does not receive the draw parameters, \
                which indirect draws write",
            ));
        }

        Ok(())
    }

    /// Draws non-indexed vertices.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_draw()?;

        self.draw_inner(&DrawInfo {
            count: vertex_count,
            instance_count,
            first_instance,
            vertex_offset: first_vertex,
            ..Default::default()
        });

        Ok(self)
    }

    /// Draws indexed vertices, using the bound index buffer.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_draw_indexed()?;

        self.draw_inner(&DrawInfo {
            count: index_count,
            instance_count,
            first_instance,
            vertex_offset: vertex_offset as u32,
            first_index,
            indexed: true,
            ..Default::default()
        });

        Ok(self)
    }

    /// Draws non-indexed vertices, reading `draw_count` [`DrawIndirectCommand`]s from `buffer`.
    pub fn draw_indirect(
        &mut self,
        buffer: Arc<Buffer>,
        offset: DeviceSize,
        draw_count: u32,
        stride: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_draw()?;
        self.validate_draw_parameters_sgprs()?;
        self.validate_indirect_buffer(
            &buffer,
            offset,
            draw_count,
            stride,
            size_of::<DrawIndirectCommand>(),
        )?;

        self.draw_inner(&DrawInfo {
            indirect: Some(IndirectDraw {
                buffer,
                offset,
                draw_count,
                stride,
                count_buffer: None,
            }),
            ..Default::default()
        });

        Ok(self)
    }

    /// Draws indexed vertices, reading `draw_count` [`DrawIndexedIndirectCommand`]s from
    /// `buffer`.
    pub fn draw_indexed_indirect(
        &mut self,
        buffer: Arc<Buffer>,
        offset: DeviceSize,
        draw_count: u32,
        stride: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_draw_indexed()?;
        self.validate_draw_parameters_sgprs()?;
        self.validate_indirect_buffer(
            &buffer,
            offset,
            draw_count,
            stride,
            size_of::<DrawIndexedIndirectCommand>(),
        )?;

        self.draw_inner(&DrawInfo {
            indexed: true,
            indirect: Some(IndirectDraw {
                buffer,
                offset,
                draw_count,
                stride,
                count_buffer: None,
            }),
            ..Default::default()
        });

        Ok(self)
    }

    /// Like [`draw_indirect`](Self::draw_indirect) or
    /// [`draw_indexed_indirect`](Self::draw_indexed_indirect), but the number of draws is read
    /// from `count_buffer` at `count_offset` and clamped to `max_draw_count`.
    pub fn draw_indirect_count(
        &mut self,
        indexed: bool,
        buffer: Arc<Buffer>,
        offset: DeviceSize,
        count_buffer: Arc<Buffer>,
        count_offset: DeviceSize,
        max_draw_count: u32,
        stride: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        if indexed {
            self.validate_draw_indexed()?;
        } else {
            self.validate_draw()?;
        }

        self.validate_draw_parameters_sgprs()?;

        let command_size = if indexed {
            size_of::<DrawIndexedIndirectCommand>()
        } else {
            size_of::<DrawIndirectCommand>()
        };
        self.validate_indirect_buffer(&buffer, offset, max_draw_count, stride, command_size)?;

        if !count_buffer.usage().intersects(BufferUsage::INDIRECT_BUFFER) {
            return Err(ValidationError::new(
                "count_buffer.usage()",
                "does not contain `BufferUsage::INDIRECT_BUFFER`",
            ));
        }

        if count_offset % 4 != 0 || count_offset + 4 > count_buffer.size() {
            return Err(ValidationError::new(
                "count_offset",
                "is not a multiple of 4, or is out of the range of `count_buffer`",
            ));
        }

        self.draw_inner(&DrawInfo {
            indexed,
            indirect: Some(IndirectDraw {
                buffer,
                offset,
                draw_count: max_draw_count,
                stride,
                count_buffer: Some((count_buffer, count_offset)),
            }),
            ..Default::default()
        });

        Ok(self)
    }

    /// Draws the vertices written by a previous transform feedback pass. The vertex count is the
    /// number of bytes stored in `counter_buffer` at `counter_offset`, divided by
    /// `vertex_stride`.
    pub fn draw_indirect_byte_count(
        &mut self,
        instance_count: u32,
        first_instance: u32,
        counter_buffer: Arc<Buffer>,
        counter_offset: DeviceSize,
        vertex_stride: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_draw()?;

        if !counter_buffer
            .usage()
            .intersects(BufferUsage::TRANSFORM_FEEDBACK_COUNTER_BUFFER)
        {
            return Err(ValidationError::new(
                "counter_buffer.usage()",
                "does not contain `BufferUsage::TRANSFORM_FEEDBACK_COUNTER_BUFFER`",
            ));
        }

        if counter_offset % 4 != 0 || counter_offset + 4 > counter_buffer.size() {
            return Err(ValidationError::new(
                "counter_offset",
                "is not a multiple of 4, or is out of the range of `counter_buffer`",
            ));
        }

        if vertex_stride == 0 || vertex_stride % 4 != 0 {
            return Err(ValidationError::new(
                "vertex_stride",
                "is zero or not a multiple of 4",
            ));
        }

        self.draw_inner(&DrawInfo {
            instance_count,
            first_instance,
            strmout_buffer: Some((counter_buffer, counter_offset)),
            strmout_vertex_stride: vertex_stride,
            ..Default::default()
        });

        Ok(self)
    }

    fn draw_inner(&mut self, info: &DrawInfo) {
        let Some(pipeline) = self.state.pipeline.clone() else {
            return;
        };

        let has_prefetch = self.device.chip_class() >= ChipClass::Cik;
        let pipeline_is_dirty = self.state.dirty.intersects(DirtyState::PIPELINE)
            && !self
                .state
                .emitted_pipeline
                .as_ref()
                .is_some_and(|emitted| Arc::ptr_eq(emitted, &pipeline));

        if !self.check_space(4096) {
            return;
        }

        if self.state.flush_bits.intersects(FlushBits::WAIT_MASK) {
            log::trace!(
                "draw: waiting for idle on {:?}, emitting state first",
                self.state.flush_bits,
            );

            self.emit_graphics_states(info);
            self.emit_cache_flush();
            // The shaders are idle at this point, so they can't be prefetched into L2 earlier.
            self.upload_graphics_shader_descriptors(pipeline_is_dirty);
            self.emit_draw_packets(&pipeline, info);

            if has_prefetch {
                self.emit_prefetch_l2(&pipeline, false);
            }
        } else {
            log::trace!("draw: no wait, flushing first");

            self.emit_cache_flush();

            // Only the vertex stage is prefetched before the draw, so that it can start as soon
            // as possible.
            if has_prefetch {
                self.emit_prefetch_l2(&pipeline, true);
            }

            self.upload_graphics_shader_descriptors(pipeline_is_dirty);
            self.emit_graphics_states(info);
            self.emit_draw_packets(&pipeline, info);

            if has_prefetch {
                self.emit_prefetch_l2(&pipeline, false);
            }
        }

        self.after_draw(FlushBits::PS_PARTIAL_FLUSH);
    }

    fn emit_graphics_states(&mut self, info: &DrawInfo) {
        let late_scissor_emission = self.need_late_scissor_emission(info);

        self.emit_all_graphics_states(info);

        if late_scissor_emission {
            self.emit_scissor();
        }
    }

    /// Prefetches the shaders and vertex descriptors that changed into L2.
    fn emit_prefetch_l2(&mut self, pipeline: &GraphicsPipeline, vertex_stage_only: bool) {
        let mut mask = self.state.prefetch_mask;

        if vertex_stage_only {
            mask &= PrefetchMask::VS | PrefetchMask::VBO_DESCRIPTORS;
        }

        if mask.is_empty() {
            return;
        }

        if mask.intersects(PrefetchMask::VS) {
            self.prefetch_shader(pipeline, ShaderStage::Vertex);
        }

        if mask.intersects(PrefetchMask::VBO_DESCRIPTORS) {
            self.cp_dma_prefetch(self.state.vb_va, self.state.vb_size);
        }

        for (bit, stage) in [
            (PrefetchMask::TCS, ShaderStage::TessellationControl),
            (PrefetchMask::TES, ShaderStage::TessellationEvaluation),
            (PrefetchMask::GS, ShaderStage::Geometry),
            (PrefetchMask::PS, ShaderStage::Fragment),
        ] {
            if mask.intersects(bit) {
                self.prefetch_shader(pipeline, stage);
            }
        }

        self.state.prefetch_mask -= mask;
    }

    fn prefetch_shader(&mut self, pipeline: &dyn Pipeline, stage: ShaderStage) {
        if let Some(shader) = pipeline.shader(stage) {
            let (va, size) = (shader.code_va(), shader.code_size() as u32);
            self.cp_dma_prefetch(va, size);
        }
    }

    /// Writes the view index of every stage that reads it.
    fn emit_view_index(&mut self, pipeline: &GraphicsPipeline, index: u32) {
        for stage in ShaderStage::GRAPHICS {
            let Some(loc) = pipeline
                .shader(stage)
                .and_then(|shader| shader.user_sgprs().get(UserDataSlot::ViewIndex))
            else {
                continue;
            };

            let reg = pipeline.user_data_0(stage) + u32::from(loc.sgpr_idx) * 4;
            self.cs.set_sh_reg(reg, index);
        }
    }

    fn view_mask(&self) -> u32 {
        self.state
            .render_pass
            .as_ref()
            .and_then(|render_pass| render_pass.subpasses().get(self.state.subpass))
            .map_or(0, |subpass| subpass.view_mask)
    }

    /// Appends the draw packets. With multiview, the draw is repeated once per view.
    fn emit_draw_packets(&mut self, pipeline: &GraphicsPipeline, info: &DrawInfo) {
        let view_mask = self.view_mask();
        let views: Vec<u32> = (0..32).filter(|i| view_mask & (1 << i) != 0).collect();

        if let Some(indirect) = &info.indirect {
            let va = indirect.buffer.va() + indirect.offset;
            self.cs.add_buffer(indirect.buffer.bo());

            let count_va = match &indirect.count_buffer {
                Some((buffer, offset)) => {
                    self.cs.add_buffer(buffer.bo());
                    Some(buffer.va() + offset)
                }
                None => None,
            };

            self.cs.pkt3(PKT3_SET_BASE, 2);
            self.cs.emit(1);
            self.cs.emit_va(va);

            if views.is_empty() {
                self.emit_indirect_draw_packet(pipeline, info.indexed, indirect, count_va);
            } else {
                for &view in &views {
                    self.emit_view_index(pipeline, view);
                    self.emit_indirect_draw_packet(pipeline, info.indexed, indirect, count_va);
                }
            }

            // The CP wrote these registers from memory.
            self.state.last_num_instances = None;
            self.state.last_first_instance = None;
            self.state.last_vertex_offset = None;

            return;
        }

        if self.state.last_num_instances != Some(info.instance_count) {
            self.cs.pkt3(PKT3_NUM_INSTANCES, 0);
            self.cs.emit(info.instance_count);
            self.state.last_num_instances = Some(info.instance_count);
        }

        if let Some((base_reg, num_sgprs)) = draw_parameters_sgprs(pipeline) {
            if self.state.last_vertex_offset != Some(info.vertex_offset)
                || self.state.last_first_instance != Some(info.first_instance)
            {
                self.cs.set_sh_reg_seq(base_reg, num_sgprs);
                self.cs.emit(info.vertex_offset);
                self.cs.emit(info.first_instance);

                if num_sgprs == 3 {
                    // Draw id.
                    self.cs.emit(0);
                }

                self.state.last_vertex_offset = Some(info.vertex_offset);
                self.state.last_first_instance = Some(info.first_instance);
            }
        }

        let emit = |cb: &mut Self| {
            if info.indexed {
                let index_buffer = cb.state.index_buffer;
                let index_va = index_buffer.va
                    + DeviceSize::from(info.first_index) * index_buffer.index_type.size();
                let max_index_count = index_buffer.max_index_count.saturating_sub(info.first_index);

                cb.cs.pkt3(PKT3_DRAW_INDEX_2, 4);
                cb.cs.emit(max_index_count);
                cb.cs.emit_va(index_va);
                cb.cs.emit(info.count);
                cb.cs.emit(V_0287F0_DI_SRC_SEL_DMA);
            } else {
                cb.cs.pkt3(PKT3_DRAW_INDEX_AUTO, 1);
                cb.cs.emit(info.count);
                cb.cs.emit(
                    V_0287F0_DI_SRC_SEL_AUTO_INDEX
                        | s_0287f0_use_opaque(info.strmout_buffer.is_some()),
                );
            }
        };

        if views.is_empty() {
            emit(&mut *self);
        } else {
            for &view in &views {
                self.emit_view_index(pipeline, view);
                emit(&mut *self);
            }
        }
    }

    fn emit_indirect_draw_packet(
        &mut self,
        pipeline: &GraphicsPipeline,
        indexed: bool,
        indirect: &IndirectDraw,
        count_va: Option<u64>,
    ) {
        let Some((base_reg, num_sgprs)) = draw_parameters_sgprs(pipeline) else {
            return;
        };

        let reg_index = |reg: u32| (reg - SI_SH_REG_OFFSET) >> 2;
        let mut draw_id_word = reg_index(base_reg + 8);

        if num_sgprs == 3 {
            draw_id_word |= S_2C3_DRAW_INDEX_ENABLE;
        }

        if count_va.is_some() {
            draw_id_word |= S_2C3_COUNT_INDIRECT_ENABLE;
        }

        let (opcode, di_src_sel) = if indexed {
            (PKT3_DRAW_INDEX_INDIRECT_MULTI, V_0287F0_DI_SRC_SEL_DMA)
        } else {
            (PKT3_DRAW_INDIRECT_MULTI, V_0287F0_DI_SRC_SEL_AUTO_INDEX)
        };

        self.cs.pkt3(opcode, 8);
        // Offset from the base set with SET_BASE.
        self.cs.emit(0);
        self.cs.emit(reg_index(base_reg));
        self.cs.emit(reg_index(base_reg + 4));
        self.cs.emit(draw_id_word);
        self.cs.emit(indirect.draw_count);
        self.cs.emit_va(count_va.unwrap_or(0));
        self.cs.emit(indirect.stride);
        self.cs.emit(di_src_sel);
    }

    fn validate_dispatch(&self) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;
        self.validate_queue_family(PipelineBindPoint::Compute)?;

        if self.state.compute_pipeline.is_none() {
            return Err(ValidationError::new(
                "self",
                "no compute pipeline is currently bound",
            ));
        }

        Ok(())
    }

    /// Dispatches `group_counts` workgroups.
    pub fn dispatch(&mut self, group_counts: [u32; 3]) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_dispatch()?;

        self.dispatch_inner(&DispatchInfo {
            blocks: group_counts,
            ..Default::default()
        });

        Ok(self)
    }

    /// Dispatches `group_counts` workgroups, numbered starting at `base_group`.
    pub fn dispatch_base(
        &mut self,
        base_group: [u32; 3],
        group_counts: [u32; 3],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_dispatch()?;

        if base_group
            .iter()
            .zip(group_counts)
            .any(|(&base, count)| base.checked_add(count).is_none())
        {
            return Err(ValidationError::new(
                "base_group",
                "plus `group_counts` is greater than `u32::MAX` on some axis",
            ));
        }

        self.dispatch_inner(&DispatchInfo {
            blocks: group_counts,
            offsets: base_group,
            indirect: None,
        });

        Ok(self)
    }

    /// Dispatches the workgroups given by a [`DispatchIndirectCommand`] in `buffer`.
    pub fn dispatch_indirect(
        &mut self,
        buffer: Arc<Buffer>,
        offset: DeviceSize,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_dispatch()?;
        self.validate_indirect_buffer(&buffer, offset, 1, 0, size_of::<DispatchIndirectCommand>())?;

        self.dispatch_inner(&DispatchInfo {
            indirect: Some((buffer, offset)),
            ..Default::default()
        });

        Ok(self)
    }

    fn dispatch_inner(&mut self, info: &DispatchInfo) {
        let Some(pipeline) = self.state.compute_pipeline.clone() else {
            return;
        };

        let has_prefetch = self.device.chip_class() >= ChipClass::Cik;
        let pipeline_is_dirty = !self
            .state
            .emitted_compute_pipeline
            .as_ref()
            .is_some_and(|emitted| Arc::ptr_eq(emitted, &pipeline));

        if !self.check_space(256) {
            return;
        }

        if self.state.flush_bits.intersects(FlushBits::WAIT_MASK) {
            log::trace!(
                "dispatch: waiting for idle on {:?}, emitting state first",
                self.state.flush_bits,
            );

            self.emit_compute_pipeline();
            self.emit_cache_flush();
            self.upload_compute_shader_descriptors();
            self.emit_dispatch_packets(info);

            if has_prefetch && pipeline_is_dirty {
                self.prefetch_shader(&*pipeline, ShaderStage::Compute);
            }
        } else {
            log::trace!("dispatch: no wait, flushing first");

            self.emit_cache_flush();

            if has_prefetch && pipeline_is_dirty {
                self.prefetch_shader(&*pipeline, ShaderStage::Compute);
            }

            self.upload_compute_shader_descriptors();
            self.emit_compute_pipeline();
            self.emit_dispatch_packets(info);
        }

        self.after_draw(FlushBits::CS_PARTIAL_FLUSH);
    }

    fn emit_dispatch_header(&mut self, opcode: u32, count: u32) {
        self.cs.emit(pkt3(opcode, count, false) | pkt3_shader_type_s(true));
    }

    fn emit_dispatch_packets(&mut self, info: &DispatchInfo) {
        let Some(pipeline) = self.state.compute_pipeline.clone() else {
            return;
        };

        let grid_size_reg = pipeline
            .compute_shader()
            .user_sgprs()
            .get(UserDataSlot::GridSize)
            .map(|loc| R_00B900_COMPUTE_USER_DATA_0 + u32::from(loc.sgpr_idx) * 4);

        let mut dispatch_initiator = S_00B800_COMPUTE_SHADER_EN;

        if self.device.layout().dispatch_order_mode {
            dispatch_initiator |= S_00B800_ORDER_MODE;
        }

        if let Some((buffer, offset)) = &info.indirect {
            let va = buffer.va() + offset;
            self.cs.add_buffer(buffer.bo());

            if let Some(reg) = grid_size_reg {
                for i in 0..3 {
                    self.cs.pkt3(PKT3_COPY_DATA, 4);
                    self.cs.emit(
                        copy_data_src_sel(COPY_DATA_SRC_MEM) | copy_data_dst_sel(COPY_DATA_DST_REG),
                    );
                    self.cs.emit_va(va + 4 * i as u64);
                    self.cs.emit((reg >> 2) + i);
                    self.cs.emit(0);
                }
            }

            if self.uses_mec() {
                self.emit_dispatch_header(PKT3_DISPATCH_INDIRECT, 2);
                self.cs.emit_va(va);
                self.cs.emit(dispatch_initiator);
            } else {
                self.emit_dispatch_header(PKT3_SET_BASE, 2);
                self.cs.emit(1);
                self.cs.emit_va(va);

                self.emit_dispatch_header(PKT3_DISPATCH_INDIRECT, 1);
                self.cs.emit(0);
                self.cs.emit(dispatch_initiator);
            }

            return;
        }

        let mut blocks = info.blocks;

        if let Some(reg) = grid_size_reg {
            self.cs.set_sh_reg_seq(reg, 3);
            self.cs.emit_array(&blocks);
        }

        if info.offsets != [0; 3] {
            self.cs.set_sh_reg_seq(R_00B810_COMPUTE_START_X, 3);
            self.cs.emit_array(&info.offsets);

            // With a start offset, the packet holds the end of the range instead of its size.
            for (block, offset) in blocks.iter_mut().zip(info.offsets) {
                *block += offset;
            }
        } else {
            dispatch_initiator |= S_00B800_FORCE_START_AT_000;
        }

        self.emit_dispatch_header(PKT3_DISPATCH_DIRECT, 3);
        self.cs.emit_array(&blocks);
        self.cs.emit(dispatch_initiator);
    }

    /// Executes secondary command buffers.
    ///
    /// The commands of each secondary are copied into this command buffer. The state the
    /// secondaries leave behind is unknown, so everything is emitted again at the next draw.
    pub fn execute_commands(
        &mut self,
        secondaries: &[&CommandBuffer],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_execute_commands(secondaries)?;

        // Flushes recorded in the primary apply to the secondaries' commands.
        if self.queue_family != crate::device::QueueFamily::Transfer {
            self.emit_cache_flush();
        }

        for secondary in secondaries {
            self.requirements.merge(&secondary.requirements);

            if !self.check_space(secondary.cs.cdw()) {
                break;
            }

            self.cs.execute_secondary(&secondary.cs);
            self.meta_ops.extend(secondary.meta_ops.iter().cloned());

            // Keep what is known to be in the registers after the secondary.
            let state = &secondary.state;

            if state.emitted_pipeline.is_some() {
                self.state.emitted_pipeline = state.emitted_pipeline.clone();
            }

            if state.emitted_compute_pipeline.is_some() {
                self.state.emitted_compute_pipeline = state.emitted_compute_pipeline.clone();
            }

            if state.last_primitive_reset_en.is_some() {
                self.state.last_primitive_reset_en = state.last_primitive_reset_en;
            }

            if state.last_primitive_reset_index.is_some() {
                self.state.last_primitive_reset_index = state.last_primitive_reset_index;
            }

            if state.last_ia_multi_vgt_param.is_some() {
                self.state.last_ia_multi_vgt_param = state.last_ia_multi_vgt_param;
            }

            if state.last_num_instances.is_some() {
                self.state.last_num_instances = state.last_num_instances;
            }

            if state.last_first_instance.is_some() {
                self.state.last_first_instance = state.last_first_instance;
            }

            if state.last_vertex_offset.is_some() {
                self.state.last_vertex_offset = state.last_vertex_offset;
            }

            self.state.dma_is_busy |= state.dma_is_busy;
        }

        self.state.dirty |= DirtyState::PIPELINE | DirtyState::INDEX_BUFFER | DirtyState::DYNAMIC_ALL;
        self.state.context_roll_without_scissor_emitted = true;
        self.mark_descriptor_sets_dirty(PipelineBindPoint::Graphics);
        self.mark_descriptor_sets_dirty(PipelineBindPoint::Compute);

        Ok(self)
    }

    fn validate_execute_commands(
        &self,
        secondaries: &[&CommandBuffer],
    ) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;

        if self.level != CommandBufferLevel::Primary {
            return Err(ValidationError::new("self", "is not a primary command buffer"));
        }

        if secondaries.is_empty() {
            return Err(ValidationError::new("secondaries", "is empty"));
        }

        for (index, secondary) in secondaries.iter().enumerate() {
            if secondary.level != CommandBufferLevel::Secondary {
                return Err(ValidationError::new(
                    format!("secondaries[{}]", index),
                    "is not a secondary command buffer",
                ));
            }

            if secondary.status() != CommandBufferStatus::Executable {
                return Err(ValidationError::new(
                    format!("secondaries[{}]", index),
                    "is not in the executable state",
                ));
            }

            if secondary.queue_family != self.queue_family {
                return Err(ValidationError::new(
                    format!("secondaries[{}]", index),
                    "was allocated for a different queue family than `self`",
                ));
            }
        }

        Ok(())
    }
}

/// Returns the first register and the number of the user SGPRs holding the base vertex, the start
/// instance and optionally the draw id.
fn draw_parameters_sgprs(pipeline: &GraphicsPipeline) -> Option<(u32, u32)> {
    let base_reg = vtx_base_sgpr(pipeline)?;
    let loc = pipeline
        .shader(ShaderStage::Vertex)?
        .user_sgprs()
        .get(UserDataSlot::BaseVertexStartInstance)?;

    Some((base_reg, u32::from(loc.num_sgprs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::BufferCreateInfo,
        command_buffer::{
            bind::IndexType, tests::recording, CommandBufferBeginInfo, CommandPool,
            CommandPoolCreateInfo,
        },
        device::{DebugFlags, Device, DeviceCreateInfo, QueueFamily},
        pipeline::{ComputePipeline, ComputePipelineCreateInfo},
        render_pass::{RenderPass, RenderPassCreateInfo, SubpassDescription},
        shader::UserSgprLocations,
        tests::{
            count_opcode, count_reg_writes, empty_layout, events, graphics_pipeline, packets,
            position_of_opcode, shader, vs_user_sgprs,
        },
    };

    fn buffer(device: &Arc<Device>, size: DeviceSize, usage: BufferUsage) -> Arc<Buffer> {
        Buffer::new(
            device,
            BufferCreateInfo {
                size,
                usage,
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn compute_pipeline(device: &Arc<Device>) -> Arc<ComputePipeline> {
        let mut locs = UserSgprLocations::default();
        locs.set(UserDataSlot::ScratchRingOffsets, 0, 2);
        locs.set(UserDataSlot::GridSize, 2, 3);

        ComputePipeline::new(ComputePipelineCreateInfo {
            layout: empty_layout(),
            shader: shader(device, ShaderStage::Compute, locs),
            sh_registers: Vec::new(),
        })
        .unwrap()
    }

    fn vs_base_reg() -> u32 {
        R_00B130_SPI_SHADER_USER_DATA_VS_0 + 6 * 4
    }

    #[test]
    fn draw_packets() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        cb.bind_pipeline_graphics(graphics_pipeline(&device, |_| ()))
            .unwrap();

        cb.draw(3, 1, 4, 0).unwrap();

        let words = cb.cs().words().to_vec();
        let draw = packets(&words)
            .into_iter()
            .find(|p| p.opcode == PKT3_DRAW_INDEX_AUTO)
            .unwrap();
        assert_eq!(draw.body, &[3, V_0287F0_DI_SRC_SEL_AUTO_INDEX]);
        assert_eq!(count_opcode(&words, PKT3_NUM_INSTANCES), 1);

        let base = packets(&words)
            .into_iter()
            .find(|p| p.register() == Some(vs_base_reg()))
            .unwrap();
        assert_eq!(base.values(), &[4, 0]);

        // Nothing changed, only the draw is emitted.
        let before = cb.cs().cdw();
        cb.draw(3, 1, 4, 0).unwrap();
        let words = &cb.cs().words()[before..];
        assert_eq!(count_opcode(words, PKT3_NUM_INSTANCES), 0);
        assert_eq!(count_reg_writes(words, vs_base_reg()), 0);
        assert_eq!(count_opcode(words, PKT3_DRAW_INDEX_AUTO), 1);
    }

    #[test]
    fn draw_validation() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        assert!(cb.draw(3, 1, 0, 0).is_err());

        cb.bind_pipeline_graphics(graphics_pipeline(&device, |_| ()))
            .unwrap();
        assert!(cb.draw_indexed(3, 1, 0, 0, 0).is_err());

        let mut compute = recording(&device, QueueFamily::Compute);
        assert!(compute.draw(3, 1, 0, 0).is_err());
    }

    #[test]
    fn prefetch_order_depends_on_wait() {
        let (device, _) = gfx_device!();
        let pipeline = graphics_pipeline(&device, |_| ());

        // Without a wait, the vertex shader is prefetched before the draw.
        let mut cb = recording(&device, QueueFamily::General);
        cb.bind_pipeline_graphics(pipeline.clone()).unwrap();
        cb.draw(3, 1, 0, 0).unwrap();

        let words = cb.cs().words();
        let prefetch = position_of_opcode(words, PKT3_DMA_DATA).unwrap();
        let draw = position_of_opcode(words, PKT3_DRAW_INDEX_AUTO).unwrap();
        assert!(prefetch < draw);
        assert_eq!(count_opcode(words, PKT3_DMA_DATA), 2);
        assert!(cb.state.prefetch_mask.is_empty());

        // With a wait, the state is written before the flush and every prefetch follows the
        // draw.
        let mut cb = recording(&device, QueueFamily::General);
        cb.bind_pipeline_graphics(pipeline).unwrap();
        cb.state.flush_bits |= FlushBits::PS_PARTIAL_FLUSH;
        cb.draw(3, 1, 0, 0).unwrap();

        let words = cb.cs().words();
        let prefetch = position_of_opcode(words, PKT3_DMA_DATA).unwrap();
        let draw = position_of_opcode(words, PKT3_DRAW_INDEX_AUTO).unwrap();
        let flush = position_of_opcode(words, PKT3_EVENT_WRITE).unwrap();
        assert!(draw < prefetch);
        assert!(flush < draw);
        assert!(cb.pending_flush_bits().is_empty());
    }

    #[test]
    fn no_prefetch_on_si() {
        let (device, _) = gfx_device!(Tahiti);
        let mut cb = recording(&device, QueueFamily::General);
        cb.bind_pipeline_graphics(graphics_pipeline(&device, |_| ()))
            .unwrap();
        cb.draw(3, 1, 0, 0).unwrap();

        assert_eq!(count_opcode(cb.cs().words(), PKT3_DMA_DATA), 0);
        assert_eq!(count_opcode(cb.cs().words(), PKT3_CP_DMA), 0);
    }

    #[test]
    fn indexed_draw() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        let index_buffer = buffer(&device, 64, BufferUsage::INDEX_BUFFER);

        cb.bind_pipeline_graphics(graphics_pipeline(&device, |_| ()))
            .unwrap();
        cb.bind_index_buffer(index_buffer.clone(), 0, IndexType::U16)
            .unwrap();
        cb.draw_indexed(6, 1, 2, -1, 0).unwrap();

        let words = cb.cs().words();
        let draw = packets(words)
            .into_iter()
            .find(|p| p.opcode == PKT3_DRAW_INDEX_2)
            .unwrap();
        let va = index_buffer.va() + 4;
        assert_eq!(
            draw.body,
            &[30, va as u32, (va >> 32) as u32, 6, V_0287F0_DI_SRC_SEL_DMA],
        );
        assert_eq!(count_opcode(words, PKT3_INDEX_BASE), 1);

        let base = packets(words)
            .into_iter()
            .find(|p| p.register() == Some(vs_base_reg()))
            .unwrap();
        assert_eq!(base.values(), &[u32::MAX, 0]);
    }

    #[test]
    fn indirect_draw() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        let indirect = buffer(&device, 256, BufferUsage::INDIRECT_BUFFER);

        cb.bind_pipeline_graphics(graphics_pipeline(&device, |_| ()))
            .unwrap();
        cb.draw_indirect(indirect.clone(), 16, 2, 32).unwrap();

        let words = cb.cs().words().to_vec();
        let set_base = packets(&words)
            .into_iter()
            .find(|p| p.opcode == PKT3_SET_BASE)
            .unwrap();
        let va = indirect.va() + 16;
        assert_eq!(set_base.body, &[1, va as u32, (va >> 32) as u32]);

        let draw = packets(&words)
            .into_iter()
            .find(|p| p.opcode == PKT3_DRAW_INDIRECT_MULTI)
            .unwrap();
        let base = (vs_base_reg() - SI_SH_REG_OFFSET) >> 2;
        assert_eq!(
            draw.body,
            &[0, base, base + 1, base + 2, 2, 0, 0, 32, V_0287F0_DI_SRC_SEL_AUTO_INDEX],
        );
        assert!(cb.cs().has_buffer(indirect.bo().id()));

        // The instance count is unknown after an indirect draw.
        let before = cb.cs().cdw();
        cb.draw(3, 1, 0, 0).unwrap();
        assert_eq!(count_opcode(&cb.cs().words()[before..], PKT3_NUM_INSTANCES), 1);
    }

    #[test]
    fn indirect_count_draw() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        let indirect = buffer(&device, 256, BufferUsage::INDIRECT_BUFFER);
        let count = buffer(&device, 16, BufferUsage::INDIRECT_BUFFER);
        let index_buffer = buffer(&device, 64, BufferUsage::INDEX_BUFFER);

        cb.bind_pipeline_graphics(graphics_pipeline(&device, |_| ()))
            .unwrap();
        cb.bind_index_buffer(index_buffer, 0, IndexType::U32).unwrap();
        cb.draw_indirect_count(true, indirect, 0, count.clone(), 4, 8, 20)
            .unwrap();

        let words = cb.cs().words();
        let draw = packets(words)
            .into_iter()
            .find(|p| p.opcode == PKT3_DRAW_INDEX_INDIRECT_MULTI)
            .unwrap();
        assert_ne!(draw.body[3] & S_2C3_COUNT_INDIRECT_ENABLE, 0);
        assert_eq!(draw.body[3] & S_2C3_DRAW_INDEX_ENABLE, 0);
        assert_eq!(draw.body[4], 8);
        let count_va = count.va() + 4;
        assert_eq!(&draw.body[5..7], &[count_va as u32, (count_va >> 32) as u32]);
        assert_eq!(draw.body[8], V_0287F0_DI_SRC_SEL_DMA);
    }

    #[test]
    fn indirect_validation() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        cb.bind_pipeline_graphics(graphics_pipeline(&device, |_| ()))
            .unwrap();

        let vertex = buffer(&device, 256, BufferUsage::VERTEX_BUFFER);
        assert!(cb.draw_indirect(vertex, 0, 1, 16).is_err());

        let indirect = buffer(&device, 64, BufferUsage::INDIRECT_BUFFER);
        // Stride smaller than a command.
        assert!(cb.draw_indirect(indirect.clone(), 0, 2, 8).is_err());
        // Past the end.
        assert!(cb.draw_indirect(indirect.clone(), 48, 2, 16).is_err());
        assert!(cb.draw_indirect(indirect.clone(), 2, 1, 16).is_err());
        assert!(cb.draw_indirect(indirect, 0, 4, 16).is_ok());
    }

    #[test]
    fn multiview_repeats_draw() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);

        let mut locs = vs_user_sgprs();
        locs.set(UserDataSlot::ViewIndex, 8, 1);
        let pipeline = graphics_pipeline(&device, |info| {
            info.shaders[0] = shader(&device, ShaderStage::Vertex, locs);
        });
        cb.bind_pipeline_graphics(pipeline).unwrap();

        cb.state.render_pass = Some(
            RenderPass::new(RenderPassCreateInfo {
                subpasses: vec![SubpassDescription {
                    view_mask: 0b101,
                    ..Default::default()
                }],
                ..Default::default()
            })
            .unwrap(),
        );
        cb.draw(3, 1, 0, 0).unwrap();

        let words = cb.cs().words();
        assert_eq!(count_opcode(words, PKT3_DRAW_INDEX_AUTO), 2);

        let view_reg = R_00B130_SPI_SHADER_USER_DATA_VS_0 + 8 * 4;
        let views: Vec<_> = packets(words)
            .into_iter()
            .filter(|p| p.register() == Some(view_reg))
            .map(|p| p.values()[0])
            .collect();
        assert_eq!(views, [0, 2]);
    }

    #[test]
    fn late_scissor_before_draw() {
        let (device, _) = gfx_device!(Vega10);
        let mut cb = recording(&device, QueueFamily::General);
        cb.bind_pipeline_graphics(graphics_pipeline(&device, |_| ()))
            .unwrap();
        cb.set_scissor(0, &[crate::command_buffer::state::Rect2D {
            offset: [0, 0],
            extent: [64, 64],
        }])
        .unwrap();
        cb.draw(3, 1, 0, 0).unwrap();

        let words = cb.cs().words();
        assert_eq!(count_reg_writes(words, R_028250_PA_SC_VPORT_SCISSOR_0_TL), 1);
        let scissor = packets(words)
            .iter()
            .position(|p| p.register() == Some(R_028250_PA_SC_VPORT_SCISSOR_0_TL))
            .unwrap();
        let draw = position_of_opcode(words, PKT3_DRAW_INDEX_AUTO).unwrap();
        assert!(scissor < draw);
        assert!(!cb.state.context_roll_without_scissor_emitted);
    }

    #[test]
    fn sync_shaders_waits_after_draw() {
        let (device, _) = gfx_device!(Polaris10, DeviceCreateInfo {
            debug_flags: DebugFlags::SYNC_SHADERS,
            ..Default::default()
        });
        let mut cb = recording(&device, QueueFamily::General);
        cb.bind_pipeline_graphics(graphics_pipeline(&device, |_| ()))
            .unwrap();
        cb.draw(3, 1, 0, 0).unwrap();

        let words = cb.cs().words();
        let draw = position_of_opcode(words, PKT3_DRAW_INDEX_AUTO).unwrap();
        let after: Vec<_> = packets(words)[draw..]
            .iter()
            .filter(|p| p.opcode == PKT3_EVENT_WRITE)
            .map(|p| p.body[0] & 0x3f)
            .collect();
        assert!(after.contains(&V_028A90_PS_PARTIAL_FLUSH));
    }

    #[test]
    fn dispatch_direct() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::Compute);
        cb.bind_pipeline_compute(compute_pipeline(&device)).unwrap();
        cb.dispatch([4, 2, 1]).unwrap();

        let words = cb.cs().words().to_vec();
        let grid_reg = R_00B900_COMPUTE_USER_DATA_0 + 2 * 4;
        let grid = packets(&words)
            .into_iter()
            .find(|p| p.register() == Some(grid_reg))
            .unwrap();
        assert_eq!(grid.values(), &[4, 2, 1]);

        let dispatch = packets(&words)
            .into_iter()
            .find(|p| p.opcode == PKT3_DISPATCH_DIRECT)
            .unwrap();
        assert_eq!(&dispatch.body[..3], &[4, 2, 1]);
        assert_ne!(dispatch.body[3] & S_00B800_FORCE_START_AT_000, 0);
        assert_ne!(dispatch.body[3] & S_00B800_COMPUTE_SHADER_EN, 0);
        assert_eq!(count_reg_writes(&words, R_00B810_COMPUTE_START_X), 0);

        // The pipeline is already emitted and prefetched.
        let before = cb.cs().cdw();
        cb.dispatch_base([1, 0, 0], [4, 2, 1]).unwrap();
        let words = &cb.cs().words()[before..];
        assert_eq!(count_opcode(words, PKT3_DMA_DATA), 0);

        let start = packets(words)
            .into_iter()
            .find(|p| p.register() == Some(R_00B810_COMPUTE_START_X))
            .unwrap();
        assert_eq!(start.values(), &[1, 0, 0]);

        let dispatch = packets(words)
            .into_iter()
            .find(|p| p.opcode == PKT3_DISPATCH_DIRECT)
            .unwrap();
        assert_eq!(&dispatch.body[..3], &[5, 2, 1]);
        assert_eq!(dispatch.body[3] & S_00B800_FORCE_START_AT_000, 0);
        // Nothing was written since the first dispatch, so it does not wait.
        assert!(events(words).is_empty());
    }

    #[test]
    fn indirect_command_layouts() {
        let draw = DrawIndexedIndirectCommand {
            index_count: 6,
            instance_count: 2,
            first_index: 3,
            vertex_offset: -1,
            first_instance: 4,
        };
        let words: [u32; 5] = bytemuck::cast(draw);
        assert_eq!(words, [6, 2, 3, u32::MAX, 4]);

        assert_eq!(size_of::<DrawIndirectCommand>(), 16);
        assert_eq!(size_of::<DispatchIndirectCommand>(), 12);
        let dispatch: DispatchIndirectCommand = bytemuck::cast([4u32, 2, 1]);
        assert_eq!(dispatch, DispatchIndirectCommand { x: 4, y: 2, z: 1 });
    }

    #[test]
    fn dispatch_base_range_overflow() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::Compute);
        cb.bind_pipeline_compute(compute_pipeline(&device)).unwrap();

        assert!(cb.dispatch_base([u32::MAX, 0, 0], [2, 1, 1]).is_err());
        assert!(cb.dispatch_base([0, 0, u32::MAX - 1], [1, 1, 2]).is_err());
        assert!(cb.cs().is_empty());

        cb.dispatch_base([u32::MAX - 1, 0, 0], [1, 1, 1]).unwrap();
        assert_eq!(count_opcode(cb.cs().words(), PKT3_DISPATCH_DIRECT), 1);
    }

    #[test]
    fn dispatch_indirect_per_ring() {
        let (device, _) = gfx_device!();
        let indirect = buffer(&device, 64, BufferUsage::INDIRECT_BUFFER);

        let mut compute = recording(&device, QueueFamily::Compute);
        compute
            .bind_pipeline_compute(compute_pipeline(&device))
            .unwrap();
        compute.dispatch_indirect(indirect.clone(), 12).unwrap();

        let words = compute.cs().words();
        assert_eq!(count_opcode(words, PKT3_COPY_DATA), 3);
        assert_eq!(count_opcode(words, PKT3_SET_BASE), 0);
        let dispatch = packets(words)
            .into_iter()
            .find(|p| p.opcode == PKT3_DISPATCH_INDIRECT)
            .unwrap();
        let va = indirect.va() + 12;
        assert_eq!(&dispatch.body[..2], &[va as u32, (va >> 32) as u32]);

        let mut general = recording(&device, QueueFamily::General);
        general
            .bind_pipeline_compute(compute_pipeline(&device))
            .unwrap();
        general.dispatch_indirect(indirect.clone(), 12).unwrap();

        let words = general.cs().words();
        assert_eq!(count_opcode(words, PKT3_SET_BASE), 1);
        let dispatch = packets(words)
            .into_iter()
            .find(|p| p.opcode == PKT3_DISPATCH_INDIRECT)
            .unwrap();
        assert_eq!(dispatch.body[0], 0);

        assert!(general.dispatch_indirect(indirect, 56).is_err());
    }

    #[test]
    fn dispatch_waits_after_flush() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::Compute);
        cb.bind_pipeline_compute(compute_pipeline(&device)).unwrap();
        cb.state.flush_bits |= FlushBits::CS_PARTIAL_FLUSH | FlushBits::INV_VMEM_L1;
        cb.dispatch([1, 1, 1]).unwrap();

        assert!(events(cb.cs().words()).contains(&V_028A90_CS_PARTIAL_FLUSH));
        let words = cb.cs().words();
        let dispatch = position_of_opcode(words, PKT3_DISPATCH_DIRECT).unwrap();
        let prefetch = position_of_opcode(words, PKT3_DMA_DATA).unwrap();
        assert!(dispatch < prefetch);
    }

    #[test]
    fn execute_secondary() {
        let (device, _) = gfx_device!();
        let pipeline = graphics_pipeline(&device, |_| ());

        let pool = CommandPool::new(device.clone(), CommandPoolCreateInfo::default());
        let mut secondary = CommandBuffer::new(pool.clone(), CommandBufferLevel::Secondary);
        secondary.begin(CommandBufferBeginInfo::default()).unwrap();
        secondary.bind_pipeline_graphics(pipeline.clone()).unwrap();
        secondary.draw(3, 1, 0, 0).unwrap();
        secondary.end().unwrap();

        let mut primary = recording(&device, QueueFamily::General);
        assert!(primary.execute_commands(&[]).is_err());
        assert!(primary.execute_commands(&[&primary_like(&device)]).is_err());

        primary.execute_commands(&[&secondary]).unwrap();

        let words = primary.cs().words();
        assert_eq!(count_opcode(words, PKT3_DRAW_INDEX_AUTO), 1);
        assert!(primary.dirty_state().contains(DirtyState::PIPELINE | DirtyState::INDEX_BUFFER));
        for bo in secondary.cs().buffers() {
            assert!(primary.cs().has_buffer(bo.id()));
        }

        // The secondary left its pipeline in the registers.
        assert!(primary
            .state
            .emitted_pipeline
            .as_ref()
            .is_some_and(|emitted| Arc::ptr_eq(emitted, &pipeline)));
        assert_eq!(primary.state.last_num_instances, Some(1));
    }

    fn primary_like(device: &Arc<Device>) -> CommandBuffer {
        let mut cb = recording(device, QueueFamily::General);
        cb.end().unwrap();
        cb
    }
}
