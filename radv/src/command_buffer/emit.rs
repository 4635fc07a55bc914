// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Turning tracked state into register writes.
//!
//! Everything here runs right before a draw or dispatch, and only for state whose dirty bit is
//! set. Each function clears the bits it handled.

use super::{
    bind::IndexType,
    draw::DrawInfo,
    state::{Rect2D, Viewport},
    CommandBuffer, DirtyState,
};
use crate::{
    device::{ChipClass, ChipFamily, IndexTypeReg, PhysicalDeviceProperties},
    image::Format,
    pipeline::{GraphicsPipeline, Pipeline},
    registers::*,
    render_pass::MAX_RTS,
    shader::ShaderStage,
};

/// Largest coordinate the rasterizer can represent.
const GUARDBAND_MAX_RANGE: f32 = 32767.0;

/// Largest value of a scissor coordinate.
const MAX_SCISSOR_COORD: i64 = 16384;

impl CommandBuffer {
    /// Writes the registers of the bound graphics pipeline, unless the same register values were
    /// already written by the previously emitted pipeline.
    pub(super) fn emit_graphics_pipeline(&mut self) {
        let Some(pipeline) = self.state.pipeline.clone() else {
            return;
        };

        let unchanged = self
            .state
            .emitted_pipeline
            .as_ref()
            .is_some_and(|emitted| emitted.registers() == pipeline.registers());

        if !unchanged {
            if !self.check_space(pipeline.registers().len()) {
                return;
            }

            self.cs.emit_array(pipeline.registers());
            self.state.context_roll_without_scissor_emitted = true;
        }

        if !self.device.use_global_bo_list() {
            for stage in ShaderStage::GRAPHICS {
                if let Some(shader) = pipeline.shader(stage) {
                    self.cs.add_buffer(shader.code_bo());
                }
            }
        }

        self.state.emitted_pipeline = Some(pipeline);
        self.state.dirty -= DirtyState::PIPELINE;
    }

    /// Writes the registers of the bound compute pipeline if it changed.
    pub(super) fn emit_compute_pipeline(&mut self) {
        let Some(pipeline) = self.state.compute_pipeline.clone() else {
            return;
        };

        if self
            .state
            .emitted_compute_pipeline
            .as_ref()
            .is_some_and(|emitted| std::sync::Arc::ptr_eq(emitted, &pipeline))
        {
            return;
        }

        if !self.check_space(pipeline.registers().len()) {
            return;
        }

        self.cs.emit_array(pipeline.registers());

        if !self.device.use_global_bo_list() {
            self.cs.add_buffer(pipeline.compute_shader().code_bo());
        }

        self.state.emitted_compute_pipeline = Some(pipeline);
    }

    fn emit_viewport(&mut self) {
        let count = self.state.dynamic.viewport_count as usize;

        if count == 0 || !self.check_space(4 + count * 8) {
            return;
        }

        let viewports = self.state.dynamic.viewports;

        self.cs
            .set_context_reg_seq(R_02843C_PA_CL_VPORT_XSCALE, count as u32 * 6);
        for viewport in &viewports[..count] {
            let (scale, translate) = viewport.xform();
            self.cs.emit(scale[0].to_bits());
            self.cs.emit(translate[0].to_bits());
            self.cs.emit(scale[1].to_bits());
            self.cs.emit(translate[1].to_bits());
            self.cs.emit(scale[2].to_bits());
            self.cs.emit(translate[2].to_bits());
        }

        self.cs
            .set_context_reg_seq(R_0282D0_PA_SC_VPORT_ZMIN_0, count as u32 * 2);
        for viewport in &viewports[..count] {
            let zmin = viewport.min_depth.min(viewport.max_depth);
            let zmax = viewport.min_depth.max(viewport.max_depth);
            self.cs.emit(zmin.to_bits());
            self.cs.emit(zmax.to_bits());
        }
    }

    /// Writes the scissors, clipped to their viewport, followed by the guard band.
    pub(super) fn emit_scissor(&mut self) {
        let count = self.state.dynamic.scissor_count as usize;

        if count == 0 || !self.check_space(8 + count * 2) {
            return;
        }

        let dynamic = self.state.dynamic;
        let can_use_guardband = self
            .state
            .pipeline
            .as_ref()
            .is_some_and(|p| p.can_use_guardband());

        self.cs
            .set_context_reg_seq(R_028250_PA_SC_VPORT_SCISSOR_0_TL, count as u32 * 2);
        for (i, scissor) in dynamic.scissors().iter().enumerate() {
            let rect = match dynamic.viewports().get(i) {
                Some(viewport) => intersect_scissor(scissor, &scissor_from_viewport(viewport)),
                None => clamp_scissor(scissor),
            };
            let [x0, y0, x1, y1] = rect;
            self.cs.emit(
                s_028250_tl_x(x0 as u32) | s_028250_tl_y(y0 as u32) | S_028250_WINDOW_OFFSET_DISABLE,
            );
            self.cs.emit(s_028254_br_x(x1 as u32) | s_028254_br_y(y1 as u32));
        }

        let (guardband_x, guardband_y) = guardband(dynamic.viewports(), can_use_guardband);
        self.cs.set_context_reg_seq(R_028BE8_PA_CL_GB_VERT_CLIP_ADJ, 4);
        self.cs.emit(guardband_y.to_bits());
        self.cs.emit(1.0f32.to_bits());
        self.cs.emit(guardband_x.to_bits());
        self.cs.emit(1.0f32.to_bits());

        self.state.context_roll_without_scissor_emitted = false;
    }

    fn emit_discard_rectangle(&mut self) {
        let count = self.state.dynamic.discard_rectangle_count as usize;

        if count == 0 || !self.check_space(2 + count * 2) {
            return;
        }

        let rectangles = self.state.dynamic.discard_rectangles;

        self.cs
            .set_context_reg_seq(R_028210_PA_SC_CLIPRECT_0_TL, count as u32 * 2);
        for rect in &rectangles[..count] {
            let [x0, y0, x1, y1] = clamp_scissor(rect);
            self.cs
                .emit(s_028210_tl_x(x0 as u32) | s_028210_tl_y(y0 as u32));
            self.cs
                .emit(s_028208_br_x(x1 as u32) | s_028208_br_y(y1 as u32));
        }
    }

    fn emit_line_width(&mut self) {
        let width = (self.state.dynamic.line_width * 8.0).clamp(0.0, 0xFFFF as f32) as u32;

        if self.check_space(3) {
            self.cs
                .set_context_reg(R_028A08_PA_SU_LINE_CNTL, s_028a08_width(width));
        }
    }

    fn emit_blend_constants(&mut self) {
        if !self.check_space(6) {
            return;
        }

        let constants = self.state.dynamic.blend_constants;
        self.cs.set_context_reg_seq(R_028414_CB_BLEND_RED, 4);
        for c in constants {
            self.cs.emit(c.to_bits());
        }
    }

    fn emit_stencil(&mut self) {
        if !self.check_space(4) {
            return;
        }

        let d = &self.state.dynamic;
        let front = s_028430_stenciltestval(d.stencil_reference.front)
            | s_028430_stencilmask(d.stencil_compare_mask.front)
            | s_028430_stencilwritemask(d.stencil_write_mask.front)
            | s_028430_stencilopval(1);
        let back = s_028430_stenciltestval(d.stencil_reference.back)
            | s_028430_stencilmask(d.stencil_compare_mask.back)
            | s_028430_stencilwritemask(d.stencil_write_mask.back)
            | s_028430_stencilopval(1);

        self.cs.set_context_reg_seq(R_028430_DB_STENCILREFMASK, 2);
        self.cs.emit(front);
        self.cs.emit(back);
    }

    fn emit_depth_bounds(&mut self) {
        if !self.check_space(4) {
            return;
        }

        let [min, max] = self.state.dynamic.depth_bounds;
        self.cs.set_context_reg_seq(R_028020_DB_DEPTH_BOUNDS_MIN, 2);
        self.cs.emit(min.to_bits());
        self.cs.emit(max.to_bits());
    }

    fn emit_depth_bias(&mut self) {
        if !self.check_space(7) {
            return;
        }

        let bias = self.state.dynamic.depth_bias;
        let slope = (bias.slope_factor * 16.0).to_bits();
        let offset = (bias.constant_factor * self.state.offset_scale).to_bits();

        self.cs.set_context_reg_seq(R_028B7C_PA_SU_POLY_OFFSET_CLAMP, 5);
        self.cs.emit(bias.clamp.to_bits());
        self.cs.emit(slope);
        self.cs.emit(offset);
        self.cs.emit(slope);
        self.cs.emit(offset);
    }

    /// Writes the color and depth targets of the current subpass.
    pub(super) fn emit_framebuffer_state(&mut self) {
        self.state.dirty -= DirtyState::FRAMEBUFFER;

        let (Some(render_pass), Some(framebuffer)) =
            (self.state.render_pass.clone(), self.state.framebuffer.clone())
        else {
            return;
        };

        let Some(subpass) = render_pass.subpasses().get(self.state.subpass) else {
            return;
        };

        if !self.check_space(MAX_RTS * 6 + 16) {
            return;
        }

        let queue_mask = self.queue_family.mask();
        let has_dcc_enable = self.device.chip_class() >= ChipClass::Vi;

        for i in 0..MAX_RTS {
            let reference = subpass.color_attachments.get(i).copied().flatten();
            let base_reg = R_028C60_CB_COLOR0_BASE + i as u32 * CB_COLOR_REG_STRIDE;
            let info_reg = R_028C70_CB_COLOR0_INFO + i as u32 * CB_COLOR_REG_STRIDE;

            let Some(reference) = reference else {
                self.cs.set_context_reg(info_reg, s_028c70_format(V_028C70_COLOR_INVALID));
                continue;
            };

            let image = &framebuffer.attachments()[reference.attachment as usize];
            let layout = self
                .state
                .attachment_layouts
                .get(reference.attachment as usize)
                .copied()
                .unwrap_or(reference.layout);

            let mut info = s_028c70_format(color_format(image.format()));
            if image.has_cmask() {
                info |= S_028C70_COMPRESSION;
            }
            if has_dcc_enable && image.layout_dcc_compressed(layout, queue_mask) {
                info |= S_028C70_DCC_ENABLE;
            }

            self.cs.set_context_reg(base_reg, (image.va() >> 8) as u32);
            self.cs.set_context_reg(info_reg, info);

            if !self.device.use_global_bo_list() {
                self.cs.add_buffer(image.bo());
            }
        }

        let mut offset_scale = 1.0;

        match subpass.depth_stencil_attachment {
            Some(reference) => {
                let image = &framebuffer.attachments()[reference.attachment as usize];
                let format = image.format();
                let layout = self
                    .state
                    .attachment_layouts
                    .get(reference.attachment as usize)
                    .copied()
                    .unwrap_or(reference.layout);
                let htile = image
                    .htile()
                    .filter(|_| image.layout_has_htile(layout, queue_mask));

                let mut z_info = s_028040_format(depth_format(format));
                let mut stencil_info = s_028044_format(if format.has_stencil() {
                    V_028044_STENCIL_8
                } else {
                    V_028044_STENCIL_INVALID
                });

                if let Some(htile) = htile {
                    z_info |= S_028040_TILE_SURFACE_ENABLE;
                    self.cs.set_context_reg(
                        R_028014_DB_HTILE_DATA_BASE,
                        ((image.va() + htile.offset) >> 8) as u32,
                    );
                } else {
                    stencil_info |= S_028044_TILE_STENCIL_DISABLE;
                }

                self.cs.set_context_reg_seq(R_028040_DB_Z_INFO, 3);
                self.cs.emit(z_info);
                self.cs.emit(stencil_info);
                self.cs.emit((image.va() >> 8) as u32);

                if !self.device.use_global_bo_list() {
                    self.cs.add_buffer(image.bo());
                }

                offset_scale = format.depth_offset_scale();
            }
            None => {
                self.cs.set_context_reg_seq(R_028040_DB_Z_INFO, 2);
                self.cs.emit(s_028040_format(V_028040_Z_INVALID));
                self.cs.emit(s_028044_format(V_028044_STENCIL_INVALID));
            }
        }

        let [width, height] = framebuffer.extent();
        self.cs.set_context_reg(
            R_028208_PA_SC_WINDOW_SCISSOR_BR,
            s_028208_br_x(width) | s_028208_br_y(height),
        );

        if offset_scale != self.state.offset_scale {
            self.state.offset_scale = offset_scale;
            self.state.dirty |= DirtyState::DEPTH_BIAS;
        }

        self.state.context_roll_without_scissor_emitted = true;
    }

    /// Writes the index type, base address and size.
    pub(super) fn emit_index_buffer(&mut self) {
        if !self.check_space(10) {
            return;
        }

        let index_buffer = self.state.index_buffer;
        let index_type = match index_buffer.index_type {
            IndexType::U16 => V_028A7C_VGT_INDEX_16,
            IndexType::U32 => V_028A7C_VGT_INDEX_32,
        };

        match self.device.layout().index_type {
            IndexTypeReg::Uconfig { reg, idx } => self.cs.set_uconfig_reg_idx(reg, idx, index_type),
            IndexTypeReg::Packet => {
                self.cs.pkt3(PKT3_INDEX_TYPE, 0);
                self.cs.emit(index_type);
            }
        }

        self.cs.pkt3(PKT3_INDEX_BASE, 1);
        self.cs.emit_va(index_buffer.va);

        self.cs.pkt3(PKT3_INDEX_BUFFER_SIZE, 0);
        self.cs.emit(index_buffer.max_index_count);

        self.state.dirty -= DirtyState::INDEX_BUFFER;
    }

    /// Writes the dynamic states the bound pipeline reads.
    ///
    /// With the scissor bug, the scissor is written separately, right before the draw.
    pub(super) fn flush_dynamic_state(&mut self) {
        let Some(pipeline) = self.state.pipeline.as_ref() else {
            return;
        };

        let states = self.state.dirty & pipeline.needed_dynamic_state();

        if states.intersects(DirtyState::VIEWPORT) {
            self.emit_viewport();
        }

        if states.intersects(DirtyState::SCISSOR | DirtyState::VIEWPORT)
            && !self.device.properties().has_scissor_bug
        {
            self.emit_scissor();
        }

        if states.intersects(DirtyState::LINE_WIDTH) {
            self.emit_line_width();
        }

        if states.intersects(DirtyState::BLEND_CONSTANTS) {
            self.emit_blend_constants();
        }

        if states.intersects(DirtyState::STENCIL_ALL) {
            self.emit_stencil();
        }

        if states.intersects(DirtyState::DEPTH_BOUNDS) {
            self.emit_depth_bounds();
        }

        if states.intersects(DirtyState::DEPTH_BIAS) {
            self.emit_depth_bias();
        }

        if states.intersects(DirtyState::DISCARD_RECTANGLE) {
            self.emit_discard_rectangle();
        }

        self.state.dirty -= states;
    }

    /// Returns whether the scissors must be written again right before the draw, because a
    /// context register changes in between.
    pub(super) fn need_late_scissor_emission(&self, info: &DrawInfo) -> bool {
        if !self.device.properties().has_scissor_bug {
            return false;
        }

        if self.state.context_roll_without_scissor_emitted || info.strmout_buffer.is_some() {
            return true;
        }

        let Some(pipeline) = self.state.pipeline.as_ref() else {
            return false;
        };

        // Index, vertex and streamout buffers do not roll the context, and the pipeline sets
        // `context_roll_without_scissor_emitted` itself.
        let used_states = (pipeline.needed_dynamic_state() | !DirtyState::DYNAMIC_ALL)
            - (DirtyState::INDEX_BUFFER
                | DirtyState::VERTEX_BUFFER
                | DirtyState::STREAMOUT_BUFFER
                | DirtyState::PIPELINE);

        if self.state.dirty.intersects(used_states) {
            return true;
        }

        if info.indexed && pipeline.primitive_restart_enable() {
            let index = primitive_reset_index(self.state.index_buffer.index_type);
            if self.state.last_primitive_reset_index != Some(index) {
                return true;
            }
        }

        false
    }

    /// Writes every graphics state a draw depends on, except descriptors.
    pub(super) fn emit_all_graphics_states(&mut self, info: &DrawInfo) {
        if self.state.dirty.intersects(DirtyState::PIPELINE) {
            self.emit_graphics_pipeline();
        }

        if self.state.dirty.intersects(DirtyState::FRAMEBUFFER) {
            self.emit_framebuffer_state();
        }

        if info.indexed {
            if self.state.dirty.intersects(DirtyState::INDEX_BUFFER) {
                self.emit_index_buffer();
            }
        } else if self.device.layout().draw_clobbers_index_type {
            // The next indexed draw must set the index type again.
            self.state.dirty |= DirtyState::INDEX_BUFFER;
        }

        self.flush_dynamic_state();
        self.emit_draw_registers(info);
    }

    /// Writes the registers that depend on the draw parameters as well as on the pipeline.
    fn emit_draw_registers(&mut self, info: &DrawInfo) {
        let Some(pipeline) = self.state.pipeline.clone() else {
            return;
        };

        if !self.check_space(16) {
            return;
        }

        let layout = self.device.layout().clone();
        let ia_multi_vgt_param =
            ia_multi_vgt_param(self.device.properties(), &pipeline, info);

        if self.state.last_ia_multi_vgt_param != Some(ia_multi_vgt_param) {
            layout.ia_multi_vgt_param.emit(&mut self.cs, ia_multi_vgt_param);
            self.state.last_ia_multi_vgt_param = Some(ia_multi_vgt_param);
        }

        let primitive_reset_en = info.indexed && pipeline.primitive_restart_enable();

        if self.state.last_primitive_reset_en != Some(primitive_reset_en) {
            layout
                .multi_prim_ib_reset_en
                .emit(&mut self.cs, primitive_reset_en as u32);
            self.state.last_primitive_reset_en = Some(primitive_reset_en);
        }

        if primitive_reset_en {
            let index = primitive_reset_index(self.state.index_buffer.index_type);

            if self.state.last_primitive_reset_index != Some(index) {
                self.cs
                    .set_context_reg(R_02840C_VGT_MULTI_PRIM_IB_RESET_INDX, index);
                self.state.last_primitive_reset_index = Some(index);
            }
        }

        if let Some((buffer, offset)) = &info.strmout_buffer {
            let va = buffer.va() + offset;

            self.cs.set_context_reg(
                R_028B30_VGT_STRMOUT_DRAW_OPAQUE_VERTEX_STRIDE,
                info.strmout_vertex_stride / 4,
            );

            self.cs.pkt3(PKT3_COPY_DATA, 4);
            self.cs.emit(
                copy_data_src_sel(COPY_DATA_SRC_MEM)
                    | copy_data_dst_sel(COPY_DATA_DST_REG)
                    | COPY_DATA_WR_CONFIRM,
            );
            self.cs.emit_va(va);
            self.cs
                .emit(R_028B2C_VGT_STRMOUT_DRAW_OPAQUE_BUFFER_FILLED_SIZE >> 2);
            self.cs.emit(0);

            if !self.device.use_global_bo_list() {
                self.cs.add_buffer(buffer.bo());
            }
        }
    }
}

/// Returns the index that restarts a primitive for `index_type`.
fn primitive_reset_index(index_type: IndexType) -> u32 {
    match index_type {
        IndexType::U16 => 0xffff,
        IndexType::U32 => 0xffff_ffff,
    }
}

/// Computes IA_MULTI_VGT_PARAM for a draw with the bound pipeline.
pub(super) fn ia_multi_vgt_param(
    properties: &PhysicalDeviceProperties,
    pipeline: &GraphicsPipeline,
    info: &DrawInfo,
) -> u32 {
    let param = pipeline.ia_multi_vgt_param();
    let chip_class = properties.chip_class;
    let family = properties.family;
    let max_se = properties.max_se;

    let indirect = info.indirect.is_some() || info.strmout_buffer.is_some();
    let instanced = info.instance_count > 1;
    let multi_instances_smaller_than_primgroup = indirect
        || (instanced
            && pipeline.topology() != crate::pipeline::PrimitiveTopology::PatchList
            && pipeline.prim_vertex_count().prims_for_vertices(info.count)
                < param.primgroup_size);

    let mut ia_switch_on_eoi = param.ia_switch_on_eoi;
    let mut ia_switch_on_eop = param.ia_switch_on_eop;
    let mut wd_switch_on_eop = param.wd_switch_on_eop;
    let mut partial_vs_wave = param.partial_vs_wave;
    let mut partial_es_wave = param.partial_es_wave;

    if chip_class >= ChipClass::Cik {
        // Hawaii hangs with instancing and WD_SWITCH_ON_EOP off. The instance count of an
        // indirect draw is unknown.
        if family == ChipFamily::Hawaii && (instanced || indirect) {
            wd_switch_on_eop = true;
        }

        // Small instances on 4 SE parts have poor VS wave utilization otherwise.
        if chip_class <= ChipClass::Vi && max_se == 4 && multi_instances_smaller_than_primgroup {
            wd_switch_on_eop = true;
        }

        if max_se > 2 && !wd_switch_on_eop {
            ia_switch_on_eoi = true;
        }

        if ia_switch_on_eoi
            && (family == ChipFamily::Hawaii
                || (chip_class == ChipClass::Vi && (pipeline.has_gs() || max_se > 2)))
        {
            partial_vs_wave = true;
        }

        // Instancing bug on Bonaire.
        if family == ChipFamily::Bonaire && ia_switch_on_eoi && (instanced || indirect) {
            partial_vs_wave = true;
        }

        // The IA switch requires the WD switch.
        if !wd_switch_on_eop {
            ia_switch_on_eop = false;
        }
    }

    if chip_class <= ChipClass::Vi && ia_switch_on_eoi {
        partial_es_wave = true;
    }

    if chip_class == ChipClass::Si && pipeline.has_gs() && ia_switch_on_eoi && instanced {
        partial_vs_wave = true;
    }

    param.base
        | s_028aa8_switch_on_eop(ia_switch_on_eop)
        | s_028aa8_switch_on_eoi(ia_switch_on_eoi)
        | s_028aa8_partial_vs_wave_on(partial_vs_wave)
        | s_028aa8_partial_es_wave_on(partial_es_wave)
        | s_028aa8_wd_switch_on_eop(chip_class >= ChipClass::Cik && wd_switch_on_eop)
}

/// Returns the area covered by a viewport, as `[x0, y0, x1, y1]`.
fn scissor_from_viewport(viewport: &Viewport) -> [i64; 4] {
    let (scale, translate) = viewport.xform();

    [
        (translate[0] - scale[0].abs()).floor() as i64,
        (translate[1] - scale[1].abs()).floor() as i64,
        (translate[0] + scale[0].abs()).ceil() as i64,
        (translate[1] + scale[1].abs()).ceil() as i64,
    ]
}

fn rect_bounds(rect: &Rect2D) -> [i64; 4] {
    let x0 = rect.offset[0] as i64;
    let y0 = rect.offset[1] as i64;

    [x0, y0, x0 + rect.extent[0] as i64, y0 + rect.extent[1] as i64]
}

fn clamp_scissor(rect: &Rect2D) -> [i64; 4] {
    rect_bounds(rect).map(|c| c.clamp(0, MAX_SCISSOR_COORD))
}

fn intersect_scissor(rect: &Rect2D, viewport: &[i64; 4]) -> [i64; 4] {
    let [x0, y0, x1, y1] = rect_bounds(rect);

    [
        x0.max(viewport[0]),
        y0.max(viewport[1]),
        x1.min(viewport[2]),
        y1.min(viewport[3]),
    ]
    .map(|c| c.clamp(0, MAX_SCISSOR_COORD))
}

/// Returns the horizontal and vertical guard band clip adjustment for `viewports`.
fn guardband(viewports: &[Viewport], can_use_guardband: bool) -> (f32, f32) {
    if !can_use_guardband || viewports.is_empty() {
        return (1.0, 1.0);
    }

    viewports
        .iter()
        .fold((f32::MAX, f32::MAX), |(gx, gy), viewport| {
            let (scale, translate) = viewport.xform();
            // Tiny viewports would make the adjustment overflow.
            let sx = scale[0].abs().max(0.5);
            let sy = scale[1].abs().max(0.5);

            let left = (-GUARDBAND_MAX_RANGE - translate[0]) / sx;
            let right = (GUARDBAND_MAX_RANGE - translate[0]) / sx;
            let top = (-GUARDBAND_MAX_RANGE - translate[1]) / sy;
            let bottom = (GUARDBAND_MAX_RANGE - translate[1]) / sy;

            (gx.min(-left).min(right), gy.min(-top).min(bottom))
        })
}

fn color_format(format: Format) -> u32 {
    match format {
        Format::R8G8B8A8_UNORM
        | Format::R8G8B8A8_SRGB
        | Format::B8G8R8A8_UNORM
        | Format::B8G8R8A8_SRGB => V_028C70_COLOR_8_8_8_8,
        Format::R16G16B16A16_SFLOAT => V_028C70_COLOR_16_16_16_16,
        Format::R32_UINT | Format::R32_SFLOAT => V_028C70_COLOR_32,
        Format::R32G32B32A32_SFLOAT => V_028C70_COLOR_32_32_32_32,
        _ => V_028C70_COLOR_INVALID,
    }
}

fn depth_format(format: Format) -> u32 {
    match format {
        Format::D16_UNORM | Format::D16_UNORM_S8_UINT => V_028040_Z_16,
        Format::X8_D24_UNORM_PACK32 | Format::D24_UNORM_S8_UINT => V_028040_Z_24,
        Format::D32_SFLOAT | Format::D32_SFLOAT_S8_UINT => V_028040_Z_32_FLOAT,
        _ => V_028040_Z_INVALID,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command_buffer::tests::recording,
        device::QueueFamily,
        image::ImageLayout,
        tests::{count_reg_writes, graphics_pipeline, packets},
    };

    fn viewport(w: f32) -> Viewport {
        Viewport {
            width: w,
            height: w,
            max_depth: 1.0,
            ..Default::default()
        }
    }

    fn scissor(w: u32) -> Rect2D {
        Rect2D {
            offset: [0, 0],
            extent: [w, w],
        }
    }

    #[test]
    fn dynamic_state_written_once() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        let pipeline = graphics_pipeline(&device, |_| ());

        cb.bind_pipeline_graphics(pipeline).unwrap();
        cb.set_viewport(0, &[viewport(64.0)]).unwrap();
        cb.set_scissor(0, &[scissor(32)]).unwrap();

        let info = DrawInfo {
            count: 3,
            instance_count: 1,
            ..Default::default()
        };
        cb.emit_all_graphics_states(&info);

        let words = cb.cs().words().to_vec();
        assert_eq!(count_reg_writes(&words, R_02843C_PA_CL_VPORT_XSCALE), 1);
        assert_eq!(count_reg_writes(&words, R_028250_PA_SC_VPORT_SCISSOR_0_TL), 1);
        assert_eq!(count_reg_writes(&words, R_028BE8_PA_CL_GB_VERT_CLIP_ADJ), 1);
        assert_eq!(count_reg_writes(&words, R_028A08_PA_SU_LINE_CNTL), 1);
        // The pipeline does not use stencil.
        assert_eq!(count_reg_writes(&words, R_028430_DB_STENCILREFMASK), 0);
        assert!(cb.dirty_state().intersects(DirtyState::STENCIL_ALL));
        assert!(!cb.dirty_state().intersects(DirtyState::VIEWPORT | DirtyState::PIPELINE));

        let scissor_packet = packets(&words)
            .into_iter()
            .find(|p| p.register() == Some(R_028250_PA_SC_VPORT_SCISSOR_0_TL))
            .unwrap();
        assert_eq!(
            scissor_packet.values(),
            &[S_028250_WINDOW_OFFSET_DISABLE, s_028254_br_x(32) | s_028254_br_y(32)],
        );

        // A second draw writes nothing new.
        let before = cb.cs().cdw();
        cb.emit_all_graphics_states(&info);
        assert_eq!(cb.cs().cdw(), before);
    }

    #[test]
    fn resetting_same_viewport_between_draws() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        cb.bind_pipeline_graphics(graphics_pipeline(&device, |_| ()))
            .unwrap();

        cb.set_viewport(0, &[viewport(64.0)]).unwrap();
        cb.draw(3, 1, 0, 0).unwrap();
        cb.set_viewport(0, &[viewport(64.0)]).unwrap();
        assert!(!cb.dirty_state().intersects(DirtyState::VIEWPORT));
        cb.draw(3, 1, 0, 0).unwrap();

        assert_eq!(count_reg_writes(cb.cs().words(), R_02843C_PA_CL_VPORT_XSCALE), 1);
    }

    #[test]
    fn scissor_clipped_to_viewport() {
        let rect = intersect_scissor(&scissor(128), &scissor_from_viewport(&viewport(64.0)));
        assert_eq!(rect, [0, 0, 64, 64]);

        let negative = Rect2D {
            offset: [-10, -10],
            extent: [20, 20],
        };
        assert_eq!(clamp_scissor(&negative), [0, 0, 10, 10]);
    }

    #[test]
    fn guardband_limits() {
        assert_eq!(guardband(&[viewport(64.0)], false), (1.0, 1.0));

        let (gx, gy) = guardband(&[viewport(64.0)], true);
        assert_eq!(gx, gy);
        assert!((gx - (GUARDBAND_MAX_RANGE - 32.0) / 32.0).abs() < 1e-3);

        // Degenerate viewports are clamped to half a pixel.
        let (gx, _) = guardband(&[viewport(0.0)], true);
        assert!(gx.is_finite());
    }

    #[test]
    fn late_scissor_on_vega() {
        let (device, _) = gfx_device!(Vega10);
        let mut cb = recording(&device, QueueFamily::General);
        let pipeline = graphics_pipeline(&device, |_| ());

        cb.bind_pipeline_graphics(pipeline).unwrap();
        cb.set_scissor(0, &[scissor(32)]).unwrap();

        let info = DrawInfo {
            count: 3,
            instance_count: 1,
            ..Default::default()
        };
        assert!(cb.need_late_scissor_emission(&info));

        cb.emit_all_graphics_states(&info);
        // Only the late path writes the scissor on this chip.
        assert_eq!(count_reg_writes(cb.cs().words(), R_028250_PA_SC_VPORT_SCISSOR_0_TL), 0);
        cb.emit_scissor();
        assert!(!cb.need_late_scissor_emission(&info));

        let (device, _) = gfx_device!(Polaris10);
        let cb = recording(&device, QueueFamily::General);
        assert!(!cb.need_late_scissor_emission(&info));
    }

    #[test]
    fn primitive_restart_index() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        let pipeline = graphics_pipeline(&device, |info| {
            info.topology = crate::pipeline::PrimitiveTopology::TriangleStrip;
            info.primitive_restart_enable = true;
        });
        cb.bind_pipeline_graphics(pipeline).unwrap();
        cb.state.index_buffer.index_type = IndexType::U32;
        cb.state.dirty |= DirtyState::INDEX_BUFFER;

        let info = DrawInfo {
            count: 6,
            instance_count: 1,
            indexed: true,
            ..Default::default()
        };
        cb.emit_all_graphics_states(&info);

        let words = cb.cs().words();
        assert_eq!(count_reg_writes(words, R_028A94_VGT_MULTI_PRIM_IB_RESET_EN), 1);
        let reset = packets(words)
            .into_iter()
            .find(|p| p.register() == Some(R_02840C_VGT_MULTI_PRIM_IB_RESET_INDX))
            .unwrap();
        assert_eq!(reset.values(), &[0xffff_ffff]);
        assert_eq!(crate::tests::count_opcode(words, PKT3_INDEX_TYPE), 1);
    }

    #[test]
    fn ia_multi_vgt_param_per_draw() {
        let (device, _) = gfx_device!(Hawaii);
        let pipeline = graphics_pipeline(&device, |_| ());
        let properties = device.properties();

        let single = DrawInfo {
            count: 3,
            instance_count: 1,
            ..Default::default()
        };
        let instanced = DrawInfo {
            instance_count: 4,
            ..single.clone()
        };

        let a = ia_multi_vgt_param(properties, &pipeline, &single);
        let b = ia_multi_vgt_param(properties, &pipeline, &instanced);
        assert_eq!(a & s_028aa8_wd_switch_on_eop(true), 0);
        assert_ne!(b & s_028aa8_wd_switch_on_eop(true), 0);
        // Without the WD switch, 4 SE parts must switch on EOI.
        assert_ne!(a & s_028aa8_switch_on_eoi(true), 0);

        let (device, _) = gfx_device!(Tahiti);
        let pipeline = graphics_pipeline(&device, |_| ());
        let si = ia_multi_vgt_param(device.properties(), &pipeline, &instanced);
        assert_eq!(si & s_028aa8_wd_switch_on_eop(true), 0);
    }

    #[test]
    fn framebuffer_sets_offset_scale() {
        use crate::render_pass::{
            AttachmentDescription, AttachmentReference, Framebuffer, FramebufferCreateInfo,
            RenderPass, RenderPassCreateInfo, SubpassDescription,
        };

        let (device, _) = gfx_device!();
        let depth = crate::tests::depth_image(&device, Format::D16_UNORM);
        let render_pass = RenderPass::new(RenderPassCreateInfo {
            attachments: vec![AttachmentDescription {
                format: Format::D16_UNORM,
                samples: 1,
                initial_layout: ImageLayout::DepthStencilAttachmentOptimal,
                final_layout: ImageLayout::DepthStencilAttachmentOptimal,
            }],
            subpasses: vec![SubpassDescription {
                depth_stencil_attachment: Some(AttachmentReference {
                    attachment: 0,
                    layout: ImageLayout::DepthStencilAttachmentOptimal,
                }),
                ..Default::default()
            }],
            ..Default::default()
        })
        .unwrap();
        let framebuffer = Framebuffer::new(
            render_pass.clone(),
            FramebufferCreateInfo {
                attachments: vec![depth],
                extent: [64, 64],
                layers: 1,
            },
        )
        .unwrap();

        let mut cb = recording(&device, QueueFamily::General);
        cb.state.render_pass = Some(render_pass);
        cb.state.framebuffer = Some(framebuffer);
        cb.state.attachment_layouts = [ImageLayout::DepthStencilAttachmentOptimal]
            .into_iter()
            .collect();
        cb.state.dirty = DirtyState::FRAMEBUFFER;

        cb.emit_framebuffer_state();
        assert_eq!(cb.state.offset_scale, 65536.0);
        assert!(cb.dirty_state().intersects(DirtyState::DEPTH_BIAS));
        assert_eq!(count_reg_writes(cb.cs().words(), R_028014_DB_HTILE_DATA_BASE), 1);
        assert!(cb.state.context_roll_without_scissor_emitted);
    }
}
