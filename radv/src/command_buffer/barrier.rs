// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Translating Vulkan dependencies into cache operations, and keeping image compression metadata
//! valid across layout transitions.
//!
//! A barrier is split in two halves. The source half makes the writes of earlier commands
//! visible: it waits for the stages that wrote and flushes the caches they wrote through. The
//! destination half invalidates the caches that later commands read through. Layout transitions
//! sit between the two halves, because they read and write the image themselves.

use super::{dma::DmaSource, CommandBuffer, DirtyState};
use crate::{
    device::{ChipClass, QueueFamily},
    image::{
        Image, ImageAspects, ImageLayout, ImageSubresourceRange, ImageUsage, MetadataSurface,
    },
    registers::*,
    sync::{
        AccessFlags, DependencyInfo, Event, FlushBits, PipelineStages, EVENT_RESET, EVENT_SET,
    },
    DeviceSize, ValidationError,
};
use std::sync::Arc;

/// Value of an NOP packet that marks a metadata pass in the command stream.
pub const META_OP_MARKER: u32 = 0x4154_454d;

/// HTILE value of a depth surface that is uncompressed over its full range.
const HTILE_EXPANDED_DEPTH: u32 = 0xfffc_000f;
/// HTILE value of a depth/stencil surface that is uncompressed over its full range.
const HTILE_EXPANDED_DEPTH_STENCIL: u32 = 0xffff_f30f;
/// CMASK value of a fully expanded surface.
const CMASK_EXPANDED: u32 = 0xffff_ffff;
/// CMASK value of a fully expanded surface that also has FMASK.
const CMASK_EXPANDED_WITH_FMASK: u32 = 0xcccc_cccc;
/// DCC value of an uncompressed surface.
const DCC_UNCOMPRESSED: u32 = 0xffff_ffff;
/// DCC value of a surface that must go through a decompress pass before it is read.
const DCC_NEEDS_DECOMPRESS: u32 = 0x2020_2020;

/// A metadata pass, performed by drawing over the image with a dedicated pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetaOpKind {
    /// Writes the depth values that HTILE encodes back to the depth surface.
    DepthDecompress,
    /// Writes the values that DCC encodes back to the color surface.
    DccDecompress,
    /// Writes the fast clear color into the pixels that CMASK marks as cleared.
    FastClearEliminate,
    /// Expands the FMASK of a multisampled surface.
    FmaskDecompress,
}

/// A metadata pass recorded by a layout transition.
#[derive(Clone, Debug)]
pub struct MetaOp {
    pub kind: MetaOpKind,
    pub image: Arc<Image>,
    pub subresource_range: ImageSubresourceRange,
}

/// Returns the flushes that make writes done with `src_access` available.
///
/// When `image` is given, metadata caches are only flushed if the image has that metadata.
pub fn src_access_flush(src_access: AccessFlags, image: Option<&Image>) -> FlushBits {
    let (flush_cb_meta, flush_db_meta) = metadata_flushes(image);
    let mut flush_bits = FlushBits::empty();

    if src_access.intersects(
        AccessFlags::SHADER_WRITE
            | AccessFlags::TRANSFORM_FEEDBACK_WRITE
            | AccessFlags::TRANSFORM_FEEDBACK_COUNTER_WRITE,
    ) {
        flush_bits |= FlushBits::WRITEBACK_GLOBAL_L2;
    }

    if src_access.intersects(AccessFlags::COLOR_ATTACHMENT_WRITE | AccessFlags::TRANSFER_WRITE) {
        flush_bits |= FlushBits::FLUSH_AND_INV_CB;
        if flush_cb_meta {
            flush_bits |= FlushBits::FLUSH_AND_INV_CB_META;
        }
    }

    if src_access
        .intersects(AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE | AccessFlags::TRANSFER_WRITE)
    {
        flush_bits |= FlushBits::FLUSH_AND_INV_DB;
        if flush_db_meta {
            flush_bits |= FlushBits::FLUSH_AND_INV_DB_META;
        }
    }

    flush_bits
}

/// Returns the invalidations that make available data visible to accesses of `dst_access`.
pub fn dst_access_flush(
    chip_class: ChipClass,
    dst_access: AccessFlags,
    image: Option<&Image>,
) -> FlushBits {
    let (flush_cb_meta, flush_db_meta) = metadata_flushes(image);

    // Single-sampled color and depth-only surfaces are coherent with shaders through L2 on GFX9.
    let image_is_coherent = chip_class >= ChipClass::Gfx9
        && image.is_some_and(|image| {
            image.samples() == 1
                && image.usage().intersects(
                    ImageUsage::COLOR_ATTACHMENT | ImageUsage::DEPTH_STENCIL_ATTACHMENT,
                )
                && !image.format().has_stencil()
        });

    let mut flush_bits = FlushBits::empty();

    if dst_access.intersects(AccessFlags::UNIFORM_READ) {
        flush_bits |= FlushBits::INV_VMEM_L1 | FlushBits::INV_SMEM_L1;
    }

    if dst_access.intersects(
        AccessFlags::VERTEX_ATTRIBUTE_READ
            | AccessFlags::INPUT_ATTACHMENT_READ
            | AccessFlags::TRANSFER_READ
            | AccessFlags::SHADER_READ,
    ) {
        flush_bits |= FlushBits::INV_VMEM_L1;
        if !image_is_coherent {
            flush_bits |= FlushBits::INV_GLOBAL_L2;
        }
    }

    if dst_access.intersects(AccessFlags::COLOR_ATTACHMENT_READ) {
        flush_bits |= FlushBits::FLUSH_AND_INV_CB;
        if flush_cb_meta {
            flush_bits |= FlushBits::FLUSH_AND_INV_CB_META;
        }
    }

    if dst_access.intersects(AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ) {
        flush_bits |= FlushBits::FLUSH_AND_INV_DB;
        if flush_db_meta {
            flush_bits |= FlushBits::FLUSH_AND_INV_DB_META;
        }
    }

    flush_bits
}

fn metadata_flushes(image: Option<&Image>) -> (bool, bool) {
    match image {
        Some(image) => (image.has_cmask() || image.has_dcc(), image.has_htile()),
        None => (true, true),
    }
}

/// Returns the partial flushes that wait for the work of `src_stages` to finish.
pub fn stage_flush(src_stages: PipelineStages) -> FlushBits {
    let mut flush_bits = FlushBits::empty();

    if src_stages.intersects(
        PipelineStages::COMPUTE_SHADER
            | PipelineStages::TRANSFER
            | PipelineStages::BOTTOM_OF_PIPE
            | PipelineStages::ALL_COMMANDS,
    ) {
        flush_bits |= FlushBits::CS_PARTIAL_FLUSH;
    }

    if src_stages.intersects(
        PipelineStages::FRAGMENT_SHADER
            | PipelineStages::COLOR_ATTACHMENT_OUTPUT
            | PipelineStages::LATE_FRAGMENT_TESTS
            | PipelineStages::TRANSFER
            | PipelineStages::BOTTOM_OF_PIPE
            | PipelineStages::ALL_GRAPHICS
            | PipelineStages::ALL_COMMANDS,
    ) {
        flush_bits |= FlushBits::PS_PARTIAL_FLUSH;
    } else if src_stages.intersects(
        PipelineStages::VERTEX_INPUT
            | PipelineStages::VERTEX_SHADER
            | PipelineStages::TESSELLATION_CONTROL_SHADER
            | PipelineStages::TESSELLATION_EVALUATION_SHADER
            | PipelineStages::GEOMETRY_SHADER
            | PipelineStages::TRANSFORM_FEEDBACK,
    ) {
        flush_bits |= FlushBits::VS_PARTIAL_FLUSH;
    }

    flush_bits
}

impl CommandBuffer {
    /// Records a pipeline barrier.
    pub fn pipeline_barrier(
        &mut self,
        dependency_info: &DependencyInfo,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording()?;
        self.validate_dependency_info(dependency_info)?;

        self.barrier(dependency_info);

        Ok(self)
    }

    fn validate_dependency_info(
        &self,
        dependency_info: &DependencyInfo,
    ) -> Result<(), Box<ValidationError>> {
        for (i, barrier) in dependency_info.image_memory_barriers.iter().enumerate() {
            let full = barrier.image.subresource_range();
            let range = &barrier.subresource_range;

            if range.mip_level_range().end > full.mip_levels.1
                || range.array_layer_range().end > full.array_layers.1
            {
                return Err(ValidationError::new(
                    format!("dependency_info.image_memory_barriers[{}].subresource_range", i),
                    "is not contained in the image",
                ));
            }

            if !full.aspects.contains(range.aspects) || range.aspects.is_empty() {
                return Err(ValidationError::new(
                    format!(
                        "dependency_info.image_memory_barriers[{}].subresource_range.aspects",
                        i,
                    ),
                    "is empty or contains aspects the image format does not have",
                ));
            }

            if barrier.new_layout == ImageLayout::Undefined
                || barrier.new_layout == ImageLayout::Preinitialized
            {
                return Err(ValidationError::new(
                    format!("dependency_info.image_memory_barriers[{}].new_layout", i),
                    "is `ImageLayout::Undefined` or `ImageLayout::Preinitialized`",
                ));
            }

            let own = self.queue_family().index();
            if barrier.image.is_exclusive()
                && barrier.src_queue_family_index != barrier.dst_queue_family_index
                && barrier.src_queue_family_index != own
                && barrier.dst_queue_family_index != own
            {
                return Err(ValidationError::new(
                    format!("dependency_info.image_memory_barriers[{}]", i),
                    "is a queue family ownership transfer that does not involve the queue \
                    family of the command buffer",
                ));
            }
        }

        Ok(())
    }

    fn barrier(&mut self, dependency_info: &DependencyInfo) {
        let chip_class = self.device.chip_class();
        let mut src_flush_bits = FlushBits::empty();
        let mut dst_flush_bits = FlushBits::empty();

        for barrier in &dependency_info.memory_barriers {
            src_flush_bits |= src_access_flush(barrier.src_access, None);
            dst_flush_bits |= dst_access_flush(chip_class, barrier.dst_access, None);
        }

        for barrier in &dependency_info.buffer_memory_barriers {
            src_flush_bits |= src_access_flush(barrier.src_access, None);
            dst_flush_bits |= dst_access_flush(chip_class, barrier.dst_access, None);
        }

        for barrier in &dependency_info.image_memory_barriers {
            src_flush_bits |= src_access_flush(barrier.src_access, Some(&*barrier.image));
            dst_flush_bits |=
                dst_access_flush(chip_class, barrier.dst_access, Some(&*barrier.image));
        }

        self.state.flush_bits |= stage_flush(dependency_info.src_stages) | src_flush_bits;

        for barrier in &dependency_info.image_memory_barriers {
            self.handle_image_transition(
                &barrier.image,
                barrier.old_layout,
                barrier.new_layout,
                barrier.src_queue_family_index,
                barrier.dst_queue_family_index,
                &barrier.subresource_range,
            );
        }

        self.state.flush_bits |= dst_flush_bits;
    }

    /// Sets `event` once the work of `stages` that precedes this command has completed.
    pub fn set_event(
        &mut self,
        event: &Arc<Event>,
        stages: PipelineStages,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording()?;
        self.write_event(event, stages, EVENT_SET);

        Ok(self)
    }

    /// Resets `event` once the work of `stages` that precedes this command has completed.
    pub fn reset_event(
        &mut self,
        event: &Arc<Event>,
        stages: PipelineStages,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording()?;
        self.write_event(event, stages, EVENT_RESET);

        Ok(self)
    }

    fn write_event(&mut self, event: &Arc<Event>, stages: PipelineStages, value: u32) {
        let top_of_pipe = PipelineStages::TOP_OF_PIPE;
        let post_index_fetch =
            top_of_pipe | PipelineStages::DRAW_INDIRECT | PipelineStages::VERTEX_INPUT;

        self.cs.add_buffer(event.bo());

        // The event may guard memory written by an earlier transfer.
        self.cp_dma_wait_for_idle();

        if !self.check_space(18) {
            return;
        }

        let va = event.va();

        if (stages - top_of_pipe).is_empty() || (stages - post_index_fetch).is_empty() {
            // Index and indirect buffers are fetched by the PFP, so it is enough to write from
            // there when nothing later must complete. Otherwise the ME is the one to wait on.
            let engine = if (stages - top_of_pipe).is_empty() {
                V_370_PFP
            } else {
                V_370_ME
            };

            self.cs.pkt3(PKT3_WRITE_DATA, 3);
            self.cs.emit(
                s_370_dst_sel(V_370_MEM) | s_370_wr_confirm(true) | s_370_engine_sel(engine),
            );
            self.cs.emit_va(va);
            self.cs.emit(value);
        } else {
            let eop_bug_va = self.eop_fence.map_or(0, |fence| fence.eop_bug_va);
            let is_mec = self.uses_mec();

            super::flush::write_event_eop(
                &mut self.cs,
                self.device.layout(),
                is_mec,
                V_028A90_BOTTOM_OF_PIPE_TS,
                0,
                EOP_DATA_SEL_VALUE_32BIT,
                va,
                2,
                value,
                eop_bug_va,
            );
        }
    }

    /// Waits until every event of `events` is set, then applies `dependency_info`.
    pub fn wait_events(
        &mut self,
        events: &[Arc<Event>],
        dependency_info: &DependencyInfo,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_recording()?;
        self.validate_dependency_info(dependency_info)?;

        for event in events {
            self.cs.add_buffer(event.bo());

            if !self.check_space(7) {
                return Ok(self);
            }

            super::flush::cp_wait_mem(
                &mut self.cs,
                WAIT_REG_MEM_EQUAL,
                event.va(),
                EVENT_SET,
                0xffff_ffff,
            );
        }

        self.barrier(dependency_info);

        Ok(self)
    }

    /// Brings the compression metadata of `image` from the state `old_layout` allows to the state
    /// `new_layout` requires.
    pub(crate) fn handle_image_transition(
        &mut self,
        image: &Arc<Image>,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        src_family: u32,
        dst_family: u32,
        range: &ImageSubresourceRange,
    ) {
        let own = self.queue_family();

        if image.is_exclusive() && src_family != dst_family {
            // Ownership transfers come in release/acquire pairs. The most capable queue of the
            // two does the work.
            let general = QueueFamily::General.index();

            match own {
                QueueFamily::Transfer => return,
                QueueFamily::Compute if src_family == general || dst_family == general => return,
                _ => {}
            }
        }

        let src_queue_mask = image.queue_family_mask(src_family, own);
        let dst_queue_mask = image.queue_family_mask(dst_family, own);

        if image.format().is_depth() {
            self.handle_depth_image_transition(
                image,
                old_layout,
                new_layout,
                src_queue_mask,
                dst_queue_mask,
                range,
            );
        } else {
            self.handle_color_image_transition(
                image,
                old_layout,
                new_layout,
                src_queue_mask,
                dst_queue_mask,
                range,
            );
        }
    }

    fn handle_depth_image_transition(
        &mut self,
        image: &Arc<Image>,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        src_queue_mask: u32,
        dst_queue_mask: u32,
        range: &ImageSubresourceRange,
    ) {
        let Some(htile) = image.htile() else {
            return;
        };

        let expanded = if image.format().has_stencil() {
            HTILE_EXPANDED_DEPTH_STENCIL
        } else {
            HTILE_EXPANDED_DEPTH
        };
        let src_compressed = image.layout_is_htile_compressed(old_layout, src_queue_mask);
        let dst_compressed = image.layout_is_htile_compressed(new_layout, dst_queue_mask);

        if old_layout == ImageLayout::Undefined {
            if image.layout_has_htile(new_layout, dst_queue_mask) {
                self.initialize_htile(image, htile, range, expanded);
            }
        } else if !src_compressed && dst_compressed {
            self.initialize_htile(image, htile, range, expanded);
        } else if src_compressed && !dst_compressed {
            let range = ImageSubresourceRange {
                aspects: ImageAspects::DEPTH,
                mip_levels: (0, 1),
                ..*range
            };

            self.meta_pass(
                MetaOpKind::DepthDecompress,
                image,
                range,
                FlushBits::FLUSH_AND_INV_DB | FlushBits::FLUSH_AND_INV_DB_META,
            );
        }
    }

    fn initialize_htile(
        &mut self,
        image: &Arc<Image>,
        htile: MetadataSurface,
        range: &ImageSubresourceRange,
        value: u32,
    ) {
        self.state.flush_bits |= FlushBits::FLUSH_AND_INV_DB | FlushBits::FLUSH_AND_INV_DB_META;
        self.clear_metadata(image, htile, range, value);
        self.state.flush_bits |= FlushBits::FLUSH_AND_INV_DB_META;
    }

    fn handle_color_image_transition(
        &mut self,
        image: &Arc<Image>,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        src_queue_mask: u32,
        dst_queue_mask: u32,
        range: &ImageSubresourceRange,
    ) {
        if old_layout == ImageLayout::Undefined {
            self.init_color_image_metadata(image, new_layout, dst_queue_mask);
            return;
        }

        let leaves_fast_clear = image.layout_can_fast_clear(old_layout, src_queue_mask)
            && !image.layout_can_fast_clear(new_layout, dst_queue_mask);

        if let Some(dcc) = image.dcc() {
            if old_layout == ImageLayout::Preinitialized {
                self.initialize_dcc(image, dcc, DCC_UNCOMPRESSED);
            } else if image.layout_dcc_compressed(old_layout, src_queue_mask)
                && !image.layout_dcc_compressed(new_layout, dst_queue_mask)
            {
                self.meta_pass(
                    MetaOpKind::DccDecompress,
                    image,
                    *range,
                    FlushBits::FLUSH_AND_INV_CB | FlushBits::FLUSH_AND_INV_CB_META,
                );
            } else if leaves_fast_clear {
                self.meta_pass(
                    MetaOpKind::FastClearEliminate,
                    image,
                    *range,
                    FlushBits::FLUSH_AND_INV_CB | FlushBits::FLUSH_AND_INV_CB_META,
                );
            }
        } else if image.has_cmask() || image.has_fmask() {
            if leaves_fast_clear {
                self.meta_pass(
                    MetaOpKind::FastClearEliminate,
                    image,
                    *range,
                    FlushBits::FLUSH_AND_INV_CB | FlushBits::FLUSH_AND_INV_CB_META,
                );
            }

            if image.has_fmask()
                && old_layout != ImageLayout::General
                && new_layout == ImageLayout::General
            {
                self.meta_pass(
                    MetaOpKind::FmaskDecompress,
                    image,
                    *range,
                    FlushBits::FLUSH_AND_INV_CB | FlushBits::FLUSH_AND_INV_CB_META,
                );
            }
        }
    }

    fn init_color_image_metadata(
        &mut self,
        image: &Arc<Image>,
        new_layout: ImageLayout,
        dst_queue_mask: u32,
    ) {
        let full_range = image.subresource_range();

        if let Some(cmask) = image.cmask() {
            let value = if image.has_fmask() {
                CMASK_EXPANDED_WITH_FMASK
            } else {
                CMASK_EXPANDED
            };

            self.state.flush_bits |=
                FlushBits::FLUSH_AND_INV_CB | FlushBits::FLUSH_AND_INV_CB_META;
            self.clear_metadata(image, cmask, &full_range, value);
            self.state.flush_bits |= FlushBits::FLUSH_AND_INV_CB_META;
        }

        if let Some(dcc) = image.dcc() {
            let need_decompress_pass = image.layout_dcc_compressed(new_layout, dst_queue_mask);
            let value = if need_decompress_pass {
                DCC_NEEDS_DECOMPRESS
            } else {
                DCC_UNCOMPRESSED
            };

            self.initialize_dcc(image, dcc, value);

            if let Some(va) = image.dcc_pred_va() {
                self.write_image_words(image, va, &[u32::from(need_decompress_pass), 0]);
            }
        }

        if image.has_cmask() || image.has_dcc() {
            if let Some(va) = image.clear_value_va() {
                self.write_image_words(image, va, &[0, 0]);
            }
        }
    }

    fn initialize_dcc(&mut self, image: &Arc<Image>, dcc: MetadataSurface, value: u32) {
        self.state.flush_bits |= FlushBits::FLUSH_AND_INV_CB | FlushBits::FLUSH_AND_INV_CB_META;
        self.clear_metadata(image, dcc, &image.subresource_range(), value);
        self.state.flush_bits |= FlushBits::FLUSH_AND_INV_CB_META;
    }

    /// Fills the part of a metadata surface that covers the layers of `range`.
    fn clear_metadata(
        &mut self,
        image: &Arc<Image>,
        surface: MetadataSurface,
        range: &ImageSubresourceRange,
        value: u32,
    ) {
        let layers = DeviceSize::from(image.subresource_range().array_layers.1.max(1));
        let slice_size = surface.size / layers;
        let (first_layer, layer_count) = range.array_layers;
        let offset = surface.offset + slice_size * DeviceSize::from(first_layer);
        let size = (slice_size * DeviceSize::from(layer_count)) & !3;

        if size == 0 {
            return;
        }

        self.cs.add_buffer(image.bo());
        self.cp_dma_transfer(DmaSource::Data(value), image.va() + offset, size);
    }

    fn write_image_words(&mut self, image: &Arc<Image>, va: u64, words: &[u32]) {
        self.cs.add_buffer(image.bo());

        if !self.check_space(4 + words.len()) {
            return;
        }

        self.cs.pkt3(PKT3_WRITE_DATA, 2 + words.len() as u32);
        self.cs
            .emit(s_370_dst_sel(V_370_MEM) | s_370_wr_confirm(true) | s_370_engine_sel(V_370_PFP));
        self.cs.emit_va(va);
        self.cs.emit_array(words);
    }

    /// Records a metadata pass, bracketed by `flushes` on both sides.
    ///
    /// The pass draws with its own pipeline and state, so everything the application bound must
    /// be emitted again afterwards.
    fn meta_pass(
        &mut self,
        kind: MetaOpKind,
        image: &Arc<Image>,
        subresource_range: ImageSubresourceRange,
        flushes: FlushBits,
    ) {
        self.state.flush_bits |= flushes;
        self.emit_cache_flush();

        self.cs.add_buffer(image.bo());

        if !self.check_space(3) {
            return;
        }

        self.cs.pkt3(PKT3_NOP, 1);
        self.cs.emit(META_OP_MARKER);
        self.cs.emit(kind as u32);

        log::trace!("{:?} pass on image at {:#x}", kind, image.va());

        self.meta_ops.push(MetaOp {
            kind,
            image: image.clone(),
            subresource_range,
        });

        self.state.flush_bits |= flushes;
        self.invalidate_emitted_state();
    }

    /// Forgets which state was written to the hardware, so that the next draw or dispatch writes
    /// everything again.
    pub(super) fn invalidate_emitted_state(&mut self) {
        self.state.dirty |= DirtyState::PIPELINE
            | DirtyState::DYNAMIC_ALL
            | DirtyState::FRAMEBUFFER
            | DirtyState::INDEX_BUFFER
            | DirtyState::VERTEX_BUFFER;
        self.state.emitted_pipeline = None;
        self.state.emitted_compute_pipeline = None;
        self.state.last_primitive_reset_en = None;
        self.state.last_primitive_reset_index = None;
        self.state.last_ia_multi_vgt_param = None;
        self.state.last_num_instances = None;
        self.state.last_first_instance = None;
        self.state.last_vertex_offset = None;
        self.state.context_roll_without_scissor_emitted = true;
        self.descriptors[0].mark_dirty();
        self.descriptors[1].mark_dirty();
        self.push_constant_stages = crate::shader::ShaderStages::all();
    }
}
