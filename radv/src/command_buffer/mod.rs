// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Recording commands for the GPU.
//!
//! A [`CommandBuffer`] is allocated from a [`CommandPool`], which fixes the queue family it can be
//! submitted to. Recording goes through the usual lifecycle:
//!
//! - `Initial`: freshly allocated or reset.
//! - `Recording`: between [`CommandBuffer::begin`] and [`CommandBuffer::end`].
//! - `Executable`: ready to be submitted or executed from a primary command buffer.
//! - `Invalid`: recording failed, or a one-time-submit command buffer was already submitted.
//!
//! Commands do not write hardware state immediately. Binding a pipeline, changing a dynamic state
//! or binding descriptor sets only records the new value and marks it dirty. Barriers accumulate
//! [`FlushBits`]. Everything is turned into packets at the next draw or dispatch, in the order
//! that keeps the GPU idle for the shortest time.
//!
//! # Errors
//!
//! Misuse of the API is reported immediately with a [`ValidationError`]. Failures that only the
//! kernel driver can detect (running out of memory for the upload buffer, for example) are
//! latched: the command keeps recording as a no-op and [`CommandBuffer::end`] returns the first
//! such error.

pub use self::{
    barrier::{MetaOp, MetaOpKind},
    bind::IndexType,
    draw::{DispatchIndirectCommand, DrawIndexedIndirectCommand, DrawIndirectCommand},
    flush::EopFence,
    state::{DirtyState, DynamicState, PrefetchMask},
    streamout::{CounterBuffer, TransformFeedbackBinding},
};
use self::{
    state::DescriptorState,
    upload::{UploadAllocation, UploadAllocator},
};
use crate::{
    buffer::Buffer,
    cs::CommandStream,
    device::{ChipClass, Device, QueueFamily},
    image::ImageLayout,
    macros::vulkan_bitflags,
    pipeline::{ComputePipeline, GraphicsPipeline, PipelineBindPoint, MAX_SO_BUFFERS, MAX_VBS},
    render_pass::{Framebuffer, RenderPass},
    shader::ShaderStages,
    sync::FlushBits,
    DeviceSize, Validated, ValidationError, VulkanError,
};
use smallvec::SmallVec;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

mod barrier;
mod bind;
mod descriptors;
mod dma;
mod draw;
mod dynamic_state;
mod emit;
pub mod flush;
mod render_pass;
pub mod state;
mod streamout;
pub mod upload;

/// Parameters to create a new `CommandPool`.
#[derive(Clone, Debug)]
pub struct CommandPoolCreateInfo {
    /// The queue family that command buffers of the pool are submitted to.
    ///
    /// The default value is [`QueueFamily::General`].
    pub queue_family: QueueFamily,
}

impl Default for CommandPoolCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            queue_family: QueueFamily::General,
        }
    }
}

/// A pool of command buffers for one queue family.
#[derive(Debug)]
pub struct CommandPool {
    device: Arc<Device>,
    queue_family: QueueFamily,
}

impl CommandPool {
    pub fn new(device: Arc<Device>, create_info: CommandPoolCreateInfo) -> Arc<CommandPool> {
        let CommandPoolCreateInfo { queue_family } = create_info;

        Arc::new(CommandPool {
            device,
            queue_family,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn queue_family(&self) -> QueueFamily {
        self.queue_family
    }
}

/// Whether a command buffer is submitted directly or executed from another command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandBufferLevel {
    Primary,
    Secondary,
}

/// Where a command buffer is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandBufferStatus {
    Initial,
    Recording,
    Executable,
    Invalid,
}

vulkan_bitflags! {
    /// How a command buffer is going to be used.
    CommandBufferUsage = CommandBufferUsageFlags(u32);

    /// The command buffer is submitted once, then reset or freed.
    ONE_TIME_SUBMIT = ONE_TIME_SUBMIT,

    /// A secondary command buffer that is executed entirely inside a render pass.
    RENDER_PASS_CONTINUE = RENDER_PASS_CONTINUE,

    /// The command buffer may be pending on several queues at once.
    SIMULTANEOUS_USE = SIMULTANEOUS_USE,
}

/// The render pass state a secondary command buffer starts with.
#[derive(Clone, Debug)]
pub struct CommandBufferInheritanceInfo {
    pub render_pass: Arc<RenderPass>,
    pub subpass: u32,
    /// The framebuffer, if it is known when recording.
    pub framebuffer: Option<Arc<Framebuffer>>,
}

/// Parameters to begin recording.
#[derive(Clone, Debug, Default)]
pub struct CommandBufferBeginInfo {
    pub usage: CommandBufferUsage,
    /// Required for secondary command buffers with
    /// [`CommandBufferUsage::RENDER_PASS_CONTINUE`].
    pub inheritance_info: Option<CommandBufferInheritanceInfo>,
}

/// Ring buffers and scratch memory that the queue must provide before executing a command buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingRequirements {
    /// Scratch memory for graphics shaders, in bytes.
    pub scratch_size: u32,
    /// Scratch memory for compute shaders, in bytes.
    pub compute_scratch_size: u32,
    pub esgs_ring_size: u32,
    pub gsvs_ring_size: u32,
    pub tess_rings: bool,
    pub sample_positions: bool,
}

impl RingRequirements {
    /// Grows `self` so that it also covers `other`.
    pub fn merge(&mut self, other: &RingRequirements) {
        self.scratch_size = self.scratch_size.max(other.scratch_size);
        self.compute_scratch_size = self.compute_scratch_size.max(other.compute_scratch_size);
        self.esgs_ring_size = self.esgs_ring_size.max(other.esgs_ring_size);
        self.gsvs_ring_size = self.gsvs_ring_size.max(other.gsvs_ring_size);
        self.tess_rings |= other.tess_rings;
        self.sample_positions |= other.sample_positions;
    }

    /// Returns whether resources provisioned for `self` are enough for `other`.
    pub fn covers(&self, other: &RingRequirements) -> bool {
        other.scratch_size <= self.scratch_size
            && other.compute_scratch_size <= self.compute_scratch_size
            && other.esgs_ring_size <= self.esgs_ring_size
            && other.gsvs_ring_size <= self.gsvs_ring_size
            && (self.tess_rings || !other.tess_rings)
            && (self.sample_positions || !other.sample_positions)
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct VertexBinding {
    pub(crate) buffer: Option<Arc<Buffer>>,
    pub(crate) offset: DeviceSize,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct StreamoutBinding {
    pub(crate) buffer: Option<Arc<Buffer>>,
    pub(crate) offset: DeviceSize,
    pub(crate) size: DeviceSize,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct StreamoutState {
    /// Buffers bound with `bind_transform_feedback_buffers`.
    pub(crate) enabled_mask: u32,
    /// Buffers written by the bound pipeline.
    pub(crate) enabled_stream_buffers_mask: u32,
    /// Value of the buffer enables of VGT_STRMOUT_BUFFER_CONFIG, one nibble per stream.
    pub(crate) hw_enabled_mask: u32,
    pub(crate) stride_in_dw: [u32; MAX_SO_BUFFERS],
    pub(crate) streamout_enabled: bool,
}

/// Index buffer state.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct IndexBufferState {
    pub(crate) va: u64,
    pub(crate) max_index_count: u32,
    pub(crate) index_type: IndexType,
}

/// Everything the command buffer tracks between commands.
#[derive(Debug, Default)]
pub(crate) struct CmdState {
    pub(crate) dirty: DirtyState,
    pub(crate) flush_bits: FlushBits,
    pub(crate) dynamic: DynamicState,

    pub(crate) pipeline: Option<Arc<GraphicsPipeline>>,
    pub(crate) emitted_pipeline: Option<Arc<GraphicsPipeline>>,
    pub(crate) compute_pipeline: Option<Arc<ComputePipeline>>,
    pub(crate) emitted_compute_pipeline: Option<Arc<ComputePipeline>>,

    pub(crate) prefetch_mask: PrefetchMask,
    pub(crate) vb_va: u64,
    pub(crate) vb_size: u32,
    pub(crate) index_buffer: IndexBufferState,

    // Values last written to the draw registers. `None` means unknown.
    pub(crate) last_primitive_reset_en: Option<bool>,
    pub(crate) last_primitive_reset_index: Option<u32>,
    pub(crate) last_ia_multi_vgt_param: Option<u32>,
    pub(crate) last_num_instances: Option<u32>,
    pub(crate) last_first_instance: Option<u32>,
    pub(crate) last_vertex_offset: Option<u32>,

    /// A context register changed since the scissors were last written.
    pub(crate) context_roll_without_scissor_emitted: bool,
    /// Scale applied to the constant depth bias, which depends on the depth format.
    pub(crate) offset_scale: f32,

    pub(crate) render_pass: Option<Arc<RenderPass>>,
    pub(crate) framebuffer: Option<Arc<Framebuffer>>,
    pub(crate) subpass: usize,
    /// Current layout of each attachment of the render pass.
    pub(crate) attachment_layouts: SmallVec<[ImageLayout; 9]>,

    pub(crate) streamout: StreamoutState,
    /// A CP DMA operation was issued without waiting for it to complete.
    pub(crate) dma_is_busy: bool,
}

impl CmdState {
    fn new() -> Self {
        CmdState {
            dirty: DirtyState::DYNAMIC_ALL,
            offset_scale: 1.0,
            ..Default::default()
        }
    }
}

/// A command buffer.
pub struct CommandBuffer {
    device: Arc<Device>,
    pool: Arc<CommandPool>,
    level: CommandBufferLevel,
    queue_family: QueueFamily,
    status: CommandBufferStatus,
    usage: CommandBufferUsage,
    /// Set when a one-time-submit command buffer has been submitted.
    consumed: AtomicBool,

    pub(crate) cs: CommandStream,
    upload: UploadAllocator,
    record_result: Result<(), VulkanError>,

    pub(crate) state: CmdState,
    pub(crate) descriptors: [DescriptorState; 2],
    pub(crate) vertex_bindings: [VertexBinding; MAX_VBS],
    pub(crate) streamout_bindings: [StreamoutBinding; MAX_SO_BUFFERS],
    pub(crate) push_constants: [u8; crate::descriptor_set::MAX_PUSH_CONSTANTS_SIZE as usize],
    pub(crate) push_constant_stages: ShaderStages,
    pub(crate) requirements: RingRequirements,
    pub(crate) eop_fence: Option<EopFence>,
    pub(crate) meta_ops: Vec<MetaOp>,
}

impl CommandBuffer {
    /// Allocates a command buffer from `pool`.
    pub fn new(pool: Arc<CommandPool>, level: CommandBufferLevel) -> CommandBuffer {
        CommandBuffer {
            device: pool.device.clone(),
            queue_family: pool.queue_family,
            pool,
            level,
            status: CommandBufferStatus::Initial,
            usage: CommandBufferUsage::empty(),
            consumed: AtomicBool::new(false),
            cs: CommandStream::new(),
            upload: UploadAllocator::new(),
            record_result: Ok(()),
            state: CmdState::new(),
            descriptors: Default::default(),
            vertex_bindings: std::array::from_fn(|_| VertexBinding::default()),
            streamout_bindings: Default::default(),
            push_constants: [0; crate::descriptor_set::MAX_PUSH_CONSTANTS_SIZE as usize],
            push_constant_stages: ShaderStages::empty(),
            requirements: RingRequirements::default(),
            eop_fence: None,
            meta_ops: Vec::new(),
        }
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn pool(&self) -> &Arc<CommandPool> {
        &self.pool
    }

    #[inline]
    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    #[inline]
    pub fn queue_family(&self) -> QueueFamily {
        self.queue_family
    }

    #[inline]
    pub fn usage(&self) -> CommandBufferUsage {
        self.usage
    }

    /// Returns the lifecycle state.
    pub fn status(&self) -> CommandBufferStatus {
        if self.consumed.load(Ordering::Acquire) {
            CommandBufferStatus::Invalid
        } else {
            self.status
        }
    }

    /// Returns the recorded command stream.
    #[inline]
    pub fn cs(&self) -> &CommandStream {
        &self.cs
    }

    /// Returns the flushes that are pending until the next draw, dispatch or end of recording.
    #[inline]
    pub fn pending_flush_bits(&self) -> FlushBits {
        self.state.flush_bits
    }

    /// Returns the state that will be re-emitted at the next draw.
    #[inline]
    pub fn dirty_state(&self) -> DirtyState {
        self.state.dirty
    }

    /// Returns the current values of the dynamic states.
    #[inline]
    pub fn dynamic_state(&self) -> &DynamicState {
        &self.state.dynamic
    }

    /// Returns the ring buffers and scratch memory the command buffer needs.
    #[inline]
    pub fn requirements(&self) -> RingRequirements {
        self.requirements
    }

    /// Returns the metadata passes recorded so far, in order.
    #[inline]
    pub fn meta_ops(&self) -> &[MetaOp] {
        &self.meta_ops
    }

    /// Returns the upload allocator.
    #[inline]
    pub fn upload(&self) -> &UploadAllocator {
        &self.upload
    }

    /// Starts recording. A command buffer that is not in the initial state is reset first.
    pub fn begin(&mut self, begin_info: CommandBufferBeginInfo) -> Result<(), Validated<VulkanError>> {
        self.validate_begin(&begin_info)?;

        if self.status() != CommandBufferStatus::Initial {
            self.reset();
        }

        let CommandBufferBeginInfo {
            usage,
            inheritance_info,
        } = begin_info;

        self.state = CmdState::new();
        self.usage = usage;

        if self.device.chip_class() >= ChipClass::Gfx9 && self.queue_family == QueueFamily::General
        {
            let num_db = self.device.properties().num_render_backends.max(1);
            let fence = self.upload_alloc(8, 8);
            let eop_bug = self.upload_alloc(16 * num_db as DeviceSize, 8);

            if let (Some(fence), Some(eop_bug)) = (fence, eop_bug) {
                self.eop_fence = Some(EopFence {
                    va: fence.va(),
                    idx: 0,
                    eop_bug_va: eop_bug.va(),
                });
            }
        }

        if let (CommandBufferLevel::Secondary, Some(inheritance_info)) =
            (self.level, inheritance_info)
        {
            if usage.intersects(CommandBufferUsage::RENDER_PASS_CONTINUE) {
                let CommandBufferInheritanceInfo {
                    render_pass,
                    subpass,
                    framebuffer,
                } = inheritance_info;

                self.state.attachment_layouts = render_pass
                    .attachments()
                    .iter()
                    .map(|a| a.initial_layout)
                    .collect();
                self.state.render_pass = Some(render_pass);
                self.state.framebuffer = framebuffer;
                self.state.subpass = subpass as usize;
                self.state.dirty |= DirtyState::FRAMEBUFFER;
            }
        }

        self.status = CommandBufferStatus::Recording;

        Ok(())
    }

    fn validate_begin(&self, begin_info: &CommandBufferBeginInfo) -> Result<(), Box<ValidationError>> {
        if self.status == CommandBufferStatus::Recording {
            return Err(ValidationError::new("self", "is already recording"));
        }

        if self.level == CommandBufferLevel::Secondary
            && begin_info
                .usage
                .intersects(CommandBufferUsage::RENDER_PASS_CONTINUE)
        {
            let Some(inheritance_info) = &begin_info.inheritance_info else {
                return Err(ValidationError::new(
                    "begin_info.inheritance_info",
                    "is `None`, but `begin_info.usage` contains `RENDER_PASS_CONTINUE`",
                ));
            };

            if inheritance_info.subpass as usize >= inheritance_info.render_pass.subpasses().len() {
                return Err(ValidationError::new(
                    "begin_info.inheritance_info.subpass",
                    "is not a subpass of the render pass",
                ));
            }
        }

        Ok(())
    }

    /// Finishes recording. Returns the first error that was latched while recording, in which
    /// case the command buffer becomes invalid.
    pub fn end(&mut self) -> Result<(), Validated<VulkanError>> {
        self.validate_recording()?;

        if self.queue_family != QueueFamily::Transfer {
            if self.device.chip_class() == ChipClass::Si {
                self.state.flush_bits |= FlushBits::CS_PARTIAL_FLUSH
                    | FlushBits::PS_PARTIAL_FLUSH
                    | FlushBits::WRITEBACK_GLOBAL_L2;
            }

            self.emit_cache_flush();
        }

        // The kernel does not wait for CP DMA at the end of a submission.
        self.cp_dma_wait_for_idle();

        self.state.attachment_layouts.clear();

        match self.record_result {
            Ok(()) => {
                self.status = CommandBufferStatus::Executable;
                Ok(())
            }
            Err(err) => {
                self.status = CommandBufferStatus::Invalid;
                Err(err.into())
            }
        }
    }

    /// Resets the command buffer to the initial state, releasing its upload memory.
    pub fn reset(&mut self) {
        let winsys = self.device.winsys().clone();

        self.cs.reset();
        self.upload.reset(&*winsys, &mut self.cs);
        self.record_result = Ok(());
        self.state = CmdState::new();
        self.descriptors = Default::default();
        self.vertex_bindings = std::array::from_fn(|_| VertexBinding::default());
        self.streamout_bindings = Default::default();
        self.push_constant_stages = ShaderStages::empty();
        self.requirements = RingRequirements::default();
        self.eop_fence = None;
        self.meta_ops.clear();
        self.consumed.store(false, Ordering::Release);
        self.status = CommandBufferStatus::Initial;
    }

    /// Marks a one-time-submit command buffer as consumed. Called by the queue on submission.
    pub(crate) fn mark_submitted(&self) {
        if self.usage.intersects(CommandBufferUsage::ONE_TIME_SUBMIT) {
            self.consumed.store(true, Ordering::Release);
        }
    }

    pub(crate) fn validate_recording(&self) -> Result<(), Box<ValidationError>> {
        if self.status != CommandBufferStatus::Recording {
            return Err(ValidationError::new("self", "is not in the recording state"));
        }

        Ok(())
    }

    pub(crate) fn validate_queue_family(
        &self,
        bind_point: PipelineBindPoint,
    ) -> Result<(), Box<ValidationError>> {
        let supported = match bind_point {
            PipelineBindPoint::Graphics => self.queue_family == QueueFamily::General,
            PipelineBindPoint::Compute => self.queue_family != QueueFamily::Transfer,
        };

        if !supported {
            return Err(ValidationError::new(
                "self",
                format!(
                    "was allocated for the {:?} queue family, which does not support {:?} \
                    operations",
                    self.queue_family, bind_point,
                ),
            ));
        }

        Ok(())
    }

    /// Stores the first error.
    pub(crate) fn latch<T>(&mut self, result: Result<T, VulkanError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                if self.record_result.is_ok() {
                    log::warn!("command buffer recording failed: {}", err);
                    self.record_result = Err(err);
                }

                None
            }
        }
    }

    /// Reserves space for `dw` more words.
    pub(crate) fn check_space(&mut self, dw: usize) -> bool {
        let result = self.cs.check_space(dw);
        self.latch(result).is_some()
    }

    pub(crate) fn upload_alloc(
        &mut self,
        size: DeviceSize,
        alignment: DeviceSize,
    ) -> Option<UploadAllocation> {
        let result = self
            .upload
            .alloc(&**self.device.winsys(), &mut self.cs, size, alignment);
        self.latch(result)
    }

    pub(crate) fn upload_data(&mut self, data: &[u8], alignment: DeviceSize) -> Option<UploadAllocation> {
        let result = self
            .upload
            .upload_data(&**self.device.winsys(), &mut self.cs, data, alignment);
        self.latch(result)
    }

    /// Writes `data` into an allocation.
    pub(crate) fn write_upload(&mut self, allocation: &UploadAllocation, offset: DeviceSize, data: &[u8]) {
        let result = allocation.write(offset, data);
        self.latch(result);
    }

    /// Returns whether the command buffer runs on a compute ring.
    #[inline]
    pub(crate) fn uses_mec(&self) -> bool {
        self.queue_family.uses_mec()
    }

    /// Emits the pending flush bits.
    pub(crate) fn emit_cache_flush(&mut self) {
        if self.queue_family == QueueFamily::Compute {
            self.state.flush_bits -= FlushBits::GRAPHICS_ONLY;
        }

        if self.state.flush_bits.is_empty() {
            return;
        }

        self.check_space(128);
        flush::emit_cache_flush(
            &mut self.cs,
            self.device.layout(),
            self.queue_family.uses_mec(),
            self.state.flush_bits,
            self.eop_fence.as_mut(),
        );
        self.state.flush_bits = FlushBits::empty();
    }

    /// Forces a wait for idle after a draw or dispatch when shaders are synchronized for
    /// debugging.
    pub(crate) fn after_draw(&mut self, flags: FlushBits) {
        if self
            .device
            .debug_flags()
            .intersects(crate::device::DebugFlags::SYNC_SHADERS)
        {
            flush::emit_cache_flush(
                &mut self.cs,
                self.device.layout(),
                self.queue_family.uses_mec(),
                flags,
                self.eop_fence.as_mut(),
            );
        }
    }

    /// Marks every bound descriptor set of `bind_point` as needing its pointer written again.
    pub(crate) fn mark_descriptor_sets_dirty(&mut self, bind_point: PipelineBindPoint) {
        self.descriptors[bind_point.index()].mark_dirty();
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        let winsys = self.device.winsys().clone();
        self.upload.destroy(&*winsys);
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("level", &self.level)
            .field("queue_family", &self.queue_family)
            .field("status", &self.status())
            .field("cdw", &self.cs.cdw())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn recording(device: &Arc<Device>, queue_family: QueueFamily) -> CommandBuffer {
        let pool = CommandPool::new(device.clone(), CommandPoolCreateInfo { queue_family });
        let mut cb = CommandBuffer::new(pool, CommandBufferLevel::Primary);
        cb.begin(Default::default()).unwrap();
        cb
    }

    #[test]
    fn lifecycle() {
        let (device, _) = gfx_device!();
        let pool = CommandPool::new(device, Default::default());
        let mut cb = CommandBuffer::new(pool, CommandBufferLevel::Primary);
        assert_eq!(cb.status(), CommandBufferStatus::Initial);

        assert!(cb.end().unwrap_err().is_validation_error());

        cb.begin(Default::default()).unwrap();
        assert_eq!(cb.status(), CommandBufferStatus::Recording);
        assert!(cb.begin(Default::default()).is_err());

        cb.end().unwrap();
        assert_eq!(cb.status(), CommandBufferStatus::Executable);

        // Beginning again resets implicitly.
        cb.begin(Default::default()).unwrap();
        assert!(cb.cs().is_empty());
        cb.end().unwrap();

        cb.reset();
        assert_eq!(cb.status(), CommandBufferStatus::Initial);
    }

    #[test]
    fn one_time_submit_becomes_invalid() {
        let (device, _) = gfx_device!();
        let pool = CommandPool::new(device, Default::default());
        let mut cb = CommandBuffer::new(pool, CommandBufferLevel::Primary);
        cb.begin(CommandBufferBeginInfo {
            usage: CommandBufferUsage::ONE_TIME_SUBMIT,
            ..Default::default()
        })
        .unwrap();
        cb.end().unwrap();

        cb.mark_submitted();
        assert_eq!(cb.status(), CommandBufferStatus::Invalid);

        cb.reset();
        assert_eq!(cb.status(), CommandBufferStatus::Initial);
    }

    #[test]
    fn end_returns_first_error() {
        let (device, ws) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);

        ws.fail_buffer_create_after(Some(0));
        assert!(cb.upload_alloc(64, 4).is_none());
        ws.fail_buffer_create_after(None);

        cb.latch::<()>(Err(VulkanError::DeviceLost));

        assert_eq!(
            cb.end().unwrap_err().unwrap(),
            VulkanError::OutOfDeviceMemory
        );
        assert_eq!(cb.status(), CommandBufferStatus::Invalid);
    }

    #[test]
    fn si_end_flushes() {
        let (device, _) = gfx_device!(Tahiti);
        let mut cb = recording(&device, QueueFamily::General);
        cb.end().unwrap();

        let events = crate::tests::events(cb.cs().words());
        assert!(events.contains(&crate::registers::V_028A90_PS_PARTIAL_FLUSH));
        assert!(events.contains(&crate::registers::V_028A90_CS_PARTIAL_FLUSH));
    }

    #[test]
    fn transfer_end_is_empty() {
        let (device, _) = gfx_device!(Tahiti);
        let mut cb = recording(&device, QueueFamily::Transfer);
        cb.end().unwrap();
        assert!(cb.cs().is_empty());
    }

    #[test]
    fn gfx9_allocates_eop_fence() {
        let (device, _) = gfx_device!(Vega10);
        let cb = recording(&device, QueueFamily::General);
        let fence = cb.eop_fence.unwrap();
        assert_ne!(fence.va, 0);
        assert_ne!(fence.eop_bug_va, fence.va);

        let compute = recording(&device, QueueFamily::Compute);
        assert!(compute.eop_fence.is_none());
    }

    #[test]
    fn compute_queue_drops_graphics_flushes() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::Compute);
        cb.state.flush_bits = FlushBits::FLUSH_AND_INV_CB | FlushBits::PS_PARTIAL_FLUSH;
        cb.emit_cache_flush();
        assert!(cb.cs().is_empty());
        assert!(cb.pending_flush_bits().is_empty());
    }

    #[test]
    fn merge_requirements() {
        let mut a = RingRequirements {
            scratch_size: 10,
            esgs_ring_size: 4,
            ..Default::default()
        };
        a.merge(&RingRequirements {
            scratch_size: 5,
            gsvs_ring_size: 8,
            tess_rings: true,
            ..Default::default()
        });
        assert_eq!(a.scratch_size, 10);
        assert_eq!(a.esgs_ring_size, 4);
        assert_eq!(a.gsvs_ring_size, 8);
        assert!(a.tess_rings);

        assert!(a.covers(&RingRequirements {
            scratch_size: 10,
            tess_rings: true,
            ..Default::default()
        }));
        assert!(!a.covers(&RingRequirements {
            sample_positions: true,
            ..Default::default()
        }));
        assert!(!a.covers(&RingRequirements {
            esgs_ring_size: 5,
            ..Default::default()
        }));
    }
}
