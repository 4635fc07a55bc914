// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Submission of command buffers to the hardware queues.
//!
//! Shaders find the ring buffers and the scratch memory they use through registers and
//! descriptors that no command buffer writes. Instead, each submission is preceded by a
//! *preamble*, a short command stream that sets them up. A queue keeps three preambles:
//!
//! - one that also waits for idle and invalidates every cache, run before the first command
//!   buffer of a batch that must not overlap earlier work,
//! - one that only invalidates the caches, run before the first command buffer otherwise,
//! - one that does neither, run before the later chunks of a batch that the kernel splits.
//!
//! The preambles are only rebuilt when a submission needs bigger rings than the ones they point
//! to, or needs a ring that was never provisioned. Otherwise the same streams are handed to the
//! kernel again.

use crate::{
    command_buffer::{
        flush, CommandBuffer, CommandBufferLevel, CommandBufferStatus, CommandBufferUsage,
        RingRequirements,
    },
    cs::CommandStream,
    device::{ChipClass, Device, QueueFamily},
    registers::*,
    sync::{Fence, FlushBits, Semaphore},
    winsys::{Bo, BoDomain, BoFlags, SemaphoreInfo, SubmitRequest},
    DeviceSize, Validated, ValidationError, VulkanError,
};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

/// Maximum number of command streams handed to the kernel in one call.
const MAX_STREAMS_PER_SUBMIT: usize = 192;

/// Scratch waves that can be in flight per compute unit.
const SCRATCH_WAVES_PER_CU: u32 = 32;

/// Size of the tessellation factor ring, per shader engine.
const TESS_FACTOR_RING_SIZE_PER_SE: DeviceSize = 32768;

/// Size in bytes of the scratch descriptor at the start of the ring descriptor buffer, padded to
/// the size of a full descriptor.
const SCRATCH_DESCRIPTOR_SIZE: usize = 16;

/// Number of ring descriptors following the scratch descriptor: the ESGS ring as written by the
/// ES and as read by the GS, the GSVS ring as read by the copy shader and as written by the GS,
/// the tessellation factor ring and the off-chip ring.
const RING_DESCRIPTOR_COUNT: usize = 6;

/// Standard sample locations for 1, 2, 4 and 8 samples, in that order.
static SAMPLE_POSITIONS: [[f32; 2]; 15] = [
    [0.5, 0.5],
    [0.75, 0.75],
    [0.25, 0.25],
    [0.375, 0.125],
    [0.875, 0.375],
    [0.125, 0.625],
    [0.625, 0.875],
    [0.5625, 0.3125],
    [0.4375, 0.6875],
    [0.8125, 0.5625],
    [0.3125, 0.1875],
    [0.1875, 0.8125],
    [0.0625, 0.4375],
    [0.6875, 0.9375],
    [0.9375, 0.0625],
];

/// Parameters of one batch of a [`Queue::submit`] call.
#[derive(Clone, Debug, Default)]
pub struct SubmitInfo<'a> {
    /// Semaphores to wait on before the command buffers start.
    pub wait_semaphores: Vec<Arc<Semaphore>>,
    /// Primary command buffers in the executable state, executed in order.
    pub command_buffers: Vec<&'a CommandBuffer>,
    /// Semaphores to signal once the command buffers have completed.
    pub signal_semaphores: Vec<Arc<Semaphore>>,
}

/// A hardware queue.
#[derive(Debug)]
pub struct Queue {
    device: Arc<Device>,
    queue_family: QueueFamily,
    queue_index: u32,
    /// Submitted on its own when a batch only signals or waits.
    empty_cs: CommandStream,
    max_streams_per_submit: usize,
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    preambles: Option<Arc<Preambles>>,
}

impl Queue {
    pub(crate) fn new(device: Arc<Device>, queue_family: QueueFamily, queue_index: u32) -> Arc<Queue> {
        let mut empty_cs = CommandStream::new();

        if queue_family == QueueFamily::General {
            empty_cs.pkt3(PKT3_CONTEXT_CONTROL, 1);
            empty_cs.emit(context_control_load_enable(true));
            empty_cs.emit(context_control_shadow_enable(true));
        } else {
            empty_cs.pkt3(PKT3_NOP, 0);
            empty_cs.emit(0);
        }

        // One stream per kernel call makes a hang point at the command buffer that caused it.
        let max_streams_per_submit = if device
            .debug_flags()
            .intersects(crate::device::DebugFlags::SYNC_SHADERS)
        {
            1
        } else {
            MAX_STREAMS_PER_SUBMIT
        };

        Arc::new(Queue {
            device,
            queue_family,
            queue_index,
            empty_cs,
            max_streams_per_submit,
            state: Mutex::new(QueueState::default()),
        })
    }

    /// Returns the device that this queue belongs to.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn queue_family(&self) -> QueueFamily {
        self.queue_family
    }

    /// Returns the index of this queue within its queue family.
    #[inline]
    pub fn queue_index(&self) -> u32 {
        self.queue_index
    }

    /// Returns the preambles currently in use, if any submission needed one.
    pub fn preambles(&self) -> Option<Arc<Preambles>> {
        self.state.lock().preambles.clone()
    }

    /// Submits batches of command buffers to the queue. `fence` is signaled once every batch has
    /// completed.
    ///
    /// Every batch is validated before anything is handed to the kernel. If the kernel rejects a
    /// submission, the batches before it have been submitted and the ones after it have not.
    pub fn submit(
        &self,
        submit_infos: &[SubmitInfo<'_>],
        fence: Option<&Fence>,
    ) -> Result<(), Validated<VulkanError>> {
        self.validate_submit(submit_infos, fence)?;

        let mut state = self.state.lock();

        let mut needed = RingRequirements::default();
        for command_buffer in submit_infos.iter().flat_map(|s| &s.command_buffers) {
            needed.merge(&command_buffer.requirements());
        }

        let preambles = self.update_preambles(&mut state, &needed)?;
        let preambles = preambles.as_deref();

        if submit_infos.is_empty() {
            if fence.is_some() {
                self.submit_streams(
                    &[&self.empty_cs],
                    None,
                    None,
                    &SemaphoreInfo::default(),
                    false,
                    fence,
                )?;
            }

            return Ok(());
        }

        let last = submit_infos.len() - 1;

        for (index, submit_info) in submit_infos.iter().enumerate() {
            let submit_fence = if index == last { fence } else { None };
            let wait_syncobjs: SmallVec<[u32; 4]> = submit_info
                .wait_semaphores
                .iter()
                .map(|semaphore| semaphore.syncobj())
                .collect();
            let signal_syncobjs: SmallVec<[u32; 4]> = submit_info
                .signal_semaphores
                .iter()
                .map(|semaphore| semaphore.syncobj())
                .collect();

            if submit_info.command_buffers.is_empty() {
                if !wait_syncobjs.is_empty() || !signal_syncobjs.is_empty() || submit_fence.is_some()
                {
                    let semaphores = SemaphoreInfo {
                        wait_syncobjs,
                        signal_syncobjs,
                    };

                    self.submit_streams(
                        &[&self.empty_cs],
                        None,
                        None,
                        &semaphores,
                        false,
                        submit_fence,
                    )?;
                }

                continue;
            }

            let streams: SmallVec<[&CommandStream; 8]> = submit_info
                .command_buffers
                .iter()
                .map(|command_buffer| command_buffer.cs())
                .collect();
            let can_patch = !submit_info.command_buffers.iter().any(|command_buffer| {
                command_buffer
                    .usage()
                    .intersects(CommandBufferUsage::SIMULTANEOUS_USE)
            });
            let do_flush = index == 0 || !wait_syncobjs.is_empty();
            let chunk_count = streams.len().div_ceil(self.max_streams_per_submit);

            for (chunk_index, chunk) in streams.chunks(self.max_streams_per_submit).enumerate() {
                let is_first = chunk_index == 0;
                let is_last = chunk_index + 1 == chunk_count;

                let initial_preamble = preambles.map(|preambles| {
                    if do_flush && is_first {
                        &preambles.initial_full_flush
                    } else {
                        &preambles.initial
                    }
                });
                let continue_preamble = preambles.map(|preambles| &preambles.continue_preamble);

                let semaphores = SemaphoreInfo {
                    wait_syncobjs: if is_first {
                        wait_syncobjs.clone()
                    } else {
                        SmallVec::new()
                    },
                    signal_syncobjs: if is_last {
                        signal_syncobjs.clone()
                    } else {
                        SmallVec::new()
                    },
                };

                self.submit_streams(
                    chunk,
                    initial_preamble,
                    continue_preamble,
                    &semaphores,
                    can_patch,
                    if is_last { submit_fence } else { None },
                )?;
            }

            for command_buffer in &submit_info.command_buffers {
                command_buffer.mark_submitted();
            }
        }

        Ok(())
    }

    fn validate_submit(
        &self,
        submit_infos: &[SubmitInfo<'_>],
        fence: Option<&Fence>,
    ) -> Result<(), Box<ValidationError>> {
        if fence.is_some_and(Fence::is_signaled) {
            return Err(ValidationError::new("fence", "is already signaled"));
        }

        let mut one_time: SmallVec<[*const CommandBuffer; 8]> = SmallVec::new();

        for (submit_index, submit_info) in submit_infos.iter().enumerate() {
            for (index, &command_buffer) in submit_info.command_buffers.iter().enumerate() {
                let context = || format!("submit_infos[{}].command_buffers[{}]", submit_index, index);

                if command_buffer.status() != CommandBufferStatus::Executable {
                    return Err(ValidationError::new(context(), "is not in the executable state"));
                }

                if command_buffer.level() != CommandBufferLevel::Primary {
                    return Err(ValidationError::new(context(), "is not a primary command buffer"));
                }

                if command_buffer.queue_family() != self.queue_family {
                    return Err(ValidationError::new(
                        context(),
                        format!(
                            "was allocated for the {:?} queue family, but the queue belongs to \
                            the {:?} queue family",
                            command_buffer.queue_family(),
                            self.queue_family,
                        ),
                    ));
                }

                if command_buffer
                    .usage()
                    .intersects(CommandBufferUsage::ONE_TIME_SUBMIT)
                {
                    let ptr: *const CommandBuffer = command_buffer;

                    if one_time.contains(&ptr) {
                        return Err(ValidationError::new(
                            context(),
                            "was recorded with `CommandBufferUsage::ONE_TIME_SUBMIT`, but is \
                            submitted more than once",
                        ));
                    }

                    one_time.push(ptr);
                }
            }
        }

        Ok(())
    }

    /// Returns the preambles to use for command buffers with the requirements `needed`,
    /// rebuilding them if the current ones do not provide enough.
    fn update_preambles(
        &self,
        state: &mut QueueState,
        needed: &RingRequirements,
    ) -> Result<Option<Arc<Preambles>>, VulkanError> {
        let current = state.preambles.as_deref();
        let provisioned = current.map_or_else(RingRequirements::default, |p| p.rings.provisioned);

        if provisioned.covers(needed) {
            return Ok(state.preambles.clone());
        }

        let mut provision = provisioned;
        provision.merge(needed);

        log::debug!(
            "rebuilding the preambles of the {:?} queue {}: {:?}",
            self.queue_family,
            self.queue_index,
            provision,
        );

        let rings = QueueRings::new(&self.device, current.map(|p| &p.rings), provision)?;
        let preambles = Arc::new(Preambles {
            initial_full_flush: self.build_preamble(&rings, PreambleKind::InitialFullFlush),
            initial: self.build_preamble(&rings, PreambleKind::Initial),
            continue_preamble: self.build_preamble(&rings, PreambleKind::Continue),
            rings,
        });

        state.preambles = Some(preambles.clone());

        Ok(Some(preambles))
    }

    fn build_preamble(&self, rings: &QueueRings, kind: PreambleKind) -> CommandStream {
        let layout = self.device.layout();
        let chip_class = layout.chip_class;
        let mut cs = CommandStream::new();

        for ring in rings.bos() {
            cs.add_buffer(&ring.bo);
        }

        match self.queue_family {
            QueueFamily::General => {
                cs.pkt3(PKT3_CONTEXT_CONTROL, 1);
                cs.emit(context_control_load_enable(true));
                cs.emit(context_control_shadow_enable(true));

                cs.pkt3(PKT3_CLEAR_STATE, 0);
                cs.emit(0);
            }
            QueueFamily::Compute => {
                cs.set_sh_reg_seq(R_00B858_COMPUTE_STATIC_THREAD_MGMT_SE0, 2);
                cs.emit(0xffff_ffff);
                cs.emit(0xffff_ffff);

                if chip_class >= ChipClass::Cik {
                    cs.set_sh_reg_seq(R_00B864_COMPUTE_STATIC_THREAD_MGMT_SE2, 2);
                    cs.emit(0xffff_ffff);
                    cs.emit(0xffff_ffff);
                }
            }
            QueueFamily::Transfer => return cs,
        }

        if self.queue_family == QueueFamily::General {
            if rings.esgs.is_some() || rings.gsvs.is_some() {
                layout
                    .esgs_ring_size
                    .emit(&mut cs, rings.provisioned.esgs_ring_size >> 8);
                layout
                    .gsvs_ring_size
                    .emit(&mut cs, rings.provisioned.gsvs_ring_size >> 8);
            }

            if let Some(tess) = &rings.tess {
                let va = tess.bo.va();
                let factor_ring_size = rings.tess_factor_ring_size as u32;

                layout
                    .tf_ring_size
                    .emit(&mut cs, s_030938_size(factor_ring_size / 4));
                layout.tf_memory_base.emit(&mut cs, (va >> 8) as u32);

                if let Some(tf_memory_base_hi) = layout.tf_memory_base_hi {
                    tf_memory_base_hi.emit(&mut cs, (va >> 40) as u32);
                }

                layout
                    .hs_offchip_param
                    .emit(&mut cs, rings.hs_offchip_param);
            }

            if rings.scratch.is_some() {
                let (waves, wave_size) = scratch_waves(&self.device, rings.provisioned.scratch_size);
                cs.set_context_reg(
                    R_0286E8_SPI_TMPRING_SIZE,
                    s_0286e8_waves(waves) | s_0286e8_wavesize(wave_size),
                );
            }

            if let Some(descriptors) = &rings.descriptors {
                let va = descriptors.bo.va();

                for &reg in layout.global_pointer_regs {
                    cs.set_sh_reg_seq(reg, 2);
                    cs.emit_va(va);
                }
            }
        }

        if let Some(compute_scratch) = &rings.compute_scratch {
            let va = compute_scratch.bo.va();
            let (waves, wave_size) =
                scratch_waves(&self.device, rings.provisioned.compute_scratch_size);

            cs.set_sh_reg_seq(R_00B900_COMPUTE_USER_DATA_0, 2);
            cs.emit(va as u32);
            cs.emit(s_008f04_base_address_hi((va >> 32) as u32) | S_008F04_SWIZZLE_ENABLE);

            cs.set_sh_reg(
                R_00B860_COMPUTE_TMPRING_SIZE,
                s_00b860_waves(waves) | s_00b860_wavesize(wave_size),
            );
        }

        let invalidate = FlushBits::INV_ICACHE
            | FlushBits::INV_SMEM_L1
            | FlushBits::INV_VMEM_L1
            | FlushBits::INV_GLOBAL_L2
            | FlushBits::START_PIPELINE_STATS;
        let flush_bits = match kind {
            PreambleKind::InitialFullFlush if self.queue_family == QueueFamily::Compute => {
                invalidate | FlushBits::CS_PARTIAL_FLUSH
            }
            PreambleKind::InitialFullFlush => {
                invalidate | FlushBits::CS_PARTIAL_FLUSH | FlushBits::PS_PARTIAL_FLUSH
            }
            PreambleKind::Initial => invalidate,
            PreambleKind::Continue => FlushBits::empty(),
        };

        if !flush_bits.is_empty() {
            flush::emit_cache_flush(
                &mut cs,
                layout,
                self.queue_family.uses_mec(),
                flush_bits,
                None,
            );
        }

        cs
    }

    fn submit_streams(
        &self,
        streams: &[&CommandStream],
        initial_preamble: Option<&CommandStream>,
        continue_preamble: Option<&CommandStream>,
        semaphores: &SemaphoreInfo,
        can_patch: bool,
        fence: Option<&Fence>,
    ) -> Result<(), VulkanError> {
        let global_bo_list = self
            .device
            .use_global_bo_list()
            .then(|| self.device.global_bo_list());

        let request = SubmitRequest {
            queue_family: self.queue_family,
            queue_index: self.queue_index,
            streams,
            initial_preamble,
            continue_preamble,
            semaphores,
            bo_list: global_bo_list.as_deref().map(Vec::as_slice),
            can_patch,
            fence,
        };

        if let Err(err) = self.device.winsys().cs_submit(&request) {
            log::error!(
                "the kernel rejected a submission to the {:?} queue {}: {}",
                self.queue_family,
                self.queue_index,
                err,
            );

            if self.device.abort_on_submit_failure() {
                std::process::abort();
            }

            return Err(VulkanError::DeviceLost);
        }

        Ok(())
    }

    /// Blocks until every submission made to the queue has completed.
    pub fn wait_idle(&self) -> Result<(), VulkanError> {
        let _state = self.state.lock();

        self.device
            .winsys()
            .ctx_wait_idle(self.queue_family, self.queue_index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PreambleKind {
    InitialFullFlush,
    Initial,
    Continue,
}

/// The preambles of a queue, together with the rings they point to.
#[derive(Debug)]
pub struct Preambles {
    /// Run before the first command buffer of a batch that must wait for earlier work.
    pub initial_full_flush: CommandStream,
    /// Run before the first command buffer of any other batch.
    pub initial: CommandStream,
    /// Run before every later chunk of a batch.
    pub continue_preamble: CommandStream,
    rings: QueueRings,
}

impl Preambles {
    /// Returns the resources the preambles were built for.
    #[inline]
    pub fn provisioned(&self) -> RingRequirements {
        self.rings.provisioned
    }
}

/// A buffer object owned by the preambles of a queue.
#[derive(Debug)]
struct RingBo {
    device: Arc<Device>,
    bo: Arc<Bo>,
}

impl RingBo {
    fn new(
        device: &Arc<Device>,
        size: DeviceSize,
        flags: BoFlags,
    ) -> Result<Arc<RingBo>, VulkanError> {
        let bo = device
            .winsys()
            .buffer_create(size, 4096, BoDomain::Vram, flags)?;

        if device.use_global_bo_list() {
            device.add_global_bo(&bo);
        }

        Ok(Arc::new(RingBo {
            device: device.clone(),
            bo,
        }))
    }
}

impl Drop for RingBo {
    fn drop(&mut self) {
        if self.device.use_global_bo_list() {
            self.device.remove_global_bo(self.bo.id());
        }

        self.device.winsys().buffer_destroy(&self.bo);
    }
}

#[derive(Debug)]
struct QueueRings {
    provisioned: RingRequirements,
    scratch: Option<Arc<RingBo>>,
    compute_scratch: Option<Arc<RingBo>>,
    esgs: Option<Arc<RingBo>>,
    gsvs: Option<Arc<RingBo>>,
    /// The tessellation factor ring, followed by the off-chip ring.
    tess: Option<Arc<RingBo>>,
    tess_factor_ring_size: DeviceSize,
    hs_offchip_param: u32,
    /// Descriptors of the rings and the sample positions, pointed to by the global pointer.
    descriptors: Option<Arc<RingBo>>,
}

impl QueueRings {
    /// Allocates the rings for `provision`, keeping the ones of `previous` that are big enough.
    fn new(
        device: &Arc<Device>,
        previous: Option<&QueueRings>,
        provision: RingRequirements,
    ) -> Result<QueueRings, VulkanError> {
        let flags = BoFlags::NO_CPU_ACCESS | BoFlags::NO_INTERPROCESS_SHARING;
        let old = previous.map(|rings| rings.provisioned).unwrap_or_default();

        let reuse_or_create =
            |previous: Option<&Option<Arc<RingBo>>>, grew: bool, size: DeviceSize| {
                match previous.and_then(Option::as_ref) {
                    Some(ring) if !grew => Ok(Some(ring.clone())),
                    _ if size == 0 => Ok(None),
                    _ => RingBo::new(device, size, flags).map(Some),
                }
            };

        let scratch = reuse_or_create(
            previous.map(|rings| &rings.scratch),
            provision.scratch_size > old.scratch_size,
            provision.scratch_size.into(),
        )?;
        let compute_scratch = reuse_or_create(
            previous.map(|rings| &rings.compute_scratch),
            provision.compute_scratch_size > old.compute_scratch_size,
            provision.compute_scratch_size.into(),
        )?;
        let esgs = reuse_or_create(
            previous.map(|rings| &rings.esgs),
            provision.esgs_ring_size > old.esgs_ring_size,
            provision.esgs_ring_size.into(),
        )?;
        let gsvs = reuse_or_create(
            previous.map(|rings| &rings.gsvs),
            provision.gsvs_ring_size > old.gsvs_ring_size,
            provision.gsvs_ring_size.into(),
        )?;

        let (max_offchip_buffers, hs_offchip_param) = tess_offchip_params(device);
        let tess_factor_ring_size =
            TESS_FACTOR_RING_SIZE_PER_SE * DeviceSize::from(device.properties().max_se);
        let tess_offchip_ring_size = DeviceSize::from(max_offchip_buffers)
            * DeviceSize::from(device.properties().tess_offchip_block_dw_size)
            * 4;
        let tess = reuse_or_create(
            previous.map(|rings| &rings.tess),
            provision.tess_rings && !old.tess_rings,
            if provision.tess_rings {
                tess_factor_ring_size.next_multiple_of(4096) + tess_offchip_ring_size
            } else {
                0
            },
        )?;

        let mut rings = QueueRings {
            provisioned: provision,
            scratch,
            compute_scratch,
            esgs,
            gsvs,
            tess,
            tess_factor_ring_size,
            hs_offchip_param,
            descriptors: None,
        };

        if rings.scratch.is_some()
            || rings.esgs.is_some()
            || rings.gsvs.is_some()
            || rings.tess.is_some()
            || provision.sample_positions
        {
            rings.descriptors = Some(rings.write_descriptors(device)?);
        }

        Ok(rings)
    }

    fn bos(&self) -> impl Iterator<Item = &Arc<RingBo>> {
        [
            &self.scratch,
            &self.compute_scratch,
            &self.esgs,
            &self.gsvs,
            &self.tess,
            &self.descriptors,
        ]
        .into_iter()
        .flatten()
    }

    fn write_descriptors(&self, device: &Arc<Device>) -> Result<Arc<RingBo>, VulkanError> {
        let ring_descriptors_size = RING_DESCRIPTOR_COUNT * 16;
        let sample_positions = bytemuck::cast_slice::<[f32; 2], u8>(&SAMPLE_POSITIONS);
        let size = SCRATCH_DESCRIPTOR_SIZE + ring_descriptors_size + sample_positions.len();

        let descriptors = RingBo::new(
            device,
            size as DeviceSize,
            BoFlags::CPU_ACCESS | BoFlags::READ_ONLY | BoFlags::NO_INTERPROCESS_SHARING,
        )?;
        device.winsys().buffer_map(&descriptors.bo)?;

        let mut words = [0u32; (SCRATCH_DESCRIPTOR_SIZE + RING_DESCRIPTOR_COUNT * 16) / 4];

        if let Some(scratch) = &self.scratch {
            let va = scratch.bo.va();
            words[0] = va as u32;
            words[1] = s_008f04_base_address_hi((va >> 32) as u32) | S_008F04_SWIZZLE_ENABLE;
        }

        let ring_descriptor = |va: u64, size: u32| {
            [
                va as u32,
                s_008f04_base_address_hi((va >> 32) as u32),
                size,
                BUFFER_DESCRIPTOR_WORD3,
            ]
        };

        let mut rings: [[u32; 4]; RING_DESCRIPTOR_COUNT] = Default::default();

        if let Some(esgs) = &self.esgs {
            let descriptor = ring_descriptor(esgs.bo.va(), self.provisioned.esgs_ring_size);
            rings[0] = descriptor;
            rings[1] = descriptor;
        }

        if let Some(gsvs) = &self.gsvs {
            let descriptor = ring_descriptor(gsvs.bo.va(), self.provisioned.gsvs_ring_size);
            rings[2] = descriptor;
            rings[3] = descriptor;
        }

        if let Some(tess) = &self.tess {
            let va = tess.bo.va();
            let offchip_offset = self.tess_factor_ring_size.next_multiple_of(4096);
            let offchip_size = tess.bo.size() - offchip_offset;

            rings[4] = ring_descriptor(va, self.tess_factor_ring_size as u32);
            rings[5] = ring_descriptor(va + offchip_offset, offchip_size as u32);
        }

        for (dst, src) in words[SCRATCH_DESCRIPTOR_SIZE / 4..]
            .iter_mut()
            .zip(rings.iter().flatten())
        {
            *dst = *src;
        }

        descriptors.bo.write(0, bytemuck::cast_slice(&words))?;
        descriptors.bo.write(words.len() * 4, sample_positions)?;

        Ok(descriptors)
    }
}

/// Returns the number of scratch waves and the size of one wave in units of 1024 bytes, for a
/// total of `scratch_size` bytes.
fn scratch_waves(device: &Device, scratch_size: u32) -> (u32, u32) {
    let waves = SCRATCH_WAVES_PER_CU * device.properties().num_good_compute_units;
    let wave_size = scratch_size.div_ceil(waves).next_multiple_of(1024) >> 10;

    (waves, wave_size)
}

/// Returns the number of tessellation off-chip buffers and the matching `VGT_HS_OFFCHIP_PARAM`.
fn tess_offchip_params(device: &Device) -> (u32, u32) {
    let properties = device.properties();
    let chip_class = device.chip_class();

    let max_offchip_buffers_per_se = if chip_class >= ChipClass::Cik { 128 } else { 64 };
    let max_offchip_buffers = (max_offchip_buffers_per_se * properties.max_se).min(
        match chip_class {
            ChipClass::Si => 126,
            _ => 508,
        },
    );
    let granularity = match properties.tess_offchip_block_dw_size {
        4096 => 0,
        _ => 1,
    };

    let param = match chip_class {
        ChipClass::Si => s_03093c_offchip_buffering(max_offchip_buffers),
        ChipClass::Cik => {
            s_03093c_offchip_buffering(max_offchip_buffers)
                | s_03093c_offchip_granularity(granularity)
        }
        // The field holds the number of buffers minus one from VI on.
        ChipClass::Vi | ChipClass::Gfx9 => {
            s_03093c_offchip_buffering(max_offchip_buffers - 1)
                | s_03093c_offchip_granularity(granularity)
        }
    };

    (max_offchip_buffers, param)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command_buffer::{CommandBufferBeginInfo, CommandPool, CommandPoolCreateInfo},
        device::{
            ChipFamily, DebugFlags, DeviceCreateInfo, PhysicalDevice, PhysicalDeviceProperties,
        },
        sync::FenceCreateInfo,
        tests::{count_reg_writes, graphics_pipeline},
        winsys::NullWinsys,
    };

    fn device_and_queue(
        create_info: DeviceCreateInfo,
    ) -> (Arc<Device>, Arc<Queue>, Arc<NullWinsys>) {
        let ws = NullWinsys::new();
        let properties = PhysicalDeviceProperties {
            address32_hi: NullWinsys::ADDRESS32_HI,
            ..PhysicalDeviceProperties::for_family(ChipFamily::Polaris10)
        };
        let physical = PhysicalDevice::new(ws.clone(), properties);
        let (device, mut queues) = Device::new(physical, create_info).unwrap();

        (device, queues.next().unwrap(), ws)
    }

    fn executable(
        device: &Arc<Device>,
        queue_family: QueueFamily,
        usage: CommandBufferUsage,
        record: impl FnOnce(&mut CommandBuffer),
    ) -> CommandBuffer {
        let pool = CommandPool::new(device.clone(), CommandPoolCreateInfo { queue_family });
        let mut cb = CommandBuffer::new(pool, CommandBufferLevel::Primary);
        cb.begin(CommandBufferBeginInfo {
            usage,
            ..Default::default()
        })
        .unwrap();
        record(&mut cb);
        cb.end().unwrap();
        cb
    }

    fn with_gs_rings(device: &Arc<Device>, esgs_ring_size: u32) -> CommandBuffer {
        let pipeline = graphics_pipeline(device, |info| {
            info.esgs_ring_size = esgs_ring_size;
            info.gsvs_ring_size = 8192;
        });

        executable(
            device,
            QueueFamily::General,
            CommandBufferUsage::empty(),
            |cb| {
                cb.bind_pipeline_graphics(pipeline).unwrap();
            },
        )
    }

    #[test]
    fn no_preamble_without_requirements() {
        let (device, queue, ws) = gfx_dev_and_queue!();
        let cb = executable(&device, QueueFamily::General, CommandBufferUsage::empty(), |_| {});

        queue
            .submit(
                &[SubmitInfo {
                    command_buffers: vec![&cb],
                    ..Default::default()
                }],
                None,
            )
            .unwrap();

        let submissions = ws.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].streams, vec![cb.cs().words().to_vec()]);
        assert!(submissions[0].initial_preamble.is_none());
        assert!(submissions[0].can_patch);
        assert!(queue.preambles().is_none());
        assert_eq!(cb.status(), CommandBufferStatus::Executable);
    }

    #[test]
    fn preamble_sets_up_rings() {
        let (device, queue, ws) = gfx_dev_and_queue!();
        let cb = with_gs_rings(&device, 4096);

        queue
            .submit(
                &[SubmitInfo {
                    command_buffers: vec![&cb],
                    ..Default::default()
                }],
                None,
            )
            .unwrap();

        let preambles = queue.preambles().unwrap();
        assert_eq!(preambles.provisioned().esgs_ring_size, 4096);

        let initial = ws.submissions()[0].initial_preamble.clone().unwrap();
        assert_eq!(initial, preambles.initial_full_flush.words());
        assert_eq!(count_reg_writes(&initial, R_030900_VGT_ESGS_RING_SIZE), 1);
        assert_eq!(count_reg_writes(&initial, R_030904_VGT_GSVS_RING_SIZE), 1);
        // The global pointer goes to the user data of every graphics stage.
        for &reg in device.layout().global_pointer_regs {
            assert_eq!(count_reg_writes(&initial, reg), 1);
        }

        // The flushing preamble is the longest of the three.
        assert!(preambles.initial_full_flush.cdw() > preambles.initial.cdw());
        assert!(preambles.initial.cdw() > preambles.continue_preamble.cdw());
    }

    #[test]
    fn preambles_reused_until_requirements_grow() {
        let (device, queue, ws) = gfx_dev_and_queue!();
        let big = with_gs_rings(&device, 8192);
        let small = with_gs_rings(&device, 4096);

        let submit = |cb: &CommandBuffer| {
            queue
                .submit(
                    &[SubmitInfo {
                        command_buffers: vec![cb],
                        ..Default::default()
                    }],
                    None,
                )
                .unwrap();
            queue.preambles().unwrap()
        };

        let first = submit(&big);
        let live = ws.live_bo_count();
        let second = submit(&small);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(ws.live_bo_count(), live);

        let msaa = executable(&device, QueueFamily::General, CommandBufferUsage::empty(), |cb| {
            cb.bind_pipeline_graphics(graphics_pipeline(&device, |info| {
                info.rasterization_samples = 4;
            }))
            .unwrap();
        });
        let third = submit(&msaa);
        assert!(!Arc::ptr_eq(&second, &third));
        assert!(third.provisioned().sample_positions);
        assert_eq!(third.provisioned().esgs_ring_size, 8192);
    }

    #[test]
    fn only_first_batch_waits_for_idle() {
        let (device, queue, ws) = gfx_dev_and_queue!();
        let a = with_gs_rings(&device, 4096);
        let b = with_gs_rings(&device, 4096);
        let semaphore = Semaphore::new(&device).unwrap();

        queue
            .submit(
                &[
                    SubmitInfo {
                        command_buffers: vec![&a],
                        ..Default::default()
                    },
                    SubmitInfo {
                        command_buffers: vec![&b],
                        ..Default::default()
                    },
                    SubmitInfo {
                        wait_semaphores: vec![semaphore.clone()],
                        command_buffers: vec![&b],
                        ..Default::default()
                    },
                ],
                None,
            )
            .unwrap();

        let preambles = queue.preambles().unwrap();
        let submissions = ws.submissions();
        assert_eq!(
            submissions[0].initial_preamble.as_deref(),
            Some(preambles.initial_full_flush.words()),
        );
        assert_eq!(
            submissions[1].initial_preamble.as_deref(),
            Some(preambles.initial.words()),
        );
        assert_eq!(
            submissions[2].initial_preamble.as_deref(),
            Some(preambles.initial_full_flush.words()),
        );
        assert_eq!(submissions[2].wait_syncobjs, vec![semaphore.syncobj()]);
    }

    #[test]
    fn semaphores_and_fence() {
        let (device, queue, ws) = gfx_dev_and_queue!();
        let cb = executable(&device, QueueFamily::General, CommandBufferUsage::empty(), |_| {});
        let wait = Semaphore::new(&device).unwrap();
        let signal = Semaphore::new(&device).unwrap();
        let fence = Fence::new(&device, FenceCreateInfo::default()).unwrap();

        queue
            .submit(
                &[
                    SubmitInfo {
                        wait_semaphores: vec![wait.clone()],
                        command_buffers: vec![&cb],
                        signal_semaphores: vec![signal.clone()],
                    },
                    // A batch without command buffers still signals.
                    SubmitInfo {
                        signal_semaphores: vec![signal.clone()],
                        ..Default::default()
                    },
                ],
                Some(&fence),
            )
            .unwrap();

        let submissions = ws.submissions();
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[0].wait_syncobjs, vec![wait.syncobj()]);
        assert_eq!(submissions[0].signal_syncobjs, vec![signal.syncobj()]);
        assert!(!submissions[0].has_fence);
        assert_eq!(submissions[1].streams, vec![queue.empty_cs.words().to_vec()]);
        assert!(submissions[1].has_fence);
        assert!(fence.is_signaled());

        // The fence must be reset before it is used again.
        assert!(queue.submit(&[], Some(&fence)).is_err());
        fence.reset();
        queue.submit(&[], Some(&fence)).unwrap();
        assert_eq!(ws.submission_count(), 3);
        assert!(fence.is_signaled());

        // Nothing to wait for and nothing to signal.
        queue.submit(&[SubmitInfo::default()], None).unwrap();
        assert_eq!(ws.submission_count(), 3);
    }

    #[test]
    fn split_into_chunks() {
        let (device, queue, ws) = device_and_queue(DeviceCreateInfo {
            debug_flags: DebugFlags::SYNC_SHADERS,
            ..Default::default()
        });
        let a = executable(&device, QueueFamily::General, CommandBufferUsage::empty(), |_| {});
        let b = executable(
            &device,
            QueueFamily::General,
            CommandBufferUsage::SIMULTANEOUS_USE,
            |_| {},
        );
        let wait = Semaphore::new(&device).unwrap();
        let signal = Semaphore::new(&device).unwrap();

        queue
            .submit(
                &[SubmitInfo {
                    wait_semaphores: vec![wait.clone()],
                    command_buffers: vec![&a, &b],
                    signal_semaphores: vec![signal.clone()],
                }],
                None,
            )
            .unwrap();

        let submissions = ws.submissions();
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[0].wait_syncobjs, vec![wait.syncobj()]);
        assert!(submissions[0].signal_syncobjs.is_empty());
        assert!(submissions[1].wait_syncobjs.is_empty());
        assert_eq!(submissions[1].signal_syncobjs, vec![signal.syncobj()]);
        assert!(!submissions[0].can_patch);
    }

    #[test]
    fn one_time_submit_consumed() {
        let (device, queue, _ws) = gfx_dev_and_queue!();
        let cb = executable(
            &device,
            QueueFamily::General,
            CommandBufferUsage::ONE_TIME_SUBMIT,
            |_| {},
        );

        let twice = [SubmitInfo {
            command_buffers: vec![&cb, &cb],
            ..Default::default()
        }];
        assert!(queue.submit(&twice, None).unwrap_err().is_validation_error());

        let once = [SubmitInfo {
            command_buffers: vec![&cb],
            ..Default::default()
        }];
        queue.submit(&once, None).unwrap();
        assert_eq!(cb.status(), CommandBufferStatus::Invalid);
        assert!(queue.submit(&once, None).unwrap_err().is_validation_error());
    }

    #[test]
    fn submit_validation() {
        let (device, queue, ws) = gfx_dev_and_queue!();

        let pool = CommandPool::new(device.clone(), Default::default());
        let mut recording = CommandBuffer::new(pool.clone(), CommandBufferLevel::Primary);
        recording.begin(Default::default()).unwrap();

        let mut secondary = CommandBuffer::new(pool, CommandBufferLevel::Secondary);
        secondary.begin(Default::default()).unwrap();
        secondary.end().unwrap();

        let compute = executable(&device, QueueFamily::Compute, CommandBufferUsage::empty(), |_| {});
        let good = executable(&device, QueueFamily::General, CommandBufferUsage::empty(), |_| {});

        for bad in [&recording, &secondary, &compute] {
            let result = queue.submit(
                &[
                    SubmitInfo {
                        command_buffers: vec![&good],
                        ..Default::default()
                    },
                    SubmitInfo {
                        command_buffers: vec![bad],
                        ..Default::default()
                    },
                ],
                None,
            );
            assert!(result.unwrap_err().is_validation_error());
        }

        // Nothing was submitted, not even the valid batches.
        assert_eq!(ws.submission_count(), 0);
    }

    #[test]
    fn submit_failure_is_device_lost() {
        let (device, queue, ws) = gfx_dev_and_queue!();
        let cb = executable(
            &device,
            QueueFamily::General,
            CommandBufferUsage::ONE_TIME_SUBMIT,
            |_| {},
        );

        ws.fail_next_submit();
        let result = queue.submit(
            &[SubmitInfo {
                command_buffers: vec![&cb],
                ..Default::default()
            }],
            None,
        );

        assert_eq!(result, Err(Validated::Error(VulkanError::DeviceLost)));
        assert_eq!(ws.submission_count(), 0);
        // The command buffer never reached the kernel.
        assert_eq!(cb.status(), CommandBufferStatus::Executable);
    }

    #[test]
    fn global_bo_list_has_rings() {
        let (device, queue, ws) = device_and_queue(DeviceCreateInfo {
            debug_flags: DebugFlags::ALL_BOS,
            ..Default::default()
        });
        let cb = with_gs_rings(&device, 4096);

        queue
            .submit(
                &[SubmitInfo {
                    command_buffers: vec![&cb],
                    ..Default::default()
                }],
                None,
            )
            .unwrap();

        let preambles = queue.preambles().unwrap();
        let submission = &ws.submissions()[0];
        for bo in preambles.initial.buffers() {
            assert!(submission.bo_ids.contains(&bo.id()));
        }
    }

    #[test]
    fn tess_params() {
        let (device, _queue, _ws) = gfx_dev_and_queue!(Tahiti);
        assert_eq!(tess_offchip_params(&device), (126, 126));

        let (device, _queue, _ws) = gfx_dev_and_queue!(Polaris10);
        let (buffers, param) = tess_offchip_params(&device);
        assert_eq!(buffers, 508);
        assert_eq!(
            param,
            s_03093c_offchip_buffering(507) | s_03093c_offchip_granularity(1),
        );
    }

    #[test]
    fn wait_idle() {
        let (_device, queue, ws) = gfx_dev_and_queue!();
        queue.wait_idle().unwrap();
        assert_eq!(ws.idle_wait_count(), 1);
    }
}
