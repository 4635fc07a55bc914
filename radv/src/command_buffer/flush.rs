// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Turning [`FlushBits`] into packets.
//!
//! The order matters. Metadata caches are flushed before the partial flushes, the partial flushes
//! come before the CB/DB flush on GFX9 (which waits on a fence), and `SURFACE_SYNC` with a
//! destination base set waits for idle, so it comes last.

use crate::{
    cs::CommandStream,
    device::{ChipClass, EopKind, RegisterLayout},
    registers::*,
    sync::FlushBits,
};

/// The fence used on GFX9 to wait for CB/DB flushes, which can only be expressed as end-of-pipe
/// events there.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EopFence {
    /// Address of the 32-bit fence value.
    pub va: u64,
    /// Last value written to the fence.
    pub idx: u32,
    /// Address of the scratch memory the GFX9 timestamp workaround writes to.
    pub eop_bug_va: u64,
}

/// Emits the packets performing `flush_bits`.
///
/// `fence` is required when `flush_bits` contains CB or DB flushes on a generation that flushes
/// them with an event; without one, the event is sent but not waited for.
pub fn emit_cache_flush(
    cs: &mut CommandStream,
    layout: &RegisterLayout,
    is_mec: bool,
    mut flush_bits: FlushBits,
    fence: Option<&mut EopFence>,
) {
    let chip_class = layout.chip_class;
    let mut cp_coher_cntl = 0;
    let flush_cb_db =
        flush_bits.intersects(FlushBits::FLUSH_AND_INV_CB | FlushBits::FLUSH_AND_INV_DB);

    if flush_bits.intersects(FlushBits::INV_ICACHE) {
        cp_coher_cntl |= S_0085F0_SH_ICACHE_ACTION_ENA;
    }
    if flush_bits.intersects(FlushBits::INV_SMEM_L1) {
        cp_coher_cntl |= S_0085F0_SH_KCACHE_ACTION_ENA;
    }

    if !layout.cb_db_flush_by_event {
        if flush_bits.intersects(FlushBits::FLUSH_AND_INV_CB) {
            cp_coher_cntl |= S_0085F0_CB_ACTION_ENA;
            for cb in 0..8 {
                cp_coher_cntl |= s_0085f0_cb_dest_base_ena(cb);
            }

            // Necessary for DCC.
            if chip_class == ChipClass::Vi {
                write_event_eop(
                    cs,
                    layout,
                    is_mec,
                    V_028A90_FLUSH_AND_INV_CB_DATA_TS,
                    0,
                    EOP_DATA_SEL_DISCARD,
                    0,
                    0,
                    0,
                    0,
                );
            }
        }
        if flush_bits.intersects(FlushBits::FLUSH_AND_INV_DB) {
            cp_coher_cntl |= S_0085F0_DB_ACTION_ENA | S_0085F0_DB_DEST_BASE_ENA;
        }
    }

    if flush_bits.intersects(FlushBits::FLUSH_AND_INV_CB_META) {
        emit_event(cs, V_028A90_FLUSH_AND_INV_CB_META, 0);
    }
    if flush_bits.intersects(FlushBits::FLUSH_AND_INV_DB_META) {
        emit_event(cs, V_028A90_FLUSH_AND_INV_DB_META, 0);
    }

    if flush_bits.intersects(FlushBits::PS_PARTIAL_FLUSH) {
        emit_event(cs, V_028A90_PS_PARTIAL_FLUSH, 4);
    } else if flush_bits.intersects(FlushBits::VS_PARTIAL_FLUSH) {
        emit_event(cs, V_028A90_VS_PARTIAL_FLUSH, 4);
    }

    if flush_bits.intersects(FlushBits::CS_PARTIAL_FLUSH) {
        emit_event(cs, V_028A90_CS_PARTIAL_FLUSH, 4);
    }

    if layout.cb_db_flush_by_event && flush_cb_db {
        // Only a few combinations of TC flags are allowed with the event. All of those that
        // invalidate L2 also invalidate the metadata.
        let mut tc_flags = EVENT_TC_ACTION_ENA | EVENT_TC_MD_ACTION_ENA;

        if flush_bits.intersects(FlushBits::INV_GLOBAL_L2) {
            tc_flags = EVENT_TC_ACTION_ENA | EVENT_TC_WB_ACTION_ENA;
            flush_bits -= FlushBits::INV_GLOBAL_L2
                | FlushBits::WRITEBACK_GLOBAL_L2
                | FlushBits::INV_VMEM_L1;
        }

        match fence {
            Some(fence) => {
                let old_fence = fence.idx;
                fence.idx = fence.idx.wrapping_add(1);

                write_event_eop(
                    cs,
                    layout,
                    false,
                    V_028A90_CACHE_FLUSH_AND_INV_TS_EVENT,
                    tc_flags,
                    EOP_DATA_SEL_VALUE_32BIT,
                    fence.va,
                    old_fence,
                    fence.idx,
                    fence.eop_bug_va,
                );
                cp_wait_mem(cs, WAIT_REG_MEM_EQUAL, fence.va, fence.idx, 0xffff_ffff);
            }
            None => {
                log::warn!("CB/DB flush without a fence to wait on");
                write_event_eop(
                    cs,
                    layout,
                    false,
                    V_028A90_CACHE_FLUSH_AND_INV_TS_EVENT,
                    tc_flags,
                    EOP_DATA_SEL_DISCARD,
                    0,
                    0,
                    0,
                    0,
                );
            }
        }
    }

    if flush_bits.intersects(FlushBits::VGT_FLUSH) {
        emit_event(cs, V_028A90_VGT_FLUSH, 0);
    }

    if flush_bits.intersects(FlushBits::VGT_STREAMOUT_SYNC) {
        emit_event(cs, V_028A90_VGT_STREAMOUT_SYNC, 0);
    }

    // Make sure the ME is idle before the PFP goes on.
    if (cp_coher_cntl != 0
        || flush_bits.intersects(
            FlushBits::CS_PARTIAL_FLUSH
                | FlushBits::INV_VMEM_L1
                | FlushBits::INV_GLOBAL_L2
                | FlushBits::WRITEBACK_GLOBAL_L2,
        ))
        && !is_mec
    {
        cs.pkt3(PKT3_PFP_SYNC_ME, 0);
        cs.emit(0);
    }

    if flush_bits.intersects(FlushBits::INV_GLOBAL_L2)
        || (chip_class <= ChipClass::Cik && flush_bits.intersects(FlushBits::WRITEBACK_GLOBAL_L2))
    {
        let mut cntl = cp_coher_cntl | S_0085F0_TC_ACTION_ENA | S_0085F0_TCL1_ACTION_ENA;
        if chip_class >= ChipClass::Vi {
            cntl |= S_0301F0_TC_WB_ACTION_ENA;
        }
        emit_acquire_mem(cs, layout, is_mec, cntl);
        cp_coher_cntl = 0;
    } else {
        if flush_bits.intersects(FlushBits::WRITEBACK_GLOBAL_L2) {
            // Write-back only works on non-coherent memory types, which is everything we use.
            emit_acquire_mem(
                cs,
                layout,
                is_mec,
                cp_coher_cntl | S_0301F0_TC_WB_ACTION_ENA | S_0301F0_TC_NC_ACTION_ENA,
            );
            cp_coher_cntl = 0;
        }
        if flush_bits.intersects(FlushBits::INV_VMEM_L1) {
            emit_acquire_mem(cs, layout, is_mec, cp_coher_cntl | S_0085F0_TCL1_ACTION_ENA);
            cp_coher_cntl = 0;
        }
    }

    // With a DEST_BASE flag set this waits for idle, so it goes last.
    if cp_coher_cntl != 0 {
        emit_acquire_mem(cs, layout, is_mec, cp_coher_cntl);
    }

    if flush_bits.intersects(FlushBits::START_PIPELINE_STATS) {
        emit_event(cs, V_028A90_PIPELINESTAT_START, 0);
    } else if flush_bits.intersects(FlushBits::STOP_PIPELINE_STATS) {
        emit_event(cs, V_028A90_PIPELINESTAT_STOP, 0);
    }
}

fn emit_event(cs: &mut CommandStream, event: u32, index: u32) {
    cs.pkt3(PKT3_EVENT_WRITE, 0);
    cs.emit(event_type(event) | event_index(index));
}

/// Emits a cache coherency operation: `SURFACE_SYNC` on the graphics ring of older generations,
/// `ACQUIRE_MEM` elsewhere.
pub fn emit_acquire_mem(
    cs: &mut CommandStream,
    layout: &RegisterLayout,
    is_mec: bool,
    cp_coher_cntl: u32,
) {
    if is_mec || layout.acquire_mem_on_gfx {
        let size_hi = if layout.acquire_mem_on_gfx { 0xff_ffff } else { 0xff };

        cs.emit(pkt3(PKT3_ACQUIRE_MEM, 5, false) | pkt3_shader_type_s(is_mec));
        cs.emit(cp_coher_cntl);
        cs.emit(0xffff_ffff); // CP_COHER_SIZE
        cs.emit(size_hi); // CP_COHER_SIZE_HI
        cs.emit(0); // CP_COHER_BASE
        cs.emit(0); // CP_COHER_BASE_HI
        cs.emit(0x0000_000A); // POLL_INTERVAL
    } else {
        cs.pkt3(PKT3_SURFACE_SYNC, 3);
        cs.emit(cp_coher_cntl);
        cs.emit(0xffff_ffff); // CP_COHER_SIZE
        cs.emit(0); // CP_COHER_BASE
        cs.emit(0x0000_000A); // POLL_INTERVAL
    }
}

/// Emits an end-of-pipe event, optionally writing `new_fence` to `va` once it has passed.
#[allow(clippy::too_many_arguments)]
pub fn write_event_eop(
    cs: &mut CommandStream,
    layout: &RegisterLayout,
    is_mec: bool,
    event: u32,
    event_flags: u32,
    data_sel: u32,
    va: u64,
    old_fence: u32,
    new_fence: u32,
    eop_bug_va: u64,
) {
    let op = event_type(event) | event_index(5) | event_flags;
    let chip_class = layout.chip_class;
    let is_gfx8_mec = is_mec && chip_class < ChipClass::Gfx9;
    let mut sel = eop_data_sel(data_sel);

    // Wait for the write confirmation, but don't send an interrupt.
    if data_sel != EOP_DATA_SEL_DISCARD {
        sel |= eop_int_sel(EOP_INT_SEL_SEND_DATA_AFTER_WR_CONFIRM);
    }

    if layout.eop == EopKind::ReleaseMem || is_gfx8_mec {
        // Every timestamp event must be preceded by an occlusion counter dump on GFX9, or the GPU
        // may hang.
        if chip_class == ChipClass::Gfx9 && !is_mec {
            cs.pkt3(PKT3_EVENT_WRITE, 2);
            cs.emit(event_type(V_028A90_ZPASS_DONE) | event_index(1));
            cs.emit_va(eop_bug_va);
        }

        cs.pkt3(PKT3_RELEASE_MEM, if is_gfx8_mec { 5 } else { 6 });
        cs.emit(op);
        cs.emit(sel);
        cs.emit_va(va);
        cs.emit(new_fence);
        cs.emit(0);
        if !is_gfx8_mec {
            cs.emit(0);
        }
    } else {
        // Two events are needed for every engine to be idle before the value is written.
        if layout.eop == EopKind::Double {
            cs.pkt3(PKT3_EVENT_WRITE_EOP, 4);
            cs.emit(op);
            cs.emit(va as u32);
            cs.emit(((va >> 32) as u32 & 0xffff) | sel);
            cs.emit(old_fence);
            cs.emit(0);
        }

        cs.pkt3(PKT3_EVENT_WRITE_EOP, 4);
        cs.emit(op);
        cs.emit(va as u32);
        cs.emit(((va >> 32) as u32 & 0xffff) | sel);
        cs.emit(new_fence);
        cs.emit(0);
    }
}

/// Makes the command processor wait until `(*va & mask) op reference` holds.
pub fn cp_wait_mem(cs: &mut CommandStream, op: u32, va: u64, reference: u32, mask: u32) {
    cs.pkt3(PKT3_WAIT_REG_MEM, 5);
    cs.emit(op | wait_reg_mem_mem_space(1));
    cs.emit_va(va);
    cs.emit(reference);
    cs.emit(mask);
    cs.emit(4); // poll interval
}
