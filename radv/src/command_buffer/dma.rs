// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Buffer transfers performed by the command processor's DMA engine.
//!
//! CP DMA runs asynchronously from the rest of the command processor unless a packet asks for a
//! sync. Packets that don't are tracked with `dma_is_busy`, and [`CommandBuffer::end`] waits for
//! them.

use super::CommandBuffer;
use crate::{
    buffer::{Buffer, BufferUsage},
    device::{ChipClass, QueueFamily},
    macros::driver_bitflags,
    registers::*,
    sync::FlushBits,
    DeviceSize, ValidationError,
};
use std::sync::Arc;

/// Largest update accepted by `update_buffer`, in bytes.
pub const MAX_UPDATE_BUFFER_SIZE: DeviceSize = 65536;

driver_bitflags! {
    /// Options of a single CP DMA packet.
    CpDmaFlags = u32;

    /// Wait for the transfer to complete before the command processor goes on.
    SYNC = 1 << 0,
    /// Wait for previous memory writes to land before reading.
    RAW_WAIT = 1 << 1,
    /// Don't write anything, only pull the source into L2.
    PREFETCH = 1 << 2,
}

/// Where the data of one CP DMA packet comes from.
#[derive(Clone, Copy, Debug)]
pub(super) enum DmaSource {
    Address(u64),
    Data(u32),
}

impl CommandBuffer {
    fn validate_dma(&self) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;

        if self.queue_family() == QueueFamily::Transfer {
            return Err(ValidationError::new(
                "self",
                "was allocated for the transfer queue family, which has no CP DMA engine",
            ));
        }

        Ok(())
    }

    fn validate_dst_range(
        dst_buffer: &Buffer,
        dst_offset: DeviceSize,
        size: DeviceSize,
    ) -> Result<(), Box<ValidationError>> {
        if !dst_buffer.usage().intersects(BufferUsage::TRANSFER_DST) {
            return Err(ValidationError::new(
                "dst_buffer.usage()",
                "does not contain `BufferUsage::TRANSFER_DST`",
            ));
        }

        if dst_offset % 4 != 0 {
            return Err(ValidationError::new("dst_offset", "is not a multiple of 4"));
        }

        if size == 0 || size % 4 != 0 {
            return Err(ValidationError::new("size", "is zero or not a multiple of 4"));
        }

        if dst_offset
            .checked_add(size)
            .is_none_or(|end| end > dst_buffer.size())
        {
            return Err(ValidationError::new(
                "dst_offset + size",
                "is greater than the size of `dst_buffer`",
            ));
        }

        Ok(())
    }

    /// Fills `size` bytes of `dst_buffer` at `dst_offset` with the 32-bit value `data`.
    pub fn fill_buffer(
        &mut self,
        dst_buffer: &Arc<Buffer>,
        dst_offset: DeviceSize,
        size: DeviceSize,
        data: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_dma()?;
        Self::validate_dst_range(dst_buffer, dst_offset, size)?;

        self.cs.add_buffer(dst_buffer.bo());
        self.cp_dma_transfer(DmaSource::Data(data), dst_buffer.va() + dst_offset, size);

        Ok(self)
    }

    /// Copies `size` bytes from `src_buffer` to `dst_buffer`.
    pub fn copy_buffer(
        &mut self,
        src_buffer: &Arc<Buffer>,
        src_offset: DeviceSize,
        dst_buffer: &Arc<Buffer>,
        dst_offset: DeviceSize,
        size: DeviceSize,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_dma()?;
        Self::validate_dst_range(dst_buffer, dst_offset, size)?;

        if !src_buffer.usage().intersects(BufferUsage::TRANSFER_SRC) {
            return Err(ValidationError::new(
                "src_buffer.usage()",
                "does not contain `BufferUsage::TRANSFER_SRC`",
            ));
        }

        if src_offset
            .checked_add(size)
            .is_none_or(|end| end > src_buffer.size())
        {
            return Err(ValidationError::new(
                "src_offset + size",
                "is greater than the size of `src_buffer`",
            ));
        }

        self.cs.add_buffer(src_buffer.bo());
        self.cs.add_buffer(dst_buffer.bo());
        self.cp_dma_transfer(
            DmaSource::Address(src_buffer.va() + src_offset),
            dst_buffer.va() + dst_offset,
            size,
        );

        Ok(self)
    }

    /// Writes `data` into `dst_buffer` from the command stream itself.
    pub fn update_buffer(
        &mut self,
        dst_buffer: &Arc<Buffer>,
        dst_offset: DeviceSize,
        data: &[u8],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_dma()?;
        Self::validate_dst_range(dst_buffer, dst_offset, data.len() as DeviceSize)?;

        if data.len() as DeviceSize > MAX_UPDATE_BUFFER_SIZE {
            return Err(ValidationError::new(
                "data",
                format!("is larger than {} bytes", MAX_UPDATE_BUFFER_SIZE),
            ));
        }

        self.cs.add_buffer(dst_buffer.bo());
        self.emit_cache_flush();

        if !self.check_space(data.len() / 4 + 5) {
            return Ok(self);
        }

        let va = dst_buffer.va() + dst_offset;
        let words: Vec<u32> = data
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        self.cs.pkt3(PKT3_WRITE_DATA, 2 + words.len() as u32);
        self.cs
            .emit(s_370_dst_sel(V_370_MEM) | s_370_wr_confirm(true) | s_370_engine_sel(V_370_ME));
        self.cs.emit_va(va);
        self.cs.emit_array(&words);

        Ok(self)
    }

    /// Splits a transfer into packets no larger than the engine allows.
    pub(super) fn cp_dma_transfer(&mut self, mut src: DmaSource, mut dst_va: u64, mut size: DeviceSize) {
        let max_byte_count = DeviceSize::from(CP_DMA_MAX_BYTE_COUNT);
        let mut first = true;

        while size > 0 {
            let byte_count = size.min(max_byte_count);
            let mut flags = CpDmaFlags::empty();

            // Pending flushes must land before the DMA reads or overwrites memory.
            if first && !self.state.flush_bits.is_empty() {
                self.emit_cache_flush();
                flags |= CpDmaFlags::RAW_WAIT;
            }

            if byte_count == size {
                flags |= CpDmaFlags::SYNC;
            }

            self.emit_cp_dma(dst_va, src, byte_count as u32, flags);

            if let DmaSource::Address(va) = &mut src {
                *va += byte_count;
            }
            dst_va += byte_count;
            size -= byte_count;
            first = false;
        }

        // Shaders read through L1 caches that the DMA engine doesn't update.
        self.state.flush_bits |= FlushBits::INV_VMEM_L1 | FlushBits::INV_SMEM_L1;
    }

    /// Emits one `DMA_DATA` packet, or `CP_DMA` on SI.
    fn emit_cp_dma(&mut self, dst_va: u64, src: DmaSource, byte_count: u32, flags: CpDmaFlags) {
        if !self.check_space(9) {
            return;
        }

        let chip_class = self.device.chip_class();
        let mut header = 0;
        let mut command = if chip_class >= ChipClass::Gfx9 {
            s_414_byte_count_gfx9(byte_count)
        } else {
            s_414_byte_count_gfx6(byte_count)
        };

        // Nothing reads the result of a prefetch.
        if flags.intersects(CpDmaFlags::PREFETCH) {
            command |= if chip_class >= ChipClass::Gfx9 {
                S_414_DISABLE_WR_CONFIRM_GFX9
            } else {
                S_414_DISABLE_WR_CONFIRM_GFX6
            };
        }

        if flags.intersects(CpDmaFlags::SYNC) {
            header |= s_411_cp_sync(true);
        }
        if flags.intersects(CpDmaFlags::RAW_WAIT) {
            command |= S_414_RAW_WAIT;
        }

        let (src_sel, src_va) = match src {
            DmaSource::Data(data) => (V_411_DATA, u64::from(data)),
            DmaSource::Address(va) if chip_class >= ChipClass::Cik => (V_411_SRC_ADDR_TC_L2, va),
            DmaSource::Address(va) => (V_411_SRC_ADDR, va),
        };

        let dst_sel = if flags.intersects(CpDmaFlags::PREFETCH) && chip_class >= ChipClass::Gfx9 {
            V_411_NOWHERE
        } else if chip_class >= ChipClass::Cik {
            V_411_DST_ADDR_TC_L2
        } else {
            V_411_DST_ADDR
        };

        header |= s_411_src_sel(src_sel) | s_411_dst_sel(dst_sel);

        if self.device.layout().has_dma_data {
            self.cs.pkt3(PKT3_DMA_DATA, 5);
            self.cs.emit(header);
            self.cs.emit_va(src_va);
            self.cs.emit_va(dst_va);
            self.cs.emit(command);
        } else {
            self.cs.pkt3(PKT3_CP_DMA, 4);
            self.cs.emit(src_va as u32);
            self.cs.emit(header | s_411_src_addr_hi((src_va >> 32) as u32));
            self.cs.emit(dst_va as u32);
            self.cs.emit((dst_va >> 32) as u32 & 0xffff);
            self.cs.emit(command);
        }

        // CP DMA runs on the ME, so the PFP must wait for it before fetching anything that the
        // transfer may have written.
        if flags.intersects(CpDmaFlags::SYNC)
            && self.queue_family() == QueueFamily::General
            && !self.uses_mec()
        {
            self.cs.pkt3(PKT3_PFP_SYNC_ME, 0);
            self.cs.emit(0);
        }

        self.state.dma_is_busy = !flags.intersects(CpDmaFlags::SYNC);
    }

    /// Pulls `size` bytes at `va` into L2, so that the shaders don't wait on memory.
    pub(super) fn cp_dma_prefetch(&mut self, va: u64, size: u32) {
        if !self.device.layout().has_dma_data || size == 0 {
            return;
        }

        let aligned_va = va & !(CP_DMA_ALIGNMENT - 1);
        let aligned_size = ((va - aligned_va + u64::from(size) + CP_DMA_ALIGNMENT - 1)
            & !(CP_DMA_ALIGNMENT - 1))
            .min(u64::from(CP_DMA_MAX_BYTE_COUNT)) as u32;

        self.emit_cp_dma(
            aligned_va,
            DmaSource::Address(aligned_va),
            aligned_size,
            CpDmaFlags::PREFETCH,
        );
    }

    /// Waits for every CP DMA operation issued so far.
    pub(super) fn cp_dma_wait_for_idle(&mut self) {
        // SI executes CP DMA in order with the rest of the stream.
        if self.device.chip_class() < ChipClass::Cik || !self.state.dma_is_busy {
            return;
        }

        self.emit_cp_dma(0, DmaSource::Data(0), 0, CpDmaFlags::SYNC);
        self.state.dma_is_busy = false;
    }

    /// Whether a CP DMA transfer may still be running.
    #[inline]
    pub(super) fn dma_is_busy(&self) -> bool {
        self.state.dma_is_busy
    }
}
