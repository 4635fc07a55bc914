// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The command stream: a growable array of PM4 words, plus the list of buffer objects the words
//! reference.

use crate::{
    registers::*,
    winsys::{Bo, BoId},
    VulkanError,
};
use foldhash::HashMap;
use std::sync::Arc;

/// Largest number of dwords a single stream may hold before it is considered out of memory.
pub const MAX_STREAM_DW: usize = 1 << 26;

/// A sequence of PM4 packets and the buffer objects they reference.
#[derive(Debug, Default)]
pub struct CommandStream {
    buf: Vec<u32>,
    // Buffer objects in registration order, and their position in `buffers`.
    buffers: Vec<Arc<Bo>>,
    buffer_index: HashMap<BoId, usize>,
    max_dw: usize,
}

impl CommandStream {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of dwords written so far.
    #[inline]
    pub fn cdw(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn words(&self) -> &[u32] {
        &self.buf
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the buffer objects referenced by the stream, each exactly once.
    #[inline]
    pub fn buffers(&self) -> &[Arc<Bo>] {
        &self.buffers
    }

    /// Returns the largest size the stream has had since it was created.
    #[inline]
    pub fn max_dw(&self) -> usize {
        self.max_dw.max(self.buf.len())
    }

    /// Makes room for `dw` more dwords.
    pub fn check_space(&mut self, dw: usize) -> Result<(), VulkanError> {
        let needed = self.buf.len() + dw;

        if needed > MAX_STREAM_DW {
            return Err(VulkanError::OutOfHostMemory);
        }

        self.buf.reserve(dw);
        self.max_dw = self.max_dw.max(needed);

        Ok(())
    }

    /// Clears the words and the buffer registry, keeping the allocations.
    pub fn reset(&mut self) {
        self.max_dw = self.max_dw();
        self.buf.clear();
        self.buffers.clear();
        self.buffer_index.clear();
    }

    #[inline]
    pub fn emit(&mut self, word: u32) {
        self.buf.push(word);
    }

    #[inline]
    pub fn emit_array(&mut self, words: &[u32]) {
        self.buf.extend_from_slice(words);
    }

    /// Emits a 64-bit address as two dwords, low half first.
    #[inline]
    pub fn emit_va(&mut self, va: u64) {
        self.buf.push(va as u32);
        self.buf.push((va >> 32) as u32);
    }

    /// Overwrites a dword that was already emitted.
    #[inline]
    pub fn patch(&mut self, index: usize, word: u32) {
        self.buf[index] = word;
    }

    /// Emits a type 3 packet header with `count + 1` payload dwords to follow.
    #[inline]
    pub fn pkt3(&mut self, opcode: u32, count: u32) {
        self.emit(pkt3(opcode, count, false));
    }

    /// Registers a buffer object so that it is resident when the stream executes.
    pub fn add_buffer(&mut self, bo: &Arc<Bo>) {
        if self.buffer_index.contains_key(&bo.id()) {
            return;
        }

        self.buffer_index.insert(bo.id(), self.buffers.len());
        self.buffers.push(bo.clone());
    }

    /// Returns whether a buffer object has been registered.
    #[inline]
    pub fn has_buffer(&self, id: BoId) -> bool {
        self.buffer_index.contains_key(&id)
    }

    /// Appends the words and the buffer objects of `other`.
    pub fn execute_secondary(&mut self, other: &CommandStream) {
        self.emit_array(&other.buf);

        for bo in &other.buffers {
            self.add_buffer(bo);
        }
    }

    pub fn set_config_reg_seq(&mut self, reg: u32, num: u32) {
        debug_assert!((SI_CONFIG_REG_OFFSET..SI_CONFIG_REG_END).contains(&reg));
        self.pkt3(PKT3_SET_CONFIG_REG, num);
        self.emit((reg - SI_CONFIG_REG_OFFSET) >> 2);
    }

    pub fn set_config_reg(&mut self, reg: u32, value: u32) {
        self.set_config_reg_seq(reg, 1);
        self.emit(value);
    }

    pub fn set_context_reg_seq(&mut self, reg: u32, num: u32) {
        debug_assert!((SI_CONTEXT_REG_OFFSET..SI_CONTEXT_REG_END).contains(&reg));
        self.pkt3(PKT3_SET_CONTEXT_REG, num);
        self.emit((reg - SI_CONTEXT_REG_OFFSET) >> 2);
    }

    pub fn set_context_reg(&mut self, reg: u32, value: u32) {
        self.set_context_reg_seq(reg, 1);
        self.emit(value);
    }

    pub fn set_context_reg_idx(&mut self, reg: u32, idx: u32, value: u32) {
        debug_assert!((SI_CONTEXT_REG_OFFSET..SI_CONTEXT_REG_END).contains(&reg));
        self.pkt3(PKT3_SET_CONTEXT_REG, 1);
        self.emit(((reg - SI_CONTEXT_REG_OFFSET) >> 2) | (idx << 28));
        self.emit(value);
    }

    pub fn set_sh_reg_seq(&mut self, reg: u32, num: u32) {
        debug_assert!((SI_SH_REG_OFFSET..SI_SH_REG_END).contains(&reg));
        self.pkt3(PKT3_SET_SH_REG, num);
        self.emit((reg - SI_SH_REG_OFFSET) >> 2);
    }

    pub fn set_sh_reg(&mut self, reg: u32, value: u32) {
        self.set_sh_reg_seq(reg, 1);
        self.emit(value);
    }

    pub fn set_uconfig_reg_seq(&mut self, reg: u32, num: u32) {
        debug_assert!((CIK_UCONFIG_REG_OFFSET..CIK_UCONFIG_REG_END).contains(&reg));
        self.pkt3(PKT3_SET_UCONFIG_REG, num);
        self.emit((reg - CIK_UCONFIG_REG_OFFSET) >> 2);
    }

    pub fn set_uconfig_reg(&mut self, reg: u32, value: u32) {
        self.set_uconfig_reg_seq(reg, 1);
        self.emit(value);
    }

    pub fn set_uconfig_reg_idx(&mut self, reg: u32, idx: u32, value: u32) {
        debug_assert!((CIK_UCONFIG_REG_OFFSET..CIK_UCONFIG_REG_END).contains(&reg));
        self.pkt3(PKT3_SET_UCONFIG_REG, 1);
        self.emit(((reg - CIK_UCONFIG_REG_OFFSET) >> 2) | (idx << 28));
        self.emit(value);
    }

    /// Writes `value` to a register of whichever class contains `reg`.
    pub fn set_reg(&mut self, reg: u32, value: u32) {
        if reg >= CIK_UCONFIG_REG_OFFSET {
            self.set_uconfig_reg(reg, value);
        } else if reg >= SI_CONTEXT_REG_OFFSET {
            self.set_context_reg(reg, value);
        } else if reg >= SI_SH_REG_OFFSET {
            self.set_sh_reg(reg, value);
        } else {
            self.set_config_reg(reg, value);
        }
    }

    /// Returns an iterator over the packets of the stream.
    #[inline]
    pub fn packets(&self) -> Packets<'_> {
        Packets { words: &self.buf }
    }
}

/// A decoded view of one type 3 packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Packet<'a> {
    pub opcode: u32,
    pub predicate: bool,
    pub body: &'a [u32],
}

impl Packet<'_> {
    /// For register write packets, returns the byte offset of the first register written.
    pub fn register(&self) -> Option<u32> {
        let base = match self.opcode {
            PKT3_SET_CONFIG_REG => SI_CONFIG_REG_OFFSET,
            PKT3_SET_CONTEXT_REG => SI_CONTEXT_REG_OFFSET,
            PKT3_SET_SH_REG => SI_SH_REG_OFFSET,
            PKT3_SET_UCONFIG_REG => CIK_UCONFIG_REG_OFFSET,
            _ => return None,
        };

        self.body.first().map(|&w| base + ((w & 0xffff) << 2))
    }

    /// For register write packets, returns the values written.
    pub fn values(&self) -> &[u32] {
        self.body.get(1..).unwrap_or(&[])
    }
}

/// Iterator over the packets of a stream. Stops at the first malformed header.
#[derive(Clone, Debug)]
pub struct Packets<'a> {
    words: &'a [u32],
}

impl<'a> Iterator for Packets<'a> {
    type Item = Packet<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&header, rest) = self.words.split_first()?;

        if header >> 30 != PKT_TYPE_3 {
            self.words = &[];
            return None;
        }

        let len = pkt3_payload_len(header) as usize;

        if rest.len() < len {
            self.words = &[];
            return None;
        }

        let (body, rest) = rest.split_at(len);
        self.words = rest;

        Some(Packet {
            opcode: pkt3_opcode(header),
            predicate: header & 1 != 0,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::winsys::{BoDomain, BoFlags, NullWinsys, Winsys};

    #[test]
    fn register_packets() {
        let mut cs = CommandStream::new();
        cs.set_context_reg(R_028A08_PA_SU_LINE_CNTL, 8);
        cs.set_sh_reg_seq(R_00B130_SPI_SHADER_USER_DATA_VS_0, 2);
        cs.emit_array(&[1, 2]);
        cs.set_uconfig_reg_idx(R_03090C_VGT_INDEX_TYPE, 2, 1);

        assert_eq!(
            &cs.words()[..3],
            [pkt3(PKT3_SET_CONTEXT_REG, 1, false), 0x282, 8],
        );

        let packets: Vec<_> = cs.packets().collect();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].register(), Some(R_028A08_PA_SU_LINE_CNTL));
        assert_eq!(packets[1].register(), Some(R_00B130_SPI_SHADER_USER_DATA_VS_0));
        assert_eq!(packets[1].values(), [1, 2]);
        assert_eq!(packets[2].body[0] >> 28, 2);
        assert_eq!(packets[2].register(), Some(R_03090C_VGT_INDEX_TYPE));
    }

    #[test]
    fn buffer_registry_dedup() {
        let ws = NullWinsys::new();
        let a = ws.buffer_create(64, 64, BoDomain::Gtt, BoFlags::empty()).unwrap();
        let b = ws.buffer_create(64, 64, BoDomain::Gtt, BoFlags::empty()).unwrap();

        let mut cs = CommandStream::new();
        cs.add_buffer(&a);
        cs.add_buffer(&b);
        cs.add_buffer(&a);
        assert_eq!(cs.buffers().len(), 2);
        assert!(cs.has_buffer(b.id()));

        cs.emit(0);
        cs.reset();
        assert!(cs.is_empty());
        assert!(cs.buffers().is_empty());
        assert_eq!(cs.max_dw(), 1);
    }

    #[test]
    fn secondary_merge() {
        let ws = NullWinsys::new();
        let a = ws.buffer_create(64, 64, BoDomain::Gtt, BoFlags::empty()).unwrap();

        let mut primary = CommandStream::new();
        primary.add_buffer(&a);
        primary.emit(1);

        let mut secondary = CommandStream::new();
        secondary.add_buffer(&a);
        secondary.emit_array(&[2, 3]);

        primary.execute_secondary(&secondary);
        assert_eq!(primary.words(), [1, 2, 3]);
        assert_eq!(primary.buffers().len(), 1);
    }

    #[test]
    fn space_limit() {
        let mut cs = CommandStream::new();
        assert!(cs.check_space(16).is_ok());
        assert_eq!(
            cs.check_space(MAX_STREAM_DW + 1),
            Err(VulkanError::OutOfHostMemory),
        );
    }
}
