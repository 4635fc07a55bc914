// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Transform feedback.
//!
//! The shaders write the streamout buffers through descriptors. The VGT only counts primitives,
//! and keeps the number of bytes written to each buffer in its `BUFFER_FILLED_SIZE` counters.
//! Beginning and ending transform feedback loads and stores these counters from the optional
//! counter buffers.

use super::{CommandBuffer, DirtyState};
use crate::{
    buffer::{Buffer, BufferUsage},
    pipeline::{PipelineBindPoint, MAX_SO_BUFFERS},
    registers::*,
    DeviceSize, ValidationError,
};
use smallvec::SmallVec;
use std::sync::Arc;

/// A transform feedback buffer binding: the buffer, the offset and the size of the range, or
/// `None` for the rest of the buffer.
pub type TransformFeedbackBinding = (Arc<Buffer>, DeviceSize, Option<DeviceSize>);

/// A counter buffer and the offset of the counter in it.
pub type CounterBuffer = Option<(Arc<Buffer>, DeviceSize)>;

impl CommandBuffer {
    /// Binds transform feedback buffers starting at binding `first_binding`.
    pub fn bind_transform_feedback_buffers(
        &mut self,
        first_binding: u32,
        bindings: impl IntoIterator<Item = TransformFeedbackBinding>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        let bindings: SmallVec<[_; MAX_SO_BUFFERS]> = bindings.into_iter().collect();
        self.validate_bind_transform_feedback_buffers(first_binding, &bindings)?;

        let mut enabled_mask = 0;

        for (i, (buffer, offset, size)) in bindings.into_iter().enumerate() {
            let index = first_binding as usize + i;
            let binding = &mut self.streamout_bindings[index];

            binding.size = size.unwrap_or(buffer.size() - offset);
            binding.offset = offset;
            self.cs.add_buffer(buffer.bo());
            binding.buffer = Some(buffer);

            enabled_mask |= 1 << index;
        }

        self.state.streamout.enabled_mask |= enabled_mask;
        self.state.dirty |= DirtyState::STREAMOUT_BUFFER;

        Ok(self)
    }

    fn validate_bind_transform_feedback_buffers(
        &self,
        first_binding: u32,
        bindings: &[TransformFeedbackBinding],
    ) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;
        self.validate_queue_family(PipelineBindPoint::Graphics)?;

        if self.state.streamout.streamout_enabled {
            return Err(ValidationError::new(
                "self",
                "transform feedback is active",
            ));
        }

        if first_binding as usize + bindings.len() > MAX_SO_BUFFERS {
            return Err(ValidationError::new(
                "first_binding + bindings.len()",
                format!("is greater than {}", MAX_SO_BUFFERS),
            ));
        }

        for (index, (buffer, offset, size)) in bindings.iter().enumerate() {
            if !buffer
                .usage()
                .intersects(BufferUsage::TRANSFORM_FEEDBACK_BUFFER)
            {
                return Err(ValidationError::new(
                    format!("bindings[{}].0.usage()", index),
                    "does not contain `BufferUsage::TRANSFORM_FEEDBACK_BUFFER`",
                ));
            }

            if *offset >= buffer.size() || offset % 4 != 0 {
                return Err(ValidationError::new(
                    format!("bindings[{}].1", index),
                    "is not a multiple of 4, or is not less than the size of the buffer",
                ));
            }

            if size.is_some_and(|size| offset + size > buffer.size()) {
                return Err(ValidationError::new(
                    format!("bindings[{}].2", index),
                    "extends past the end of the buffer",
                ));
            }
        }

        Ok(())
    }

    /// Starts writing the bound transform feedback buffers.
    ///
    /// `counter_buffers[i]` holds the counter of binding `first_counter_buffer + i`. Buffers
    /// without a counter are written from their start.
    pub fn begin_transform_feedback(
        &mut self,
        first_counter_buffer: u32,
        counter_buffers: &[CounterBuffer],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_transform_feedback(first_counter_buffer, counter_buffers, false)?;

        if !self.check_space(16 + MAX_SO_BUFFERS * 16) {
            return Ok(self);
        }

        self.flush_vgt_streamout();

        for i in enabled_buffers(self.state.streamout.enabled_mask) {
            let binding = &self.streamout_bindings[i];
            let size_in_dw = (binding.size >> 2) as u32;

            self.cs.set_context_reg_seq(
                R_028AD0_VGT_STRMOUT_BUFFER_SIZE_0 + STRMOUT_BUFFER_REG_STRIDE * i as u32,
                2,
            );
            self.cs.emit(size_in_dw);
            self.cs.emit(self.state.streamout.stride_in_dw[i]);

            let control = strmout_select_buffer(i as u32) | strmout_data_type(1);

            match counter(first_counter_buffer, counter_buffers, i) {
                Some((buffer, offset)) => {
                    // Append to what a previous pass wrote.
                    let va = buffer.va() + offset;

                    self.cs.pkt3(PKT3_STRMOUT_BUFFER_UPDATE, 4);
                    self.cs
                        .emit(control | strmout_offset_source(STRMOUT_OFFSET_FROM_MEM));
                    self.cs.emit(0);
                    self.cs.emit(0);
                    self.cs.emit_va(va);
                    self.cs.add_buffer(buffer.bo());
                }
                None => {
                    self.cs.pkt3(PKT3_STRMOUT_BUFFER_UPDATE, 4);
                    self.cs
                        .emit(control | strmout_offset_source(STRMOUT_OFFSET_FROM_PACKET));
                    self.cs.emit(0);
                    self.cs.emit(0);
                    self.cs.emit(0);
                    self.cs.emit(0);
                }
            }
        }

        self.set_streamout_enable(true);

        Ok(self)
    }

    /// Stops writing the transform feedback buffers, storing the number of bytes written to each
    /// buffer into its counter.
    pub fn end_transform_feedback(
        &mut self,
        first_counter_buffer: u32,
        counter_buffers: &[CounterBuffer],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_transform_feedback(first_counter_buffer, counter_buffers, true)?;

        if !self.check_space(16 + MAX_SO_BUFFERS * 12) {
            return Ok(self);
        }

        self.flush_vgt_streamout();

        for i in enabled_buffers(self.state.streamout.enabled_mask) {
            if let Some((buffer, offset)) = counter(first_counter_buffer, counter_buffers, i) {
                let va = buffer.va() + offset;

                self.cs.pkt3(PKT3_STRMOUT_BUFFER_UPDATE, 4);
                self.cs.emit(
                    strmout_select_buffer(i as u32)
                        | strmout_data_type(1)
                        | strmout_offset_source(STRMOUT_OFFSET_NONE)
                        | strmout_store_buffer_filled_size(true),
                );
                self.cs.emit_va(va);
                self.cs.emit(0);
                self.cs.emit(0);
                self.cs.add_buffer(buffer.bo());
            }

            // A zero size deactivates the buffer.
            self.cs.set_context_reg(
                R_028AD0_VGT_STRMOUT_BUFFER_SIZE_0 + STRMOUT_BUFFER_REG_STRIDE * i as u32,
                0,
            );
        }

        self.set_streamout_enable(false);

        Ok(self)
    }

    fn validate_transform_feedback(
        &self,
        first_counter_buffer: u32,
        counter_buffers: &[CounterBuffer],
        ending: bool,
    ) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;
        self.validate_queue_family(PipelineBindPoint::Graphics)?;

        if self.state.streamout.streamout_enabled != ending {
            return Err(ValidationError::new(
                "self",
                if ending {
                    "transform feedback is not active"
                } else {
                    "transform feedback is already active"
                },
            ));
        }

        if first_counter_buffer as usize + counter_buffers.len() > MAX_SO_BUFFERS {
            return Err(ValidationError::new(
                "first_counter_buffer + counter_buffers.len()",
                format!("is greater than {}", MAX_SO_BUFFERS),
            ));
        }

        for (index, (buffer, offset)) in counter_buffers.iter().enumerate().filter_map(|(i, c)| {
            c.as_ref().map(|c| (i, c))
        }) {
            if !buffer
                .usage()
                .intersects(BufferUsage::TRANSFORM_FEEDBACK_COUNTER_BUFFER)
            {
                return Err(ValidationError::new(
                    format!("counter_buffers[{}].0.usage()", index),
                    "does not contain `BufferUsage::TRANSFORM_FEEDBACK_COUNTER_BUFFER`",
                ));
            }

            if offset % 4 != 0 || offset + 4 > buffer.size() {
                return Err(ValidationError::new(
                    format!("counter_buffers[{}].1", index),
                    "is not a multiple of 4, or is out of the range of the buffer",
                ));
            }
        }

        Ok(())
    }

    /// Waits until the VGT has written its streamout counters to memory.
    fn flush_vgt_streamout(&mut self) {
        let reg_strmout_cntl = self.device.layout().cp_strmout_cntl;

        reg_strmout_cntl.emit(&mut self.cs, 0);

        self.cs.pkt3(PKT3_EVENT_WRITE, 0);
        self.cs
            .emit(event_type(V_028A90_SO_VGTSTREAMOUT_FLUSH) | event_index(0));

        self.cs.pkt3(PKT3_WAIT_REG_MEM, 5);
        // Compare a register, not memory.
        self.cs.emit(WAIT_REG_MEM_EQUAL);
        self.cs.emit(reg_strmout_cntl.reg() >> 2);
        self.cs.emit(0);
        self.cs.emit(S_008490_OFFSET_UPDATE_DONE);
        self.cs.emit(S_008490_OFFSET_UPDATE_DONE);
        // Poll interval.
        self.cs.emit(4);
    }

    fn set_streamout_enable(&mut self, enable: bool) {
        let streamout = &mut self.state.streamout;
        let old_enabled = streamout.streamout_enabled;
        let old_hw_enabled_mask = streamout.hw_enabled_mask;

        streamout.streamout_enabled = enable;
        streamout.hw_enabled_mask = streamout.enabled_mask
            | (streamout.enabled_mask << 4)
            | (streamout.enabled_mask << 8)
            | (streamout.enabled_mask << 12);

        if old_enabled != streamout.streamout_enabled
            || old_hw_enabled_mask != streamout.hw_enabled_mask
        {
            self.emit_streamout_enable();
        }

        // The buffer sizes are context registers.
        self.state.context_roll_without_scissor_emitted = true;
    }

    fn emit_streamout_enable(&mut self) {
        let streamout = self.state.streamout;
        let enabled = streamout.streamout_enabled;

        self.cs.set_context_reg_seq(R_028B94_VGT_STRMOUT_CONFIG, 2);
        self.cs.emit(
            (0..4).fold(s_028b94_rast_stream(0), |config, stream| {
                config | s_028b94_streamout_en(stream, enabled)
            }),
        );
        self.cs.emit(s_028b98_stream_0_buffer_en(
            streamout.hw_enabled_mask & streamout.enabled_stream_buffers_mask,
        ));
    }
}

/// Iterates over the bound buffers.
fn enabled_buffers(mask: u32) -> impl Iterator<Item = usize> {
    (0..MAX_SO_BUFFERS).filter(move |i| mask & (1 << i) != 0)
}

fn counter(
    first_counter_buffer: u32,
    counter_buffers: &[CounterBuffer],
    binding: usize,
) -> Option<(Arc<Buffer>, DeviceSize)> {
    let index = binding.checked_sub(first_counter_buffer as usize)?;
    counter_buffers.get(index)?.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::BufferCreateInfo,
        command_buffer::tests::recording,
        device::{Device, QueueFamily},
        tests::{count_opcode, count_reg_writes, events, graphics_pipeline, packets},
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

    #[test]
    fn bind_enables_buffers() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        let a = buffer(&device, 256, BufferUsage::TRANSFORM_FEEDBACK_BUFFER);
        let b = buffer(&device, 256, BufferUsage::TRANSFORM_FEEDBACK_BUFFER);

        cb.bind_transform_feedback_buffers(1, [(a, 64, None), (b.clone(), 0, Some(128))])
            .unwrap();

        assert_eq!(cb.state.streamout.enabled_mask, 0b110);
        assert_eq!(cb.streamout_bindings[1].size, 192);
        assert_eq!(cb.streamout_bindings[2].size, 128);
        assert!(cb.dirty_state().intersects(DirtyState::STREAMOUT_BUFFER));
        assert!(cb.cs().has_buffer(b.bo().id()));

        let vertex = buffer(&device, 256, BufferUsage::VERTEX_BUFFER);
        assert!(cb
            .bind_transform_feedback_buffers(0, [(vertex, 0, None)])
            .is_err());
        assert!(cb
            .bind_transform_feedback_buffers(3, [(b.clone(), 0, None), (b, 0, None)])
            .is_err());
    }

    #[test]
    fn begin_end_with_counters() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        let mut pipeline_strides = [0; MAX_SO_BUFFERS];
        pipeline_strides[0] = 16;
        cb.bind_pipeline_graphics(graphics_pipeline(&device, |info| {
            info.streamout_strides = pipeline_strides;
        }))
        .unwrap();

        let so = buffer(&device, 1024, BufferUsage::TRANSFORM_FEEDBACK_BUFFER);
        let counters = buffer(
            &device,
            16,
            BufferUsage::TRANSFORM_FEEDBACK_COUNTER_BUFFER,
        );
        cb.bind_transform_feedback_buffers(0, [(so, 0, None)]).unwrap();

        assert!(cb.end_transform_feedback(0, &[]).is_err());
        cb.begin_transform_feedback(0, &[Some((counters.clone(), 4))])
            .unwrap();
        assert!(cb.begin_transform_feedback(0, &[]).is_err());

        let words = cb.cs().words().to_vec();
        assert_eq!(events(&words), [V_028A90_SO_VGTSTREAMOUT_FLUSH]);
        assert_eq!(count_opcode(&words, PKT3_WAIT_REG_MEM), 1);

        let sizes = packets(&words)
            .into_iter()
            .find(|p| p.register() == Some(R_028AD0_VGT_STRMOUT_BUFFER_SIZE_0))
            .unwrap();
        assert_eq!(sizes.values(), &[256, 4]);

        let update = packets(&words)
            .into_iter()
            .find(|p| p.opcode == PKT3_STRMOUT_BUFFER_UPDATE)
            .unwrap();
        let va = counters.va() + 4;
        assert_eq!(
            update.body[0],
            strmout_data_type(1) | strmout_offset_source(STRMOUT_OFFSET_FROM_MEM),
        );
        assert_eq!(&update.body[3..5], &[va as u32, (va >> 32) as u32]);

        let config = packets(&words)
            .into_iter()
            .find(|p| p.register() == Some(R_028B94_VGT_STRMOUT_CONFIG))
            .unwrap();
        assert_eq!(config.values()[0] & 0xf, 0xf);
        assert_eq!(config.values()[1], 1);
        assert!(cb.state.streamout.streamout_enabled);

        let before = cb.cs().cdw();
        cb.end_transform_feedback(0, &[Some((counters.clone(), 4))])
            .unwrap();
        let words = &cb.cs().words()[before..];

        let update = packets(words)
            .into_iter()
            .find(|p| p.opcode == PKT3_STRMOUT_BUFFER_UPDATE)
            .unwrap();
        assert_ne!(update.body[0] & strmout_store_buffer_filled_size(true), 0);
        assert_eq!(&update.body[1..3], &[va as u32, (va >> 32) as u32]);
        assert_eq!(count_reg_writes(words, R_028AD0_VGT_STRMOUT_BUFFER_SIZE_0), 1);
        assert!(!cb.state.streamout.streamout_enabled);
    }

    #[test]
    fn begin_without_counter_starts_at_zero() {
        let (device, _) = gfx_device!(Tahiti);
        let mut cb = recording(&device, QueueFamily::General);
        let so = buffer(&device, 64, BufferUsage::TRANSFORM_FEEDBACK_BUFFER);
        cb.bind_transform_feedback_buffers(2, [(so, 0, None)]).unwrap();
        cb.begin_transform_feedback(0, &[]).unwrap();

        let words = cb.cs().words();
        // SI keeps CP_STRMOUT_CNTL in the config space.
        assert_eq!(count_reg_writes(words, R_0084FC_CP_STRMOUT_CNTL), 1);

        let update = packets(words)
            .into_iter()
            .find(|p| p.opcode == PKT3_STRMOUT_BUFFER_UPDATE)
            .unwrap();
        assert_eq!(
            update.body,
            &[
                strmout_select_buffer(2)
                    | strmout_data_type(1)
                    | strmout_offset_source(STRMOUT_OFFSET_FROM_PACKET),
                0,
                0,
                0,
                0,
            ],
        );
    }

    #[test]
    fn counter_lookup() {
        let (device, _) = gfx_device!();
        let counters = buffer(&device, 16, BufferUsage::TRANSFORM_FEEDBACK_COUNTER_BUFFER);
        let list = [None, Some((counters, 8))];

        assert!(counter(1, &list, 0).is_none());
        assert!(counter(1, &list, 1).is_none());
        assert_eq!(counter(1, &list, 2).map(|(_, offset)| offset), Some(8));
        assert!(counter(1, &list, 3).is_none());
    }
}
