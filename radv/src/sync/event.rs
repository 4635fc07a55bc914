// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! An event is a flag in GPU memory that both the host and command buffers can set and wait on.

use crate::{
    device::Device,
    winsys::{Bo, BoDomain, BoFlags},
    Validated, VulkanError,
};
use std::sync::Arc;

/// Value of a set event.
pub(crate) const EVENT_SET: u32 = 1;
/// Value of a reset event.
pub(crate) const EVENT_RESET: u32 = 0;

/// A 64-bit flag in host-visible memory.
#[derive(Debug)]
pub struct Event {
    device: Arc<Device>,
    bo: Arc<Bo>,
}

impl Event {
    /// Creates a new event in the reset state.
    pub fn new(device: &Arc<Device>) -> Result<Arc<Event>, Validated<VulkanError>> {
        let winsys = device.winsys();
        let bo = winsys.buffer_create(
            8,
            8,
            BoDomain::Gtt,
            BoFlags::CPU_ACCESS | BoFlags::NO_INTERPROCESS_SHARING,
        )?;

        if let Err(err) = winsys.buffer_map(&bo) {
            winsys.buffer_destroy(&bo);
            return Err(err.into());
        }

        if device.use_global_bo_list() {
            device.add_global_bo(&bo);
        }

        let event = Event {
            device: device.clone(),
            bo,
        };
        event.write(EVENT_RESET)?;

        Ok(Arc::new(event))
    }

    #[inline]
    pub fn bo(&self) -> &Arc<Bo> {
        &self.bo
    }

    /// Returns the GPU address of the flag.
    #[inline]
    pub fn va(&self) -> u64 {
        self.bo.va()
    }

    /// Returns whether the event is set, as last written by the host or the GPU.
    pub fn is_set(&self) -> Result<bool, VulkanError> {
        let bytes = self.bo.read(0, 4)?;

        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == EVENT_SET)
    }

    /// Sets the event from the host.
    #[inline]
    pub fn set(&self) -> Result<(), VulkanError> {
        self.write(EVENT_SET)
    }

    /// Resets the event from the host.
    #[inline]
    pub fn reset(&self) -> Result<(), VulkanError> {
        self.write(EVENT_RESET)
    }

    fn write(&self, value: u32) -> Result<(), VulkanError> {
        self.bo.write(0, &u64::from(value).to_le_bytes())
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        if self.device.use_global_bo_list() {
            self.device.remove_global_bo(self.bo.id());
        }

        self.device.winsys().buffer_destroy(&self.bo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_set_reset() {
        let (device, ws) = gfx_device!();
        let event = Event::new(&device).unwrap();
        assert!(!event.is_set().unwrap());

        event.set().unwrap();
        assert!(event.is_set().unwrap());

        event.reset().unwrap();
        assert!(!event.is_set().unwrap());

        let live = ws.live_bo_count();
        drop(event);
        assert_eq!(ws.live_bo_count(), live - 1);
    }
}
