// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! A fence signals the host that a queue submission has completed.

use crate::{device::Device, VulkanError};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Parameters to create a new `Fence`.
#[derive(Clone, Debug, Default)]
pub struct FenceCreateInfo {
    /// Create the fence in the signaled state.
    pub signaled: bool,
}

/// A binary host-visible completion flag, backed by a kernel sync object.
#[derive(Debug)]
pub struct Fence {
    device: Arc<Device>,
    syncobj: u32,
    signaled: AtomicBool,
}

impl Fence {
    pub fn new(device: &Arc<Device>, create_info: FenceCreateInfo) -> Result<Arc<Fence>, VulkanError> {
        let syncobj = device.winsys().create_syncobj()?;

        Ok(Arc::new(Fence {
            device: device.clone(),
            syncobj,
            signaled: AtomicBool::new(create_info.signaled),
        }))
    }

    #[inline]
    pub fn syncobj(&self) -> u32 {
        self.syncobj
    }

    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Puts the fence back into the unsignaled state.
    #[inline]
    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
    }

    /// Called by the winsys once the submission the fence was attached to has retired.
    #[inline]
    pub fn mark_signaled(&self) {
        self.signaled.store(true, Ordering::Release);
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.device.winsys().destroy_syncobj(self.syncobj);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_and_reset() {
        let (device, _) = gfx_device!();
        let fence = Fence::new(&device, FenceCreateInfo::default()).unwrap();
        assert!(!fence.is_signaled());

        fence.mark_signaled();
        assert!(fence.is_signaled());

        fence.reset();
        assert!(!fence.is_signaled());

        let fence = Fence::new(&device, FenceCreateInfo { signaled: true }).unwrap();
        assert!(fence.is_signaled());
    }
}
