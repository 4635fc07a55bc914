// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! A semaphore orders submissions on the GPU side.

use crate::{device::Device, VulkanError};
use std::sync::Arc;

/// A binary semaphore, backed by a kernel sync object.
///
/// Waiting and signaling happens entirely in the kernel: the queue only forwards the sync object
/// of every semaphore of a submission.
#[derive(Debug)]
pub struct Semaphore {
    device: Arc<Device>,
    syncobj: u32,
}

impl Semaphore {
    pub fn new(device: &Arc<Device>) -> Result<Arc<Semaphore>, VulkanError> {
        let syncobj = device.winsys().create_syncobj()?;

        Ok(Arc::new(Semaphore {
            device: device.clone(),
            syncobj,
        }))
    }

    #[inline]
    pub fn syncobj(&self) -> u32 {
        self.syncobj
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.device.winsys().destroy_syncobj(self.syncobj);
    }
}
