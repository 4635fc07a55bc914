// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Synchronization primitives and the flags describing memory dependencies.
//!
//! Vulkan describes a dependency with pipeline stages and access types. The GPU knows nothing
//! about either: it only has caches that must be written back or invalidated, and pipeline
//! engines that can be waited on. [`FlushBits`] is the hardware-side vocabulary, and the command
//! buffer translates the former into the latter when a barrier is recorded.

pub use self::{
    event::Event,
    fence::{Fence, FenceCreateInfo},
    semaphore::Semaphore,
};
pub(crate) use self::event::{EVENT_RESET, EVENT_SET};
use crate::{
    buffer::Buffer,
    image::{Image, ImageLayout, ImageSubresourceRange},
    macros::{driver_bitflags, vulkan_bitflags},
    DeviceSize,
};
use smallvec::SmallVec;
use std::sync::Arc;

mod event;
mod fence;
mod semaphore;

vulkan_bitflags! {
    /// A set of stages in a device queue.
    PipelineStages = PipelineStageFlags(u32);

    TOP_OF_PIPE = TOP_OF_PIPE,
    DRAW_INDIRECT = DRAW_INDIRECT,
    VERTEX_INPUT = VERTEX_INPUT,
    VERTEX_SHADER = VERTEX_SHADER,
    TESSELLATION_CONTROL_SHADER = TESSELLATION_CONTROL_SHADER,
    TESSELLATION_EVALUATION_SHADER = TESSELLATION_EVALUATION_SHADER,
    GEOMETRY_SHADER = GEOMETRY_SHADER,
    FRAGMENT_SHADER = FRAGMENT_SHADER,
    EARLY_FRAGMENT_TESTS = EARLY_FRAGMENT_TESTS,
    LATE_FRAGMENT_TESTS = LATE_FRAGMENT_TESTS,
    COLOR_ATTACHMENT_OUTPUT = COLOR_ATTACHMENT_OUTPUT,
    COMPUTE_SHADER = COMPUTE_SHADER,
    TRANSFER = TRANSFER,
    BOTTOM_OF_PIPE = BOTTOM_OF_PIPE,
    HOST = HOST,
    ALL_GRAPHICS = ALL_GRAPHICS,
    ALL_COMMANDS = ALL_COMMANDS,
    TRANSFORM_FEEDBACK = TRANSFORM_FEEDBACK_EXT,
}

vulkan_bitflags! {
    /// A set of memory access types that are included in a memory dependency.
    AccessFlags = AccessFlags(u32);

    INDIRECT_COMMAND_READ = INDIRECT_COMMAND_READ,
    INDEX_READ = INDEX_READ,
    VERTEX_ATTRIBUTE_READ = VERTEX_ATTRIBUTE_READ,
    UNIFORM_READ = UNIFORM_READ,
    INPUT_ATTACHMENT_READ = INPUT_ATTACHMENT_READ,
    SHADER_READ = SHADER_READ,
    SHADER_WRITE = SHADER_WRITE,
    COLOR_ATTACHMENT_READ = COLOR_ATTACHMENT_READ,
    COLOR_ATTACHMENT_WRITE = COLOR_ATTACHMENT_WRITE,
    DEPTH_STENCIL_ATTACHMENT_READ = DEPTH_STENCIL_ATTACHMENT_READ,
    DEPTH_STENCIL_ATTACHMENT_WRITE = DEPTH_STENCIL_ATTACHMENT_WRITE,
    TRANSFER_READ = TRANSFER_READ,
    TRANSFER_WRITE = TRANSFER_WRITE,
    HOST_READ = HOST_READ,
    HOST_WRITE = HOST_WRITE,
    MEMORY_READ = MEMORY_READ,
    MEMORY_WRITE = MEMORY_WRITE,
    TRANSFORM_FEEDBACK_WRITE = TRANSFORM_FEEDBACK_WRITE_EXT,
    TRANSFORM_FEEDBACK_COUNTER_READ = TRANSFORM_FEEDBACK_COUNTER_READ_EXT,
    TRANSFORM_FEEDBACK_COUNTER_WRITE = TRANSFORM_FEEDBACK_COUNTER_WRITE_EXT,
}

driver_bitflags! {
    /// Cache operations and pipeline waits that the command processor must perform.
    ///
    /// Barriers accumulate these in the command buffer; they are turned into packets right before
    /// the next operation that depends on them.
    FlushBits = u32;

    /// Invalidate the shader instruction cache.
    INV_ICACHE = 1 << 0,
    /// Invalidate the scalar (constant) L1 cache.
    INV_SMEM_L1 = 1 << 1,
    /// Invalidate the vector L1 cache.
    INV_VMEM_L1 = 1 << 2,
    /// Write back and invalidate the L2 cache.
    INV_GLOBAL_L2 = 1 << 3,
    /// Write back the L2 cache without invalidating it.
    WRITEBACK_GLOBAL_L2 = 1 << 4,
    /// Flush and invalidate the color metadata caches (CMASK, DCC).
    FLUSH_AND_INV_CB_META = 1 << 5,
    /// Flush and invalidate the depth metadata cache (HTILE).
    FLUSH_AND_INV_DB_META = 1 << 6,
    /// Flush and invalidate the depth/stencil data cache.
    FLUSH_AND_INV_DB = 1 << 7,
    /// Flush and invalidate the color data cache.
    FLUSH_AND_INV_CB = 1 << 8,
    /// Wait until all pixel shader work has finished.
    PS_PARTIAL_FLUSH = 1 << 9,
    /// Wait until all vertex shader work has finished.
    VS_PARTIAL_FLUSH = 1 << 10,
    /// Wait until all compute work has finished.
    CS_PARTIAL_FLUSH = 1 << 11,
    /// Synchronize the vertex grouper state.
    VGT_FLUSH = 1 << 12,
    /// Start the pipeline statistics counters.
    START_PIPELINE_STATS = 1 << 13,
    /// Stop the pipeline statistics counters.
    STOP_PIPELINE_STATS = 1 << 14,
    /// Synchronize the streamout state with the vertex grouper.
    VGT_STREAMOUT_SYNC = 1 << 15,
}

impl FlushBits {
    /// The bits that make the GPU wait for previous work to go idle.
    ///
    /// A draw or dispatch whose pending flush bits intersect this mask uses the ordering that
    /// emits state before the wait.
    pub const WAIT_MASK: Self = Self(
        Self::FLUSH_AND_INV_CB.0
            | Self::FLUSH_AND_INV_DB.0
            | Self::PS_PARTIAL_FLUSH.0
            | Self::CS_PARTIAL_FLUSH.0,
    );

    /// The bits that a compute queue cannot execute.
    pub const GRAPHICS_ONLY: Self = Self(
        Self::FLUSH_AND_INV_CB.0
            | Self::FLUSH_AND_INV_CB_META.0
            | Self::FLUSH_AND_INV_DB.0
            | Self::FLUSH_AND_INV_DB_META.0
            | Self::PS_PARTIAL_FLUSH.0
            | Self::VS_PARTIAL_FLUSH.0
            | Self::VGT_FLUSH.0,
    );
}

/// A queue family index that means "the queue family of the command buffer".
pub const QUEUE_FAMILY_IGNORED: u32 = ash::vk::QUEUE_FAMILY_IGNORED;
/// A queue family index that denotes an external owner of the resource.
pub const QUEUE_FAMILY_EXTERNAL: u32 = ash::vk::QUEUE_FAMILY_EXTERNAL;
/// A queue family index that denotes a foreign owner of the resource.
pub const QUEUE_FAMILY_FOREIGN: u32 = ash::vk::QUEUE_FAMILY_FOREIGN_EXT;

/// A memory barrier that applies to all resources.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

/// A memory barrier that applies to a range of a buffer.
#[derive(Clone, Debug)]
pub struct BufferMemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
    pub buffer: Arc<Buffer>,
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

impl BufferMemoryBarrier {
    /// Returns a barrier covering the whole buffer, without queue family transfer.
    #[inline]
    pub fn buffer(buffer: Arc<Buffer>) -> Self {
        let size = buffer.size();

        Self {
            src_access: AccessFlags::empty(),
            dst_access: AccessFlags::empty(),
            src_queue_family_index: QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: QUEUE_FAMILY_IGNORED,
            buffer,
            offset: 0,
            size,
        }
    }
}

/// A memory barrier that applies to a subresource range of an image, optionally transitioning
/// its layout.
#[derive(Clone, Debug)]
pub struct ImageMemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
    pub image: Arc<Image>,
    pub subresource_range: ImageSubresourceRange,
}

impl ImageMemoryBarrier {
    /// Returns a barrier covering the whole image, without layout transition or queue family
    /// transfer.
    #[inline]
    pub fn image(image: Arc<Image>) -> Self {
        let subresource_range = image.subresource_range();

        Self {
            src_access: AccessFlags::empty(),
            dst_access: AccessFlags::empty(),
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::Undefined,
            src_queue_family_index: QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: QUEUE_FAMILY_IGNORED,
            image,
            subresource_range,
        }
    }
}

/// The full description of a pipeline barrier.
#[derive(Clone, Debug, Default)]
pub struct DependencyInfo {
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub memory_barriers: SmallVec<[MemoryBarrier; 2]>,
    pub buffer_memory_barriers: SmallVec<[BufferMemoryBarrier; 8]>,
    pub image_memory_barriers: SmallVec<[ImageMemoryBarrier; 8]>,
}

impl DependencyInfo {
    /// Returns whether the dependency contains no barriers at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.memory_barriers.is_empty()
            && self.buffer_memory_barriers.is_empty()
            && self.image_memory_barriers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ash_values() {
        assert_eq!(
            AccessFlags::COLOR_ATTACHMENT_WRITE.bits(),
            ash::vk::AccessFlags::COLOR_ATTACHMENT_WRITE.as_raw(),
        );
        assert_eq!(
            PipelineStages::from(ash::vk::PipelineStageFlags::COMPUTE_SHADER),
            PipelineStages::COMPUTE_SHADER,
        );
    }

    #[test]
    fn flush_bits_iter() {
        let bits = FlushBits::INV_ICACHE | FlushBits::CS_PARTIAL_FLUSH;
        let split: Vec<_> = bits.iter().collect();
        assert_eq!(split, [FlushBits::INV_ICACHE, FlushBits::CS_PARTIAL_FLUSH]);
        assert!(FlushBits::WAIT_MASK.contains(FlushBits::CS_PARTIAL_FLUSH));
        assert!(!FlushBits::WAIT_MASK.intersects(FlushBits::INV_VMEM_L1));
    }
}
