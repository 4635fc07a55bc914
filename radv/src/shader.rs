// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Compiled shaders, as the command buffer sees them.
//!
//! The compiler is not part of this crate. What the command buffer needs from a compiled shader
//! is where its code lives (for prefetching), how much scratch memory it uses, and in which user
//! SGPRs it expects each piece of driver-provided data.

use crate::{macros::vulkan_bitflags, winsys::Bo, DeviceSize};
use std::sync::Arc;

/// Maximum number of descriptor sets that can be bound at once.
pub const MAX_SETS: usize = 8;

/// Number of user SGPRs available to a hardware shader stage.
pub const MAX_USER_SGPRS: u32 = 16;

/// A logical shader stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex = 0,
    TessellationControl = 1,
    TessellationEvaluation = 2,
    Geometry = 3,
    Fragment = 4,
    Compute = 5,
}

impl ShaderStage {
    pub const COUNT: usize = 6;

    pub const ALL: [ShaderStage; 6] = [
        ShaderStage::Vertex,
        ShaderStage::TessellationControl,
        ShaderStage::TessellationEvaluation,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
        ShaderStage::Compute,
    ];

    /// The stages of a graphics pipeline.
    pub const GRAPHICS: [ShaderStage; 5] = [
        ShaderStage::Vertex,
        ShaderStage::TessellationControl,
        ShaderStage::TessellationEvaluation,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Returns the matching flag.
    pub fn flag(self) -> ShaderStages {
        match self {
            ShaderStage::Vertex => ShaderStages::VERTEX,
            ShaderStage::TessellationControl => ShaderStages::TESSELLATION_CONTROL,
            ShaderStage::TessellationEvaluation => ShaderStages::TESSELLATION_EVALUATION,
            ShaderStage::Geometry => ShaderStages::GEOMETRY,
            ShaderStage::Fragment => ShaderStages::FRAGMENT,
            ShaderStage::Compute => ShaderStages::COMPUTE,
        }
    }
}

vulkan_bitflags! {
    /// A set of shader stages.
    ShaderStages = ShaderStageFlags(u32);

    VERTEX = VERTEX,
    TESSELLATION_CONTROL = TESSELLATION_CONTROL,
    TESSELLATION_EVALUATION = TESSELLATION_EVALUATION,
    GEOMETRY = GEOMETRY,
    FRAGMENT = FRAGMENT,
    COMPUTE = COMPUTE,
}

impl ShaderStages {
    pub const ALL_GRAPHICS: Self = Self(
        Self::VERTEX.0
            | Self::TESSELLATION_CONTROL.0
            | Self::TESSELLATION_EVALUATION.0
            | Self::GEOMETRY.0
            | Self::FRAGMENT.0,
    );

    /// Iterates over the logical stages in the set.
    pub fn stages(self) -> impl Iterator<Item = ShaderStage> {
        ShaderStage::ALL
            .into_iter()
            .filter(move |stage| self.intersects(stage.flag()))
    }
}

/// Driver-provided data a shader can receive in user SGPRs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UserDataSlot {
    /// Address of the global table of ring descriptors. Always in the first two SGPRs.
    ScratchRingOffsets = 0,
    PushConstants = 1,
    /// Address of a table holding the address of every descriptor set.
    IndirectDescriptorSets = 2,
    ViewIndex = 3,
    StreamoutBuffers = 4,
    VertexBuffers = 5,
    /// Base vertex, start instance and optionally draw id.
    BaseVertexStartInstance = 6,
    /// Workgroup count of a dispatch.
    GridSize = 7,
}

impl UserDataSlot {
    pub const COUNT: usize = 8;

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A run of user SGPRs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserSgpr {
    pub sgpr_idx: u8,
    pub num_sgprs: u8,
}

/// Where a shader expects its driver-provided data. `None` means the shader does not use it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UserSgprLocations {
    pub descriptor_sets: [Option<UserSgpr>; MAX_SETS],
    pub shader_data: [Option<UserSgpr>; UserDataSlot::COUNT],
}

impl UserSgprLocations {
    #[inline]
    pub fn get(&self, slot: UserDataSlot) -> Option<UserSgpr> {
        self.shader_data[slot.index()]
    }

    #[inline]
    pub fn set(&mut self, slot: UserDataSlot, sgpr_idx: u8, num_sgprs: u8) {
        self.shader_data[slot.index()] = Some(UserSgpr {
            sgpr_idx,
            num_sgprs,
        });
    }

    /// Returns the mask of descriptor sets that have their own user SGPR.
    pub fn descriptor_sets_enabled(&self) -> u32 {
        self.descriptor_sets
            .iter()
            .enumerate()
            .filter(|(_, loc)| loc.is_some())
            .fold(0, |mask, (i, _)| mask | 1 << i)
    }

    /// Gives descriptor sets `first..first + count` consecutive user SGPRs starting at
    /// `sgpr_idx`, one each.
    pub fn set_descriptor_sets(&mut self, first: usize, count: usize, sgpr_idx: u8) {
        for i in 0..count {
            self.descriptor_sets[first + i] = Some(UserSgpr {
                sgpr_idx: sgpr_idx + i as u8,
                num_sgprs: 1,
            });
        }
    }
}

/// Parameters to create a new `ShaderVariant`.
#[derive(Clone, Debug)]
pub struct ShaderVariantCreateInfo {
    pub stage: ShaderStage,
    /// Buffer object holding the machine code.
    pub code_bo: Arc<Bo>,
    pub code_offset: DeviceSize,
    pub code_size: DeviceSize,
    pub user_sgprs: UserSgprLocations,
    /// Scratch memory needed per wave, in bytes.
    pub scratch_bytes_per_wave: u32,
    /// Number of waves that may need scratch at once.
    pub max_scratch_waves: u32,
    /// Workgroup size, for compute shaders.
    pub block_size: [u32; 3],
}

/// A compiled shader for one hardware stage.
#[derive(Debug)]
pub struct ShaderVariant {
    stage: ShaderStage,
    code_bo: Arc<Bo>,
    code_offset: DeviceSize,
    code_size: DeviceSize,
    user_sgprs: UserSgprLocations,
    scratch_bytes_per_wave: u32,
    max_scratch_waves: u32,
    block_size: [u32; 3],
}

impl ShaderVariant {
    pub fn new(create_info: ShaderVariantCreateInfo) -> Arc<Self> {
        let ShaderVariantCreateInfo {
            stage,
            code_bo,
            code_offset,
            code_size,
            user_sgprs,
            scratch_bytes_per_wave,
            max_scratch_waves,
            block_size,
        } = create_info;

        Arc::new(ShaderVariant {
            stage,
            code_bo,
            code_offset,
            code_size,
            user_sgprs,
            scratch_bytes_per_wave,
            max_scratch_waves,
            block_size,
        })
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    #[inline]
    pub fn code_bo(&self) -> &Arc<Bo> {
        &self.code_bo
    }

    /// Returns the GPU address of the first instruction.
    #[inline]
    pub fn code_va(&self) -> u64 {
        self.code_bo.va() + self.code_offset
    }

    #[inline]
    pub fn code_size(&self) -> DeviceSize {
        self.code_size
    }

    #[inline]
    pub fn user_sgprs(&self) -> &UserSgprLocations {
        &self.user_sgprs
    }

    #[inline]
    pub fn scratch_bytes_per_wave(&self) -> u32 {
        self.scratch_bytes_per_wave
    }

    #[inline]
    pub fn max_scratch_waves(&self) -> u32 {
        self.max_scratch_waves
    }

    #[inline]
    pub fn block_size(&self) -> [u32; 3] {
        self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_flags() {
        let stages = ShaderStages::VERTEX | ShaderStages::FRAGMENT;
        let split: Vec<_> = stages.stages().collect();
        assert_eq!(split, [ShaderStage::Vertex, ShaderStage::Fragment]);
        assert!(ShaderStages::ALL_GRAPHICS.contains(ShaderStages::GEOMETRY));
        assert!(!ShaderStages::ALL_GRAPHICS.intersects(ShaderStages::COMPUTE));
    }

    #[test]
    fn sgpr_locations() {
        let mut locs = UserSgprLocations::default();
        locs.set_descriptor_sets(1, 3, 4);
        locs.set(UserDataSlot::PushConstants, 2, 2);

        assert_eq!(locs.descriptor_sets_enabled(), 0b1110);
        assert_eq!(locs.descriptor_sets[3].unwrap().sgpr_idx, 6);
        assert_eq!(locs.get(UserDataSlot::PushConstants).unwrap().num_sgprs, 2);
        assert_eq!(locs.get(UserDataSlot::ViewIndex), None);
    }
}
