// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Dirty-state tracking.
//!
//! Every piece of state that ends up in hardware registers has a bit in [`DirtyState`]. A bit is
//! set when a command changes the value, and cleared once the registers have been written for the
//! pipeline that is current at the next draw. Dynamic state values are kept in a
//! [`DynamicState`], and changes are detected by comparing snapshots: setting a value equal to the
//! current one does not set the bit.

use crate::{macros::driver_bitflags, shader::MAX_SETS};
use std::sync::Arc;

/// Maximum number of viewports and scissors.
pub const MAX_VIEWPORTS: usize = 16;
/// Maximum number of discard rectangles.
pub const MAX_DISCARD_RECTANGLES: usize = 4;

driver_bitflags! {
    /// State that must be re-emitted before the next draw or dispatch.
    DirtyState = u32;

    VIEWPORT = 1 << 0,
    SCISSOR = 1 << 1,
    LINE_WIDTH = 1 << 2,
    DEPTH_BIAS = 1 << 3,
    BLEND_CONSTANTS = 1 << 4,
    DEPTH_BOUNDS = 1 << 5,
    STENCIL_COMPARE_MASK = 1 << 6,
    STENCIL_WRITE_MASK = 1 << 7,
    STENCIL_REFERENCE = 1 << 8,
    DISCARD_RECTANGLE = 1 << 9,
    PIPELINE = 1 << 10,
    INDEX_BUFFER = 1 << 11,
    FRAMEBUFFER = 1 << 12,
    VERTEX_BUFFER = 1 << 13,
    STREAMOUT_BUFFER = 1 << 14,
}

impl DirtyState {
    /// Every dynamic state bit.
    pub const DYNAMIC_ALL: Self = Self((1 << 10) - 1);

    /// The stencil state bits, which are all written by the same packet.
    pub const STENCIL_ALL: Self = Self(
        Self::STENCIL_COMPARE_MASK.0 | Self::STENCIL_WRITE_MASK.0 | Self::STENCIL_REFERENCE.0,
    );
}

/// A viewport transform.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Returns the scale and translation applied to normalized device coordinates.
    pub fn xform(&self) -> ([f32; 3], [f32; 3]) {
        let half_width = self.width * 0.5;
        let half_height = self.height * 0.5;

        (
            [half_width, half_height, self.max_depth - self.min_depth],
            [self.x + half_width, self.y + half_height, self.min_depth],
        )
    }
}

/// An axis-aligned rectangle in framebuffer coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect2D {
    pub offset: [i32; 2],
    pub extent: [u32; 2],
}

/// Depth bias parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepthBias {
    pub constant_factor: f32,
    pub clamp: f32,
    pub slope_factor: f32,
}

/// A value for each face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StencilFaces {
    pub front: u32,
    pub back: u32,
}

driver_bitflags! {
    /// Which faces a stencil command applies to.
    StencilFaceFlags = u32;

    FRONT = 1 << 0,
    BACK = 1 << 1,
}

impl StencilFaces {
    fn with(self, faces: StencilFaceFlags, value: u32) -> Self {
        StencilFaces {
            front: if faces.intersects(StencilFaceFlags::FRONT) {
                value
            } else {
                self.front
            },
            back: if faces.intersects(StencilFaceFlags::BACK) {
                value
            } else {
                self.back
            },
        }
    }
}

/// The values of every dynamic state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DynamicState {
    pub viewport_count: u32,
    pub viewports: [Viewport; MAX_VIEWPORTS],
    pub scissor_count: u32,
    pub scissors: [Rect2D; MAX_VIEWPORTS],
    pub line_width: f32,
    pub depth_bias: DepthBias,
    pub blend_constants: [f32; 4],
    pub depth_bounds: [f32; 2],
    pub stencil_compare_mask: StencilFaces,
    pub stencil_write_mask: StencilFaces,
    pub stencil_reference: StencilFaces,
    pub discard_rectangle_count: u32,
    pub discard_rectangles: [Rect2D; MAX_DISCARD_RECTANGLES],
}

impl Default for DynamicState {
    fn default() -> Self {
        DynamicState {
            viewport_count: 0,
            viewports: [Viewport::default(); MAX_VIEWPORTS],
            scissor_count: 0,
            scissors: [Rect2D::default(); MAX_VIEWPORTS],
            line_width: 1.0,
            depth_bias: DepthBias::default(),
            blend_constants: [0.0; 4],
            depth_bounds: [0.0, 1.0],
            stencil_compare_mask: StencilFaces::default(),
            stencil_write_mask: StencilFaces::default(),
            stencil_reference: StencilFaces::default(),
            discard_rectangle_count: 0,
            discard_rectangles: [Rect2D::default(); MAX_DISCARD_RECTANGLES],
        }
    }
}

impl DynamicState {
    #[inline]
    pub fn viewports(&self) -> &[Viewport] {
        &self.viewports[..self.viewport_count as usize]
    }

    #[inline]
    pub fn scissors(&self) -> &[Rect2D] {
        &self.scissors[..self.scissor_count as usize]
    }

    #[inline]
    pub fn discard_rectangles(&self) -> &[Rect2D] {
        &self.discard_rectangles[..self.discard_rectangle_count as usize]
    }

    /// Returns the bits in `mask` whose values differ between `self` and `other`.
    pub fn diff(&self, other: &Self, mask: DirtyState) -> DirtyState {
        let mut dirty = DirtyState::empty();

        for bit in mask.iter() {
            let differs = match bit {
                DirtyState::VIEWPORT => self.viewports() != other.viewports(),
                DirtyState::SCISSOR => self.scissors() != other.scissors(),
                DirtyState::LINE_WIDTH => self.line_width != other.line_width,
                DirtyState::DEPTH_BIAS => self.depth_bias != other.depth_bias,
                DirtyState::BLEND_CONSTANTS => self.blend_constants != other.blend_constants,
                DirtyState::DEPTH_BOUNDS => self.depth_bounds != other.depth_bounds,
                DirtyState::STENCIL_COMPARE_MASK => {
                    self.stencil_compare_mask != other.stencil_compare_mask
                }
                DirtyState::STENCIL_WRITE_MASK => {
                    self.stencil_write_mask != other.stencil_write_mask
                }
                DirtyState::STENCIL_REFERENCE => self.stencil_reference != other.stencil_reference,
                DirtyState::DISCARD_RECTANGLE => {
                    self.discard_rectangles() != other.discard_rectangles()
                }
                _ => false,
            };

            if differs {
                dirty |= bit;
            }
        }

        dirty
    }

    /// Takes the array sizes of `other`, and the values of the states in `mask`. Returns the
    /// states whose emitted registers change as a result.
    pub fn apply(&mut self, other: &Self, mask: DirtyState) -> DirtyState {
        let mut dirty = self.diff(other, mask & DirtyState::DYNAMIC_ALL);

        if self.viewport_count != other.viewport_count {
            dirty |= DirtyState::VIEWPORT;
        }

        if self.scissor_count != other.scissor_count {
            dirty |= DirtyState::SCISSOR;
        }

        if self.discard_rectangle_count != other.discard_rectangle_count {
            dirty |= DirtyState::DISCARD_RECTANGLE;
        }

        self.viewport_count = other.viewport_count;
        self.scissor_count = other.scissor_count;
        self.discard_rectangle_count = other.discard_rectangle_count;

        for bit in mask.iter() {
            match bit {
                DirtyState::VIEWPORT => self.viewports = other.viewports,
                DirtyState::SCISSOR => self.scissors = other.scissors,
                DirtyState::LINE_WIDTH => self.line_width = other.line_width,
                DirtyState::DEPTH_BIAS => self.depth_bias = other.depth_bias,
                DirtyState::BLEND_CONSTANTS => self.blend_constants = other.blend_constants,
                DirtyState::DEPTH_BOUNDS => self.depth_bounds = other.depth_bounds,
                DirtyState::STENCIL_COMPARE_MASK => {
                    self.stencil_compare_mask = other.stencil_compare_mask
                }
                DirtyState::STENCIL_WRITE_MASK => {
                    self.stencil_write_mask = other.stencil_write_mask
                }
                DirtyState::STENCIL_REFERENCE => self.stencil_reference = other.stencil_reference,
                DirtyState::DISCARD_RECTANGLE => {
                    self.discard_rectangles = other.discard_rectangles
                }
                _ => (),
            }
        }

        dirty
    }

    /// Returns the state with `viewports` written starting at `first`. Viewports past the last
    /// slot are dropped.
    pub fn with_viewports(mut self, first: usize, viewports: &[Viewport]) -> Self {
        let first = first.min(MAX_VIEWPORTS);
        let end = (first + viewports.len()).min(MAX_VIEWPORTS);
        self.viewports[first..end].copy_from_slice(&viewports[..end - first]);
        self.viewport_count = self.viewport_count.max(end as u32);
        self
    }

    /// Returns the state with `scissors` written starting at `first`.
    pub fn with_scissors(mut self, first: usize, scissors: &[Rect2D]) -> Self {
        let first = first.min(MAX_VIEWPORTS);
        let end = (first + scissors.len()).min(MAX_VIEWPORTS);
        self.scissors[first..end].copy_from_slice(&scissors[..end - first]);
        self.scissor_count = self.scissor_count.max(end as u32);
        self
    }

    /// Returns the state with `rectangles` written starting at `first`.
    pub fn with_discard_rectangles(mut self, first: usize, rectangles: &[Rect2D]) -> Self {
        let first = first.min(MAX_DISCARD_RECTANGLES);
        let end = (first + rectangles.len()).min(MAX_DISCARD_RECTANGLES);
        self.discard_rectangles[first..end].copy_from_slice(&rectangles[..end - first]);
        self.discard_rectangle_count = self.discard_rectangle_count.max(end as u32);
        self
    }

    pub fn with_stencil_compare_mask(mut self, faces: StencilFaceFlags, mask: u32) -> Self {
        self.stencil_compare_mask = self.stencil_compare_mask.with(faces, mask);
        self
    }

    pub fn with_stencil_write_mask(mut self, faces: StencilFaceFlags, mask: u32) -> Self {
        self.stencil_write_mask = self.stencil_write_mask.with(faces, mask);
        self
    }

    pub fn with_stencil_reference(mut self, faces: StencilFaceFlags, reference: u32) -> Self {
        self.stencil_reference = self.stencil_reference.with(faces, reference);
        self
    }
}

driver_bitflags! {
    /// Shader code and descriptors that still have to be prefetched into L2.
    PrefetchMask = u32;

    VBO_DESCRIPTORS = 1 << 0,
    VS = 1 << 1,
    TCS = 1 << 2,
    TES = 1 << 3,
    GS = 1 << 4,
    PS = 1 << 5,
}

impl PrefetchMask {
    pub const SHADERS: Self =
        Self(Self::VS.0 | Self::TCS.0 | Self::TES.0 | Self::GS.0 | Self::PS.0);
}

/// The descriptor sets bound to one bind point.
#[derive(Clone, Debug, Default)]
pub struct DescriptorState {
    pub sets: [Option<Arc<crate::descriptor_set::DescriptorSet>>; MAX_SETS],
    /// Sets whose pointer must be written again.
    pub dirty: u32,
    /// Sets that are bound.
    pub valid: u32,
    /// The push descriptor set must be uploaded.
    pub push_dirty: bool,
    pub push_set: Option<crate::descriptor_set::PushDescriptorSet>,
    /// The set number the push descriptor set is bound to.
    pub push_set_index: Option<usize>,
    /// Buffer descriptors for the dynamic offsets, four dwords each.
    pub dynamic_buffers: Vec<[u32; 4]>,
}

impl DescriptorState {
    pub fn mark_dirty(&mut self) {
        self.dirty |= self.valid;
    }

    /// Returns the GPU address of set `index`, or zero if nothing is bound there.
    pub fn set_va(&self, index: usize) -> u64 {
        if self.push_set_index == Some(index) {
            return self.push_set.as_ref().map_or(0, |set| set.va);
        }

        self.sets[index].as_ref().map_or(0, |set| set.va())
    }
}

/// Splits off the lowest run of consecutive set bits of `mask`, returning `(start, count)`.
pub fn bit_scan_consecutive_range(mask: &mut u32) -> (u32, u32) {
    if *mask == 0 {
        return (0, 0);
    }

    if *mask == u32::MAX {
        *mask = 0;
        return (0, 32);
    }

    let start = mask.trailing_zeros();
    let count = (!(*mask >> start)).trailing_zeros();
    let bits = if count == 32 {
        u32::MAX
    } else {
        ((1u32 << count) - 1) << start
    };
    *mask &= !bits;

    (start, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn viewport(w: f32) -> Viewport {
        Viewport {
            width: w,
            height: w,
            max_depth: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn diff_only_in_mask() {
        let a = DynamicState::default();
        let mut b = a;
        b.line_width = 2.0;
        b.blend_constants = [1.0; 4];

        assert_eq!(
            a.diff(&b, DirtyState::DYNAMIC_ALL),
            DirtyState::LINE_WIDTH | DirtyState::BLEND_CONSTANTS,
        );
        assert_eq!(a.diff(&b, DirtyState::LINE_WIDTH), DirtyState::LINE_WIDTH);
        assert_eq!(a.diff(&b, DirtyState::VIEWPORT), DirtyState::empty());
    }

    #[test]
    fn apply_copies_counts() {
        let mut live = DynamicState::default();
        let pipeline = DynamicState::default().with_viewports(0, &[viewport(64.0)]);

        // Viewport is dynamic in this pipeline: only the count is taken.
        let dirty = live.apply(&pipeline, DirtyState::empty());
        assert_eq!(dirty, DirtyState::VIEWPORT);
        assert_eq!(live.viewport_count, 1);
        assert_eq!(live.viewports[0], Viewport::default());

        let dirty = live.apply(&pipeline, DirtyState::VIEWPORT);
        assert_eq!(dirty, DirtyState::VIEWPORT);
        assert_eq!(live.viewports[0], viewport(64.0));

        assert_eq!(live.apply(&pipeline, DirtyState::VIEWPORT), DirtyState::empty());
    }

    #[test]
    fn stencil_faces() {
        let state = DynamicState::default()
            .with_stencil_reference(StencilFaceFlags::FRONT, 3)
            .with_stencil_reference(StencilFaceFlags::BACK, 5);
        assert_eq!(state.stencil_reference, StencilFaces { front: 3, back: 5 });
    }

    #[test]
    fn consecutive_ranges() {
        let mut mask = 0b1110_0110;
        assert_eq!(bit_scan_consecutive_range(&mut mask), (1, 2));
        assert_eq!(bit_scan_consecutive_range(&mut mask), (5, 3));
        assert_eq!(mask, 0);

        let mut mask = u32::MAX;
        assert_eq!(bit_scan_consecutive_range(&mut mask), (0, 32));

        let mut mask = 0x8000_0000;
        assert_eq!(bit_scan_consecutive_range(&mut mask), (31, 1));
    }

    #[test]
    fn out_of_range_inputs() {
        let mut mask = 0;
        assert_eq!(bit_scan_consecutive_range(&mut mask), (0, 0));
        assert_eq!(mask, 0);

        let state = DynamicState::default()
            .with_viewports(MAX_VIEWPORTS + 3, &[viewport(64.0)])
            .with_scissors(MAX_VIEWPORTS, &[Rect2D::default()])
            .with_discard_rectangles(MAX_DISCARD_RECTANGLES + 1, &[Rect2D::default()]);
        // Nothing lands past the last slot.
        let default = DynamicState::default();
        assert_eq!(state.viewports, default.viewports);
        assert_eq!(state.scissors, default.scissors);
        assert_eq!(state.discard_rectangles, default.discard_rectangles);
        assert_eq!(state.viewport_count, MAX_VIEWPORTS as u32);
        assert_eq!(state.discard_rectangle_count, MAX_DISCARD_RECTANGLES as u32);
    }

    proptest! {
        #[test]
        fn consecutive_ranges_cover_mask(mask in 1u32..) {
            let mut remaining = mask;
            let mut rebuilt = 0u64;

            while remaining != 0 {
                let (start, count) = bit_scan_consecutive_range(&mut remaining);
                let bits = ((1u64 << count) - 1) << start;
                prop_assert_eq!(rebuilt & bits, 0);
                rebuilt |= bits;
            }

            prop_assert_eq!(rebuilt, mask as u64);
        }

        #[test]
        fn setting_same_value_is_clean(width in 1.0f32..8192.0, first in 0usize..4) {
            let state = DynamicState::default().with_viewports(first, &[viewport(width)]);
            let again = state.with_viewports(first, &[viewport(width)]);
            prop_assert_eq!(state.diff(&again, DirtyState::DYNAMIC_ALL), DirtyState::empty());
        }
    }
}
