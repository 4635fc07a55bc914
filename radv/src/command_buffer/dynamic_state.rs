// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{
    state::{
        DepthBias, Rect2D, StencilFaceFlags, Viewport, MAX_DISCARD_RECTANGLES, MAX_VIEWPORTS,
    },
    CommandBuffer, DirtyState,
};
use crate::{pipeline::PipelineBindPoint, ValidationError};

/// # Commands to set dynamic state for pipelines.
///
/// These commands require a queue with a pipeline type that uses the given state. A state is only
/// marked dirty when its value actually changes.
impl CommandBuffer {
    fn validate_set_dynamic_state(&self) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;
        self.validate_queue_family(PipelineBindPoint::Graphics)
    }

    fn validate_array_range(
        first: u32,
        count: usize,
        max: usize,
        name: &'static str,
    ) -> Result<(), Box<ValidationError>> {
        if count == 0 {
            return Err(ValidationError::new(name, "is empty"));
        }

        if first as usize + count > max {
            return Err(ValidationError::new(
                format!("first + {}.len()", name),
                format!("is greater than {}", max),
            ));
        }

        Ok(())
    }

    /// Sets the dynamic viewports starting at `first_viewport`.
    pub fn set_viewport(
        &mut self,
        first_viewport: u32,
        viewports: &[Viewport],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_set_dynamic_state()?;
        Self::validate_array_range(first_viewport, viewports.len(), MAX_VIEWPORTS, "viewports")?;

        let range = first_viewport as usize..first_viewport as usize + viewports.len();
        let current = &mut self.state.dynamic.viewports[range];

        if current != viewports {
            current.copy_from_slice(viewports);
            self.state.dirty |= DirtyState::VIEWPORT;
        }

        Ok(self)
    }

    /// Sets the dynamic scissors starting at `first_scissor`.
    pub fn set_scissor(
        &mut self,
        first_scissor: u32,
        scissors: &[Rect2D],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_set_dynamic_state()?;
        Self::validate_array_range(first_scissor, scissors.len(), MAX_VIEWPORTS, "scissors")?;

        let range = first_scissor as usize..first_scissor as usize + scissors.len();
        let current = &mut self.state.dynamic.scissors[range];

        if current != scissors {
            current.copy_from_slice(scissors);
            self.state.dirty |= DirtyState::SCISSOR;
        }

        Ok(self)
    }

    /// Sets the dynamic discard rectangles starting at `first_rectangle`.
    pub fn set_discard_rectangle(
        &mut self,
        first_rectangle: u32,
        rectangles: &[Rect2D],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_set_dynamic_state()?;
        Self::validate_array_range(
            first_rectangle,
            rectangles.len(),
            MAX_DISCARD_RECTANGLES,
            "rectangles",
        )?;

        let range = first_rectangle as usize..first_rectangle as usize + rectangles.len();
        let current = &mut self.state.dynamic.discard_rectangles[range];

        if current != rectangles {
            current.copy_from_slice(rectangles);
            self.state.dirty |= DirtyState::DISCARD_RECTANGLE;
        }

        Ok(self)
    }

    /// Sets the dynamic line width.
    pub fn set_line_width(&mut self, line_width: f32) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_set_dynamic_state()?;

        if self.state.dynamic.line_width != line_width {
            self.state.dynamic.line_width = line_width;
            self.state.dirty |= DirtyState::LINE_WIDTH;
        }

        Ok(self)
    }

    /// Sets the dynamic depth bias values.
    pub fn set_depth_bias(
        &mut self,
        constant_factor: f32,
        clamp: f32,
        slope_factor: f32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_set_dynamic_state()?;

        let depth_bias = DepthBias {
            constant_factor,
            clamp,
            slope_factor,
        };

        if self.state.dynamic.depth_bias != depth_bias {
            self.state.dynamic.depth_bias = depth_bias;
            self.state.dirty |= DirtyState::DEPTH_BIAS;
        }

        Ok(self)
    }

    /// Sets the dynamic blend constants.
    pub fn set_blend_constants(
        &mut self,
        constants: [f32; 4],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_set_dynamic_state()?;

        if self.state.dynamic.blend_constants != constants {
            self.state.dynamic.blend_constants = constants;
            self.state.dirty |= DirtyState::BLEND_CONSTANTS;
        }

        Ok(self)
    }

    /// Sets the dynamic depth bounds.
    pub fn set_depth_bounds(
        &mut self,
        min: f32,
        max: f32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_set_dynamic_state()?;

        if self.state.dynamic.depth_bounds != [min, max] {
            self.state.dynamic.depth_bounds = [min, max];
            self.state.dirty |= DirtyState::DEPTH_BOUNDS;
        }

        Ok(self)
    }

    /// Sets the dynamic stencil compare mask of `faces`.
    pub fn set_stencil_compare_mask(
        &mut self,
        faces: StencilFaceFlags,
        compare_mask: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_set_dynamic_state()?;

        let new = self.state.dynamic.with_stencil_compare_mask(faces, compare_mask);
        self.set_dynamic(new, DirtyState::STENCIL_COMPARE_MASK);

        Ok(self)
    }

    /// Sets the dynamic stencil write mask of `faces`.
    pub fn set_stencil_write_mask(
        &mut self,
        faces: StencilFaceFlags,
        write_mask: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_set_dynamic_state()?;

        let new = self.state.dynamic.with_stencil_write_mask(faces, write_mask);
        self.set_dynamic(new, DirtyState::STENCIL_WRITE_MASK);

        Ok(self)
    }

    /// Sets the dynamic stencil reference of `faces`.
    pub fn set_stencil_reference(
        &mut self,
        faces: StencilFaceFlags,
        reference: u32,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_set_dynamic_state()?;

        let new = self.state.dynamic.with_stencil_reference(faces, reference);
        self.set_dynamic(new, DirtyState::STENCIL_REFERENCE);

        Ok(self)
    }

    fn set_dynamic(&mut self, new: super::DynamicState, bit: DirtyState) {
        let dirty = self.state.dynamic.apply(&new, bit);
        self.state.dirty |= dirty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{command_buffer::tests::recording, device::QueueFamily};

    #[test]
    fn same_value_is_not_dirty() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        cb.state.dirty = DirtyState::empty();

        cb.set_line_width(1.0).unwrap();
        assert!(cb.dirty_state().is_empty());

        cb.set_line_width(2.0).unwrap();
        assert_eq!(cb.dirty_state(), DirtyState::LINE_WIDTH);

        cb.state.dirty = DirtyState::empty();
        cb.set_line_width(2.0).unwrap();
        assert!(cb.dirty_state().is_empty());
    }

    #[test]
    fn viewport_ranges() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        cb.state.dirty = DirtyState::empty();

        let viewport = Viewport {
            width: 64.0,
            height: 64.0,
            max_depth: 1.0,
            ..Default::default()
        };

        cb.set_viewport(2, &[viewport]).unwrap();
        assert_eq!(cb.dirty_state(), DirtyState::VIEWPORT);
        assert_eq!(cb.dynamic_state().viewports[2], viewport);

        assert!(cb.set_viewport(16, &[viewport]).is_err());
        assert!(cb.set_viewport(0, &[]).is_err());
        assert!(cb.set_scissor(15, &[Rect2D::default(); 2]).is_err());
    }

    #[test]
    fn stencil_faces() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        cb.state.dirty = DirtyState::empty();

        cb.set_stencil_reference(StencilFaceFlags::FRONT, 0x80).unwrap();
        assert_eq!(cb.dirty_state(), DirtyState::STENCIL_REFERENCE);
        assert_eq!(cb.dynamic_state().stencil_reference.front, 0x80);
        assert_eq!(cb.dynamic_state().stencil_reference.back, 0);

        cb.state.dirty = DirtyState::empty();
        cb.set_stencil_reference(StencilFaceFlags::FRONT, 0x80).unwrap();
        cb.set_stencil_write_mask(StencilFaceFlags::empty(), 0xff).unwrap();
        assert!(cb.dirty_state().is_empty());
    }

    #[test]
    fn not_recording() {
        let (device, _) = gfx_device!();
        let mut cb = recording(&device, QueueFamily::General);
        cb.end().unwrap();
        assert!(cb.set_blend_constants([1.0; 4]).is_err());
    }
}
