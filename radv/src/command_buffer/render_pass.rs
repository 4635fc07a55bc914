// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{
    barrier::{dst_access_flush, src_access_flush, stage_flush},
    CommandBuffer, CommandBufferLevel, DirtyState,
};
use crate::{
    image::ImageLayout,
    pipeline::PipelineBindPoint,
    render_pass::{Framebuffer, RenderPass, SubpassBarrier},
    sync::QUEUE_FAMILY_IGNORED,
    ValidationError,
};
use std::sync::Arc;

impl CommandBuffer {
    /// Begins a render pass, transitioning the attachments to the layouts of the first subpass.
    pub fn begin_render_pass(
        &mut self,
        render_pass: Arc<RenderPass>,
        framebuffer: Arc<Framebuffer>,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_begin_render_pass(&render_pass, &framebuffer)?;

        log::trace!(
            "beginning render pass with {} attachments",
            render_pass.attachments().len(),
        );

        self.state.attachment_layouts = render_pass
            .attachments()
            .iter()
            .map(|attachment| attachment.initial_layout)
            .collect();
        self.state.render_pass = Some(render_pass);
        self.state.framebuffer = Some(framebuffer);

        self.set_subpass(0);

        Ok(self)
    }

    fn validate_begin_render_pass(
        &self,
        render_pass: &Arc<RenderPass>,
        framebuffer: &Arc<Framebuffer>,
    ) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;
        self.validate_queue_family(PipelineBindPoint::Graphics)?;

        if self.level() != CommandBufferLevel::Primary {
            return Err(ValidationError::new(
                "self",
                "is not a primary command buffer",
            ));
        }

        if self.state.render_pass.is_some() {
            return Err(ValidationError::new(
                "self",
                "is already inside a render pass",
            ));
        }

        if !Arc::ptr_eq(framebuffer.render_pass(), render_pass) {
            return Err(ValidationError::new(
                "framebuffer",
                "was not created for `render_pass`",
            ));
        }

        Ok(())
    }

    /// Moves on to the next subpass of the current render pass.
    pub fn next_subpass(&mut self) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_next_subpass()?;

        let subpass = self.state.subpass + 1;
        self.set_subpass(subpass);

        Ok(self)
    }

    fn validate_next_subpass(&self) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;

        let Some(render_pass) = &self.state.render_pass else {
            return Err(ValidationError::new("self", "is not inside a render pass"));
        };

        if self.state.subpass + 1 >= render_pass.subpasses().len() {
            return Err(ValidationError::new(
                "self",
                "is already in the last subpass of the render pass",
            ));
        }

        Ok(())
    }

    /// Ends the current render pass, transitioning the attachments to their final layouts.
    pub fn end_render_pass(&mut self) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_end_render_pass()?;

        let (Some(render_pass), Some(framebuffer)) =
            (self.state.render_pass.clone(), self.state.framebuffer.clone())
        else {
            return Ok(self);
        };

        self.apply_subpass_barrier(render_pass.end_barrier());

        for (index, attachment) in render_pass.attachments().iter().enumerate() {
            self.transition_attachment(&framebuffer, index, attachment.final_layout);
        }

        self.state.render_pass = None;
        self.state.framebuffer = None;
        self.state.subpass = 0;
        self.state.attachment_layouts.clear();

        Ok(self)
    }

    fn validate_end_render_pass(&self) -> Result<(), Box<ValidationError>> {
        self.validate_recording()?;

        if self.level() != CommandBufferLevel::Primary {
            return Err(ValidationError::new(
                "self",
                "is not a primary command buffer",
            ));
        }

        let Some(render_pass) = &self.state.render_pass else {
            return Err(ValidationError::new("self", "is not inside a render pass"));
        };

        if self.state.subpass + 1 != render_pass.subpasses().len() {
            return Err(ValidationError::new(
                "self",
                "is not in the last subpass of the render pass",
            ));
        }

        Ok(())
    }

    fn set_subpass(&mut self, subpass: usize) {
        let (Some(render_pass), Some(framebuffer)) =
            (self.state.render_pass.clone(), self.state.framebuffer.clone())
        else {
            return;
        };
        let Some(description) = render_pass.subpasses().get(subpass) else {
            return;
        };

        self.apply_subpass_barrier(&description.start_barrier);

        for reference in description.attachments() {
            self.transition_attachment(&framebuffer, reference.attachment as usize, reference.layout);
        }

        self.state.subpass = subpass;
        self.state.dirty |= DirtyState::FRAMEBUFFER;
    }

    fn apply_subpass_barrier(&mut self, barrier: &SubpassBarrier) {
        if barrier.is_empty() {
            return;
        }

        let chip_class = self.device().chip_class();

        self.state.flush_bits |= src_access_flush(barrier.src_access, None)
            | stage_flush(barrier.src_stages)
            | dst_access_flush(chip_class, barrier.dst_access, None);
    }

    fn transition_attachment(
        &mut self,
        framebuffer: &Framebuffer,
        index: usize,
        new_layout: ImageLayout,
    ) {
        let Some(&old_layout) = self.state.attachment_layouts.get(index) else {
            return;
        };

        if old_layout == new_layout {
            return;
        }

        let image = framebuffer.attachments()[index].clone();
        let range = image.subresource_range();

        self.handle_image_transition(
            &image,
            old_layout,
            new_layout,
            QUEUE_FAMILY_IGNORED,
            QUEUE_FAMILY_IGNORED,
            &range,
        );

        self.state.attachment_layouts[index] = new_layout;
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        command_buffer::{
            barrier::MetaOpKind, tests::recording, CommandBuffer, CommandBufferLevel, DirtyState,
        },
        device::QueueFamily,
        image::{Format, ImageLayout},
        registers::PKT3_DMA_DATA,
        render_pass::{
            AttachmentDescription, AttachmentReference, Framebuffer, FramebufferCreateInfo,
            RenderPass, RenderPassCreateInfo, SubpassBarrier, SubpassDescription,
        },
        sync::{AccessFlags, FlushBits, PipelineStages},
        tests::{count_opcode, depth_image},
    };
    use std::sync::Arc;

    fn depth_pass(
        device: &Arc<crate::device::Device>,
        initial_layout: ImageLayout,
        final_layout: ImageLayout,
        subpasses: Vec<SubpassDescription>,
    ) -> (Arc<RenderPass>, Arc<Framebuffer>) {
        let render_pass = RenderPass::new(RenderPassCreateInfo {
            attachments: vec![AttachmentDescription {
                format: Format::D32_SFLOAT,
                samples: 1,
                initial_layout,
                final_layout,
            }],
            subpasses,
            ..Default::default()
        })
        .unwrap();
        let framebuffer = Framebuffer::new(
            render_pass.clone(),
            FramebufferCreateInfo {
                attachments: vec![depth_image(device, Format::D32_SFLOAT)],
                extent: [64, 64],
                layers: 1,
            },
        )
        .unwrap();

        (render_pass, framebuffer)
    }

    fn depth_subpass(layout: ImageLayout) -> SubpassDescription {
        SubpassDescription {
            depth_stencil_attachment: Some(AttachmentReference {
                attachment: 0,
                layout,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn begin_transitions_attachments() {
        let (device, _) = gfx_device!();
        let (render_pass, framebuffer) = depth_pass(
            &device,
            ImageLayout::Undefined,
            ImageLayout::DepthStencilAttachmentOptimal,
            vec![depth_subpass(ImageLayout::DepthStencilAttachmentOptimal)],
        );
        let mut cb = recording(&device, QueueFamily::General);
        cb.state.dirty = DirtyState::empty();

        cb.begin_render_pass(render_pass, framebuffer).unwrap();

        // Undefined to an attachment layout clears HTILE to the expanded state.
        assert_eq!(count_opcode(cb.cs().words(), PKT3_DMA_DATA), 1);
        assert_eq!(
            cb.state.attachment_layouts.as_slice(),
            &[ImageLayout::DepthStencilAttachmentOptimal],
        );
        assert!(cb.dirty_state().intersects(DirtyState::FRAMEBUFFER));
        assert_eq!(cb.state.subpass, 0);
    }

    #[test]
    fn end_decompresses_for_sampling() {
        let (device, _) = gfx_device!();
        let (render_pass, framebuffer) = depth_pass(
            &device,
            ImageLayout::DepthStencilAttachmentOptimal,
            ImageLayout::ShaderReadOnlyOptimal,
            vec![depth_subpass(ImageLayout::DepthStencilAttachmentOptimal)],
        );
        let mut cb = recording(&device, QueueFamily::General);

        cb.begin_render_pass(render_pass, framebuffer).unwrap();
        assert!(cb.meta_ops().is_empty());

        cb.end_render_pass().unwrap();

        assert_eq!(cb.meta_ops().len(), 1);
        assert_eq!(cb.meta_ops()[0].kind, MetaOpKind::DepthDecompress);
        assert!(cb.state.render_pass.is_none());
        assert!(cb.state.framebuffer.is_none());
        assert!(cb.state.attachment_layouts.is_empty());
    }

    #[test]
    fn subpass_barriers() {
        let (device, _) = gfx_device!();
        let second = SubpassDescription {
            start_barrier: SubpassBarrier {
                src_stages: PipelineStages::LATE_FRAGMENT_TESTS,
                src_access: AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dst_access: AccessFlags::SHADER_READ,
            },
            ..depth_subpass(ImageLayout::DepthStencilAttachmentOptimal)
        };
        let (render_pass, framebuffer) = depth_pass(
            &device,
            ImageLayout::DepthStencilAttachmentOptimal,
            ImageLayout::DepthStencilAttachmentOptimal,
            vec![depth_subpass(ImageLayout::DepthStencilAttachmentOptimal), second],
        );
        let mut cb = recording(&device, QueueFamily::General);

        cb.begin_render_pass(render_pass, framebuffer).unwrap();
        assert!(cb.end_render_pass().is_err());

        cb.state.flush_bits = FlushBits::empty();
        cb.state.dirty = DirtyState::empty();
        cb.next_subpass().unwrap();

        assert_eq!(cb.state.subpass, 1);
        assert!(cb
            .pending_flush_bits()
            .contains(FlushBits::FLUSH_AND_INV_DB | FlushBits::PS_PARTIAL_FLUSH));
        assert!(cb.pending_flush_bits().intersects(FlushBits::INV_VMEM_L1));
        assert!(cb.dirty_state().intersects(DirtyState::FRAMEBUFFER));
        assert!(cb.meta_ops().is_empty());

        assert!(cb.next_subpass().is_err());
        cb.end_render_pass().unwrap();
    }

    #[test]
    fn render_pass_validation() {
        let (device, _) = gfx_device!();
        let (render_pass, framebuffer) = depth_pass(
            &device,
            ImageLayout::DepthStencilAttachmentOptimal,
            ImageLayout::DepthStencilAttachmentOptimal,
            vec![depth_subpass(ImageLayout::DepthStencilAttachmentOptimal)],
        );
        let (other_pass, _) = depth_pass(
            &device,
            ImageLayout::DepthStencilAttachmentOptimal,
            ImageLayout::DepthStencilAttachmentOptimal,
            vec![depth_subpass(ImageLayout::DepthStencilAttachmentOptimal)],
        );

        let mut cb = recording(&device, QueueFamily::General);
        assert!(cb.end_render_pass().is_err());
        assert!(cb.next_subpass().is_err());
        assert!(cb
            .begin_render_pass(other_pass, framebuffer.clone())
            .is_err());

        cb.begin_render_pass(render_pass.clone(), framebuffer.clone())
            .unwrap();
        assert!(cb
            .begin_render_pass(render_pass.clone(), framebuffer.clone())
            .is_err());

        let mut compute = recording(&device, QueueFamily::Compute);
        assert!(compute
            .begin_render_pass(render_pass.clone(), framebuffer.clone())
            .is_err());

        let pool = cb.pool().clone();
        let mut secondary = CommandBuffer::new(pool, CommandBufferLevel::Secondary);
        secondary.begin(Default::default()).unwrap();
        assert!(secondary.begin_render_pass(render_pass, framebuffer).is_err());
    }
}
