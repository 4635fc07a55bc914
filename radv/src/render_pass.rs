// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Render passes and framebuffers.
//!
//! A render pass describes the attachments it uses and, for each subpass, the layout each
//! attachment must be in. The command buffer tracks the current layout of every attachment and
//! records a layout transition whenever a subpass needs a different one. Dependencies between
//! subpasses are reduced to one [`SubpassBarrier`] at the start of each subpass and one at the end
//! of the render pass.

use crate::{
    image::{Format, Image, ImageLayout},
    sync::{AccessFlags, PipelineStages},
    ValidationError,
};
use smallvec::SmallVec;
use std::sync::Arc;

/// Maximum number of color attachments in a subpass.
pub const MAX_RTS: usize = 8;

/// Describes one attachment of a render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentDescription {
    pub format: Format,
    pub samples: u32,
    /// Layout of the attachment when the render pass begins.
    pub initial_layout: ImageLayout,
    /// Layout the attachment is transitioned to when the render pass ends.
    pub final_layout: ImageLayout,
}

/// Use of an attachment by a subpass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentReference {
    pub attachment: u32,
    pub layout: ImageLayout,
}

/// A dependency applied automatically when the current subpass changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubpassBarrier {
    pub src_stages: PipelineStages,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

impl SubpassBarrier {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.src_stages.is_empty() && self.src_access.is_empty() && self.dst_access.is_empty()
    }
}

/// Describes a subpass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubpassDescription {
    /// Views rendered by each draw of the subpass. Zero disables multiview.
    pub view_mask: u32,
    pub color_attachments: SmallVec<[Option<AttachmentReference>; MAX_RTS]>,
    pub depth_stencil_attachment: Option<AttachmentReference>,
    /// Barrier applied when the subpass begins.
    pub start_barrier: SubpassBarrier,
}

impl SubpassDescription {
    /// Iterates over every attachment used by the subpass.
    pub fn attachments(&self) -> impl Iterator<Item = AttachmentReference> + '_ {
        self.color_attachments
            .iter()
            .flatten()
            .chain(self.depth_stencil_attachment.iter())
            .copied()
    }
}

/// Parameters to create a new `RenderPass`.
#[derive(Clone, Debug, Default)]
pub struct RenderPassCreateInfo {
    pub attachments: Vec<AttachmentDescription>,
    pub subpasses: Vec<SubpassDescription>,
    /// Barrier applied when the render pass ends.
    pub end_barrier: SubpassBarrier,
}

/// A render pass.
#[derive(Debug)]
pub struct RenderPass {
    attachments: Vec<AttachmentDescription>,
    subpasses: Vec<SubpassDescription>,
    end_barrier: SubpassBarrier,
}

impl RenderPass {
    pub fn new(create_info: RenderPassCreateInfo) -> Result<Arc<RenderPass>, Box<ValidationError>> {
        let RenderPassCreateInfo {
            attachments,
            subpasses,
            end_barrier,
        } = create_info;

        if subpasses.is_empty() {
            return Err(ValidationError::new("create_info.subpasses", "is empty"));
        }

        for (index, subpass) in subpasses.iter().enumerate() {
            if subpass.color_attachments.len() > MAX_RTS {
                return Err(ValidationError::new(
                    format!("create_info.subpasses[{}].color_attachments", index),
                    "has more elements than the maximum number of color attachments",
                ));
            }

            for reference in subpass.attachments() {
                if reference.attachment as usize >= attachments.len() {
                    return Err(ValidationError::new(
                        format!("create_info.subpasses[{}]", index),
                        "references an attachment that does not exist",
                    ));
                }

                if reference.layout == ImageLayout::Undefined
                    || reference.layout == ImageLayout::Preinitialized
                {
                    return Err(ValidationError::new(
                        format!("create_info.subpasses[{}]", index),
                        "uses an attachment in the `Undefined` or `Preinitialized` layout",
                    ));
                }
            }

            if let Some(depth) = subpass.depth_stencil_attachment {
                if !attachments[depth.attachment as usize].format.is_depth_stencil() {
                    return Err(ValidationError::new(
                        format!("create_info.subpasses[{}].depth_stencil_attachment", index),
                        "does not have a depth/stencil format",
                    ));
                }
            }
        }

        Ok(Arc::new(RenderPass {
            attachments,
            subpasses,
            end_barrier,
        }))
    }

    #[inline]
    pub fn attachments(&self) -> &[AttachmentDescription] {
        &self.attachments
    }

    #[inline]
    pub fn subpasses(&self) -> &[SubpassDescription] {
        &self.subpasses
    }

    #[inline]
    pub fn end_barrier(&self) -> &SubpassBarrier {
        &self.end_barrier
    }
}

/// Parameters to create a new `Framebuffer`.
#[derive(Clone, Debug)]
pub struct FramebufferCreateInfo {
    /// One image per attachment of the render pass.
    pub attachments: Vec<Arc<Image>>,
    pub extent: [u32; 2],
    pub layers: u32,
}

/// The images a render pass renders to.
#[derive(Debug)]
pub struct Framebuffer {
    render_pass: Arc<RenderPass>,
    attachments: Vec<Arc<Image>>,
    extent: [u32; 2],
    layers: u32,
}

impl Framebuffer {
    pub fn new(
        render_pass: Arc<RenderPass>,
        create_info: FramebufferCreateInfo,
    ) -> Result<Arc<Framebuffer>, Box<ValidationError>> {
        let FramebufferCreateInfo {
            attachments,
            extent,
            layers,
        } = create_info;

        if attachments.len() != render_pass.attachments().len() {
            return Err(ValidationError::new(
                "create_info.attachments",
                "does not have one element per attachment of the render pass",
            ));
        }

        for (index, (image, description)) in
            attachments.iter().zip(render_pass.attachments()).enumerate()
        {
            if image.format() != description.format || image.samples() != description.samples {
                return Err(ValidationError::new(
                    format!("create_info.attachments[{}]", index),
                    "does not match the format and sample count of the attachment",
                ));
            }

            let [width, height, _] = image.extent();
            if width < extent[0] || height < extent[1] {
                return Err(ValidationError::new(
                    format!("create_info.attachments[{}]", index),
                    "is smaller than the framebuffer",
                ));
            }
        }

        if extent[0] == 0 || extent[1] == 0 || layers == 0 {
            return Err(ValidationError::new(
                "create_info.extent",
                "has a zero dimension",
            ));
        }

        Ok(Arc::new(Framebuffer {
            render_pass,
            attachments,
            extent,
            layers,
        }))
    }

    #[inline]
    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }

    #[inline]
    pub fn attachments(&self) -> &[Arc<Image>] {
        &self.attachments
    }

    #[inline]
    pub fn extent(&self) -> [u32; 2] {
        self.extent
    }

    #[inline]
    pub fn layers(&self) -> u32 {
        self.layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::depth_image;
    use smallvec::smallvec;

    fn depth_pass() -> Arc<RenderPass> {
        RenderPass::new(RenderPassCreateInfo {
            attachments: vec![AttachmentDescription {
                format: Format::D32_SFLOAT,
                samples: 1,
                initial_layout: ImageLayout::Undefined,
                final_layout: ImageLayout::ShaderReadOnlyOptimal,
            }],
            subpasses: vec![SubpassDescription {
                depth_stencil_attachment: Some(AttachmentReference {
                    attachment: 0,
                    layout: ImageLayout::DepthStencilAttachmentOptimal,
                }),
                ..Default::default()
            }],
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn create() {
        let (device, _) = gfx_device!();
        let render_pass = depth_pass();
        let image = depth_image(&device, Format::D32_SFLOAT);

        let framebuffer = Framebuffer::new(
            render_pass.clone(),
            FramebufferCreateInfo {
                attachments: vec![image.clone()],
                extent: [64, 64],
                layers: 1,
            },
        )
        .unwrap();
        assert_eq!(framebuffer.attachments().len(), 1);

        assert!(Framebuffer::new(
            render_pass,
            FramebufferCreateInfo {
                attachments: vec![image],
                extent: [128, 64],
                layers: 1,
            },
        )
        .is_err());
    }

    #[test]
    fn invalid_references() {
        assert!(RenderPass::new(RenderPassCreateInfo {
            subpasses: vec![SubpassDescription {
                color_attachments: smallvec![Some(AttachmentReference {
                    attachment: 1,
                    layout: ImageLayout::ColorAttachmentOptimal,
                })],
                ..Default::default()
            }],
            ..Default::default()
        })
        .is_err());

        assert!(RenderPass::new(RenderPassCreateInfo::default()).is_err());
    }
}
