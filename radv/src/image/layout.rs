// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Which compression states are valid in which image layout.
//!
//! `queue_mask` arguments are masks of [`QueueFamily`] bits, as returned by
//! [`Image::queue_family_mask`]: a layout may only keep an image compressed if every queue that
//! can access it in that layout understands the compression.

use super::Image;
use crate::{device::QueueFamily, macros::vulkan_enum};

vulkan_enum! {
    /// In-memory layout of an image subresource.
    ImageLayout = ImageLayout(i32);

    Undefined = UNDEFINED,
    General = GENERAL,
    ColorAttachmentOptimal = COLOR_ATTACHMENT_OPTIMAL,
    DepthStencilAttachmentOptimal = DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    DepthStencilReadOnlyOptimal = DEPTH_STENCIL_READ_ONLY_OPTIMAL,
    ShaderReadOnlyOptimal = SHADER_READ_ONLY_OPTIMAL,
    TransferSrcOptimal = TRANSFER_SRC_OPTIMAL,
    TransferDstOptimal = TRANSFER_DST_OPTIMAL,
    Preinitialized = PREINITIALIZED,
    DepthReadOnlyStencilAttachmentOptimal = DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL,
    DepthAttachmentStencilReadOnlyOptimal = DEPTH_ATTACHMENT_STENCIL_READ_ONLY_OPTIMAL,
    PresentSrc = PRESENT_SRC_KHR,
}

impl Image {
    /// Returns whether HTILE is in use for this image in `layout`.
    pub fn layout_has_htile(&self, layout: ImageLayout, queue_mask: u32) -> bool {
        if self.is_tc_compatible_htile() {
            return layout != ImageLayout::General;
        }

        self.has_htile()
            && (layout == ImageLayout::DepthStencilAttachmentOptimal
                || (layout == ImageLayout::TransferDstOptimal
                    && queue_mask == QueueFamily::General.mask()))
    }

    /// Returns whether the depth data may be HTILE-compressed in `layout`.
    #[inline]
    pub fn layout_is_htile_compressed(&self, layout: ImageLayout, queue_mask: u32) -> bool {
        self.layout_has_htile(layout, queue_mask)
    }

    /// Returns whether a pending fast clear may stay unresolved in `layout`.
    pub fn layout_can_fast_clear(&self, layout: ImageLayout, queue_mask: u32) -> bool {
        self.fast_clears_enabled()
            && layout == ImageLayout::ColorAttachmentOptimal
            && queue_mask == QueueFamily::General.mask()
    }

    /// Returns whether the color data may be DCC-compressed in `layout`.
    pub fn layout_dcc_compressed(&self, layout: ImageLayout, queue_mask: u32) -> bool {
        // Compute queues cannot store to DCC-compressed images.
        if layout == ImageLayout::TransferDstOptimal
            && queue_mask & QueueFamily::Compute.mask() != 0
        {
            return false;
        }

        self.has_dcc() && layout != ImageLayout::General
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        image::{Format, ImageMetadataSizes},
        tests::{color_image, depth_image},
    };

    const GENERAL: u32 = 1;
    const GENERAL_AND_COMPUTE: u32 = 0b11;

    #[test]
    fn htile_layouts() {
        let (device, _) = gfx_device!();
        let image = depth_image(&device, Format::D32_SFLOAT);

        assert!(image.layout_has_htile(ImageLayout::DepthStencilAttachmentOptimal, GENERAL));
        assert!(image.layout_has_htile(ImageLayout::TransferDstOptimal, GENERAL));
        assert!(!image.layout_has_htile(ImageLayout::TransferDstOptimal, GENERAL_AND_COMPUTE));
        assert!(!image.layout_has_htile(ImageLayout::ShaderReadOnlyOptimal, GENERAL));
        assert!(!image.layout_has_htile(ImageLayout::General, GENERAL));
    }

    #[test]
    fn dcc_layouts() {
        let (device, _) = gfx_device!();
        let image = color_image(
            &device,
            1,
            ImageMetadataSizes {
                cmask: 256,
                dcc: 1024,
                ..Default::default()
            },
        );

        assert!(image.layout_dcc_compressed(ImageLayout::ShaderReadOnlyOptimal, GENERAL));
        assert!(image.layout_dcc_compressed(ImageLayout::TransferDstOptimal, GENERAL));
        assert!(!image.layout_dcc_compressed(ImageLayout::TransferDstOptimal, GENERAL_AND_COMPUTE));
        assert!(!image.layout_dcc_compressed(ImageLayout::General, GENERAL));

        assert!(image.layout_can_fast_clear(ImageLayout::ColorAttachmentOptimal, GENERAL));
        assert!(!image.layout_can_fast_clear(ImageLayout::ColorAttachmentOptimal, GENERAL_AND_COMPUTE));
        assert!(!image.layout_can_fast_clear(ImageLayout::ShaderReadOnlyOptimal, GENERAL));
    }

    #[test]
    fn raw_conversion() {
        let raw: ash::vk::ImageLayout = ImageLayout::PresentSrc.into();
        assert_eq!(raw, ash::vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(
            ImageLayout::try_from(ash::vk::ImageLayout::GENERAL),
            Ok(ImageLayout::General),
        );
    }
}
