// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Images and their compression metadata.
//!
//! Depth images may carry HTILE, color images CMASK, FMASK (multisampled only) and DCC. The
//! metadata surfaces are allocated together with the image, in the same buffer object. Their
//! *contents* are only valid in some layouts: which layouts is answered by the predicates in
//! [`layout`], and the command buffer uses those answers to decide what must be initialized or
//! decompressed when an image changes layout.
//!
//! Surface sizes come from the tiling code, which is not part of this crate: the caller provides
//! them in [`ImageMetadataSizes`].

pub use self::layout::ImageLayout;
use crate::{
    device::{DebugFlags, Device, QueueFamily},
    macros::{vulkan_bitflags, vulkan_enum},
    sync::{QUEUE_FAMILY_EXTERNAL, QUEUE_FAMILY_FOREIGN, QUEUE_FAMILY_IGNORED},
    winsys::{Bo, BoDomain, BoFlags},
    DeviceSize, Validated, ValidationError, VulkanError,
};
use smallvec::SmallVec;
use std::{ops::Range, sync::Arc};

pub mod layout;

vulkan_bitflags! {
    /// An individual data type within an image.
    ImageAspects = ImageAspectFlags(u32);

    COLOR = COLOR,
    DEPTH = DEPTH,
    STENCIL = STENCIL,
}

vulkan_bitflags! {
    /// Describes how an image is going to be used.
    ImageUsage = ImageUsageFlags(u32);

    TRANSFER_SRC = TRANSFER_SRC,
    TRANSFER_DST = TRANSFER_DST,
    SAMPLED = SAMPLED,
    STORAGE = STORAGE,
    COLOR_ATTACHMENT = COLOR_ATTACHMENT,
    DEPTH_STENCIL_ATTACHMENT = DEPTH_STENCIL_ATTACHMENT,
    TRANSIENT_ATTACHMENT = TRANSIENT_ATTACHMENT,
    INPUT_ATTACHMENT = INPUT_ATTACHMENT,
}

vulkan_enum! {
    /// The formats the command buffer engine needs to tell apart.
    Format
    impl {
        /// Returns whether the format has a depth component.
        pub fn is_depth(self) -> bool {
            matches!(
                self,
                Format::D16_UNORM
                    | Format::X8_D24_UNORM_PACK32
                    | Format::D32_SFLOAT
                    | Format::D16_UNORM_S8_UINT
                    | Format::D24_UNORM_S8_UINT
                    | Format::D32_SFLOAT_S8_UINT
            )
        }

        /// Returns whether the format has a stencil component.
        pub fn has_stencil(self) -> bool {
            matches!(
                self,
                Format::S8_UINT
                    | Format::D16_UNORM_S8_UINT
                    | Format::D24_UNORM_S8_UINT
                    | Format::D32_SFLOAT_S8_UINT
            )
        }

        /// Returns whether the format is a depth and/or stencil format.
        pub fn is_depth_stencil(self) -> bool {
            self.is_depth() || self.has_stencil()
        }

        /// Returns the aspects of the format.
        pub fn aspects(self) -> ImageAspects {
            let mut aspects = ImageAspects::empty();

            if self.is_depth() {
                aspects |= ImageAspects::DEPTH;
            }

            if self.has_stencil() {
                aspects |= ImageAspects::STENCIL;
            }

            if aspects.is_empty() {
                ImageAspects::COLOR
            } else {
                aspects
            }
        }

        /// Returns the factor the depth bias constant is scaled by for this depth format.
        pub fn depth_offset_scale(self) -> f32 {
            match self {
                Format::D16_UNORM | Format::D16_UNORM_S8_UINT => (1u32 << 16) as f32,
                Format::X8_D24_UNORM_PACK32 | Format::D24_UNORM_S8_UINT => (1u32 << 24) as f32,
                _ => 1.0,
            }
        }
    }
    = Format(i32);

    R8G8B8A8_UNORM = R8G8B8A8_UNORM,
    R8G8B8A8_SRGB = R8G8B8A8_SRGB,
    B8G8R8A8_UNORM = B8G8R8A8_UNORM,
    B8G8R8A8_SRGB = B8G8R8A8_SRGB,
    R16G16B16A16_SFLOAT = R16G16B16A16_SFLOAT,
    R32_UINT = R32_UINT,
    R32_SFLOAT = R32_SFLOAT,
    R32G32B32A32_SFLOAT = R32G32B32A32_SFLOAT,
    D16_UNORM = D16_UNORM,
    X8_D24_UNORM_PACK32 = X8_D24_UNORM_PACK32,
    D32_SFLOAT = D32_SFLOAT,
    S8_UINT = S8_UINT,
    D16_UNORM_S8_UINT = D16_UNORM_S8_UINT,
    D24_UNORM_S8_UINT = D24_UNORM_S8_UINT,
    D32_SFLOAT_S8_UINT = D32_SFLOAT_S8_UINT,
}

/// A range of mip levels and array layers of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresourceRange {
    pub aspects: ImageAspects,
    pub mip_levels: (u32, u32),
    pub array_layers: (u32, u32),
}

impl ImageSubresourceRange {
    #[inline]
    pub fn mip_level_range(&self) -> Range<u32> {
        self.mip_levels.0..self.mip_levels.0 + self.mip_levels.1
    }

    #[inline]
    pub fn array_layer_range(&self) -> Range<u32> {
        self.array_layers.0..self.array_layers.0 + self.array_layers.1
    }
}

/// How an image is shared between queue families.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Sharing {
    /// Owned by one queue family at a time; ownership moves with release/acquire barriers.
    #[default]
    Exclusive,
    /// Usable by all the listed queue families at once.
    Concurrent(SmallVec<[QueueFamily; 3]>),
}

/// Sizes of the compression metadata surfaces of an image, in bytes. Zero means absent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageMetadataSizes {
    pub htile: DeviceSize,
    /// Whether shaders can read the depth surface without decompressing HTILE first.
    pub tc_compatible_htile: bool,
    pub cmask: DeviceSize,
    pub fmask: DeviceSize,
    pub dcc: DeviceSize,
}

/// Parameters to create a new `Image`.
#[derive(Clone, Debug)]
pub struct ImageCreateInfo {
    pub format: Format,
    pub extent: [u32; 3],
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: u32,
    pub usage: ImageUsage,
    pub sharing: Sharing,
    /// Size of the main surface in bytes.
    pub surface_size: DeviceSize,
    pub metadata: ImageMetadataSizes,
}

impl Default for ImageCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            format: Format::R8G8B8A8_UNORM,
            extent: [1, 1, 1],
            mip_levels: 1,
            array_layers: 1,
            samples: 1,
            usage: ImageUsage::empty(),
            sharing: Sharing::Exclusive,
            surface_size: 0,
            metadata: ImageMetadataSizes::default(),
        }
    }
}

/// Where a metadata surface lives inside the image's buffer object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetadataSurface {
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

const METADATA_ALIGNMENT: DeviceSize = 4096;

/// A GPU image.
#[derive(Debug)]
pub struct Image {
    bo: Arc<Bo>,
    format: Format,
    extent: [u32; 3],
    mip_levels: u32,
    array_layers: u32,
    samples: u32,
    usage: ImageUsage,
    exclusive: bool,
    queue_family_mask: u32,
    htile: Option<MetadataSurface>,
    tc_compatible_htile: bool,
    cmask: Option<MetadataSurface>,
    fmask: Option<MetadataSurface>,
    dcc: Option<MetadataSurface>,
    clear_value_offset: Option<DeviceSize>,
    dcc_pred_offset: Option<DeviceSize>,
    fast_clears: bool,
}

impl Image {
    /// Creates an image and allocates its memory, including its metadata surfaces.
    pub fn new(
        device: &Arc<Device>,
        create_info: ImageCreateInfo,
    ) -> Result<Arc<Image>, Validated<VulkanError>> {
        Self::validate_new(&create_info)?;

        let ImageCreateInfo {
            format,
            extent,
            mip_levels,
            array_layers,
            samples,
            usage,
            sharing,
            surface_size,
            metadata,
        } = create_info;

        let debug = device.debug_flags();
        let mut size = surface_size;
        let mut place = |bytes: DeviceSize| {
            (bytes != 0).then(|| {
                let offset = size.next_multiple_of(METADATA_ALIGNMENT);
                size = offset + bytes;
                MetadataSurface {
                    offset,
                    size: bytes,
                }
            })
        };

        let htile = if debug.intersects(DebugFlags::NO_HIZ) {
            None
        } else {
            place(metadata.htile)
        };
        let cmask = place(metadata.cmask);
        let fmask = place(metadata.fmask);
        let dcc = if debug.intersects(DebugFlags::NO_DCC) {
            None
        } else {
            place(metadata.dcc)
        };

        // Two dwords of fast clear color, then the 64-bit predicate of the DCC decompress pass.
        let clear_value_offset = (cmask.is_some() || dcc.is_some()).then(|| place(8)).flatten();
        let dcc_pred_offset = dcc.is_some().then(|| place(8)).flatten();

        let (exclusive, queue_family_mask) = match &sharing {
            Sharing::Exclusive => (true, 0),
            Sharing::Concurrent(families) => {
                (false, families.iter().fold(0, |mask, f| mask | f.mask()))
            }
        };

        let bo = device
            .winsys()
            .buffer_create(size, METADATA_ALIGNMENT, BoDomain::Vram, BoFlags::NO_CPU_ACCESS)?;

        Ok(Arc::new(Image {
            bo,
            format,
            extent,
            mip_levels,
            array_layers,
            samples,
            usage,
            exclusive,
            queue_family_mask,
            htile,
            tc_compatible_htile: htile.is_some() && metadata.tc_compatible_htile,
            cmask,
            fmask,
            dcc,
            clear_value_offset: clear_value_offset.map(|s| s.offset),
            dcc_pred_offset: dcc_pred_offset.map(|s| s.offset),
            fast_clears: !debug.intersects(DebugFlags::NO_FAST_CLEARS),
        }))
    }

    fn validate_new(create_info: &ImageCreateInfo) -> Result<(), Box<ValidationError>> {
        let &ImageCreateInfo {
            format,
            mip_levels,
            array_layers,
            samples,
            surface_size,
            metadata,
            ..
        } = create_info;

        if surface_size == 0 {
            return Err(ValidationError::new("create_info.surface_size", "is zero"));
        }

        if mip_levels == 0 || array_layers == 0 {
            return Err(ValidationError::new(
                "create_info.mip_levels",
                "mip_levels and array_layers must be at least 1",
            ));
        }

        if !samples.is_power_of_two() || samples > 16 {
            return Err(ValidationError::new(
                "create_info.samples",
                "is not a supported sample count",
            ));
        }

        if format.is_depth_stencil() {
            if metadata.cmask != 0 || metadata.fmask != 0 || metadata.dcc != 0 {
                return Err(ValidationError::new(
                    "create_info.metadata",
                    "depth/stencil images can only have HTILE",
                ));
            }
        } else if metadata.htile != 0 {
            return Err(ValidationError::new(
                "create_info.metadata.htile",
                "color images cannot have HTILE",
            ));
        }

        if metadata.fmask != 0 && samples == 1 {
            return Err(ValidationError::new(
                "create_info.metadata.fmask",
                "single-sampled images cannot have FMASK",
            ));
        }

        if let Sharing::Concurrent(families) = &create_info.sharing {
            if families.len() < 2 {
                return Err(ValidationError::new(
                    "create_info.sharing",
                    "concurrent sharing requires at least two queue families",
                ));
            }
        }

        Ok(())
    }

    #[inline]
    pub fn bo(&self) -> &Arc<Bo> {
        &self.bo
    }

    #[inline]
    pub fn va(&self) -> u64 {
        self.bo.va()
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> [u32; 3] {
        self.extent
    }

    #[inline]
    pub fn samples(&self) -> u32 {
        self.samples
    }

    #[inline]
    pub fn usage(&self) -> ImageUsage {
        self.usage
    }

    #[inline]
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Returns a range covering every subresource of the image.
    pub fn subresource_range(&self) -> ImageSubresourceRange {
        ImageSubresourceRange {
            aspects: self.format.aspects(),
            mip_levels: (0, self.mip_levels),
            array_layers: (0, self.array_layers),
        }
    }

    #[inline]
    pub fn htile(&self) -> Option<MetadataSurface> {
        self.htile
    }

    #[inline]
    pub fn cmask(&self) -> Option<MetadataSurface> {
        self.cmask
    }

    #[inline]
    pub fn fmask(&self) -> Option<MetadataSurface> {
        self.fmask
    }

    #[inline]
    pub fn dcc(&self) -> Option<MetadataSurface> {
        self.dcc
    }

    #[inline]
    pub fn has_htile(&self) -> bool {
        self.htile.is_some()
    }

    #[inline]
    pub fn is_tc_compatible_htile(&self) -> bool {
        self.tc_compatible_htile
    }

    #[inline]
    pub fn has_cmask(&self) -> bool {
        self.cmask.is_some()
    }

    #[inline]
    pub fn has_fmask(&self) -> bool {
        self.fmask.is_some()
    }

    #[inline]
    pub fn has_dcc(&self) -> bool {
        self.dcc.is_some()
    }

    /// Returns the GPU address of the two-dword fast clear color.
    #[inline]
    pub fn clear_value_va(&self) -> Option<u64> {
        self.clear_value_offset.map(|o| self.bo.va() + o)
    }

    /// Returns the GPU address of the predicate that enables the DCC decompress pass.
    #[inline]
    pub fn dcc_pred_va(&self) -> Option<u64> {
        self.dcc_pred_offset.map(|o| self.bo.va() + o)
    }

    #[inline]
    pub fn fast_clears_enabled(&self) -> bool {
        self.fast_clears
    }

    /// Returns the mask of queue families that may access the image, as seen by a command
    /// buffer of `cmd_family` naming `family` in a barrier.
    pub fn queue_family_mask(&self, family: u32, cmd_family: QueueFamily) -> u32 {
        if !self.exclusive {
            return self.queue_family_mask;
        }

        match family {
            QUEUE_FAMILY_EXTERNAL | QUEUE_FAMILY_FOREIGN => (1 << QueueFamily::COUNT) - 1,
            QUEUE_FAMILY_IGNORED => cmd_family.mask(),
            family => 1u32.checked_shl(family).unwrap_or(0),
        }
    }
}
