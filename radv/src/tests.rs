// Copyright (c) 2024 The radv-rs developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

#![cfg(test)]

use crate::{
    cs::Packet,
    descriptor_set::{PipelineLayout, PipelineLayoutCreateInfo},
    device::Device,
    image::{Format, Image, ImageCreateInfo, ImageMetadataSizes, ImageUsage},
    pipeline::{GraphicsPipeline, GraphicsPipelineCreateInfo},
    registers::*,
    shader::{ShaderStage, ShaderVariant, ShaderVariantCreateInfo, UserDataSlot, UserSgprLocations},
    winsys::{BoDomain, BoFlags},
};
use std::sync::Arc;

/// Creates a device on a `NullWinsys` with one general and one compute queue family. Returns the
/// device and the winsys.
macro_rules! gfx_device {
    () => {
        gfx_device!(Polaris10)
    };
    ($family:ident) => {
        gfx_device!($family, $crate::device::DeviceCreateInfo {
            queue_create_infos: vec![
                $crate::device::QueueCreateInfo {
                    queue_family: $crate::device::QueueFamily::General,
                    queue_count: 1,
                },
                $crate::device::QueueCreateInfo {
                    queue_family: $crate::device::QueueFamily::Compute,
                    queue_count: 1,
                },
                $crate::device::QueueCreateInfo {
                    queue_family: $crate::device::QueueFamily::Transfer,
                    queue_count: 1,
                },
            ],
            ..Default::default()
        })
    };
    ($family:ident, $create_info:expr) => {{
        let ws = $crate::winsys::NullWinsys::new();
        let properties = $crate::device::PhysicalDeviceProperties {
            address32_hi: $crate::winsys::NullWinsys::ADDRESS32_HI,
            ..$crate::device::PhysicalDeviceProperties::for_family(
                $crate::device::ChipFamily::$family,
            )
        };
        let physical = $crate::device::PhysicalDevice::new(ws.clone(), properties);
        let (device, _queues) = $crate::device::Device::new(physical, $create_info).unwrap();

        (device, ws)
    }};
}

/// Creates a device on a `NullWinsys` and returns it with its general queue and the winsys.
macro_rules! gfx_dev_and_queue {
    () => {
        gfx_dev_and_queue!(Polaris10)
    };
    ($family:ident) => {{
        let ws = $crate::winsys::NullWinsys::new();
        let properties = $crate::device::PhysicalDeviceProperties {
            address32_hi: $crate::winsys::NullWinsys::ADDRESS32_HI,
            ..$crate::device::PhysicalDeviceProperties::for_family(
                $crate::device::ChipFamily::$family,
            )
        };
        let physical = $crate::device::PhysicalDevice::new(ws.clone(), properties);
        let (device, mut queues) =
            $crate::device::Device::new(physical, Default::default()).unwrap();

        (device, queues.next().unwrap(), ws)
    }};
}

/// Returns every packet of `words`.
pub(crate) fn packets(words: &[u32]) -> Vec<Packet<'_>> {
    let mut cs_words = words;
    let mut out = Vec::new();

    while let Some((&header, rest)) = cs_words.split_first() {
        let len = pkt3_payload_len(header) as usize;
        assert_eq!(header >> 30, PKT_TYPE_3, "malformed packet header {:#x}", header);
        assert!(rest.len() >= len, "truncated packet {:#x}", header);
        out.push(Packet {
            opcode: pkt3_opcode(header),
            predicate: header & 1 != 0,
            body: &rest[..len],
        });
        cs_words = &rest[len..];
    }

    out
}

/// Counts the register write packets whose first register is `reg`.
pub(crate) fn count_reg_writes(words: &[u32], reg: u32) -> usize {
    packets(words)
        .iter()
        .filter(|p| p.register() == Some(reg))
        .count()
}

/// Counts the packets with the given opcode.
pub(crate) fn count_opcode(words: &[u32], opcode: u32) -> usize {
    packets(words).iter().filter(|p| p.opcode == opcode).count()
}

/// Returns the index of the first packet with the given opcode.
pub(crate) fn position_of_opcode(words: &[u32], opcode: u32) -> Option<usize> {
    packets(words).iter().position(|p| p.opcode == opcode)
}

/// Returns the index of the first write to `reg`.
pub(crate) fn position_of_reg(words: &[u32], reg: u32) -> Option<usize> {
    packets(words).iter().position(|p| p.register() == Some(reg))
}

/// Returns the event types written with `EVENT_WRITE`, in order.
pub(crate) fn events(words: &[u32]) -> Vec<u32> {
    packets(words)
        .iter()
        .filter(|p| p.opcode == PKT3_EVENT_WRITE)
        .map(|p| p.body[0] & 0x3f)
        .collect()
}

/// Creates a 64x64 depth image with HTILE.
pub(crate) fn depth_image(device: &Arc<Device>, format: Format) -> Arc<Image> {
    Image::new(
        device,
        ImageCreateInfo {
            format,
            extent: [64, 64, 1],
            usage: ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::SAMPLED,
            surface_size: 64 * 64 * 4,
            metadata: ImageMetadataSizes {
                htile: 4096,
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap()
}

/// Creates a 64x64 color image with the given metadata.
pub(crate) fn color_image(
    device: &Arc<Device>,
    samples: u32,
    metadata: ImageMetadataSizes,
) -> Arc<Image> {
    Image::new(
        device,
        ImageCreateInfo {
            format: Format::R8G8B8A8_UNORM,
            extent: [64, 64, 1],
            samples,
            usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
            surface_size: 64 * 64 * 4 * samples as u64,
            metadata,
            ..Default::default()
        },
    )
    .unwrap()
}

/// Creates a pipeline layout without sets or push constants.
pub(crate) fn empty_layout() -> Arc<PipelineLayout> {
    PipelineLayout::new(PipelineLayoutCreateInfo::default()).unwrap()
}

/// Creates a shader variant with 256 bytes of code in its own buffer object.
pub(crate) fn shader(
    device: &Arc<Device>,
    stage: ShaderStage,
    user_sgprs: UserSgprLocations,
) -> Arc<ShaderVariant> {
    let code_bo = device
        .winsys()
        .buffer_create(256, 256, BoDomain::Vram, BoFlags::READ_ONLY)
        .unwrap();

    ShaderVariant::new(ShaderVariantCreateInfo {
        stage,
        code_bo,
        code_offset: 0,
        code_size: 256,
        user_sgprs,
        scratch_bytes_per_wave: 0,
        max_scratch_waves: 0,
        block_size: [64, 1, 1],
    })
}

/// User SGPR locations of a typical vertex shader: two descriptor sets, push constants, vertex
/// buffers and the draw parameters.
pub(crate) fn vs_user_sgprs() -> UserSgprLocations {
    let mut locs = UserSgprLocations::default();
    locs.set(UserDataSlot::ScratchRingOffsets, 0, 2);
    locs.set_descriptor_sets(0, 2, 2);
    locs.set(UserDataSlot::PushConstants, 4, 1);
    locs.set(UserDataSlot::VertexBuffers, 5, 1);
    locs.set(UserDataSlot::BaseVertexStartInstance, 6, 2);
    locs
}

/// User SGPR locations of a typical fragment shader: two descriptor sets and push constants.
pub(crate) fn fs_user_sgprs() -> UserSgprLocations {
    let mut locs = UserSgprLocations::default();
    locs.set(UserDataSlot::ScratchRingOffsets, 0, 2);
    locs.set_descriptor_sets(0, 2, 2);
    locs.set(UserDataSlot::PushConstants, 4, 1);
    locs
}

/// Creates a vertex + fragment pipeline with dynamic viewport and scissor, after letting `f`
/// adjust the create info.
pub(crate) fn graphics_pipeline(
    device: &Arc<Device>,
    f: impl FnOnce(&mut GraphicsPipelineCreateInfo),
) -> Arc<GraphicsPipeline> {
    let mut create_info = GraphicsPipelineCreateInfo::new(
        empty_layout(),
        vec![
            shader(device, ShaderStage::Vertex, vs_user_sgprs()),
            shader(device, ShaderStage::Fragment, fs_user_sgprs()),
        ],
    );
    create_info.static_state.viewport_count = 1;
    create_info.static_state.scissor_count = 1;
    f(&mut create_info);

    GraphicsPipeline::new(device, create_info).unwrap()
}
