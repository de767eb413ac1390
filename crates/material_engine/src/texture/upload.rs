//! Texture upload planning
//!
//! The upload of a texture is described as a list of [`UploadStep`]s that the
//! backend records into a single one-shot command buffer. Planning is pure so
//! the barrier sequence can be checked without a device.

use ash::vk;

use crate::backend::{LayoutTransition, UploadStep};

/// 8-bit UNORM format holding `channels` components per texel
pub const fn format_for_channels(channels: u32) -> Option<vk::Format> {
    match channels {
        1 => Some(vk::Format::R8_UNORM),
        2 => Some(vk::Format::R8G8_UNORM),
        3 => Some(vk::Format::R8G8B8_UNORM),
        4 => Some(vk::Format::R8G8B8A8_UNORM),
        _ => None,
    }
}

/// Full mip chain length, `floor(log2(max(w, h))) + 1`
pub const fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = if width > height { width } else { height };
    if largest == 0 {
        1
    } else {
        u32::BITS - largest.leading_zeros()
    }
}

const fn transition(
    mip: u32,
    level_count: u32,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
) -> UploadStep {
    UploadStep::Transition(LayoutTransition {
        base_mip_level: mip,
        level_count,
        old_layout,
        new_layout,
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Transition last written by transfer into shader-readable layout
const fn to_shader_read(mip: u32, old_layout: vk::ImageLayout, src_access: vk::AccessFlags) -> UploadStep {
    transition(
        mip,
        1,
        old_layout,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        src_access,
        vk::AccessFlags::SHADER_READ,
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
    )
}

/// Copy mip 0 from staging, blit the remaining levels, and leave every level
/// in `SHADER_READ_ONLY_OPTIMAL`
pub fn build_upload_plan(width: u32, height: u32, mip_levels: u32) -> Vec<UploadStep> {
    let mip_levels = mip_levels.max(1);
    let mut steps = Vec::with_capacity(2 + 3 * mip_levels as usize);

    // All levels start undefined and are written by transfer
    steps.push(transition(
        0,
        mip_levels,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::AccessFlags::empty(),
        vk::AccessFlags::TRANSFER_WRITE,
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::PipelineStageFlags::TRANSFER,
    ));
    steps.push(UploadStep::CopyBufferToImage { width, height });

    let mut mip_width = i32::try_from(width).unwrap_or(i32::MAX);
    let mut mip_height = i32::try_from(height).unwrap_or(i32::MAX);

    for level in 1..mip_levels {
        let previous = level - 1;
        steps.push(transition(
            previous,
            1,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
        ));

        let next_width = if mip_width > 1 { mip_width / 2 } else { 1 };
        let next_height = if mip_height > 1 { mip_height / 2 } else { 1 };
        steps.push(UploadStep::Blit {
            src_mip: previous,
            src_width: mip_width,
            src_height: mip_height,
            dst_mip: level,
            dst_width: next_width,
            dst_height: next_height,
        });

        steps.push(to_shader_read(
            previous,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::TRANSFER_READ,
        ));

        mip_width = next_width;
        mip_height = next_height;
    }

    // The last level was only ever a blit (or copy) destination
    steps.push(to_shader_read(
        mip_levels - 1,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::AccessFlags::TRANSFER_WRITE,
    ));
    steps
}
