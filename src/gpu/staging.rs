//! Host <-> device transfers through temporary host-visible buffers.

use std::sync::Arc;

use vulkanalia::vk;

use crate::{texture::color::ColorFormat, utils::error::SnnError};

use super::{
    command_buffer::CommandBuffer, context::VulkanDevice, memory::Buffer, vk_image::Image,
};

/// Device buffer sizes are rounded up to this many bytes.
pub const BUFFER_ALIGNMENT: vk::DeviceSize = 16;

fn align_up(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    size.div_ceil(alignment) * alignment
}

/// Record commands into a throwaway command buffer and wait for them.
pub fn one_time_submit<F>(device: &Arc<VulkanDevice>, record: F) -> Result<(), SnnError>
where
    F: FnOnce(&CommandBuffer) -> Result<(), SnnError>,
{
    let command_buffer = CommandBuffer::new(device)?;
    command_buffer.begin()?;
    record(&command_buffer)?;
    command_buffer.submit_and_wait()
}

/// Bytes needed for every texel of `image`.
pub fn image_byte_size(image: &Image) -> Result<vk::DeviceSize, SnnError> {
    let format = ColorFormat::from_vk_format(image.format());
    if format == ColorFormat::None {
        return Err(SnnError::Vulkan(format!(
            "no texel size known for {:?}",
            image.format()
        )));
    }
    let extent = image.extent();
    Ok(extent.width as vk::DeviceSize
        * extent.height as vk::DeviceSize
        * extent.depth as vk::DeviceSize
        * format.bytes() as vk::DeviceSize)
}

/// Allocate a device-local buffer and fill it with `data`.
pub fn create_device_local_buffer(
    device: &Arc<VulkanDevice>,
    usage: vk::BufferUsageFlags,
    data: &[u8],
) -> Result<Buffer, SnnError> {
    let size = align_up(data.len().max(1) as vk::DeviceSize, BUFFER_ALIGNMENT);
    let buffer = Buffer::new(
        device,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    set_device_buffer_via_staging(device, &buffer, data)?;
    Ok(buffer)
}

pub fn set_device_buffer_via_staging(
    device: &Arc<VulkanDevice>,
    dst: &Buffer,
    data: &[u8],
) -> Result<(), SnnError> {
    if data.is_empty() {
        return Ok(());
    }

    let staging = Buffer::host_visible(
        device,
        data.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
    )?;
    staging.copy_into(data)?;

    one_time_submit(device, |cb| {
        cb.copy_buffer(&staging, dst, data.len() as vk::DeviceSize);
        Ok(())
    })
}

/// Overwrite every texel of `image` and leave it in `final_layout`.
pub fn set_device_image_via_staging(
    device: &Arc<VulkanDevice>,
    image: &Image,
    data: &[u8],
    final_layout: vk::ImageLayout,
) -> Result<(), SnnError> {
    let size = image_byte_size(image)?;
    if data.len() as vk::DeviceSize != size {
        return Err(SnnError::Vulkan(format!(
            "upload of {} bytes into image of {} bytes",
            data.len(),
            size
        )));
    }

    let staging = Buffer::host_visible(device, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
    staging.copy_into(data)?;

    // previous contents are discarded
    image.set_layout(vk::ImageLayout::UNDEFINED);

    one_time_submit(device, |cb| {
        cb.transition_image_layout(image, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        cb.copy_buffer_to_image(&staging, image)?;
        cb.transition_image_layout(image, final_layout)?;
        Ok(())
    })
}

/// Read every texel of `image` back to the host.
pub fn get_device_image_via_staging(
    device: &Arc<VulkanDevice>,
    image: &Image,
) -> Result<Vec<u8>, SnnError> {
    let size = image_byte_size(image)?;
    let staging = Buffer::host_visible(device, size, vk::BufferUsageFlags::TRANSFER_DST)?;

    one_time_submit(device, |cb| {
        let layout = image.layout();
        if layout != vk::ImageLayout::GENERAL && layout != vk::ImageLayout::TRANSFER_SRC_OPTIMAL {
            cb.transition_image_layout(image, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)?;
        }
        cb.copy_image_to_buffer(image, &staging)
    })?;

    staging.read_memory()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sizes_round_to_sixteen() {
        assert_eq!(align_up(1, BUFFER_ALIGNMENT), 16);
        assert_eq!(align_up(16, BUFFER_ALIGNMENT), 16);
        assert_eq!(align_up(33, BUFFER_ALIGNMENT), 48);
    }
}
