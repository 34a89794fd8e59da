use std::{ptr, sync::Arc};

use vulkanalia::{vk, vk::DeviceV1_0};

use crate::utils::error::SnnError;

use super::context::VulkanDevice;

/// A Vulkan buffer together with its dedicated allocation.
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub properties: vk::MemoryPropertyFlags,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: &Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self, SnnError> {
        unsafe {
            let buffer_info = vk::BufferCreateInfo {
                s_type: vk::StructureType::BUFFER_CREATE_INFO,
                next: ptr::null(),
                flags: vk::BufferCreateFlags::empty(),
                size,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                queue_family_index_count: 0,
                queue_family_indices: ptr::null(),
            };

            let vk_device = &device.device;
            let buffer = vk_device.create_buffer(&buffer_info, None)?;
            let mem_requirements = vk_device.get_buffer_memory_requirements(buffer);

            let memory_type =
                match device.find_memory_type(mem_requirements.memory_type_bits, properties) {
                    Ok(index) => index,
                    Err(e) => {
                        vk_device.destroy_buffer(buffer, None);
                        return Err(e);
                    }
                };

            let alloc_info = vk::MemoryAllocateInfo {
                s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                next: ptr::null(),
                allocation_size: mem_requirements.size,
                memory_type_index: memory_type,
            };

            let memory = match vk_device.allocate_memory(&alloc_info, None) {
                Ok(memory) => memory,
                Err(e) => {
                    vk_device.destroy_buffer(buffer, None);
                    return Err(e.into());
                }
            };

            if let Err(e) = vk_device.bind_buffer_memory(buffer, memory, 0) {
                vk_device.destroy_buffer(buffer, None);
                vk_device.free_memory(memory, None);
                return Err(e.into());
            }

            Ok(Self {
                buffer,
                memory,
                size,
                properties,
                device: Arc::clone(device),
            })
        }
    }

    /// Host-visible, coherent buffer used for staging transfers.
    pub fn host_visible(
        device: &Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, SnnError> {
        Self::new(
            device,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Copy raw bytes into the start of the buffer.
    pub fn copy_into(&self, data: &[u8]) -> Result<(), SnnError> {
        self.copy_into_at(0, data)
    }

    /// Copy raw bytes into the buffer starting at `offset`.
    pub fn copy_into_at(&self, offset: vk::DeviceSize, data: &[u8]) -> Result<(), SnnError> {
        let data_size = data.len() as vk::DeviceSize;

        if offset + data_size > self.size {
            return Err(SnnError::Vulkan(format!(
                "Data size {} at offset {} exceeds GPU buffer size {}",
                data_size, offset, self.size
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        unsafe {
            let data_ptr = self.device.device.map_memory(
                self.memory,
                offset,
                data_size,
                vk::MemoryMapFlags::empty(),
            )? as *mut u8;

            std::ptr::copy_nonoverlapping(data.as_ptr(), data_ptr, data.len());

            self.device.device.unmap_memory(self.memory);
        }

        Ok(())
    }

    /// Read the whole buffer back to the host.
    pub fn read_memory(&self) -> Result<Vec<u8>, SnnError> {
        let mut output_data = vec![0u8; self.size as usize];

        unsafe {
            let data_ptr = self.device.device.map_memory(
                self.memory,
                0,
                self.size,
                vk::MemoryMapFlags::empty(),
            )? as *const u8;

            std::ptr::copy_nonoverlapping(data_ptr, output_data.as_mut_ptr(), output_data.len());

            self.device.device.unmap_memory(self.memory);
        }

        Ok(output_data)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}
