use std::{ffi::CString, fmt, path::PathBuf, ptr, sync::Arc};

use vulkanalia::{
    Device, Entry, Instance,
    loader::{LIBRARY, LibloadingLoader},
    vk::{self, DeviceV1_0, InstanceV1_0},
};

use crate::{config::EngineConfig, utils::error::SnnError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuBackendType {
    Cpu,
    OpenGl,
    Vulkan,
}

/// The device an inference core runs against.
///
/// The core only ever borrows the context, so the caller decides when the
/// underlying device goes away.
#[derive(Clone)]
pub enum GpuContext {
    Cpu,
    Vulkan(Arc<VulkanDevice>),
}

impl GpuContext {
    pub fn new(backend: GpuBackendType, config: &EngineConfig) -> Result<Self, SnnError> {
        match backend {
            GpuBackendType::Cpu => Ok(GpuContext::Cpu),
            GpuBackendType::Vulkan => Ok(GpuContext::Vulkan(Arc::new(VulkanDevice::new(
                config.device_index,
                config.resize_shader.clone(),
            )?))),
            GpuBackendType::OpenGl => Err(SnnError::Backend(
                "OpenGL contexts are not supported by this build".to_string(),
            )),
        }
    }

    pub fn backend_type(&self) -> GpuBackendType {
        match self {
            GpuContext::Cpu => GpuBackendType::Cpu,
            GpuContext::Vulkan(_) => GpuBackendType::Vulkan,
        }
    }

    pub fn vulkan(&self) -> Option<&Arc<VulkanDevice>> {
        match self {
            GpuContext::Vulkan(device) => Some(device),
            GpuContext::Cpu => None,
        }
    }
}

impl fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuContext::Cpu => f.write_str("GpuContext::Cpu"),
            GpuContext::Vulkan(device) => write!(f, "GpuContext::Vulkan({})", device.name),
        }
    }
}

/// One logical Vulkan device with a single compute queue.
pub struct VulkanDevice {
    _entry: Entry,
    instance: Instance,
    pub device: Device,
    physical_device: vk::PhysicalDevice,
    pub queue: vk::Queue,
    pub queue_family_index: u32,
    pub command_pool: vk::CommandPool,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Nanoseconds per timestamp tick
    pub timestamp_period: f32,
    pub name: String,
    pub resize_shader: Option<PathBuf>,
}

impl VulkanDevice {
    pub fn new(device_index: usize, resize_shader: Option<PathBuf>) -> Result<Self, SnnError> {
        unsafe {
            let loader = LibloadingLoader::new(LIBRARY)
                .map_err(|e| SnnError::Vulkan(format!("failed to load Vulkan: {}", e)))?;
            let entry = Entry::new(loader)
                .map_err(|e| SnnError::Vulkan(format!("failed to load Vulkan: {}", e)))?;

            let aname = CString::new("snn").map_err(|e| SnnError::Vulkan(e.to_string()))?;

            let appinfo = vk::ApplicationInfo {
                s_type: vk::StructureType::APPLICATION_INFO,
                next: ptr::null(),
                application_name: aname.as_ptr(),
                application_version: vk::make_version(1, 0, 0),
                engine_name: aname.as_ptr(),
                engine_version: vk::make_version(1, 0, 0),
                api_version: vk::make_version(1, 1, 0),
            };

            let create_info = vk::InstanceCreateInfo {
                s_type: vk::StructureType::INSTANCE_CREATE_INFO,
                next: ptr::null(),
                flags: vk::InstanceCreateFlags::empty(),
                application_info: &appinfo,
                enabled_layer_count: 0,
                enabled_layer_names: ptr::null(),
                enabled_extension_count: 0,
                enabled_extension_names: ptr::null(),
            };

            let instance = entry.create_instance(&create_info, None)?;

            let physical_devices = instance.enumerate_physical_devices()?;
            let physical_device = match physical_devices.get(device_index) {
                Some(&device) => device,
                None => {
                    instance.destroy_instance(None);
                    return Err(SnnError::Vulkan(format!(
                        "device index {} out of range ({} devices)",
                        device_index,
                        physical_devices.len()
                    )));
                }
            };

            let queue_family_index = match instance
                .get_physical_device_queue_family_properties(physical_device)
                .iter()
                .enumerate()
                .find(|(_, properties)| properties.queue_flags.contains(vk::QueueFlags::COMPUTE))
                .map(|(index, _)| index as u32)
            {
                Some(index) => index,
                None => {
                    instance.destroy_instance(None);
                    return Err(SnnError::Vulkan("no compute queue family found".to_string()));
                }
            };

            let queue_priorities = [1.0f32];
            let queue_info = vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                next: ptr::null(),
                flags: vk::DeviceQueueCreateFlags::empty(),
                queue_family_index,
                queue_count: 1,
                queue_priorities: queue_priorities.as_ptr(),
            };

            let device_features = vk::PhysicalDeviceFeatures::default();

            let device_create_info = vk::DeviceCreateInfo {
                s_type: vk::StructureType::DEVICE_CREATE_INFO,
                next: ptr::null(),
                flags: vk::DeviceCreateFlags::empty(),
                queue_create_info_count: 1,
                queue_create_infos: &queue_info,
                enabled_layer_count: 0,
                enabled_layer_names: ptr::null(),
                enabled_extension_count: 0,
                enabled_extension_names: ptr::null(),
                enabled_features: &device_features,
            };

            let device = instance.create_device(physical_device, &device_create_info, None)?;
            let queue = device.get_device_queue(queue_family_index, 0);

            let command_pool_info = vk::CommandPoolCreateInfo {
                s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                next: ptr::null(),
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                queue_family_index,
            };

            let command_pool = device.create_command_pool(&command_pool_info, None)?;

            let properties = instance.get_physical_device_properties(physical_device);
            let memory_properties = instance.get_physical_device_memory_properties(physical_device);
            let name = properties.device_name.to_string_lossy().into_owned();

            log::info!("Using Vulkan device {}: {}", device_index, name);

            Ok(Self {
                _entry: entry,
                instance,
                device,
                physical_device,
                queue,
                queue_family_index,
                command_pool,
                memory_properties,
                timestamp_period: properties.limits.timestamp_period,
                name,
                resize_shader,
            })
        }
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32, SnnError> {
        for i in 0..self.memory_properties.memory_type_count {
            if (type_filter & (1 << i)) != 0
                && self.memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
            {
                return Ok(i);
            }
        }

        Err(SnnError::Vulkan(format!(
            "failed to find suitable memory type for {:?}",
            properties
        )))
    }

    /// Submit recorded command buffers to the compute queue and block until they finish.
    pub fn submit_and_wait(&self, command_buffers: &[vk::CommandBuffer]) -> Result<(), SnnError> {
        if command_buffers.is_empty() {
            return Ok(());
        }

        unsafe {
            let fence_info = vk::FenceCreateInfo {
                s_type: vk::StructureType::FENCE_CREATE_INFO,
                next: ptr::null(),
                flags: vk::FenceCreateFlags::empty(),
            };
            let fence = self.device.create_fence(&fence_info, None)?;

            let submit_info = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                next: ptr::null(),
                wait_semaphore_count: 0,
                wait_semaphores: ptr::null(),
                wait_dst_stage_mask: ptr::null(),
                command_buffer_count: command_buffers.len() as u32,
                command_buffers: command_buffers.as_ptr(),
                signal_semaphore_count: 0,
                signal_semaphores: ptr::null(),
            };

            let result = self
                .device
                .queue_submit(self.queue, &[submit_info], fence)
                .and_then(|_| self.device.wait_for_fences(&[fence], true, u64::MAX));

            self.device.destroy_fence(fence, None);
            result?;
        }

        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_context_needs_no_driver() {
        let context = GpuContext::new(GpuBackendType::Cpu, &EngineConfig::default()).unwrap();
        assert_eq!(context.backend_type(), GpuBackendType::Cpu);
        assert!(context.vulkan().is_none());
    }

    #[test]
    fn opengl_is_rejected() {
        let result = GpuContext::new(GpuBackendType::OpenGl, &EngineConfig::default());
        assert!(matches!(result, Err(SnnError::Backend(_))));
    }
}
