use std::{ffi::CString, ptr, sync::Arc};

use vulkanalia::{
    vk,
    vk::{DeviceV1_0, Handle},
};

use crate::utils::error::SnnError;

use super::{context::VulkanDevice, memory::Buffer, vk_image::Image};

/// A 32-bit specialization or push constant value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpecValue {
    I32(i32),
    U32(u32),
    F32(f32),
}

impl SpecValue {
    pub fn to_le_bytes(self) -> [u8; 4] {
        match self {
            SpecValue::I32(v) => v.to_le_bytes(),
            SpecValue::U32(v) => v.to_le_bytes(),
            SpecValue::F32(v) => v.to_le_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpecConstant {
    pub id: u32,
    pub value: SpecValue,
}

impl SpecConstant {
    pub fn new(id: u32, value: SpecValue) -> Self {
        Self { id, value }
    }
}

/// Serialize constants for `vkCmdPushConstants`.
///
/// Every value occupies 4 little-endian bytes, in slice order, with no padding.
pub fn pack_push_constants(constants: &[SpecConstant]) -> Vec<u8> {
    constants.iter().flat_map(|c| c.value.to_le_bytes()).collect()
}

/// Map entries and data block for `VkSpecializationInfo`.
pub fn specialization_entries(
    constants: &[SpecConstant],
) -> (Vec<vk::SpecializationMapEntry>, Vec<u8>) {
    let entries = constants
        .iter()
        .enumerate()
        .map(|(i, c)| vk::SpecializationMapEntry {
            constant_id: c.id,
            offset: (i * 4) as u32,
            size: 4,
        })
        .collect();
    (entries, pack_push_constants(constants))
}

/// Resource types a compute shader binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    StorageImage,
    /// Combined image sampler
    SampledImage,
    UniformBuffer,
    StorageBuffer,
}

impl DescriptorKind {
    pub fn vk_type(self) -> vk::DescriptorType {
        match self {
            DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            DescriptorKind::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        }
    }

    /// Layout an image must be in while bound through this kind.
    pub fn image_layout(self) -> Option<vk::ImageLayout> {
        match self {
            DescriptorKind::StorageImage => Some(vk::ImageLayout::GENERAL),
            DescriptorKind::SampledImage => Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            DescriptorKind::UniformBuffer | DescriptorKind::StorageBuffer => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSetBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
}

impl DescriptorSetBinding {
    pub fn new(binding: u32, kind: DescriptorKind) -> Self {
        Self { binding, kind }
    }
}

/// Reinterpret SPIR-V bytes as 32-bit words.
pub fn spirv_words(code: &[u8]) -> Result<Vec<u32>, SnnError> {
    if code.is_empty() || code.len() % 4 != 0 {
        return Err(SnnError::RenderPass(format!(
            "SPIR-V size {} is not a positive multiple of 4",
            code.len()
        )));
    }

    Ok(code
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect())
}

pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    pub fn new(device: &Arc<VulkanDevice>, code: &[u8]) -> Result<Self, SnnError> {
        let words = spirv_words(code)?;

        let shader_info = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            next: ptr::null(),
            flags: vk::ShaderModuleCreateFlags::empty(),
            code_size: words.len() * 4,
            code: words.as_ptr(),
        };

        let module = unsafe { device.device.create_shader_module(&shader_info, None)? };

        Ok(Self {
            module,
            device: Arc::clone(device),
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Compute pipeline with a single descriptor set.
pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set_layout: vk::DescriptorSetLayout,
    pub push_constant_size: u32,
    bindings: Vec<DescriptorSetBinding>,
    device: Arc<VulkanDevice>,
}

impl Pipeline {
    pub fn new(
        device: &Arc<VulkanDevice>,
        shader: &ShaderModule,
        bindings: &[DescriptorSetBinding],
        spec_constants: &[SpecConstant],
        push_constant_size: u32,
    ) -> Result<Self, SnnError> {
        let vk_device = &device.device;

        let layout_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| vk::DescriptorSetLayoutBinding {
                binding: b.binding,
                descriptor_type: b.kind.vk_type(),
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                immutable_samplers: ptr::null(),
            })
            .collect();

        unsafe {
            let descriptor_layout_info = vk::DescriptorSetLayoutCreateInfo {
                s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
                next: ptr::null(),
                flags: vk::DescriptorSetLayoutCreateFlags::empty(),
                binding_count: layout_bindings.len() as u32,
                bindings: layout_bindings.as_ptr(),
            };

            let set_layout = vk_device.create_descriptor_set_layout(&descriptor_layout_info, None)?;

            let push_constant_range = vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                offset: 0,
                size: push_constant_size,
            };

            let pipeline_layout_info = vk::PipelineLayoutCreateInfo {
                s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
                next: ptr::null(),
                flags: vk::PipelineLayoutCreateFlags::empty(),
                set_layout_count: 1,
                set_layouts: &set_layout,
                push_constant_range_count: u32::from(push_constant_size > 0),
                push_constant_ranges: &push_constant_range,
            };

            let layout = match vk_device.create_pipeline_layout(&pipeline_layout_info, None) {
                Ok(layout) => layout,
                Err(e) => {
                    vk_device.destroy_descriptor_set_layout(set_layout, None);
                    return Err(e.into());
                }
            };

            let (map_entries, spec_data) = specialization_entries(spec_constants);
            let specialization_info = vk::SpecializationInfo {
                map_entry_count: map_entries.len() as u32,
                map_entries: map_entries.as_ptr(),
                data_size: spec_data.len(),
                data: spec_data.as_ptr().cast(),
            };

            let entry_point =
                CString::new("main").map_err(|e| SnnError::RenderPass(e.to_string()))?;
            let pipeline_info = vk::ComputePipelineCreateInfo {
                s_type: vk::StructureType::COMPUTE_PIPELINE_CREATE_INFO,
                next: ptr::null(),
                flags: vk::PipelineCreateFlags::empty(),
                stage: vk::PipelineShaderStageCreateInfo {
                    s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                    next: ptr::null(),
                    flags: vk::PipelineShaderStageCreateFlags::empty(),
                    stage: vk::ShaderStageFlags::COMPUTE,
                    module: shader.module,
                    name: entry_point.as_ptr(),
                    specialization_info: if spec_constants.is_empty() {
                        ptr::null()
                    } else {
                        &specialization_info
                    },
                },
                layout,
                base_pipeline_handle: vk::Pipeline::null(),
                base_pipeline_index: -1,
            };

            let pipeline = match vk_device.create_compute_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            ) {
                Ok((pipelines, _)) => pipelines[0],
                Err(e) => {
                    vk_device.destroy_pipeline_layout(layout, None);
                    vk_device.destroy_descriptor_set_layout(set_layout, None);
                    return Err(SnnError::RenderPass(format!(
                        "Failed to create compute pipeline: {:?}",
                        e
                    )));
                }
            };

            Ok(Self {
                pipeline,
                layout,
                set_layout,
                push_constant_size,
                bindings: bindings.to_vec(),
                device: Arc::clone(device),
            })
        }
    }

    pub fn bindings(&self) -> &[DescriptorSetBinding] {
        &self.bindings
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
            self.device
                .device
                .destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

/// A descriptor set and the pool it was allocated from.
pub struct DescriptorSet {
    pub set: vk::DescriptorSet,
    pool: vk::DescriptorPool,
    bindings: Vec<DescriptorSetBinding>,
    device: Arc<VulkanDevice>,
}

impl DescriptorSet {
    pub fn new(device: &Arc<VulkanDevice>, pipeline: &Pipeline) -> Result<Self, SnnError> {
        let kinds = [
            DescriptorKind::StorageImage,
            DescriptorKind::SampledImage,
            DescriptorKind::UniformBuffer,
            DescriptorKind::StorageBuffer,
        ];
        let pool_sizes: Vec<vk::DescriptorPoolSize> = kinds
            .iter()
            .filter_map(|&kind| {
                let count = pipeline.bindings().iter().filter(|b| b.kind == kind).count();
                (count > 0).then(|| vk::DescriptorPoolSize {
                    type_: kind.vk_type(),
                    descriptor_count: count as u32,
                })
            })
            .collect();

        unsafe {
            let descriptor_pool_info = vk::DescriptorPoolCreateInfo {
                s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
                next: ptr::null(),
                flags: vk::DescriptorPoolCreateFlags::empty(),
                max_sets: 1,
                pool_size_count: pool_sizes.len() as u32,
                pool_sizes: pool_sizes.as_ptr(),
            };

            let pool = device
                .device
                .create_descriptor_pool(&descriptor_pool_info, None)?;

            let set_layouts = [pipeline.set_layout];
            let alloc_info = vk::DescriptorSetAllocateInfo {
                s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
                next: ptr::null(),
                descriptor_pool: pool,
                descriptor_set_count: 1,
                set_layouts: set_layouts.as_ptr(),
            };

            let set = match device.device.allocate_descriptor_sets(&alloc_info) {
                Ok(sets) => sets[0],
                Err(e) => {
                    device.device.destroy_descriptor_pool(pool, None);
                    return Err(e.into());
                }
            };

            Ok(Self {
                set,
                pool,
                bindings: pipeline.bindings().to_vec(),
                device: Arc::clone(device),
            })
        }
    }

    fn kind_of(&self, binding: u32) -> Result<DescriptorKind, SnnError> {
        self.bindings
            .iter()
            .find(|b| b.binding == binding)
            .map(|b| b.kind)
            .ok_or_else(|| SnnError::RenderPass(format!("no descriptor at binding {}", binding)))
    }

    pub fn write_buffer(&self, binding: u32, buffer: &Buffer) -> Result<(), SnnError> {
        let kind = self.kind_of(binding)?;
        if kind.image_layout().is_some() {
            return Err(SnnError::RenderPass(format!(
                "binding {} expects an image, got a buffer",
                binding
            )));
        }

        let buffer_info = vk::DescriptorBufferInfo {
            buffer: buffer.buffer,
            offset: 0,
            range: buffer.size,
        };

        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            next: ptr::null(),
            dst_set: self.set,
            dst_binding: binding,
            dst_array_element: 0,
            descriptor_count: 1,
            descriptor_type: kind.vk_type(),
            image_info: ptr::null(),
            buffer_info: &buffer_info,
            texel_buffer_view: ptr::null(),
        };

        unsafe {
            self.device
                .device
                .update_descriptor_sets(&[write], &[] as &[vk::CopyDescriptorSet]);
        }
        Ok(())
    }

    /// Point `binding` at `image`; returns the layout the image must be in at dispatch.
    pub fn write_image(
        &self,
        binding: u32,
        image: &Image,
        sampler: Option<vk::Sampler>,
    ) -> Result<vk::ImageLayout, SnnError> {
        let kind = self.kind_of(binding)?;
        let layout = kind.image_layout().ok_or_else(|| {
            SnnError::RenderPass(format!("binding {} expects a buffer, got an image", binding))
        })?;

        let sampler = match (kind, sampler) {
            (DescriptorKind::SampledImage, Some(sampler)) => sampler,
            (DescriptorKind::SampledImage, None) => {
                return Err(SnnError::RenderPass(format!(
                    "sampled image at binding {} needs a sampler",
                    binding
                )));
            }
            _ => vk::Sampler::null(),
        };

        let image_info = vk::DescriptorImageInfo {
            sampler,
            image_view: image.view(),
            image_layout: layout,
        };

        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            next: ptr::null(),
            dst_set: self.set,
            dst_binding: binding,
            dst_array_element: 0,
            descriptor_count: 1,
            descriptor_type: kind.vk_type(),
            image_info: &image_info,
            buffer_info: ptr::null(),
            texel_buffer_view: ptr::null(),
        };

        unsafe {
            self.device
                .device
                .update_descriptor_sets(&[write], &[] as &[vk::CopyDescriptorSet]);
        }
        Ok(layout)
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}
