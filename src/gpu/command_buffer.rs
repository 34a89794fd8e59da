use std::{cell::Cell, ptr, sync::Arc};

use vulkanalia::{vk, vk::DeviceV1_0};

use crate::utils::error::SnnError;

use super::{
    barrier::{BarrierBatch, image_memory_barrier, layout_transition},
    context::VulkanDevice,
    memory::Buffer,
    pipeline::{DescriptorSet, Pipeline, SpecConstant, pack_push_constants},
    query::TimestampQueryPool,
    vk_image::Image,
};

/// A primary command buffer that is reset and re-recorded between submits.
pub struct CommandBuffer {
    buffer: vk::CommandBuffer,
    recording: Cell<bool>,
    device: Arc<VulkanDevice>,
}

impl CommandBuffer {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self, SnnError> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            next: ptr::null(),
            command_pool: device.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
        };

        let buffer = unsafe { device.device.allocate_command_buffers(&alloc_info)?[0] };

        Ok(Self {
            buffer,
            recording: Cell::new(false),
            device: Arc::clone(device),
        })
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    pub fn is_recording(&self) -> bool {
        self.recording.get()
    }

    pub fn begin(&self) -> Result<(), SnnError> {
        let begin_info = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            next: ptr::null(),
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            inheritance_info: ptr::null(),
        };

        unsafe {
            self.device
                .device
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
            self.device
                .device
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        self.recording.set(true);
        Ok(())
    }

    pub fn end(&self) -> Result<(), SnnError> {
        unsafe { self.device.device.end_command_buffer(self.buffer)? };
        self.recording.set(false);
        Ok(())
    }

    /// End recording if needed, submit, and block until the GPU is done.
    pub fn submit_and_wait(&self) -> Result<(), SnnError> {
        if self.is_recording() {
            self.end()?;
        }
        self.device.submit_and_wait(&[self.buffer])
    }

    /// Record a single layout transition. Returns `false` if the image is already in `to`.
    pub fn transition_image_layout(
        &self,
        image: &Image,
        to: vk::ImageLayout,
    ) -> Result<bool, SnnError> {
        let from = image.layout();
        if from == to {
            return Ok(false);
        }

        let transition = layout_transition(from, to)?;
        let barrier = image_memory_barrier(image.handle(), from, to, &transition);

        unsafe {
            self.device.device.cmd_pipeline_barrier(
                self.buffer,
                transition.src_stage,
                transition.dst_stage,
                vk::DependencyFlags::empty(),
                &[] as &[vk::MemoryBarrier],
                &[] as &[vk::BufferMemoryBarrier],
                &[barrier],
            );
        }

        image.set_layout(to);
        Ok(true)
    }

    /// Flush a batch, one pipeline barrier per stage-pair group, in order.
    pub fn transition_image_layouts(&self, batch: BarrierBatch) -> usize {
        let groups = batch.groups().len();

        for group in batch.groups() {
            unsafe {
                self.device.device.cmd_pipeline_barrier(
                    self.buffer,
                    group.src_stage,
                    group.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[] as &[vk::MemoryBarrier],
                    &[] as &[vk::BufferMemoryBarrier],
                    &group.barriers,
                );
            }
        }

        if groups > 0 {
            log::debug!(
                "Recorded {} image barriers in {} pipeline barriers",
                batch.barrier_count(),
                groups
            );
        }

        batch.finish();
        groups
    }

    pub fn bind_pipeline_and_descriptor_sets(&self, pipeline: &Pipeline, set: &DescriptorSet) {
        unsafe {
            self.device.device.cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.pipeline,
            );
            self.device.device.cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.layout,
                0,
                &[set.set],
                &[],
            );
        }
    }

    /// Bind like [`Self::bind_pipeline_and_descriptor_sets`] and push `constants` at offset 0.
    pub fn bind_pipeline_and_constants(
        &self,
        pipeline: &Pipeline,
        set: &DescriptorSet,
        constants: &[SpecConstant],
    ) -> Result<(), SnnError> {
        let bytes = pack_push_constants(constants);
        if bytes.len() as u32 > pipeline.push_constant_size {
            return Err(SnnError::RenderPass(format!(
                "{} bytes of push constants exceed the pipeline range of {}",
                bytes.len(),
                pipeline.push_constant_size
            )));
        }

        self.bind_pipeline_and_descriptor_sets(pipeline, set);
        if !bytes.is_empty() {
            unsafe {
                self.device.device.cmd_push_constants(
                    self.buffer,
                    pipeline.layout,
                    vk::ShaderStageFlags::COMPUTE,
                    0,
                    &bytes,
                );
            }
        }
        Ok(())
    }

    pub fn dispatch(&self, x: u32, y: u32, z: u32) {
        unsafe { self.device.device.cmd_dispatch(self.buffer, x, y, z) };
    }

    /// Make writes of the previous dispatch visible to the next one.
    pub fn dispatch_barrier(&self) {
        let barrier = vk::MemoryBarrier {
            s_type: vk::StructureType::MEMORY_BARRIER,
            next: ptr::null(),
            src_access_mask: vk::AccessFlags::SHADER_WRITE,
            dst_access_mask: vk::AccessFlags::SHADER_READ,
        };

        unsafe {
            self.device.device.cmd_pipeline_barrier(
                self.buffer,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[] as &[vk::BufferMemoryBarrier],
                &[] as &[vk::ImageMemoryBarrier],
            );
        }
    }

    pub fn copy_buffer(&self, src: &Buffer, dst: &Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device
                .device
                .cmd_copy_buffer(self.buffer, src.buffer, dst.buffer, &[region]);
        }
    }

    /// Copy tightly packed texels into `image`, which must be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(&self, src: &Buffer, image: &Image) -> Result<(), SnnError> {
        if image.layout() != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            return Err(SnnError::Vulkan(format!(
                "copy into image in layout {:?}, expected TRANSFER_DST_OPTIMAL",
                image.layout()
            )));
        }

        unsafe {
            self.device.device.cmd_copy_buffer_to_image(
                self.buffer,
                src.buffer,
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[whole_image_copy(image)],
            );
        }
        Ok(())
    }

    /// Copy `image` into `dst`; the image must be in `GENERAL` or `TRANSFER_SRC_OPTIMAL`.
    pub fn copy_image_to_buffer(&self, image: &Image, dst: &Buffer) -> Result<(), SnnError> {
        let layout = image.layout();
        if layout != vk::ImageLayout::GENERAL && layout != vk::ImageLayout::TRANSFER_SRC_OPTIMAL {
            return Err(SnnError::Vulkan(format!(
                "copy from image in layout {:?}, expected GENERAL or TRANSFER_SRC_OPTIMAL",
                layout
            )));
        }

        unsafe {
            self.device.device.cmd_copy_image_to_buffer(
                self.buffer,
                image.handle(),
                layout,
                dst.buffer,
                &[whole_image_copy(image)],
            );
        }
        Ok(())
    }

    pub fn reset_query_pool(&self, pool: &TimestampQueryPool) {
        unsafe {
            self.device
                .device
                .cmd_reset_query_pool(self.buffer, pool.pool, 0, pool.count);
        }
    }

    pub fn write_timestamp(&self, pool: &TimestampQueryPool, query: u32) {
        unsafe {
            self.device.device.cmd_write_timestamp(
                self.buffer,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                pool.pool,
                query,
            );
        }
    }
}

fn whole_image_copy(image: &Image) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
        image_extent: image.extent(),
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .free_command_buffers(self.device.command_pool, &[self.buffer]);
        }
    }
}
