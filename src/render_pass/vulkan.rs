use std::{collections::BTreeMap, path::Path, rc::Rc, sync::Arc};

use vulkanalia::vk;

use crate::{
    gpu::{
        barrier::BarrierBatch,
        command_buffer::CommandBuffer,
        context::VulkanDevice,
        memory::Buffer,
        pipeline::{DescriptorSet, Pipeline, ShaderModule, SpecConstant},
        query::TimestampQueryPool,
        staging::{create_device_local_buffer, set_device_buffer_via_staging, set_device_image_via_staging},
        vk_image::{Image, Sampler, default_image_usage},
    },
    graph::pass::InferencePassVulkan,
    texture::{color::ColorFormat, image_texture::ImageTextureRef},
    utils::{
        dump::{create_dir_if_not_exists, dump_text_outputs, normalize_name},
        error::SnnError,
        fp16::pack_f16,
    },
};

use super::RenderPass;

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn floats_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Texel bytes of a weight image stored as `format`.
fn weight_bytes(format: ColorFormat, values: &[f32]) -> Result<Vec<u8>, SnnError> {
    match format {
        ColorFormat::Rgba16f => Ok(pack_f16(values)),
        ColorFormat::Rgba32f | ColorFormat::R32f => Ok(floats_to_bytes(values)),
        other => Err(SnnError::RenderPass(format!(
            "unsupported weight format {}",
            other
        ))),
    }
}

fn buffer_usage() -> vk::BufferUsageFlags {
    vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::UNIFORM_BUFFER
}

/// A compute pass with its pipeline and constant resources, recorded into the
/// backend's shared command buffer.
pub struct VulkanRenderPass {
    name: String,
    pass: InferencePassVulkan,
    pipeline: Pipeline,
    descriptors: DescriptorSet,
    sampler: Sampler,
    query_pool: TimestampQueryPool,
    push_constants: Vec<SpecConstant>,
    // keep buffers alive while the descriptor set references them
    _constant_buffers: Vec<Buffer>,
    runtime_buffers: BTreeMap<u32, Buffer>,
    weight_images: Vec<(u32, Rc<Image>)>,
    run_idx: u32,
    recorded: bool,
    command_buffer: Rc<CommandBuffer>,
    device: Arc<VulkanDevice>,
}

impl VulkanRenderPass {
    pub fn new(
        device: &Arc<VulkanDevice>,
        name: String,
        pass: InferencePassVulkan,
        command_buffer: Rc<CommandBuffer>,
    ) -> Result<Self, SnnError> {
        let code = words_to_bytes(&pass.vk_codes);
        let shader = ShaderModule::new(device, &code)?;
        let push_constants = pass.push_constant_values();
        let pipeline = Pipeline::new(
            device,
            &shader,
            &pass.descriptor_bindings(),
            &pass.spec_constants,
            pass.push_constant_size(),
        )?;
        let descriptors = DescriptorSet::new(device, &pipeline)?;
        let sampler = Sampler::new(device, vk::Filter::NEAREST)?;
        let query_pool = TimestampQueryPool::new(device)?;

        let mut constant_buffers = Vec::new();
        for (&binding, data) in &pass.uniform_buffers {
            let buffer = create_device_local_buffer(device, buffer_usage(), &words_to_bytes(data))?;
            descriptors.write_buffer(binding, &buffer)?;
            constant_buffers.push(buffer);
        }
        for (&binding, data) in &pass.object_buffers {
            let buffer = create_device_local_buffer(device, buffer_usage(), &floats_to_bytes(data))?;
            descriptors.write_buffer(binding, &buffer)?;
            constant_buffers.push(buffer);
        }

        let mut runtime_buffers = BTreeMap::new();
        for (&binding, &(offset, len)) in &pass.runtime_uniforms {
            let words = runtime_words(&pass, 0, offset, len)?;
            let buffer = create_device_local_buffer(device, buffer_usage(), &words_to_bytes(words))?;
            descriptors.write_buffer(binding, &buffer)?;
            runtime_buffers.insert(binding, buffer);
        }

        let mut weight_images = Vec::new();
        for (&binding, data) in &pass.weight_buffers {
            let [w, h, d] = pass.weight_dims.get(&binding).copied().ok_or_else(|| {
                SnnError::RenderPass(format!("{}: no dimensions for weights at binding {}", name, binding))
            })?;
            let format = pass.weight_format(binding);
            let image = Rc::new(Image::new(
                device,
                vk::Extent3D {
                    width: w,
                    height: h,
                    depth: d,
                },
                format.vk_format(),
                default_image_usage(),
            )?);
            set_device_image_via_staging(
                device,
                &image,
                &weight_bytes(format, data)?,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?;
            descriptors.write_image(binding, &image, Some(sampler.sampler))?;
            weight_images.push((binding, image));
        }

        log::debug!(
            "{}: {} constant buffers, {} runtime buffers, {} weight images",
            name,
            constant_buffers.len(),
            runtime_buffers.len(),
            weight_images.len()
        );

        Ok(Self {
            name,
            pass,
            pipeline,
            descriptors,
            sampler,
            query_pool,
            push_constants,
            _constant_buffers: constant_buffers,
            runtime_buffers,
            weight_images,
            run_idx: 0,
            recorded: false,
            command_buffer,
            device: Arc::clone(device),
        })
    }

    /// Copy this run's ring entry into every runtime uniform buffer.
    fn update_runtime_uniforms(&self) -> Result<(), SnnError> {
        let base = self.pass.runtime_offset(self.run_idx);
        for (binding, &(offset, len)) in &self.pass.runtime_uniforms {
            let words = runtime_words(&self.pass, base, offset, len)?;
            if let Some(buffer) = self.runtime_buffers.get(binding) {
                set_device_buffer_via_staging(&self.device, buffer, &words_to_bytes(words))?;
            }
            log::debug!(
                "Update {} runtime parameter for binding {}, {}:{} at {}",
                self.run_idx,
                binding,
                offset,
                len,
                base
            );
        }
        Ok(())
    }
}

fn runtime_words(
    pass: &InferencePassVulkan,
    base: usize,
    offset: u32,
    len: u32,
) -> Result<&[u32], SnnError> {
    let start = base + offset as usize;
    let end = start + len as usize;
    pass.runtime_data.get(start..end).ok_or_else(|| {
        SnnError::RenderPass(format!(
            "runtime uniform range {}..{} exceeds {} words of runtime data",
            start,
            end,
            pass.runtime_data.len()
        ))
    })
}

impl RenderPass for VulkanRenderPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &mut self,
        inputs: &[ImageTextureRef],
        outputs: &[ImageTextureRef],
    ) -> Result<(), SnnError> {
        if !self.pass.runtime_uniforms.is_empty() {
            self.update_runtime_uniforms()?;
        }
        self.run_idx += 1;

        let output = outputs
            .first()
            .ok_or_else(|| SnnError::RenderPass(format!("{}: no output image", self.name)))?;
        let dst = output.borrow().vk_image(0)?;

        let mut bound: Vec<(Rc<Image>, vk::ImageLayout)> = Vec::new();
        bound.push((Rc::clone(&dst), self.descriptors.write_image(0, &dst, None)?));

        for (uniform, &index) in &self.pass.inputs {
            let input = inputs.get(index as usize).ok_or_else(|| {
                SnnError::RenderPass(format!(
                    "{}: input {} ({}) is not bound, stage has {} inputs",
                    self.name,
                    index,
                    uniform,
                    inputs.len()
                ))
            })?;
            let image = input.borrow().vk_image(0)?;
            let layout = self
                .descriptors
                .write_image(index + 1, &image, Some(self.sampler.sampler))?;
            bound.push((image, layout));
        }

        for (_, image) in &self.weight_images {
            bound.push((Rc::clone(image), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
        }

        let cb = &self.command_buffer;
        let mut batch = BarrierBatch::new();
        for (image, layout) in &bound {
            batch.add(image, *layout)?;
        }
        cb.transition_image_layouts(batch);

        cb.bind_pipeline_and_constants(&self.pipeline, &self.descriptors, &self.push_constants)?;

        let [x, y, z] = self.pass.program.dispatch_size;
        log::debug!("{}: dispatch {}, {}, {}", self.name, x, y, z);
        cb.reset_query_pool(&self.query_pool);
        cb.write_timestamp(&self.query_pool, TimestampQueryPool::START);
        cb.dispatch(x, y, z);
        cb.write_timestamp(&self.query_pool, TimestampQueryPool::STOP);
        cb.dispatch_barrier();
        self.recorded = true;

        output.borrow_mut().mark_gpu_written();
        Ok(())
    }

    fn debug_pass_inputs(&self, folder: &Path, inputs: &[ImageTextureRef]) -> Result<(), SnnError> {
        let input = inputs
            .first()
            .ok_or_else(|| SnnError::RenderPass(format!("{}: no input to dump", self.name)))?;
        let layer_dir = folder.join(normalize_name(&self.name));
        create_dir_if_not_exists(&layer_dir)?;

        let mut texture = input.borrow_mut();
        log::debug!("Saving input dump for layer: {} {}", self.name, texture.depth());
        texture.save_png_slices(&layer_dir, 0, "_input")?;
        texture.save_bin(&folder.join(format!("{}_input.dump", self.name)))
    }

    fn debug_pass_weights(&self, folder: &Path, pass_index: usize) -> Result<(), SnnError> {
        for (binding, values) in &self.pass.weight_buffers {
            let row_len = self
                .pass
                .weight_dims
                .get(binding)
                .map(|d| d[0] as usize * self.pass.weight_format(*binding).channels() as usize)
                .filter(|&n| n > 0)
                .unwrap_or(values.len().max(1));
            let rows: Vec<Vec<f32>> = values.chunks(row_len).map(|c| c.to_vec()).collect();
            dump_text_outputs(
                folder,
                &format!("{}_weights_{}_{}", self.name, pass_index, binding),
                &rows,
            )?;
        }
        Ok(())
    }

    fn elapsed_ns(&self) -> Result<Option<f64>, SnnError> {
        if !self.recorded {
            return Ok(None);
        }
        self.query_pool.elapsed_ns().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::fp16::unpack_f16;

    #[test]
    fn half_weights_are_packed() {
        let bytes = weight_bytes(ColorFormat::Rgba16f, &[1.0, -2.0, 0.5, 0.0]).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(unpack_f16(&bytes), vec![1.0, -2.0, 0.5, 0.0]);
    }

    #[test]
    fn float_weights_are_copied() {
        let bytes = weight_bytes(ColorFormat::R32f, &[3.5]).unwrap();
        assert_eq!(bytes, 3.5f32.to_le_bytes().to_vec());
    }

    #[test]
    fn byte_weights_are_rejected() {
        assert!(matches!(
            weight_bytes(ColorFormat::Rgba8, &[1.0]),
            Err(SnnError::RenderPass(_))
        ));
    }

    #[test]
    fn runtime_words_are_bounds_checked() {
        let pass = InferencePassVulkan {
            runtime_data: (0..8).collect(),
            period: 4,
            ..Default::default()
        };
        assert_eq!(runtime_words(&pass, 4, 1, 2).unwrap(), &[5, 6]);
        assert!(runtime_words(&pass, 4, 3, 2).is_err());
    }
}
