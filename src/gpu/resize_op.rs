//! Compute-shader image scaling with optional per-channel normalization.

use std::{borrow::Cow, rc::Rc, sync::Arc};

use vulkanalia::vk;

use crate::{texture::resize::ResizeFilter, utils::error::SnnError};

use super::{
    barrier::BarrierBatch,
    context::VulkanDevice,
    pipeline::{DescriptorKind, DescriptorSet, DescriptorSetBinding, Pipeline, ShaderModule},
    staging::{create_device_local_buffer, one_time_submit},
    vk_image::{Image, Sampler},
};

#[cfg(has_resize_shader)]
macro_rules! include_shader {
    ($name:literal) => {
        include_bytes!(concat!(env!("OUT_DIR"), "/shaders/", $name))
    };
}

#[cfg(has_resize_shader)]
const RESIZE_SHADER: Option<&[u8]> = Some(include_shader!("resize.spv"));
#[cfg(not(has_resize_shader))]
const RESIZE_SHADER: Option<&[u8]> = None;

pub const LOCAL_SIZE: [u32; 3] = [4, 8, 1];

const BINDINGS: [DescriptorSetBinding; 3] = [
    DescriptorSetBinding {
        binding: 0,
        kind: DescriptorKind::StorageImage,
    },
    DescriptorSetBinding {
        binding: 1,
        kind: DescriptorKind::SampledImage,
    },
    DescriptorSetBinding {
        binding: 2,
        kind: DescriptorKind::StorageBuffer,
    },
];

fn resize_shader_code(device: &VulkanDevice) -> Result<Cow<'static, [u8]>, SnnError> {
    if let Some(code) = RESIZE_SHADER {
        return Ok(Cow::Borrowed(code));
    }

    match &device.resize_shader {
        Some(path) => Ok(Cow::Owned(std::fs::read(path)?)),
        None => Err(SnnError::Image(
            "no resize shader compiled in and none configured".to_string(),
        )),
    }
}

/// Storage buffer contents: `uvec4 dims`, `vec4 means`, `vec4 norms`.
pub fn resize_params_bytes(extent: vk::Extent3D, means: &[f32; 4], norms: &[f32; 4]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(48);
    for v in [extent.width, extent.height, extent.depth, 0] {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    for v in means.iter().chain(norms.iter()) {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn group_count(extent: vk::Extent3D) -> [u32; 3] {
    [
        extent.width.div_ceil(LOCAL_SIZE[0]),
        extent.height.div_ceil(LOCAL_SIZE[1]),
        extent.depth.div_ceil(LOCAL_SIZE[2]),
    ]
}

/// Sample `src` into every texel of `dst`, then apply `(v - mean) * norm`.
pub fn resize_image(
    device: &Arc<VulkanDevice>,
    src: &Rc<Image>,
    dst: &Rc<Image>,
    filter: ResizeFilter,
    means: &[f32; 4],
    norms: &[f32; 4],
) -> Result<(), SnnError> {
    let code = resize_shader_code(device)?;
    let shader = ShaderModule::new(device, &code)?;
    let pipeline = Pipeline::new(device, &shader, &BINDINGS, &[], 0)?;
    let descriptors = DescriptorSet::new(device, &pipeline)?;

    let vk_filter = match filter {
        ResizeFilter::Nearest => vk::Filter::NEAREST,
        ResizeFilter::Linear => vk::Filter::LINEAR,
    };
    let sampler = Sampler::new(device, vk_filter)?;

    let params = create_device_local_buffer(
        device,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        &resize_params_bytes(dst.extent(), means, norms),
    )?;

    let dst_layout = descriptors.write_image(0, dst, None)?;
    let src_layout = descriptors.write_image(1, src, Some(sampler.sampler))?;
    descriptors.write_buffer(2, &params)?;

    let [x, y, z] = group_count(dst.extent());

    one_time_submit(device, |cb| {
        // dst contents are fully overwritten
        dst.set_layout(vk::ImageLayout::UNDEFINED);

        let mut batch = BarrierBatch::new();
        batch.add(dst, dst_layout)?;
        batch.add(src, src_layout)?;
        cb.transition_image_layouts(batch);

        cb.bind_pipeline_and_descriptor_sets(&pipeline, &descriptors);
        cb.dispatch(x, y, z);
        cb.dispatch_barrier();
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_layout_matches_shader_block() {
        let bytes = resize_params_bytes(
            vk::Extent3D { width: 5, height: 6, depth: 1 },
            &[0.5; 4],
            &[2.0; 4],
        );
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[0..4], &5u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &0u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &0.5f32.to_le_bytes());
        assert_eq!(&bytes[44..48], &2.0f32.to_le_bytes());
    }

    #[test]
    fn groups_cover_odd_extents() {
        let groups = group_count(vk::Extent3D { width: 9, height: 17, depth: 2 });
        assert_eq!(groups, [3, 3, 2]);
    }
}
