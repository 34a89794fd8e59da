//! Pre-built compute passes handed to the Vulkan backend.

use std::collections::BTreeMap;

use crate::{
    gpu::pipeline::{DescriptorKind, DescriptorSetBinding, SpecConstant},
    texture::color::ColorFormat,
};

/// Destination image uniform and work-group counts of one dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VkProgram {
    pub output_image_uniform: String,
    pub dispatch_size: [u32; 3],
}

/// Everything needed to build and dispatch one compute pass.
///
/// Buffer and image maps are keyed by descriptor binding. Binding 0 is always the
/// destination storage image and input `i` is sampled from binding `i + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct InferencePassVulkan {
    /// Input uniform name to index into the stage inputs
    pub inputs: BTreeMap<String, u32>,
    /// Binding to `(offset, len)` in words inside one period of `runtime_data`
    pub runtime_uniforms: BTreeMap<u32, (u32, u32)>,
    pub runtime_data: Vec<u32>,
    /// Words per ring entry of `runtime_data`
    pub period: u32,
    pub pass_id: u32,
    pub total_passes: u32,
    pub input_width: u32,
    pub input_height: u32,
    pub input_channels: u32,
    pub weight_dims: BTreeMap<u32, [u32; 3]>,

    pub program: VkProgram,
    /// SPIR-V words
    pub vk_codes: Vec<u32>,
    pub spec_constants: Vec<SpecConstant>,
    pub push_constants: BTreeMap<String, Vec<SpecConstant>>,
    pub uniform_buffers: BTreeMap<u32, Vec<u32>>,
    pub object_buffers: BTreeMap<u32, Vec<f32>>,
    pub weight_buffers: BTreeMap<u32, Vec<f32>>,
    pub weight_formats: BTreeMap<u32, ColorFormat>,
}

impl Default for InferencePassVulkan {
    fn default() -> Self {
        Self {
            inputs: BTreeMap::new(),
            runtime_uniforms: BTreeMap::new(),
            runtime_data: Vec::new(),
            period: 0,
            pass_id: 0,
            total_passes: 1,
            input_width: 0,
            input_height: 0,
            input_channels: 0,
            weight_dims: BTreeMap::new(),
            program: VkProgram::default(),
            vk_codes: Vec::new(),
            spec_constants: Vec::new(),
            push_constants: BTreeMap::new(),
            uniform_buffers: BTreeMap::new(),
            object_buffers: BTreeMap::new(),
            weight_buffers: BTreeMap::new(),
            weight_formats: BTreeMap::new(),
        }
    }
}

impl InferencePassVulkan {
    /// Word offset of the ring entry used by run number `run_idx`.
    ///
    /// Entries advance once per `total_passes` runs and wrap after
    /// `runtime_data.len() / period` entries.
    pub fn runtime_offset(&self, run_idx: u32) -> usize {
        if self.period == 0 {
            return 0;
        }
        let entries = self.runtime_data.len() / self.period as usize;
        if entries == 0 {
            return 0;
        }
        let step = run_idx.div_ceil(self.total_passes.max(1)) as usize;
        step % entries * self.period as usize
    }

    /// Descriptor layout of the shader, in binding order.
    pub fn descriptor_bindings(&self) -> Vec<DescriptorSetBinding> {
        let mut bindings: BTreeMap<u32, DescriptorKind> = BTreeMap::new();
        bindings.insert(0, DescriptorKind::StorageImage);
        for &index in self.inputs.values() {
            bindings.insert(index + 1, DescriptorKind::SampledImage);
        }
        for &binding in self.uniform_buffers.keys().chain(self.runtime_uniforms.keys()) {
            bindings.insert(binding, DescriptorKind::UniformBuffer);
        }
        for &binding in self.object_buffers.keys() {
            bindings.insert(binding, DescriptorKind::StorageBuffer);
        }
        for &binding in self.weight_buffers.keys() {
            bindings.insert(binding, DescriptorKind::SampledImage);
        }

        bindings
            .into_iter()
            .map(|(binding, kind)| DescriptorSetBinding::new(binding, kind))
            .collect()
    }

    /// Push constants of every block, flattened in block name order.
    pub fn push_constant_values(&self) -> Vec<SpecConstant> {
        self.push_constants.values().flatten().copied().collect()
    }

    pub fn push_constant_size(&self) -> u32 {
        4 * self.push_constant_values().len() as u32
    }

    /// Format a weight image is stored in, RGBA16F unless stated otherwise.
    pub fn weight_format(&self, binding: u32) -> ColorFormat {
        self.weight_formats
            .get(&binding)
            .copied()
            .unwrap_or(ColorFormat::Rgba16f)
    }
}

/// All passes of one layer, run in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferencePassesVulkan {
    pub passes: Vec<InferencePassVulkan>,
}

impl InferencePassesVulkan {
    pub fn new(passes: Vec<InferencePassVulkan>) -> Self {
        Self { passes }
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::pipeline::SpecValue;

    fn ring_pass() -> InferencePassVulkan {
        InferencePassVulkan {
            runtime_uniforms: BTreeMap::from([(5, (1, 2))]),
            runtime_data: (0..12).collect(),
            period: 4,
            total_passes: 2,
            ..Default::default()
        }
    }

    #[test]
    fn ring_offset_advances_per_total_passes() {
        let pass = ring_pass();
        let offsets: Vec<usize> = (0..7).map(|i| pass.runtime_offset(i)).collect();
        // ceil(i / 2) % 3 * 4
        assert_eq!(offsets, vec![0, 4, 4, 8, 8, 0, 0]);
    }

    #[test]
    fn ring_offset_without_period_is_zero() {
        let pass = InferencePassVulkan::default();
        assert_eq!(pass.runtime_offset(9), 0);
    }

    #[test]
    fn bindings_follow_resource_maps() {
        let pass = InferencePassVulkan {
            inputs: BTreeMap::from([("uInput0".to_string(), 0), ("uInput1".to_string(), 1)]),
            uniform_buffers: BTreeMap::from([(3, vec![1, 2])]),
            object_buffers: BTreeMap::from([(4, vec![0.5])]),
            weight_buffers: BTreeMap::from([(6, vec![0.0; 4])]),
            ..ring_pass()
        };

        let bindings = pass.descriptor_bindings();
        let kinds: Vec<(u32, DescriptorKind)> = bindings.iter().map(|b| (b.binding, b.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (0, DescriptorKind::StorageImage),
                (1, DescriptorKind::SampledImage),
                (2, DescriptorKind::SampledImage),
                (3, DescriptorKind::UniformBuffer),
                (4, DescriptorKind::StorageBuffer),
                (5, DescriptorKind::UniformBuffer),
                (6, DescriptorKind::SampledImage),
            ]
        );
    }

    #[test]
    fn push_constants_flatten_in_name_order() {
        let pass = InferencePassVulkan {
            push_constants: BTreeMap::from([
                ("b".to_string(), vec![SpecConstant::new(0, SpecValue::F32(2.0))]),
                (
                    "a".to_string(),
                    vec![
                        SpecConstant::new(0, SpecValue::U32(7)),
                        SpecConstant::new(1, SpecValue::I32(-1)),
                    ],
                ),
            ]),
            ..Default::default()
        };

        let values: Vec<SpecValue> = pass.push_constant_values().iter().map(|c| c.value).collect();
        assert_eq!(
            values,
            vec![SpecValue::U32(7), SpecValue::I32(-1), SpecValue::F32(2.0)]
        );
        assert_eq!(pass.push_constant_size(), 12);
    }

    #[test]
    fn weights_default_to_half_float() {
        let mut pass = InferencePassVulkan::default();
        assert_eq!(pass.weight_format(2), ColorFormat::Rgba16f);
        pass.weight_formats.insert(2, ColorFormat::Rgba32f);
        assert_eq!(pass.weight_format(2), ColorFormat::Rgba32f);
    }
}
