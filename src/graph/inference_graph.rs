//! High-level description of a network as an ordered list of layers.

use std::{fmt, path::Path};

use crate::{
    backend::DeviceBackend,
    texture::{color::ColorFormat, image_texture::ImageTextureRef},
    utils::error::SnnError,
};

/// Where a layer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerExecution {
    Cpu,
    /// GPU fragment shader
    GpuFs,
    /// GPU compute shader
    GpuCs,
    GpuVulkan,
}

impl LayerExecution {
    pub fn is_gpu(self) -> bool {
        !matches!(self, LayerExecution::Cpu)
    }
}

/// Shape and color format of a layer input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IODesc {
    pub format: ColorFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub channels: u32,
}

impl IODesc {
    pub fn new(format: ColorFormat, width: u32, height: u32, depth: u32, channels: u32) -> Self {
        Self {
            format,
            width,
            height,
            depth,
            channels,
        }
    }

    /// `[width, height, depth, planes]` of the texture holding this tensor.
    pub fn texture_dims(&self) -> [u32; 4] {
        [self.width, self.height, self.depth, 1]
    }
}

/// Points at the output of an earlier layer or at a model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerRef {
    pub is_stage_output: bool,
    pub index: usize,
}

impl LayerRef {
    pub fn stage_output(index: usize) -> Self {
        Self {
            is_stage_output: true,
            index,
        }
    }

    pub fn model_input(index: usize) -> Self {
        Self {
            is_stage_output: false,
            index,
        }
    }
}

/// Behavior of one layer.
///
/// GPU layers build render passes in `init` and record them in `run`. CPU layers
/// implement `compute`.
pub trait LayerOps {
    /// Called once after the stage's inputs and outputs are allocated.
    fn init(
        &mut self,
        backend: &mut dyn DeviceBackend,
        inputs: &[ImageTextureRef],
        outputs: &[ImageTextureRef],
    ) -> Result<(), SnnError> {
        let _ = (backend, inputs, outputs);
        Ok(())
    }

    /// Record the layer on the GPU. `dump_dir` is set when debug artifacts are requested.
    fn run(
        &mut self,
        backend: &mut dyn DeviceBackend,
        inputs: &[ImageTextureRef],
        outputs: &[ImageTextureRef],
        dump_dir: Option<&Path>,
    ) -> Result<(), SnnError> {
        let _ = (backend, inputs, outputs, dump_dir);
        Ok(())
    }

    /// Compute the layer on the host from downloaded inputs.
    fn compute(
        &mut self,
        inputs: &[ImageTextureRef],
        outputs: &[ImageTextureRef],
    ) -> Result<(), SnnError> {
        let _ = (inputs, outputs);
        Err(SnnError::Graph(
            "layer has no CPU implementation".to_string(),
        ))
    }

    /// Fully-connected layers switch off binding the model output image.
    fn is_flatten(&self) -> bool {
        false
    }

    /// Nanoseconds spent in each render pass of the last run, by pass name.
    fn pass_durations(&self) -> Result<Vec<(String, f64)>, SnnError> {
        Ok(Vec::new())
    }
}

/// Passes the model input through untouched.
#[derive(Debug, Default)]
pub struct InputOps;

impl LayerOps for InputOps {}

pub struct Layer {
    pub execution: LayerExecution,
    pub name: String,
    pub inputs: Vec<LayerRef>,
    pub output: IODesc,
    pub flatten_layer: bool,
    pub is_input_layer: bool,
    /// Model input this layer reads, for input layers
    pub input_index: usize,
    pub ops: Box<dyn LayerOps>,
}

impl Layer {
    pub fn new<O: LayerOps + 'static>(
        name: impl Into<String>,
        execution: LayerExecution,
        inputs: Vec<LayerRef>,
        output: IODesc,
        ops: O,
    ) -> Self {
        Self {
            execution,
            name: name.into(),
            inputs,
            output,
            flatten_layer: ops.is_flatten(),
            is_input_layer: false,
            input_index: 0,
            ops: Box::new(ops),
        }
    }

    /// Layer that exposes model input `input_index` to the following layers.
    pub fn input(
        name: impl Into<String>,
        execution: LayerExecution,
        input_index: usize,
        output: IODesc,
    ) -> Self {
        Self {
            is_input_layer: true,
            input_index,
            ..Self::new(
                name,
                execution,
                vec![LayerRef::model_input(input_index)],
                output,
                InputOps,
            )
        }
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("name", &self.name)
            .field("execution", &self.execution)
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .field("flatten_layer", &self.flatten_layer)
            .field("is_input_layer", &self.is_input_layer)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct InferenceGraph {
    /// Shapes of the model inputs
    pub inputs_desc: Vec<IODesc>,
    /// Layers in execution order
    pub layers: Vec<Layer>,
}

impl InferenceGraph {
    pub fn new(inputs_desc: Vec<IODesc>, layers: Vec<Layer>) -> Self {
        Self {
            inputs_desc,
            layers,
        }
    }

    pub fn input_layer_count(&self) -> usize {
        self.layers.iter().filter(|l| l.is_input_layer).count()
    }

    /// Check that every stage reference points at an earlier layer and every model
    /// input reference is in range, so array order is a valid execution order.
    pub fn validate(&self) -> Result<(), SnnError> {
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.inputs.is_empty() {
                return Err(SnnError::Graph(format!("{}: layer has no inputs", layer.name)));
            }
            for r in &layer.inputs {
                if r.is_stage_output && r.index >= i {
                    return Err(SnnError::Graph(format!(
                        "{}: can't reference buffer from descendant layer {}",
                        layer.name, r.index
                    )));
                }
                if !r.is_stage_output && r.index >= self.inputs_desc.len() {
                    return Err(SnnError::Graph(format!(
                        "{}: model input index {} is out of range ({} inputs)",
                        layer.name,
                        r.index,
                        self.inputs_desc.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> IODesc {
        IODesc::new(ColorFormat::Rgba8, 4, 4, 1, 4)
    }

    fn layer(name: &str, inputs: Vec<LayerRef>) -> Layer {
        Layer::new(name, LayerExecution::GpuVulkan, inputs, desc(), InputOps)
    }

    #[test]
    fn valid_chain_passes() {
        let graph = InferenceGraph::new(
            vec![desc()],
            vec![
                Layer::input("input", LayerExecution::GpuVulkan, 0, desc()),
                layer("conv", vec![LayerRef::stage_output(0)]),
                layer("add", vec![LayerRef::stage_output(0), LayerRef::stage_output(1)]),
            ],
        );
        graph.validate().unwrap();
        assert_eq!(graph.input_layer_count(), 1);
        assert!(graph.layers[0].is_input_layer);
    }

    #[test]
    fn self_reference_is_rejected() {
        let graph = InferenceGraph::new(
            vec![desc()],
            vec![
                Layer::input("input", LayerExecution::GpuVulkan, 0, desc()),
                layer("loop", vec![LayerRef::stage_output(1)]),
            ],
        );
        let err = graph.validate().unwrap_err().to_string();
        assert!(err.contains("loop"), "{}", err);
    }

    #[test]
    fn model_input_out_of_range_is_rejected() {
        let graph = InferenceGraph::new(
            vec![desc()],
            vec![layer("second_input", vec![LayerRef::model_input(1)])],
        );
        assert!(matches!(graph.validate(), Err(SnnError::Graph(_))));
    }

    #[test]
    fn cpu_is_the_only_host_location() {
        assert!(!LayerExecution::Cpu.is_gpu());
        assert!(LayerExecution::GpuFs.is_gpu());
        assert!(LayerExecution::GpuVulkan.is_gpu());
    }
}
