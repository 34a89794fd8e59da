use std::fmt;

use crate::{
    backend::timer::DeviceTimer,
    graph::inference_graph::{Layer, LayerExecution},
    texture::image_texture::ImageTextureRef,
    utils::error::SnnError,
};

/// Device a stage runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageBackend {
    Cpu,
    Gpu,
}

/// Data movement needed before a stage can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    None,
    CpuToGpu,
    GpuToCpu,
}

/// Assign a stage backend from the previous layer's location and the current one.
///
/// Same locations, the first layer and fragment/compute pairs stay on the current
/// device family. CPU to any GPU location and back need a transition. Every other
/// pair is rejected.
pub fn map_device_backend(
    prev: Option<LayerExecution>,
    curr: LayerExecution,
) -> Result<(StageBackend, Transition), SnnError> {
    use LayerExecution::*;

    let family = if curr.is_gpu() {
        StageBackend::Gpu
    } else {
        StageBackend::Cpu
    };

    match (prev, curr) {
        (None, _) => Ok((family, Transition::None)),
        (Some(p), c) if p == c => Ok((family, Transition::None)),
        (Some(GpuFs), GpuCs) | (Some(GpuCs), GpuFs) => Ok((StageBackend::Gpu, Transition::None)),
        (Some(Cpu), GpuFs | GpuCs | GpuVulkan) => Ok((StageBackend::Gpu, Transition::CpuToGpu)),
        (Some(GpuFs | GpuCs | GpuVulkan), Cpu) => Ok((StageBackend::Cpu, Transition::GpuToCpu)),
        (Some(p), c) => Err(SnnError::Core(format!(
            "no stage backend for a {:?} layer following a {:?} layer",
            c, p
        ))),
    }
}

/// Runtime state of one layer.
pub struct RenderStage {
    pub layer: Layer,
    pub flatten_layer: bool,
    pub timer: Box<dyn DeviceTimer>,
    pub backend: StageBackend,
    pub transition: Transition,
    pub inputs: Vec<ImageTextureRef>,
    pub outputs: Vec<ImageTextureRef>,
    /// Source stage or model input index of each input
    pub input_ids: Vec<usize>,
    /// Inputs bound to caller images at run time instead of to earlier stage outputs
    pub delay_bind_mask: Vec<bool>,
}

impl RenderStage {
    /// Point every delayed input at the matching caller-supplied model input.
    pub fn bind_model_inputs(&mut self, model_inputs: &[ImageTextureRef]) -> Result<(), SnnError> {
        for (j, delayed) in self.delay_bind_mask.iter().enumerate() {
            if !delayed {
                continue;
            }
            let index = self.input_ids[j];
            let image = model_inputs.get(index).ok_or_else(|| {
                SnnError::Core(format!(
                    "{}: model input {} was not supplied",
                    self.layer.name, index
                ))
            })?;
            self.inputs[j] = image.clone();
        }
        Ok(())
    }
}

impl fmt::Debug for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderStage")
            .field("layer", &self.layer.name)
            .field("backend", &self.backend)
            .field("transition", &self.transition)
            .field("input_ids", &self.input_ids)
            .field("delay_bind_mask", &self.delay_bind_mask)
            .field("timer", &self.timer.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LayerExecution::*;

    #[test]
    fn first_layer_takes_its_own_family() {
        assert_eq!(map_device_backend(None, Cpu).unwrap(), (StageBackend::Cpu, Transition::None));
        assert_eq!(
            map_device_backend(None, GpuVulkan).unwrap(),
            (StageBackend::Gpu, Transition::None)
        );
    }

    #[test]
    fn fragment_and_compute_mix_freely() {
        for (p, c) in [(GpuFs, GpuCs), (GpuCs, GpuFs), (GpuVulkan, GpuVulkan)] {
            assert_eq!(
                map_device_backend(Some(p), c).unwrap(),
                (StageBackend::Gpu, Transition::None)
            );
        }
    }

    #[test]
    fn host_boundaries_need_transitions() {
        for gpu in [GpuFs, GpuCs, GpuVulkan] {
            assert_eq!(
                map_device_backend(Some(Cpu), gpu).unwrap(),
                (StageBackend::Gpu, Transition::CpuToGpu)
            );
            assert_eq!(
                map_device_backend(Some(gpu), Cpu).unwrap(),
                (StageBackend::Cpu, Transition::GpuToCpu)
            );
        }
    }

    #[test]
    fn unmapped_pairs_name_both_locations() {
        let err = map_device_backend(Some(GpuFs), GpuVulkan).unwrap_err().to_string();
        assert!(err.contains("GpuFs") && err.contains("GpuVulkan"), "{}", err);
        assert!(map_device_backend(Some(GpuVulkan), GpuCs).is_err());
    }
}
