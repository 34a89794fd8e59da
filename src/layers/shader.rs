use std::path::Path;

use crate::{
    backend::DeviceBackend,
    graph::{inference_graph::LayerOps, pass::InferencePassesVulkan},
    render_pass::RenderPass,
    texture::image_texture::ImageTextureRef,
    utils::error::SnnError,
};

/// A GPU layer made of pre-built shader passes, run in order.
pub struct ShaderLayer {
    name: String,
    passes: InferencePassesVulkan,
    render_passes: Vec<Box<dyn RenderPass>>,
}

impl ShaderLayer {
    pub fn new(name: impl Into<String>, passes: InferencePassesVulkan) -> Self {
        Self {
            name: name.into(),
            passes,
            render_passes: Vec::new(),
        }
    }

    pub fn render_passes(&self) -> &[Box<dyn RenderPass>] {
        &self.render_passes
    }
}

impl LayerOps for ShaderLayer {
    fn init(
        &mut self,
        backend: &mut dyn DeviceBackend,
        _inputs: &[ImageTextureRef],
        _outputs: &[ImageTextureRef],
    ) -> Result<(), SnnError> {
        self.render_passes = backend.init_render_passes(&self.name, false, &self.passes)?;
        log::debug!("{}: {} render passes", self.name, self.render_passes.len());
        Ok(())
    }

    fn run(
        &mut self,
        backend: &mut dyn DeviceBackend,
        inputs: &[ImageTextureRef],
        outputs: &[ImageTextureRef],
        dump_dir: Option<&Path>,
    ) -> Result<(), SnnError> {
        let last = self.render_passes.len().saturating_sub(1);
        for (i, pass) in self.render_passes.iter_mut().enumerate() {
            if let Some(folder) = dump_dir {
                if i == last {
                    // inputs must be on the host before they can be written out
                    backend.flush()?;
                    if let Err(e) = pass.debug_pass_inputs(folder, inputs) {
                        log::error!("Error dumping inputs for {}: {}", pass.name(), e);
                    }
                }
                if let Err(e) = pass.debug_pass_weights(folder, i) {
                    log::error!("Error dumping weights for {}: {}", pass.name(), e);
                }
            }
            pass.run(inputs, outputs)?;
        }
        Ok(())
    }

    fn pass_durations(&self) -> Result<Vec<(String, f64)>, SnnError> {
        let mut durations = Vec::new();
        for pass in &self.render_passes {
            if let Some(ns) = pass.elapsed_ns()? {
                durations.push((pass.name().to_string(), ns));
            }
        }
        Ok(durations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::cpu::CpuBackend,
        gpu::context::GpuContext,
        graph::pass::InferencePassVulkan,
        texture::{color::ColorFormat, image_texture::ImageTexture},
    };

    #[test]
    fn passes_without_gpu_fail_at_init() {
        let mut layer = ShaderLayer::new(
            "conv1",
            InferencePassesVulkan::new(vec![InferencePassVulkan::default()]),
        );
        let output = ImageTexture::with_dims_on_cpu(&GpuContext::Cpu, [2, 2, 1, 1], ColorFormat::Rgba8)
            .into_ref();

        let result = layer.init(&mut CpuBackend::new(), &[], &[output]);
        assert!(matches!(result, Err(SnnError::Backend(_))));
        assert!(layer.render_passes().is_empty());
    }

    #[test]
    fn empty_layer_runs_nothing() {
        let mut layer = ShaderLayer::new("noop", InferencePassesVulkan::default());
        let mut backend = CpuBackend::new();
        layer.init(&mut backend, &[], &[]).unwrap();
        layer.run(&mut backend, &[], &[], None).unwrap();
        assert!(layer.pass_durations().unwrap().is_empty());
    }
}
