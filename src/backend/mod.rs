//! Device backends drive stages on one kind of device.
//!
//! The inference core only talks to [`DeviceBackend`]; Vulkan and the host each get
//! an implementation, picked from the [`GpuContext`] by [`create_backend`].

use std::path::Path;

use crate::{
    gpu::context::{GpuBackendType, GpuContext},
    graph::pass::InferencePassesVulkan,
    inference::{
        inference_core::RunParameters,
        stage::{RenderStage, StageBackend},
    },
    render_pass::RenderPass,
    utils::{dump::create_dir_if_not_exists, error::SnnError},
};

pub mod cpu;
pub mod timer;
pub mod vulkan;

use cpu::CpuBackend;
use timer::DeviceTimer;
use vulkan::VulkanBackend;

pub trait DeviceBackend {
    fn backend_type(&self) -> GpuBackendType;

    /// Build one render pass per pre-built pass of a layer, named `"<layer> pass[<i>]"`.
    /// Input layers get none.
    fn init_render_passes(
        &mut self,
        layer_name: &str,
        is_input_layer: bool,
        passes: &InferencePassesVulkan,
    ) -> Result<Vec<Box<dyn RenderPass>>, SnnError>;

    /// Called once before the first stage of a run.
    fn prepare_run(
        &mut self,
        rp: &mut RunParameters,
        stages: &mut [RenderStage],
        bind_output: bool,
        bind_index: usize,
    ) -> Result<(), SnnError> {
        let _ = (rp, stages, bind_output, bind_index);
        Ok(())
    }

    /// Called before each GPU stage records its passes.
    fn prepare_stage(&mut self, rp: &mut RunParameters, stage: &mut RenderStage) -> Result<(), SnnError> {
        let _ = (rp, stage);
        Ok(())
    }

    /// Called after the final sync; dumps stage outputs under `folder` when asked.
    fn post_run(&mut self, stages: &[RenderStage], dump_output: bool, folder: &Path) -> Result<(), SnnError> {
        if dump_output {
            dump_stage_outputs(stages, folder);
        }
        Ok(())
    }

    /// Submit recorded work and wait for it. Returns `false` if there was nothing to wait for.
    fn sync(&mut self) -> Result<bool, SnnError> {
        Ok(false)
    }

    /// Wait for recorded work, then keep recording into a fresh submission.
    fn flush(&mut self) -> Result<(), SnnError> {
        self.sync().map(|_| ())
    }

    fn cleanup_run(&mut self) {}

    fn create_device_timer(&mut self, name: &str) -> Result<Box<dyn DeviceTimer>, SnnError>;

    fn is_profiling_enabled(&self) -> bool {
        true
    }
}

/// Pick the backend matching the context.
pub fn create_backend(context: &GpuContext) -> Result<Box<dyn DeviceBackend>, SnnError> {
    match context {
        GpuContext::Cpu => Ok(Box::new(CpuBackend::new())),
        GpuContext::Vulkan(device) => Ok(Box::new(VulkanBackend::new(device)?)),
    }
}

/// Write `<folder>/<layer>/<NN>.png` and `<folder>/<layer> pass[0].dump` for every GPU stage.
///
/// Failures are logged and the remaining stages are still written.
pub fn dump_stage_outputs(stages: &[RenderStage], folder: &Path) {
    for stage in stages {
        if stage.layer.is_input_layer || stage.backend == StageBackend::Cpu {
            continue;
        }
        let Some(output) = stage.outputs.first() else {
            continue;
        };
        let name = &stage.layer.name;
        let dir = folder.join(name);

        let result = create_dir_if_not_exists(&dir).and_then(|_| {
            let mut texture = output.borrow_mut();
            log::debug!("Saving outputs for layer: {} {}", name, texture.depth());
            texture.save_png_slices(&dir, 0, "")?;
            let dump = folder.join(format!("{} pass[0].dump", name));
            log::debug!("Saving dump to {:?}", dump);
            texture.save_bin(&dump)
        });

        if let Err(e) = result {
            log::error!("Error dumping outputs for layer {}: {}", name, e);
        }
    }
}
