use crate::{
    gpu::context::GpuBackendType,
    graph::pass::InferencePassesVulkan,
    render_pass::RenderPass,
    utils::error::SnnError,
};

use super::{
    DeviceBackend,
    timer::{CpuTimer, DeviceTimer},
};

/// Backend for a context without a GPU. Stages run on the host as they are reached,
/// so there is never anything to wait for.
#[derive(Debug, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceBackend for CpuBackend {
    fn backend_type(&self) -> GpuBackendType {
        GpuBackendType::Cpu
    }

    fn init_render_passes(
        &mut self,
        layer_name: &str,
        is_input_layer: bool,
        passes: &InferencePassesVulkan,
    ) -> Result<Vec<Box<dyn RenderPass>>, SnnError> {
        if is_input_layer || passes.is_empty() {
            return Ok(Vec::new());
        }
        Err(SnnError::Backend(format!(
            "{}: {} shader passes need a GPU backend",
            layer_name,
            passes.passes.len()
        )))
    }

    fn sync(&mut self) -> Result<bool, SnnError> {
        log::debug!("cpu backend: nothing to sync");
        Ok(false)
    }

    fn create_device_timer(&mut self, name: &str) -> Result<Box<dyn DeviceTimer>, SnnError> {
        Ok(Box::new(CpuTimer::new(name)))
    }
}
