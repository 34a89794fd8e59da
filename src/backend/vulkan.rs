use std::{rc::Rc, sync::Arc};

use crate::{
    gpu::{
        command_buffer::CommandBuffer,
        context::{GpuBackendType, VulkanDevice},
        query::TimestampQueryPool,
    },
    graph::pass::InferencePassesVulkan,
    inference::{inference_core::RunParameters, stage::RenderStage},
    render_pass::{RenderPass, vulkan::VulkanRenderPass},
    utils::error::SnnError,
};

use super::{
    DeviceBackend,
    timer::{DeviceTimer, GpuTimer},
};

/// Records every GPU stage of a run into one command buffer and submits it on `sync`.
pub struct VulkanBackend {
    device: Arc<VulkanDevice>,
    command_buffer: Rc<CommandBuffer>,
    synced: bool,
}

impl VulkanBackend {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self, SnnError> {
        Ok(Self {
            device: Arc::clone(device),
            command_buffer: Rc::new(CommandBuffer::new(device)?),
            synced: true,
        })
    }

    fn ensure_recording(&mut self) -> Result<(), SnnError> {
        if !self.command_buffer.is_recording() {
            self.command_buffer.begin()?;
            self.synced = false;
        }
        Ok(())
    }
}

impl DeviceBackend for VulkanBackend {
    fn backend_type(&self) -> GpuBackendType {
        GpuBackendType::Vulkan
    }

    fn init_render_passes(
        &mut self,
        layer_name: &str,
        is_input_layer: bool,
        passes: &InferencePassesVulkan,
    ) -> Result<Vec<Box<dyn RenderPass>>, SnnError> {
        if is_input_layer {
            return Ok(Vec::new());
        }

        passes
            .passes
            .iter()
            .enumerate()
            .map(|(i, pass)| {
                let render_pass = VulkanRenderPass::new(
                    &self.device,
                    format!("{} pass[{}]", layer_name, i),
                    pass.clone(),
                    Rc::clone(&self.command_buffer),
                )?;
                Ok(Box::new(render_pass) as Box<dyn RenderPass>)
            })
            .collect()
    }

    fn prepare_run(
        &mut self,
        rp: &mut RunParameters,
        stages: &mut [RenderStage],
        bind_output: bool,
        bind_index: usize,
    ) -> Result<(), SnnError> {
        if bind_output {
            if let (Some(image), Some(stage)) = (rp.output_images.first(), stages.get(bind_index)) {
                if let Some(output) = stage.outputs.first().filter(|o| !Rc::ptr_eq(o, image)) {
                    log::debug!("Binding model output to stage {}", stage.layer.name);
                    output.borrow_mut().attach(&image.borrow());
                }
            }
        }

        self.command_buffer.begin()?;
        self.synced = false;
        Ok(())
    }

    fn prepare_stage(&mut self, _rp: &mut RunParameters, stage: &mut RenderStage) -> Result<(), SnnError> {
        self.ensure_recording()?;

        // host-resident inputs come from CPU stages or the caller
        for input in &stage.inputs {
            let mut texture = input.borrow_mut();
            if !texture.is_gpu() && !texture.is_empty() {
                texture.upload()?;
            }
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<bool, SnnError> {
        if self.synced {
            log::debug!("already synced");
            return Ok(false);
        }
        self.command_buffer.submit_and_wait()?;
        self.synced = true;
        Ok(true)
    }

    fn flush(&mut self) -> Result<(), SnnError> {
        self.sync()?;
        self.ensure_recording()
    }

    fn create_device_timer(&mut self, name: &str) -> Result<Box<dyn DeviceTimer>, SnnError> {
        let pool = TimestampQueryPool::new(&self.device)?;
        Ok(Box::new(GpuTimer::new(name, pool, Rc::clone(&self.command_buffer))))
    }

    fn is_profiling_enabled(&self) -> bool {
        self.device.timestamp_period > 0.0
    }
}
