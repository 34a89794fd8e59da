//! Runs an [`InferenceGraph`] stage by stage across the host and the GPU.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    path::PathBuf,
    rc::Rc,
    time::Instant,
};

use crate::{
    backend::{
        DeviceBackend, create_backend,
        timer::{CpuTimer, DeviceTimer},
    },
    config::EngineConfig,
    gpu::context::GpuContext,
    graph::inference_graph::{IODesc, InferenceGraph, LayerRef},
    texture::image_texture::{ImageTexture, ImageTextureRef},
    utils::{
        dump::{create_dir_if_not_exists, dump_text_outputs},
        error::SnnError,
        expect_msg::ExpectMsg,
    },
};

use super::stage::{RenderStage, StageBackend, Transition, map_device_backend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelType {
    Classification,
    Detection,
    #[default]
    Other,
}

/// Result of models with a known output type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutput {
    pub model_type: ModelType,
    /// `1 + argmax` of the final row, 0 when nothing was classified
    pub classifier_output: usize,
    pub detection_output: Vec<Vec<f32>>,
}

impl ModelOutput {
    pub fn new(model_type: ModelType) -> Self {
        Self {
            model_type,
            ..Self::default()
        }
    }
}

pub struct CreationParameters {
    pub graph: InferenceGraph,
    pub output_width: u32,
    pub output_height: u32,
    pub output_depth: u32,
    pub dump_outputs: bool,
}

#[derive(Debug, Default)]
pub struct RunParameters {
    pub input_images: Vec<ImageTextureRef>,
    pub output_images: Vec<ImageTextureRef>,
    /// Host rows written into the matching input image before the run, in HWC order
    pub input_matrix: Vec<Vec<Vec<f32>>>,
    /// Output of the final stage when it ran on the host
    pub output: Vec<Vec<Vec<f32>>>,
    pub model_output: ModelOutput,
}

impl RunParameters {
    pub fn new(input_images: Vec<ImageTextureRef>, model_type: ModelType) -> Self {
        Self {
            input_images,
            model_output: ModelOutput::new(model_type),
            ..Self::default()
        }
    }
}

/// Index of the largest value, counted from 1.
fn classify(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map_or(0, |(i, _)| i + 1)
}

fn dims_string(desc: &IODesc) -> String {
    format!("{}x{}x{}", desc.width, desc.height, desc.channels)
}

pub struct MixedInferenceCore {
    context: GpuContext,
    config: EngineConfig,
    backend: Box<dyn DeviceBackend>,
    stages: Vec<RenderStage>,
    input_count: usize,
    /// Bind the caller's output image to the last stage
    bind_output: bool,
    dump_outputs: bool,
    profiling: bool,
    run_time: CpuTimer,
    output: Vec<Vec<f32>>,
}

impl MixedInferenceCore {
    pub fn new(context: &GpuContext, config: EngineConfig) -> Result<Self, SnnError> {
        config.validate()?;
        let backend = create_backend(context)?;
        let profiling = config.profiling && backend.is_profiling_enabled();
        Ok(Self {
            context: context.clone(),
            dump_outputs: config.dump_outputs,
            config,
            backend,
            stages: Vec::new(),
            input_count: 0,
            bind_output: true,
            profiling,
            run_time: CpuTimer::new("Inference Core Total CPU Runtime"),
            output: Vec::new(),
        })
    }

    /// Build a core and initialize it in one step.
    pub fn create(context: &GpuContext, config: EngineConfig, cp: CreationParameters) -> Result<Self, SnnError> {
        let mut core = Self::new(context, config)?;
        core.init(cp)?;
        Ok(core)
    }

    /// Allocate one stage per layer and bind their inputs.
    ///
    /// # Panics
    /// On references to later layers or missing model inputs, and on CPU layers that
    /// read a model input directly.
    pub fn init(&mut self, cp: CreationParameters) -> Result<(), SnnError> {
        let started = Instant::now();
        if !self.stages.is_empty() {
            return Err(SnnError::Core("inference core is already initialized".to_string()));
        }

        let CreationParameters {
            graph,
            output_width,
            output_height,
            output_depth,
            dump_outputs,
        } = cp;

        if graph.inputs_desc.is_empty() {
            return Err(SnnError::Core("model declares no inputs".to_string()));
        }
        graph.validate().expect_msg("invalid inference graph");

        self.dump_outputs |= dump_outputs;
        self.input_count = graph.inputs_desc.len();

        let mut assignments = Vec::with_capacity(graph.layers.len());
        let mut prev = None;
        for layer in &graph.layers {
            let (backend, transition) = map_device_backend(prev, layer.execution)?;
            if layer.flatten_layer {
                self.bind_output = false;
            }
            log::debug!("{}: {:?} {:?} {:?}", layer.name, layer.execution, backend, transition);
            assignments.push((backend, transition));
            prev = Some(layer.execution);
        }

        let InferenceGraph { inputs_desc, layers } = graph;
        for (i, (mut layer, (backend, transition))) in layers.into_iter().zip(assignments).enumerate() {
            let dims = layer.output.texture_dims();
            let alignment = self.config.image_alignment;
            let output = match backend {
                StageBackend::Gpu => {
                    ImageTexture::with_dims_aligned(&self.context, dims, layer.output.format, alignment)?
                }
                StageBackend::Cpu => {
                    ImageTexture::with_dims_on_cpu_aligned(&self.context, dims, layer.output.format, alignment)
                }
            }
            .into_ref();
            let outputs = vec![output];

            let mut inputs = Vec::with_capacity(layer.inputs.len());
            let mut input_ids = Vec::with_capacity(layer.inputs.len());
            let mut delay_bind_mask = Vec::with_capacity(layer.inputs.len());
            for r in &layer.inputs {
                if r.is_stage_output {
                    assert!(
                        r.index < i,
                        "{}: can't reference buffer from descendant layer {}",
                        layer.name,
                        r.index
                    );
                    inputs.push(Rc::clone(&self.stages[r.index].outputs[0]));
                    delay_bind_mask.push(false);
                } else {
                    assert!(
                        r.index < inputs_desc.len(),
                        "{}: buffer reference index {} is out of range",
                        layer.name,
                        r.index
                    );
                    if backend == StageBackend::Cpu && !layer.is_input_layer {
                        panic!("{}: CPU layers can't read model input {} directly", layer.name, r.index);
                    }
                    inputs.push(ImageTexture::empty(&self.context).into_ref());
                    delay_bind_mask.push(true);
                }
                input_ids.push(r.index);
            }

            let input_desc = match layer.inputs.first() {
                Some(LayerRef { is_stage_output: true, index }) => self.stages[*index].layer.output,
                Some(LayerRef { index, .. }) => inputs_desc[*index],
                None => layer.output,
            };
            let timer_name = format!(
                "{}_{}_{}",
                layer.name,
                dims_string(&input_desc),
                dims_string(&layer.output)
            );
            let timer: Box<dyn DeviceTimer> = match backend {
                StageBackend::Gpu => self.backend.create_device_timer(&timer_name)?,
                StageBackend::Cpu => Box::new(CpuTimer::new(timer_name)),
            };

            if !layer.is_input_layer {
                layer.ops.init(self.backend.as_mut(), &inputs, &outputs)?;
            }
            log::debug!("INIT {:?} Layer {} : {}", backend, i, layer.name);

            self.stages.push(RenderStage {
                flatten_layer: layer.flatten_layer,
                layer,
                timer,
                backend,
                transition,
                inputs,
                outputs,
                input_ids,
                delay_bind_mask,
            });
        }

        if self.dump_outputs {
            if let Err(e) = create_dir_if_not_exists(&self.config.dump_dir) {
                log::error!("Can't create dump folder {:?}: {}", self.config.dump_dir, e);
            }
        }

        if let Some(last) = self.stages.last() {
            let out = last.layer.output;
            if self.bind_output && [out.width, out.height, out.depth] != [output_width, output_height, output_depth] {
                log::warn!(
                    "last layer {} produces {}x{}x{}, model output declared as {}x{}x{}",
                    last.layer.name,
                    out.width,
                    out.height,
                    out.depth,
                    output_width,
                    output_height,
                    output_depth
                );
            }
        }

        log::info!(
            "Initialized {} stages ({} input layers), output binding {}",
            self.stages.len(),
            self.stages.iter().filter(|s| s.layer.is_input_layer).count(),
            if self.bind_output { "on" } else { "off" }
        );
        log::info!(
            "Time spent in initialization for MixedInferenceCore: {} secs",
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Run one inference.
    pub fn run(&mut self, rp: &mut RunParameters) -> Result<(), SnnError> {
        if rp.input_images.len() != self.input_count {
            return Err(SnnError::Core(format!(
                "wrong input texture count {} <-> {}",
                rp.input_images.len(),
                self.input_count
            )));
        }
        if self.stages.is_empty() {
            return Err(SnnError::Core("inference core is not initialized".to_string()));
        }

        for (image, rows) in rp.input_images.iter().zip(&rp.input_matrix) {
            if rows.is_empty() {
                continue;
            }
            let mut texture = image.borrow_mut();
            texture.download()?;
            texture.write_channels(&rows.concat());
        }

        self.run_time.start()?;
        let dump_dir = self.dump_outputs.then(|| self.config.dump_dir.clone());
        let bind_index = self.stages.len() - 1;
        self.backend
            .prepare_run(rp, &mut self.stages, self.bind_output, bind_index)?;

        for stage in self.stages.iter_mut() {
            stage.bind_model_inputs(&rp.input_images)?;

            if stage.backend == StageBackend::Gpu {
                self.backend.prepare_stage(rp, stage)?;
            }
            if self.profiling {
                stage.timer.start()?;
            }

            if stage.layer.is_input_layer {
                if let (Some(input), Some(output)) = (stage.inputs.first(), stage.outputs.first()) {
                    output.borrow_mut().attach(&input.borrow());
                }
            } else {
                match stage.backend {
                    StageBackend::Gpu => {
                        stage.layer.ops.run(
                            self.backend.as_mut(),
                            &stage.inputs,
                            &stage.outputs,
                            dump_dir.as_deref(),
                        )?;
                    }
                    StageBackend::Cpu => {
                        if stage.transition == Transition::GpuToCpu {
                            self.backend.sync()?;
                        }
                        for input in &stage.inputs {
                            input.borrow_mut().download()?;
                        }
                        stage.layer.ops.compute(&stage.inputs, &stage.outputs)?;

                        if let Some(folder) = &dump_dir {
                            let name = format!("{} cpu layer", stage.layer.name);
                            if let Err(e) = dump_text_outputs(folder, &name, stage.outputs[0].borrow().output_mat()) {
                                log::error!("Error dumping outputs for layer {}: {}", stage.layer.name, e);
                            }
                        }
                    }
                }
            }

            if self.profiling {
                stage.timer.stop()?;
            }
            log::debug!("Ran stage {}", stage.layer.name);
        }

        self.backend.sync()?;
        let folder: PathBuf = self.config.dump_dir.clone();
        self.backend.post_run(&self.stages, self.dump_outputs, &folder)?;

        if self.profiling {
            for stage in self.stages.iter_mut() {
                stage.timer.resolve()?;
                for (pass, ns) in stage.layer.ops.pass_durations()? {
                    log::debug!("{}: {} ms", pass, ns / 1_000_000.0);
                }
            }
        }
        self.backend.cleanup_run();
        self.run_time.stop()?;

        if self.profiling {
            log::debug!("{}", self.print_timing_stats());
        }

        self.collect_output(rp);
        Ok(())
    }

    fn collect_output(&mut self, rp: &mut RunParameters) {
        let Some(last) = self.stages.last() else {
            return;
        };
        if last.backend != StageBackend::Cpu {
            return;
        }

        self.output = last.outputs[0].borrow().output_mat().to_vec();
        rp.output = vec![self.output.clone()];

        if let Some(first) = self.output.first() {
            let mut text = String::from("----------------------- [Model Output] -----------------------\n");
            for v in first {
                let _ = writeln!(text, "{}", v);
            }
            text.push_str("-------------------------------------------------------------");
            log::info!("{}", text);
        }

        match rp.model_output.model_type {
            ModelType::Classification => {
                rp.model_output.classifier_output = self.output.first().map_or(0, |row| classify(row));
            }
            ModelType::Detection => {
                rp.model_output.detection_output = self.output.clone();
            }
            ModelType::Other => {}
        }
    }

    pub fn stages(&self) -> &[RenderStage] {
        &self.stages
    }

    pub fn bind_output(&self) -> bool {
        self.bind_output
    }

    /// Final host output of the last run.
    pub fn output(&self) -> &[Vec<f32>] {
        &self.output
    }

    pub fn backend(&self) -> &dyn DeviceBackend {
        self.backend.as_ref()
    }

    /// Per-stage times of the last run, in milliseconds.
    pub fn print_timing_stats(&self) -> String {
        let width = self
            .stages
            .iter()
            .map(|s| s.timer.name().len())
            .chain(std::iter::once(self.run_time.name().len()))
            .max()
            .unwrap_or(0);

        let mut out = String::from("\n");
        out.push_str("=========================  Inference Core Time Stats =========================\n");
        for s in &self.stages {
            let _ = writeln!(out, "    {:<width$} : {} ms", s.timer.name(), s.timer.duration_ms(), width = width);
        }
        out.push_str("-------------------------------------------------------------------------------\n");
        let _ = writeln!(
            out,
            "    {:<width$} : {} ms",
            self.run_time.name(),
            self.run_time.duration_ms(),
            width = width
        );
        out.push_str("===============================================================================\n");
        out
    }

    /// Append the last run's times, in milliseconds, keyed by timer name.
    pub fn write_time_stat(&self, time_array: &mut BTreeMap<String, Vec<f64>>) {
        time_array
            .entry(self.run_time.name().to_string())
            .or_default()
            .push(self.run_time.duration_ms());
        for s in &self.stages {
            time_array
                .entry(s.timer.name().to_string())
                .or_default()
                .push(s.timer.duration_ms());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_is_one_based() {
        assert_eq!(classify(&[0.1, 0.7, 0.2]), 2);
        assert_eq!(classify(&[5.0]), 1);
        assert_eq!(classify(&[]), 0);
        // ties keep the first maximum
        assert_eq!(classify(&[1.0, 1.0]), 1);
    }

    #[test]
    fn timer_dims_are_width_height_channels() {
        let desc = IODesc::new(crate::texture::color::ColorFormat::Rgba8, 32, 16, 1, 3);
        assert_eq!(dims_string(&desc), "32x16x3");
    }

    #[test]
    fn uninitialized_core_refuses_to_run() {
        let mut core = MixedInferenceCore::new(&GpuContext::Cpu, EngineConfig::default()).unwrap();
        let mut rp = RunParameters::default();
        assert!(matches!(core.run(&mut rp), Err(SnnError::Core(_))));
    }

    #[test]
    fn graphs_without_inputs_are_rejected() {
        let mut core = MixedInferenceCore::new(&GpuContext::Cpu, EngineConfig::default()).unwrap();
        let cp = CreationParameters {
            graph: InferenceGraph::default(),
            output_width: 1,
            output_height: 1,
            output_depth: 1,
            dump_outputs: false,
        };
        assert!(matches!(core.init(cp), Err(SnnError::Core(_))));
    }
}
