//! SNN - mixed CPU/GPU neural network inference on Vulkan compute
//!
//! A network arrives as an [`InferenceGraph`] of pre-built layers. The
//! [`MixedInferenceCore`] turns it into stages, moves images between host and device
//! where the execution location changes, and records GPU work with minimal barriers.

pub mod backend;
pub mod config;
pub mod gpu;
pub mod graph;
pub mod inference;
pub mod layers;
pub mod render_pass;
pub mod texture;
pub mod utils;

pub use backend::{DeviceBackend, cpu::CpuBackend, vulkan::VulkanBackend};
pub use config::EngineConfig;
pub use gpu::context::{GpuBackendType, GpuContext};
pub use graph::{
    inference_graph::{IODesc, InferenceGraph, Layer, LayerExecution, LayerOps, LayerRef},
    pass::{InferencePassVulkan, InferencePassesVulkan},
};
pub use inference::{
    inference_core::{CreationParameters, MixedInferenceCore, ModelOutput, ModelType, RunParameters},
    stage::{RenderStage, StageBackend, Transition},
};
pub use layers::{
    cpu::{Activation, DenseLayer, FlattenLayer},
    shader::ShaderLayer,
};
pub use texture::{
    color::ColorFormat,
    image_texture::{ImageTexture, ImageTextureRef},
};
pub use utils::error::SnnError;
