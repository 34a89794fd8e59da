//! One backend object per (layer, shader pass) pair.

use std::path::Path;

use crate::{texture::image_texture::ImageTextureRef, utils::error::SnnError};

pub mod vulkan;

pub trait RenderPass {
    /// `"<layer> pass[<n>]"`
    fn name(&self) -> &str;

    /// Record one dispatch reading `inputs` and writing `outputs[0]`.
    fn run(
        &mut self,
        inputs: &[ImageTextureRef],
        outputs: &[ImageTextureRef],
    ) -> Result<(), SnnError>;

    /// Write the first input as `<folder>/<layer>/<NN>_input.png` and `<folder>/<pass>_input.dump`.
    fn debug_pass_inputs(&self, folder: &Path, inputs: &[ImageTextureRef]) -> Result<(), SnnError>;

    /// Write the constant weights of pass `pass_index` as text.
    fn debug_pass_weights(&self, folder: &Path, pass_index: usize) -> Result<(), SnnError>;

    /// GPU time of the last recorded dispatch, once it has completed.
    fn elapsed_ns(&self) -> Result<Option<f64>, SnnError> {
        Ok(None)
    }
}
