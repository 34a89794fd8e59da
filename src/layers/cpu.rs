//! Host-side layers that finish a network after its convolutional part.

use crate::{
    graph::inference_graph::LayerOps,
    texture::image_texture::ImageTextureRef,
    utils::error::SnnError,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Identity,
    Relu,
    LeakyRelu(f32),
    Sigmoid,
    Tanh,
    Silu,
    Softmax,
}

impl Activation {
    pub fn apply(self, values: &mut [f32]) {
        match self {
            Activation::Identity => {}
            Activation::Relu => values.iter_mut().for_each(|v| *v = v.max(0.0)),
            Activation::LeakyRelu(alpha) => values
                .iter_mut()
                .for_each(|v| *v = if *v < 0.0 { *v * alpha } else { *v }),
            Activation::Sigmoid => values.iter_mut().for_each(|v| *v = sigmoid(*v)),
            Activation::Tanh => values.iter_mut().for_each(|v| *v = v.tanh()),
            Activation::Silu => values.iter_mut().for_each(|v| *v *= sigmoid(*v)),
            Activation::Softmax => {
                let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mut sum = 0.0;
                for v in values.iter_mut() {
                    *v = (*v - max).exp();
                    sum += *v;
                }
                if sum > 0.0 {
                    values.iter_mut().for_each(|v| *v /= sum);
                }
            }
        }
    }
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

fn first_input(inputs: &[ImageTextureRef]) -> Result<&ImageTextureRef, SnnError> {
    inputs
        .first()
        .ok_or_else(|| SnnError::Graph("CPU layer without input".to_string()))
}

/// Input values as one row: the producer's matrix if it left one, else its pixels.
fn input_row(inputs: &[ImageTextureRef]) -> Result<Vec<f32>, SnnError> {
    let texture = first_input(inputs)?.borrow();
    if texture.output_mat().is_empty() {
        Ok(texture.read_channels())
    } else {
        Ok(texture.output_mat().concat())
    }
}

fn write_row(outputs: &[ImageTextureRef], row: Vec<f32>) -> Result<(), SnnError> {
    let output = outputs
        .first()
        .ok_or_else(|| SnnError::Graph("CPU layer without output".to_string()))?;
    let mut texture = output.borrow_mut();
    texture.write_channels(&row);
    texture.set_output_mat(vec![row]);
    Ok(())
}

/// Turns the channel planes of an image into a single row in height, width, channel order.
///
/// Each pixel contributes its first `channels` values. The rest are the padding
/// components of the last RGBA plane and are dropped.
#[derive(Debug, Clone, Copy)]
pub struct FlattenLayer {
    channels: u32,
}

impl FlattenLayer {
    pub fn new(channels: u32) -> Self {
        assert!(channels > 0, "flatten layer needs at least one channel");
        Self { channels }
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    fn flatten(&self, inputs: &[ImageTextureRef]) -> Result<Vec<f32>, SnnError> {
        let texture = first_input(inputs)?.borrow();
        if !texture.output_mat().is_empty() {
            return Ok(texture.output_mat().concat());
        }

        let stride = texture.channels() as usize;
        if stride == 0 {
            return Ok(Vec::new());
        }
        let keep = (self.channels as usize).min(stride);
        Ok(texture
            .read_channels()
            .chunks_exact(stride)
            .flat_map(|pixel| pixel[..keep].iter().copied())
            .collect())
    }
}

impl LayerOps for FlattenLayer {
    fn compute(
        &mut self,
        inputs: &[ImageTextureRef],
        outputs: &[ImageTextureRef],
    ) -> Result<(), SnnError> {
        let row = self.flatten(inputs)?;
        log::debug!("flatten: {} values from {} channels", row.len(), self.channels);
        write_row(outputs, row)
    }

    fn is_flatten(&self) -> bool {
        true
    }
}

/// `out[o] = activation(sum_i weights[o][i] * x[i] + bias[o])`
#[derive(Debug, Clone)]
pub struct DenseLayer {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
    activation: Activation,
}

impl DenseLayer {
    /// `weights` holds one row of input weights per output.
    pub fn new(weights: Vec<Vec<f32>>, bias: Vec<f32>, activation: Activation) -> Self {
        assert_eq!(
            weights.len(),
            bias.len(),
            "dense layer has {} weight rows but {} biases",
            weights.len(),
            bias.len()
        );
        Self {
            weights,
            bias,
            activation,
        }
    }

    pub fn outputs(&self) -> usize {
        self.bias.len()
    }

    pub fn forward(&self, x: &[f32]) -> Result<Vec<f32>, SnnError> {
        let mut out = Vec::with_capacity(self.outputs());
        for (row, b) in self.weights.iter().zip(&self.bias) {
            if row.len() != x.len() {
                return Err(SnnError::Graph(format!(
                    "dense layer expects {} inputs, got {}",
                    row.len(),
                    x.len()
                )));
            }
            out.push(row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>() + b);
        }
        self.activation.apply(&mut out);
        Ok(out)
    }
}

impl LayerOps for DenseLayer {
    fn compute(
        &mut self,
        inputs: &[ImageTextureRef],
        outputs: &[ImageTextureRef],
    ) -> Result<(), SnnError> {
        let x = input_row(inputs)?;
        let out = self.forward(&x)?;
        write_row(outputs, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gpu::context::GpuContext,
        texture::{color::ColorFormat, image_texture::ImageTexture},
    };

    fn close(a: &[f32], b: &[f32]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn activations() {
        let mut v = vec![-2.0, 0.0, 3.0];
        Activation::Relu.apply(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 3.0]);

        let mut v = vec![-2.0, 4.0];
        Activation::LeakyRelu(0.1).apply(&mut v);
        assert!(close(&v, &[-0.2, 4.0]));

        let mut v = vec![0.0];
        Activation::Sigmoid.apply(&mut v);
        assert_eq!(v, vec![0.5]);

        let mut v = vec![1.0];
        Activation::Silu.apply(&mut v);
        assert!(close(&v, &[sigmoid(1.0)]));

        let mut v = vec![1.0, 2.0, 3.0];
        Activation::Softmax.apply(&mut v);
        assert!((v.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(v[2] > v[1] && v[1] > v[0]);
    }

    #[test]
    fn dense_forward() {
        let dense = DenseLayer::new(
            vec![vec![1.0, 2.0], vec![-1.0, 0.5]],
            vec![0.5, 0.0],
            Activation::Identity,
        );
        assert!(close(&dense.forward(&[1.0, 1.0]).unwrap(), &[3.5, -0.5]));
        assert!(dense.forward(&[1.0]).is_err());
    }

    #[test]
    #[should_panic(expected = "weight rows")]
    fn dense_rejects_mismatched_bias() {
        DenseLayer::new(vec![vec![1.0]], vec![], Activation::Relu);
    }

    #[test]
    fn flatten_reads_pixels_in_hwc_order() {
        let ctx = GpuContext::Cpu;
        let mut input = ImageTexture::with_dims_on_cpu(&ctx, [2, 1, 1, 1], ColorFormat::Rgba8);
        input.write_channels(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let input = input.into_ref();
        let output = ImageTexture::with_dims_on_cpu(&ctx, [8, 1, 1, 1], ColorFormat::R32f).into_ref();

        let mut flatten = FlattenLayer::new(4);
        flatten.compute(&[input], &[output.clone()]).unwrap();

        let out = output.borrow();
        assert_eq!(out.output_mat()[0], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(out.read_channels(), out.output_mat()[0]);
        assert!(flatten.is_flatten());
    }

    #[test]
    fn flatten_drops_padding_components() {
        let ctx = GpuContext::Cpu;
        let mut input = ImageTexture::with_dims_on_cpu(&ctx, [1, 1, 1, 1], ColorFormat::Rgba8);
        input.write_channels(&[1.0, 2.0, 3.0, 255.0]);
        let output = ImageTexture::with_dims_on_cpu(&ctx, [3, 1, 1, 1], ColorFormat::R32f).into_ref();

        let mut flatten = FlattenLayer::new(3);
        flatten.compute(&[input.into_ref()], &[output.clone()]).unwrap();
        assert_eq!(output.borrow().output_mat()[0], vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn flatten_keeps_every_full_plane() {
        let ctx = GpuContext::Cpu;
        // six channels over two planes, the second half padded
        let mut input = ImageTexture::with_dims_on_cpu(&ctx, [2, 1, 1, 2], ColorFormat::Rgba8);
        let values: Vec<f32> = (1..=16).map(|v| v as f32).collect();
        input.write_channels(&values);
        let output = ImageTexture::with_dims_on_cpu(&ctx, [12, 1, 1, 1], ColorFormat::R32f).into_ref();

        let mut flatten = FlattenLayer::new(6);
        flatten.compute(&[input.into_ref()], &[output.clone()]).unwrap();
        assert_eq!(
            output.borrow().output_mat()[0],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0]
        );
    }

    #[test]
    fn dense_prefers_producer_matrix() {
        let ctx = GpuContext::Cpu;
        let mut input = ImageTexture::with_dims_on_cpu(&ctx, [2, 1, 1, 1], ColorFormat::R32f);
        input.set_output_mat(vec![vec![2.0], vec![3.0]]);
        let output = ImageTexture::with_dims_on_cpu(&ctx, [1, 1, 1, 1], ColorFormat::R32f).into_ref();

        let mut dense = DenseLayer::new(vec![vec![1.0, 1.0]], vec![0.0], Activation::Identity);
        dense.compute(&[input.into_ref()], &[output.clone()]).unwrap();
        assert_eq!(output.borrow().output_mat(), &[vec![5.0]]);
    }
}
