//! 2D convolution and upsampling layers.
//!
//! Convolution is lowered to matrix multiplication through im2col
//! (`unfold2d`), so the same tape-based autograd that trains the fully
//! connected layers trains the convolutional ones.

use super::init::{kaiming_uniform, zeros};
use super::module::Module;
use crate::autograd::Tensor;

/// 2D convolution over a `[B, C, H, W]` tensor.
///
/// The kernel bank is stored flattened as `[out_channels, in_channels *
/// kh * kw]` so the forward pass is a single matmul against the
/// unfolded input patches.
pub struct Conv2d {
    /// Flattened kernel bank, shape: [out_channels, in_channels * kh * kw]
    weight: Tensor,

    /// Cached transposed kernel bank. Recomputed by `refresh_caches`
    /// after each optimizer step, like `Linear`.
    weight_t: Tensor,

    /// Bias per output channel, shape: [out_channels]
    bias: Tensor,

    in_channels: usize,
    out_channels: usize,
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
}

impl Conv2d {
    /// Create a convolution layer with Kaiming initialization.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Self {
        Self::with_seed(in_channels, out_channels, kernel, stride, padding, None)
    }

    /// Create a convolution layer with a specific random seed.
    pub fn with_seed(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
        seed: Option<u64>,
    ) -> Self {
        let fan_in = in_channels * kernel.0 * kernel.1;
        let weight = kaiming_uniform(&[out_channels, fan_in], fan_in, seed).requires_grad();
        let weight_t = weight.transpose();
        let bias = zeros(&[out_channels]).requires_grad();

        Self {
            weight,
            weight_t,
            bias,
            in_channels,
            out_channels,
            kernel,
            stride,
            padding,
        }
    }

    /// Get the output channel count.
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Spatial output size for a given input size.
    pub fn output_size(&self, h: usize, w: usize) -> (usize, usize) {
        let oh = (h + 2 * self.padding.0 - self.kernel.0) / self.stride.0 + 1;
        let ow = (w + 2 * self.padding.1 - self.kernel.1) / self.stride.1 + 1;
        (oh, ow)
    }

    /// Get reference to the flattened kernel bank.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Get reference to the bias.
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Overwrite the kernel data in place, keeping the tensor id.
    pub fn load_weight(&mut self, data: &[f32]) {
        self.weight.data_mut().copy_from_slice(data);
        self.weight_t = self.weight.transpose();
    }

    /// Overwrite the bias data in place.
    pub fn load_bias(&mut self, data: &[f32]) {
        self.bias.data_mut().copy_from_slice(data);
    }
}

impl Module for Conv2d {
    fn forward(&self, input: &Tensor) -> Tensor {
        assert_eq!(input.ndim(), 4, "Conv2d expects [B, C, H, W] input");
        let (b, c) = (input.shape()[0], input.shape()[1]);
        assert_eq!(c, self.in_channels, "Conv2d channel mismatch");
        let (h, w) = (input.shape()[2], input.shape()[3]);
        let (oh, ow) = self.output_size(h, w);

        // [B*oh*ow, C*kh*kw] @ [C*kh*kw, out_c] + bias
        let patches = input.unfold2d(self.kernel, self.stride, self.padding);
        let out = patches.matmul(&self.weight_t).broadcast_add(&self.bias);

        // [B*oh*ow, out_c] -> [B, out_c, oh, ow]
        out.view(&[b, oh * ow, self.out_channels])
            .permute3([0, 2, 1])
            .view(&[b, self.out_channels, oh, ow])
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.weight, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.weight, &mut self.bias]
    }

    fn refresh_caches(&mut self) {
        self.weight_t = self.weight.transpose();
    }
}

impl std::fmt::Debug for Conv2d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conv2d")
            .field("in_channels", &self.in_channels)
            .field("out_channels", &self.out_channels)
            .field("kernel", &self.kernel)
            .field("stride", &self.stride)
            .field("padding", &self.padding)
            .finish_non_exhaustive()
    }
}

/// Nearest-neighbor upsampling to a fixed spatial size.
#[derive(Debug, Clone, Copy)]
pub struct Upsample2d {
    out_h: usize,
    out_w: usize,
}

impl Upsample2d {
    #[must_use]
    pub fn new(out_h: usize, out_w: usize) -> Self {
        Self { out_h, out_w }
    }
}

impl Module for Upsample2d {
    fn forward(&self, input: &Tensor) -> Tensor {
        input.upsample2d(self.out_h, self.out_w)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        Vec::new()
    }
}
