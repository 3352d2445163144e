//! Decoder networks mapping latent vectors back to images.
//!
//! Three variants: a fully connected decoder, a convolutional decoder
//! (fc to a small spatial map, then upsample + conv blocks), and a
//! coordinate decoder for the rotational models, which generates each
//! pixel from its rotated/translated grid coordinate concatenated with
//! the content latent.

use crate::autograd::Tensor;
use crate::nn::{Conv2d, LeakyReLU, Linear, Module, Sigmoid, Tanh, Upsample2d};

use super::config::VaeConfig;

/// Standard decoder: latent vector -> image.
pub(crate) enum Decoder {
    Fc(FcDecoder),
    Conv(ConvDecoder),
}

impl Decoder {
    pub(crate) fn new(in_dim: usize, output_dim: (usize, usize), config: &VaeConfig) -> Self {
        if config.conv_decoder {
            Self::Conv(ConvDecoder::new(in_dim, output_dim, config))
        } else {
            Self::Fc(FcDecoder::new(in_dim, output_dim, config))
        }
    }

    /// Decode a latent batch `[B, in_dim]` to `[B, H, W]`.
    pub(crate) fn forward(&self, z: &Tensor) -> Tensor {
        match self {
            Self::Fc(d) => d.forward(z),
            Self::Conv(d) => d.forward(z),
        }
    }

    pub(crate) fn parameters(&self) -> Vec<&Tensor> {
        match self {
            Self::Fc(d) => d.parameters(),
            Self::Conv(d) => d.parameters(),
        }
    }

    pub(crate) fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        match self {
            Self::Fc(d) => d.parameters_mut(),
            Self::Conv(d) => d.parameters_mut(),
        }
    }

    pub(crate) fn refresh_caches(&mut self) {
        match self {
            Self::Fc(d) => d.refresh_caches(),
            Self::Conv(d) => d.refresh_caches(),
        }
    }
}

/// Fully connected decoder with two tanh hidden layers and a sigmoid
/// pixel output.
pub(crate) struct FcDecoder {
    fc1: Linear,
    fc2: Linear,
    out: Linear,
    act: Tanh,
    out_act: Sigmoid,
    output_dim: (usize, usize),
}

impl FcDecoder {
    fn new(in_dim: usize, output_dim: (usize, usize), config: &VaeConfig) -> Self {
        let (h, w) = output_dim;
        let hidden = config.hidden_decoder;
        let seed = |k: u64| config.seed.map(|s| s.wrapping_add(k));

        Self {
            fc1: Linear::with_seed(in_dim, hidden, seed(11)),
            fc2: Linear::with_seed(hidden, hidden, seed(12)),
            out: Linear::with_seed(hidden, h * w, seed(13)),
            act: Tanh::new(),
            out_act: Sigmoid::new(),
            output_dim,
        }
    }

    fn forward(&self, z: &Tensor) -> Tensor {
        let b = z.shape()[0];
        let (h, w) = self.output_dim;
        let hid = self.act.forward(&self.fc1.forward(z));
        let hid = self.act.forward(&self.fc2.forward(&hid));
        self.out_act.forward(&self.out.forward(&hid)).view(&[b, h, w])
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut p = self.fc1.parameters();
        p.extend(self.fc2.parameters());
        p.extend(self.out.parameters());
        p
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut p = self.fc1.parameters_mut();
        p.extend(self.fc2.parameters_mut());
        p.extend(self.out.parameters_mut());
        p
    }

    fn refresh_caches(&mut self) {
        self.fc1.refresh_caches();
        self.fc2.refresh_caches();
        self.out.refresh_caches();
    }
}

/// Convolutional decoder: project to a small spatial map, then two
/// upsample + conv stages back to full resolution.
pub(crate) struct ConvDecoder {
    fc: Linear,
    up1: Upsample2d,
    conv1: Conv2d,
    up2: Upsample2d,
    conv2: Conv2d,
    act: LeakyReLU,
    out_act: Sigmoid,
    hidden: usize,
    base: (usize, usize),
    output_dim: (usize, usize),
}

impl ConvDecoder {
    fn new(in_dim: usize, output_dim: (usize, usize), config: &VaeConfig) -> Self {
        let (h, w) = output_dim;
        let hidden = config.hidden_decoder;
        let seed = |k: u64| config.seed.map(|s| s.wrapping_add(k));

        // Quarter-resolution base map, doubled twice by upsampling
        let (h2, w2) = (h.div_ceil(2), w.div_ceil(2));
        let base = (h2.div_ceil(2), w2.div_ceil(2));

        Self {
            fc: Linear::with_seed(in_dim, hidden * base.0 * base.1, seed(11)),
            up1: Upsample2d::new(h2, w2),
            conv1: Conv2d::with_seed(hidden, hidden, (3, 3), (1, 1), (1, 1), seed(12)),
            up2: Upsample2d::new(h, w),
            conv2: Conv2d::with_seed(hidden, 1, (3, 3), (1, 1), (1, 1), seed(13)),
            act: LeakyReLU::new(0.1),
            out_act: Sigmoid::new(),
            hidden,
            base,
            output_dim,
        }
    }

    fn forward(&self, z: &Tensor) -> Tensor {
        let b = z.shape()[0];
        let (h, w) = self.output_dim;
        let map = self
            .act
            .forward(&self.fc.forward(z))
            .view(&[b, self.hidden, self.base.0, self.base.1]);
        let map = self.act.forward(&self.conv1.forward(&self.up1.forward(&map)));
        let map = self.conv2.forward(&self.up2.forward(&map));
        self.out_act.forward(&map).view(&[b, h, w])
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut p = self.fc.parameters();
        p.extend(self.conv1.parameters());
        p.extend(self.conv2.parameters());
        p
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut p = self.fc.parameters_mut();
        p.extend(self.conv1.parameters_mut());
        p.extend(self.conv2.parameters_mut());
        p
    }

    fn refresh_caches(&mut self) {
        self.fc.refresh_caches();
        self.conv1.refresh_caches();
        self.conv2.refresh_caches();
    }
}

/// Coordinate decoder for the rotation-invariant models.
///
/// Each output pixel is generated from its grid coordinate, rotated by
/// the angle latent and shifted by the translation latents, then
/// concatenated with the content latent and passed through a tanh MLP.
/// Decoding with zero angle and offsets reproduces the canonical,
/// pose-normalized image.
pub(crate) struct CoordinateDecoder {
    fc1: Linear,
    fc2: Linear,
    out: Linear,
    act: Tanh,
    out_act: Sigmoid,
    output_dim: (usize, usize),
}

impl CoordinateDecoder {
    /// `content_dim` counts the latent components fed per pixel in
    /// addition to the two coordinates.
    pub(crate) fn new(content_dim: usize, output_dim: (usize, usize), config: &VaeConfig) -> Self {
        let hidden = config.hidden_decoder;
        let seed = |k: u64| config.seed.map(|s| s.wrapping_add(k));

        Self {
            fc1: Linear::with_seed(2 + content_dim, hidden, seed(11)),
            fc2: Linear::with_seed(hidden, hidden, seed(12)),
            out: Linear::with_seed(hidden, 1, seed(13)),
            act: Tanh::new(),
            out_act: Sigmoid::new(),
            output_dim,
        }
    }

    /// Normalized pixel grid over [-1, 1]^2 repeated for each batch
    /// element, as two `[B*K, 1]` constant tensors (x, y).
    fn grid(&self, batch: usize) -> (Tensor, Tensor) {
        let (h, w) = self.output_dim;
        let k = h * w;
        let mut gx = Vec::with_capacity(batch * k);
        let mut gy = Vec::with_capacity(batch * k);
        for _ in 0..batch {
            for y in 0..h {
                let fy = if h > 1 { 2.0 * y as f32 / (h - 1) as f32 - 1.0 } else { 0.0 };
                for x in 0..w {
                    let fx = if w > 1 { 2.0 * x as f32 / (w - 1) as f32 - 1.0 } else { 0.0 };
                    gx.push(fx);
                    gy.push(fy);
                }
            }
        }
        (
            Tensor::from_vec(gx, &[batch * k, 1]),
            Tensor::from_vec(gy, &[batch * k, 1]),
        )
    }

    /// Decode with explicit pose latents.
    ///
    /// `theta` is `[B, 1]`; `offsets` is `[B, 2]` when translation is
    /// modeled; `content` is `[B, content_dim]`. Returns `[B, H, W]`.
    pub(crate) fn forward(
        &self,
        theta: &Tensor,
        offsets: Option<&Tensor>,
        content: &Tensor,
    ) -> Tensor {
        let b = content.shape()[0];
        let (h, w) = self.output_dim;
        let k = h * w;

        let (gx, gy) = self.grid(b);
        let cos_t = theta.cos().tile_rows(k);
        let sin_t = theta.sin().tile_rows(k);

        // Rotate the grid by the pose angle
        let mut px = cos_t.mul(&gx).sub(&sin_t.mul(&gy));
        let mut py = sin_t.mul(&gx).add(&cos_t.mul(&gy));

        if let Some(d) = offsets {
            px = px.add(&d.narrow_cols(0, 1).tile_rows(k));
            py = py.add(&d.narrow_cols(1, 1).tile_rows(k));
        }

        let coords = px.cat_cols(&py);
        let inp = coords.cat_cols(&content.tile_rows(k));

        let hid = self.act.forward(&self.fc1.forward(&inp));
        let hid = self.act.forward(&self.fc2.forward(&hid));
        self.out_act.forward(&self.out.forward(&hid)).view(&[b, h, w])
    }

    /// Decode with the identity pose (zero angle, zero offsets).
    pub(crate) fn forward_canonical(&self, content: &Tensor) -> Tensor {
        let b = content.shape()[0];
        let theta = Tensor::zeros(&[b, 1]);
        self.forward(&theta, None, content)
    }

    pub(crate) fn parameters(&self) -> Vec<&Tensor> {
        let mut p = self.fc1.parameters();
        p.extend(self.fc2.parameters());
        p.extend(self.out.parameters());
        p
    }

    pub(crate) fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut p = self.fc1.parameters_mut();
        p.extend(self.fc2.parameters_mut());
        p.extend(self.out.parameters_mut());
        p
    }

    pub(crate) fn refresh_caches(&mut self) {
        self.fc1.refresh_caches();
        self.fc2.refresh_caches();
        self.out.refresh_caches();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fc_decoder_shape() {
        let cfg = VaeConfig::new().hidden_decoder(16).seed(0);
        let dec = Decoder::new(2, (8, 8), &cfg);
        let z = Tensor::zeros(&[3, 2]);
        assert_eq!(dec.forward(&z).shape(), &[3, 8, 8]);
    }

    #[test]
    fn test_conv_decoder_shape() {
        let cfg = VaeConfig::new().conv_decoder(true).hidden_decoder(8).seed(0);
        let dec = Decoder::new(4, (28, 28), &cfg);
        let z = Tensor::zeros(&[2, 4]);
        assert_eq!(dec.forward(&z).shape(), &[2, 28, 28]);
    }

    #[test]
    fn test_conv_decoder_odd_size() {
        let cfg = VaeConfig::new().conv_decoder(true).hidden_decoder(8).seed(0);
        let dec = Decoder::new(2, (7, 9), &cfg);
        let z = Tensor::zeros(&[1, 2]);
        assert_eq!(dec.forward(&z).shape(), &[1, 7, 9]);
    }

    #[test]
    fn test_decoder_output_in_unit_range() {
        let cfg = VaeConfig::new().hidden_decoder(16).seed(0);
        let dec = Decoder::new(2, (4, 4), &cfg);
        let z = Tensor::zeros(&[1, 2]);
        let img = dec.forward(&z);
        assert!(img.data().iter().all(|&v| v > 0.0 && v < 1.0));
    }

    #[test]
    fn test_coordinate_decoder_shape() {
        let cfg = VaeConfig::new().hidden_decoder(16).seed(0);
        let dec = CoordinateDecoder::new(3, (8, 8), &cfg);
        let content = Tensor::zeros(&[2, 3]);
        assert_eq!(dec.forward_canonical(&content).shape(), &[2, 8, 8]);
    }

    #[test]
    fn test_coordinate_decoder_full_rotation_invariant() {
        // A 2π rotation matches the identity decode
        let cfg = VaeConfig::new().hidden_decoder(16).seed(0);
        let dec = CoordinateDecoder::new(2, (6, 6), &cfg);
        let content = Tensor::zeros(&[1, 2]);

        let identity = dec.forward_canonical(&content);
        let theta = Tensor::from_vec(vec![2.0 * std::f32::consts::PI], &[1, 1]);
        let rotated = dec.forward(&theta, None, &content);

        for (a, b) in identity.data().iter().zip(rotated.data().iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_coordinate_decoder_offsets_change_output() {
        let cfg = VaeConfig::new().hidden_decoder(16).seed(0);
        let dec = CoordinateDecoder::new(2, (6, 6), &cfg);
        let content = Tensor::zeros(&[1, 2]);

        let theta = Tensor::zeros(&[1, 1]);
        let offsets = Tensor::from_vec(vec![0.5, -0.5], &[1, 2]);
        let shifted = dec.forward(&theta, Some(&offsets), &content);
        let base = dec.forward_canonical(&content);

        let diff: f32 = base
            .data()
            .iter()
            .zip(shifted.data().iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        assert!(diff > 1e-4);
    }
}
