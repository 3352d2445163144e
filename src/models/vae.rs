//! Plain variational autoencoder.
//!
//! Learns a Gaussian latent code for fixed-size image patches via the
//! reparameterization trick, trained on the evidence lower bound
//! (reconstruction error plus KL to the standard normal prior).

use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::autograd::{clear_graph, no_grad, Tensor};
use crate::error::{LatenteError, Result};
use crate::imgproc::normal_grid;
use crate::nn::Adam;

use super::config::VaeConfig;
use super::decoder::Decoder;
use super::elbo::{kl_normal, reconstruction_loss, reparameterize};
use super::encoder::Encoder;
use super::serialize;
use super::{
    flatten_batch, gather_rows, one_hot, one_hot_rows, shuffled_batches, tile_decoded,
    validate_cycles, validate_grid,
};

/// Variational autoencoder over `(H, W)` image patches.
///
/// ```ignore
/// let mut vae = Vae::new((28, 28), 2, VaeConfig::new().seed(0))?;
/// vae.fit(&images, 100)?;
/// let (mu, log_var) = vae.encode(&images)?;
/// ```
pub struct Vae {
    encoder: Encoder,
    decoder: Decoder,
    input_dim: (usize, usize),
    latent_dim: usize,
    config: VaeConfig,
    loss_history: Vec<f32>,
    rng: StdRng,
}

impl Vae {
    /// Build a VAE for `input_dim` patches with a `latent_dim`
    /// continuous code.
    pub fn new(input_dim: (usize, usize), latent_dim: usize, config: VaeConfig) -> Result<Self> {
        config.validate(input_dim, latent_dim)?;

        let decoder_in = latent_dim + config.num_classes.unwrap_or(0);
        let encoder = Encoder::new(input_dim, latent_dim, 0, &config);
        let decoder = Decoder::new(decoder_in, input_dim, &config);
        let rng = match config.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            encoder,
            decoder,
            input_dim,
            latent_dim,
            config,
            loss_history: Vec::new(),
            rng,
        })
    }

    /// Continuous latent dimensionality.
    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// Configured patch size.
    pub fn input_dim(&self) -> (usize, usize) {
        self.input_dim
    }

    /// Mean training loss per cycle, across all `fit` calls.
    pub fn loss_history(&self) -> &[f32] {
        &self.loss_history
    }

    /// Train on an unlabelled image batch for `training_cycles` cycles.
    ///
    /// Class-conditioned models need labels; use [`Vae::fit_labelled`].
    pub fn fit(&mut self, data: &Tensor, training_cycles: usize) -> Result<()> {
        if self.config.num_classes.is_some() {
            return Err(LatenteError::MissingClassLabel);
        }
        self.fit_inner(data, None, training_cycles)
    }

    /// Train a class-conditioned model with one label per image.
    pub fn fit_labelled(
        &mut self,
        data: &Tensor,
        labels: &[usize],
        training_cycles: usize,
    ) -> Result<()> {
        let Some(num_classes) = self.config.num_classes else {
            return Err(LatenteError::UnexpectedClassLabel {
                label: labels.first().copied().unwrap_or(0),
            });
        };
        if let Some(&bad) = labels.iter().find(|&&l| l >= num_classes) {
            return Err(LatenteError::InvalidHyperparameter {
                param: "label".into(),
                value: bad.to_string(),
                constraint: format!("must be below num_classes = {num_classes}"),
            });
        }
        self.fit_inner(data, Some(labels), training_cycles)
    }

    fn fit_inner(
        &mut self,
        data: &Tensor,
        labels: Option<&[usize]>,
        training_cycles: usize,
    ) -> Result<()> {
        validate_cycles(training_cycles)?;
        let x = flatten_batch(data, self.input_dim)?;
        let n = x.shape()[0];
        if let Some(labels) = labels {
            if labels.len() != n {
                return Err(LatenteError::DimensionMismatch {
                    expected: format!("{n} labels"),
                    actual: labels.len().to_string(),
                });
            }
        }

        let (h, w) = self.input_dim;
        let mut opt = Adam::new(self.config.learning_rate);

        for _ in 0..training_cycles {
            let mut cycle_loss = 0.0;
            for batch_idx in shuffled_batches(n, self.config.batch_size, &mut self.rng) {
                clear_graph();
                self.encoder.refresh_caches();
                self.decoder.refresh_caches();

                let xb = gather_rows(&x, &batch_idx);
                let b = batch_idx.len();

                let (mu, log_var, _) = self.encoder.forward(&xb);
                let mut z = reparameterize(&mu, &log_var, &mut self.rng);
                if let (Some(labels), Some(num_classes)) = (labels, self.config.num_classes) {
                    let batch_labels: Vec<usize> =
                        batch_idx.iter().map(|&i| labels[i]).collect();
                    z = z.cat_cols(&one_hot_rows(&batch_labels, num_classes));
                }
                let reconstruction = self.decoder.forward(&z);

                let loss = reconstruction_loss(&reconstruction, &xb.view(&[b, h, w]))
                    .add(&kl_normal(&mu, &log_var).mul_scalar(self.config.beta));
                cycle_loss += loss.item() * b as f32;
                loss.backward();

                let mut params = self.encoder.parameters_mut();
                params.extend(self.decoder.parameters_mut());
                opt.step(&mut params);
            }
            self.loss_history.push(cycle_loss / n as f32);
        }
        clear_graph();
        self.encoder.refresh_caches();
        self.decoder.refresh_caches();
        Ok(())
    }

    /// Posterior statistics `(mu, log_var)` for an image batch, each
    /// `[N, latent_dim]`.
    pub fn encode(&self, data: &Tensor) -> Result<(Tensor, Tensor)> {
        let x = flatten_batch(data, self.input_dim)?;
        let (mu, log_var, _) = no_grad(|| self.encoder.forward(&x));
        Ok((mu, log_var))
    }

    /// Decode a latent batch `[B, latent_dim]` (or a single vector) to
    /// images `[B, H, W]`. `y` is the class label for conditioned
    /// models.
    pub fn decode(&self, z: &Tensor, y: Option<usize>) -> Result<Tensor> {
        let z = normalize_latent(z, self.latent_dim)?;
        let z = self.condition(&z, y)?;
        Ok(no_grad(|| self.decoder.forward(&z)))
    }

    /// Draw `num_samples` posterior samples for one input image and
    /// decode each, returning `[num_samples, H, W]`.
    pub fn reconstruct(&mut self, x: &Tensor, num_samples: usize) -> Result<Tensor> {
        if self.config.num_classes.is_some() {
            return Err(LatenteError::MissingClassLabel);
        }
        if num_samples == 0 {
            return Err(LatenteError::InvalidHyperparameter {
                param: "num_samples".into(),
                value: "0".into(),
                constraint: "must draw at least one sample".into(),
            });
        }
        let flat = flatten_batch(x, self.input_dim)?;
        let rng = &mut self.rng;
        let (encoder, decoder) = (&self.encoder, &self.decoder);
        Ok(no_grad(|| {
            let (mu, log_var, _) = encoder.forward(&flat);
            let mu_s = repeat_rows(&mu, num_samples);
            let log_var_s = repeat_rows(&log_var, num_samples);
            let z = reparameterize(&mu_s, &log_var_s, rng);
            decoder.forward(&z)
        }))
    }

    /// Dense latent map over a larger image stack: stride-1 sliding
    /// window encode. Returns the cropped reference stack and the
    /// per-position posterior means.
    pub fn encode_images(&self, images: &Tensor) -> Result<(Tensor, Tensor)> {
        super::encode_stack(images, self.input_dim, |batch| {
            no_grad(|| self.encoder.forward(batch).0)
        })
    }

    /// Decode a `d x d` grid over the first two latent dimensions into
    /// one `(d*H, d*W)` tiled image.
    pub fn manifold2d(&self, d: usize) -> Result<Tensor> {
        if self.latent_dim < 2 {
            return Err(LatenteError::InvalidHyperparameter {
                param: "latent_dim".into(),
                value: self.latent_dim.to_string(),
                constraint: "manifold2d needs at least two continuous dims".into(),
            });
        }
        if self.config.num_classes.is_some() {
            return Err(LatenteError::MissingClassLabel);
        }
        validate_grid(d)?;
        let grid = normal_grid(d);
        let mut z = vec![0.0; d * d * self.latent_dim];
        for i in 0..d {
            for j in 0..d {
                let row = (i * d + j) * self.latent_dim;
                z[row] = grid[i];
                z[row + 1] = grid[j];
            }
        }
        let z = Tensor::from_vec(z, &[d * d, self.latent_dim]);
        let decoded = no_grad(|| self.decoder.forward(&z));
        Ok(tile_decoded(&decoded, d, d, 0))
    }

    /// Decode evenly spaced points between the posterior means of two
    /// inputs.
    pub fn interpolate(&self, x1: &Tensor, x2: &Tensor, steps: usize) -> Result<Vec<Tensor>> {
        if steps < 2 {
            return Err(LatenteError::InvalidHyperparameter {
                param: "steps".into(),
                value: steps.to_string(),
                constraint: "interpolation needs at least two steps".into(),
            });
        }
        let (mu1, _) = self.encode(x1)?;
        let (mu2, _) = self.encode(x2)?;

        let mut frames = Vec::with_capacity(steps);
        for i in 0..steps {
            let alpha = i as f32 / (steps - 1) as f32;
            let z = mu1.mul_scalar(1.0 - alpha).add(&mu2.mul_scalar(alpha));
            frames.push(self.decode(&z, None)?);
        }
        Ok(frames)
    }

    /// Save all weights to a JSON checkpoint.
    pub fn save_weights(&self, path: &Path) -> Result<()> {
        let mut params = self.encoder.parameters();
        params.extend(self.decoder.parameters());
        serialize::save_params(path, &self.config, &params)
    }

    /// Load weights saved by [`Vae::save_weights`] into this model.
    pub fn load_weights(&mut self, path: &Path) -> Result<()> {
        {
            let mut params = self.encoder.parameters_mut();
            params.extend(self.decoder.parameters_mut());
            serialize::load_params(path, &self.config, params)?;
        }
        self.encoder.refresh_caches();
        self.decoder.refresh_caches();
        Ok(())
    }

    fn condition(&self, z: &Tensor, y: Option<usize>) -> Result<Tensor> {
        match (self.config.num_classes, y) {
            (Some(num_classes), Some(label)) => {
                if label >= num_classes {
                    return Err(LatenteError::InvalidHyperparameter {
                        param: "label".into(),
                        value: label.to_string(),
                        constraint: format!("must be below num_classes = {num_classes}"),
                    });
                }
                Ok(z.cat_cols(&one_hot(label, num_classes, z.shape()[0])))
            }
            (Some(_), None) => Err(LatenteError::MissingClassLabel),
            (None, Some(label)) => Err(LatenteError::UnexpectedClassLabel { label }),
            (None, None) => Ok(z.clone()),
        }
    }
}

/// Accept `[B, d]` or a single `[d]` latent vector, checked against the
/// expected trailing dimension.
pub(super) fn normalize_latent(z: &Tensor, expected: usize) -> Result<Tensor> {
    let shape = z.shape();
    match shape {
        [d] if *d == expected => Ok(z.view(&[1, expected])),
        [_, d] if *d == expected => Ok(z.clone()),
        _ => Err(LatenteError::DimensionMismatch {
            expected: format!("latent vectors of width {expected}"),
            actual: format!("{shape:?}"),
        }),
    }
}

/// Repeat each row of a `[B, D]` tensor `reps` times without touching
/// the tape.
pub(super) fn repeat_rows(x: &Tensor, reps: usize) -> Tensor {
    let (rows, cols) = (x.shape()[0], x.shape()[1]);
    let mut data = Vec::with_capacity(rows * reps * cols);
    for r in 0..rows {
        let src = &x.data()[r * cols..(r + 1) * cols];
        for _ in 0..reps {
            data.extend_from_slice(src);
        }
    }
    Tensor::from_vec(data, &[rows * reps, cols])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> VaeConfig {
        VaeConfig::new()
            .hidden_encoder(16)
            .hidden_decoder(16)
            .batch_size(8)
            .seed(42)
    }

    #[test]
    fn test_encode_dims() {
        let vae = Vae::new((8, 8), 2, small_config()).unwrap();
        let data = Tensor::zeros(&[5, 8, 8]);
        let (mu, log_var) = vae.encode(&data).unwrap();
        assert_eq!(mu.shape(), &[5, 2]);
        assert_eq!(log_var.shape(), &[5, 2]);
    }

    #[test]
    fn test_decode_zeros_nonzero_output() {
        let vae = Vae::new((8, 8), 2, small_config()).unwrap();
        let img = vae.decode(&Tensor::zeros(&[1, 2]), None).unwrap();
        assert_eq!(img.shape(), &[1, 8, 8]);
        assert!(img.data().iter().sum::<f32>() > 0.0);
    }

    #[test]
    fn test_decode_wrong_dim_rejected() {
        let vae = Vae::new((8, 8), 2, small_config()).unwrap();
        assert!(matches!(
            vae.decode(&Tensor::zeros(&[1, 3]), None).unwrap_err(),
            LatenteError::DimensionMismatch { .. }
        ));
    }

    #[test]
    fn test_fit_records_loss_history() {
        let mut vae = Vae::new((8, 8), 2, small_config()).unwrap();
        let data = Tensor::ones(&[16, 8, 8]);
        vae.fit(&data, 2).unwrap();
        assert_eq!(vae.loss_history().len(), 2);
        assert!(vae.loss_history().iter().all(|l| l.is_finite()));
    }

    #[test]
    fn test_fit_zero_cycles_rejected() {
        let mut vae = Vae::new((8, 8), 2, small_config()).unwrap();
        let data = Tensor::ones(&[4, 8, 8]);
        assert!(vae.fit(&data, 0).is_err());
    }

    #[test]
    fn test_fit_reduces_loss() {
        let mut vae = Vae::new((6, 6), 2, small_config().learning_rate(5e-3)).unwrap();
        let data = Tensor::from_vec(
            (0..8 * 36).map(|i| (i % 2) as f32).collect(),
            &[8, 6, 6],
        );
        vae.fit(&data, 30).unwrap();
        let first = vae.loss_history()[0];
        let last = *vae.loss_history().last().unwrap();
        assert!(last < first, "training should reduce loss: {first} -> {last}");
    }

    #[test]
    fn test_reconstruct_shape() {
        let mut vae = Vae::new((8, 8), 2, small_config()).unwrap();
        let img = Tensor::ones(&[8, 8]);
        let rec = vae.reconstruct(&img, 32).unwrap();
        assert_eq!(rec.shape(), &[32, 8, 8]);
    }

    #[test]
    fn test_conditioned_decode_requires_label() {
        let vae = Vae::new((8, 8), 2, small_config().num_classes(3)).unwrap();
        assert!(matches!(
            vae.decode(&Tensor::zeros(&[1, 2]), None).unwrap_err(),
            LatenteError::MissingClassLabel
        ));
        assert!(vae.decode(&Tensor::zeros(&[1, 2]), Some(1)).is_ok());
        assert!(vae.decode(&Tensor::zeros(&[1, 2]), Some(3)).is_err());
    }

    #[test]
    fn test_unconditioned_decode_rejects_label() {
        let vae = Vae::new((8, 8), 2, small_config()).unwrap();
        assert!(matches!(
            vae.decode(&Tensor::zeros(&[1, 2]), Some(0)).unwrap_err(),
            LatenteError::UnexpectedClassLabel { label: 0 }
        ));
    }

    #[test]
    fn test_manifold2d_shape() {
        let vae = Vae::new((8, 8), 2, small_config()).unwrap();
        let canvas = vae.manifold2d(4).unwrap();
        assert_eq!(canvas.shape(), &[32, 32]);
    }

    #[test]
    fn test_interpolate_frames() {
        let vae = Vae::new((6, 6), 2, small_config()).unwrap();
        let a = Tensor::zeros(&[6, 6]);
        let b = Tensor::ones(&[6, 6]);
        let frames = vae.interpolate(&a, &b, 5).unwrap();
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[0].shape(), &[1, 6, 6]);
    }
}
