//! Rotation-invariant variational autoencoder.
//!
//! The first latent component is the in-plane rotation angle; with the
//! translation toggle two offset components follow. The remaining
//! `latent_dim` components carry pose-free content. The decoder is the
//! coordinate network, which applies the pose to the pixel grid before
//! generating intensities, so content and pose disentangle.

use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::autograd::{clear_graph, no_grad, Tensor};
use crate::error::{LatenteError, Result};
use crate::imgproc::normal_grid;
use crate::nn::Adam;

use super::config::VaeConfig;
use super::decoder::CoordinateDecoder;
use super::elbo::{kl_normal, reconstruction_loss, reparameterize};
use super::encoder::Encoder;
use super::serialize;
use super::vae::{normalize_latent, repeat_rows};
use super::{
    flatten_batch, gather_rows, one_hot, one_hot_rows, shuffled_batches, tile_decoded,
    validate_cycles, validate_grid,
};

/// Rotation-invariant (optionally translation-invariant) VAE.
///
/// Encoded dimensionality is `latent_dim + 1` for rotation only, or
/// `latent_dim + 3` with translation. `decode` consumes only the
/// `latent_dim` content components and renders the canonical pose.
pub struct RVae {
    encoder: Encoder,
    decoder: CoordinateDecoder,
    input_dim: (usize, usize),
    latent_dim: usize,
    translation: bool,
    config: VaeConfig,
    loss_history: Vec<f32>,
    rng: StdRng,
}

impl RVae {
    pub fn new(
        input_dim: (usize, usize),
        latent_dim: usize,
        translation: bool,
        config: VaeConfig,
    ) -> Result<Self> {
        config.validate(input_dim, latent_dim)?;

        let pose_dim = if translation { 3 } else { 1 };
        let content_dim = latent_dim + config.num_classes.unwrap_or(0);
        let encoder = Encoder::new(input_dim, latent_dim + pose_dim, 0, &config);
        let decoder = CoordinateDecoder::new(content_dim, input_dim, &config);
        let rng = match config.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            encoder,
            decoder,
            input_dim,
            latent_dim,
            translation,
            config,
            loss_history: Vec::new(),
            rng,
        })
    }

    /// Pose components preceding the content block: angle plus two
    /// offsets when translation is modeled.
    pub fn pose_dim(&self) -> usize {
        if self.translation {
            3
        } else {
            1
        }
    }

    /// Trailing dimension of the encoded statistics.
    pub fn encoded_dim(&self) -> usize {
        self.latent_dim + self.pose_dim()
    }

    /// Content latent dimensionality.
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

    /// Train on an unlabelled image batch.
    ///
    /// Class-conditioned models need labels; use [`RVae::fit_labelled`].
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
        let pose = self.pose_dim();

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
                let z = reparameterize(&mu, &log_var, &mut self.rng);

                let theta = z.narrow_cols(0, 1);
                let offsets = self.translation.then(|| z.narrow_cols(1, 2));
                let mut content = z.narrow_cols(pose, self.latent_dim);
                if let (Some(labels), Some(num_classes)) = (labels, self.config.num_classes) {
                    let batch_labels: Vec<usize> =
                        batch_idx.iter().map(|&i| labels[i]).collect();
                    content = content.cat_cols(&one_hot_rows(&batch_labels, num_classes));
                }
                let reconstruction = self.decoder.forward(&theta, offsets.as_ref(), &content);

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

    /// Posterior statistics `(mu, log_var)`, each trailing
    /// [`RVae::encoded_dim`] with pose components first.
    pub fn encode(&self, data: &Tensor) -> Result<(Tensor, Tensor)> {
        let x = flatten_batch(data, self.input_dim)?;
        let (mu, log_var, _) = no_grad(|| self.encoder.forward(&x));
        Ok((mu, log_var))
    }

    /// Decode content latents `[B, latent_dim]` at the canonical pose.
    pub fn decode(&self, z: &Tensor, y: Option<usize>) -> Result<Tensor> {
        let z = normalize_latent(z, self.latent_dim)?;
        let z = self.condition(&z, y)?;
        Ok(no_grad(|| self.decoder.forward_canonical(&z)))
    }

    /// Draw `num_samples` posterior samples for one input and decode
    /// each with its sampled pose, returning `[num_samples, H, W]`.
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
        let pose = self.pose_dim();
        let latent_dim = self.latent_dim;
        let translation = self.translation;
        let rng = &mut self.rng;
        let (encoder, decoder) = (&self.encoder, &self.decoder);
        Ok(no_grad(|| {
            let (mu, log_var, _) = encoder.forward(&flat);
            let mu_s = repeat_rows(&mu, num_samples);
            let log_var_s = repeat_rows(&log_var, num_samples);
            let z = reparameterize(&mu_s, &log_var_s, rng);

            let theta = z.narrow_cols(0, 1);
            let offsets = translation.then(|| z.narrow_cols(1, 2));
            let content = z.narrow_cols(pose, latent_dim);
            decoder.forward(&theta, offsets.as_ref(), &content)
        }))
    }

    /// Dense latent map over a larger image stack; trailing dimension
    /// of the map is [`RVae::encoded_dim`].
    pub fn encode_images(&self, images: &Tensor) -> Result<(Tensor, Tensor)> {
        super::encode_stack(images, self.input_dim, |batch| {
            no_grad(|| self.encoder.forward(batch).0)
        })
    }

    /// Decode a `d x d` grid over the first two content dimensions at
    /// the canonical pose, tiled to `(d*H, d*W)`.
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
        let decoded = no_grad(|| self.decoder.forward_canonical(&z));
        Ok(tile_decoded(&decoded, d, d, 0))
    }

    /// Save all weights to a JSON checkpoint.
    pub fn save_weights(&self, path: &Path) -> Result<()> {
        let mut params = self.encoder.parameters();
        params.extend(self.decoder.parameters());
        serialize::save_params(path, &self.config, &params)
    }

    /// Load weights saved by [`RVae::save_weights`].
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
    fn test_encoded_dim_rotation_only() {
        let rvae = RVae::new((8, 8), 2, false, small_config()).unwrap();
        assert_eq!(rvae.encoded_dim(), 3);
        let (mu, log_var) = rvae.encode(&Tensor::zeros(&[4, 8, 8])).unwrap();
        assert_eq!(mu.shape(), &[4, 3]);
        assert_eq!(log_var.shape(), &[4, 3]);
    }

    #[test]
    fn test_encoded_dim_with_translation() {
        let rvae = RVae::new((8, 8), 10, true, small_config()).unwrap();
        assert_eq!(rvae.encoded_dim(), 13);
        let (mu, _) = rvae.encode(&Tensor::zeros(&[2, 8, 8])).unwrap();
        assert_eq!(mu.shape(), &[2, 13]);
    }

    #[test]
    fn test_decode_content_dims() {
        let rvae = RVae::new((8, 8), 2, true, small_config()).unwrap();
        let img = rvae.decode(&Tensor::zeros(&[1, 2]), None).unwrap();
        assert_eq!(img.shape(), &[1, 8, 8]);
        assert!(img.data().iter().sum::<f32>() > 0.0);
    }

    #[test]
    fn test_decode_rejects_pose_dims() {
        // Full encoded width is not a valid decode input
        let rvae = RVae::new((8, 8), 2, true, small_config()).unwrap();
        assert!(rvae.decode(&Tensor::zeros(&[1, 5]), None).is_err());
    }

    #[test]
    fn test_fit_runs_and_records() {
        let mut rvae = RVae::new((8, 8), 2, false, small_config()).unwrap();
        let data = Tensor::ones(&[12, 8, 8]);
        rvae.fit(&data, 2).unwrap();
        assert_eq!(rvae.loss_history().len(), 2);
    }

    #[test]
    fn test_fit_translation_variant() {
        let mut rvae = RVae::new((8, 8), 2, true, small_config()).unwrap();
        let data = Tensor::ones(&[12, 8, 8]);
        rvae.fit(&data, 1).unwrap();
        assert!(rvae.loss_history()[0].is_finite());
    }

    #[test]
    fn test_conditioned_fit_and_decode() {
        let mut rvae = RVae::new((8, 8), 2, false, small_config().num_classes(3)).unwrap();
        let data = Tensor::ones(&[9, 8, 8]);
        assert!(rvae.fit(&data, 1).is_err());
        let labels: Vec<usize> = (0..9).map(|i| i % 3).collect();
        rvae.fit_labelled(&data, &labels, 1).unwrap();

        assert!(rvae.decode(&Tensor::zeros(&[1, 2]), None).is_err());
        let img = rvae.decode(&Tensor::zeros(&[1, 2]), Some(2)).unwrap();
        assert_eq!(img.shape(), &[1, 8, 8]);
    }

    #[test]
    fn test_reconstruct_shape() {
        let mut rvae = RVae::new((8, 8), 2, false, small_config()).unwrap();
        let rec = rvae.reconstruct(&Tensor::ones(&[8, 8]), 32).unwrap();
        assert_eq!(rec.shape(), &[32, 8, 8]);
    }

    #[test]
    fn test_manifold2d_shape() {
        let rvae = RVae::new((8, 8), 2, false, small_config()).unwrap();
        assert_eq!(rvae.manifold2d(4).unwrap().shape(), &[32, 32]);
    }

    #[test]
    fn test_encode_images_map_width() {
        let rvae = RVae::new((4, 4), 2, true, small_config()).unwrap();
        let images = Tensor::zeros(&[1, 10, 10]);
        let (cropped, encoded) = rvae.encode_images(&images).unwrap();
        assert_eq!(cropped.shape(), &[1, 7, 7]);
        assert_eq!(encoded.shape(), &[1, 7, 7, 5]);
    }
}
