//! Joint rotation-invariant discrete-continuous VAE.
//!
//! Combines the pose-aware latent layout of the rotational model with
//! the Gumbel-softmax categorical blocks of the joint model. The
//! coordinate decoder renders content conditioned on the relaxed
//! category encoding while pose is applied to the pixel grid.

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
use super::jvae::{relax_blocks, softmax_blocks, traverse, validate_discrete_dims};
use super::serialize;
use super::vae::{normalize_latent, repeat_rows};
use super::{
    flatten_batch, gather_rows, shuffled_batches, tile_decoded, validate_cycles, validate_grid,
};

/// Rotation-invariant VAE with categorical latent variables.
///
/// Encoded Gaussian statistics have trailing dimension
/// `latent_dim + 1` (rotation) or `latent_dim + 3` (with translation);
/// logits carry the category blocks. `decode` expects
/// `latent_dim + sum(discrete_dims)` columns and renders the canonical
/// pose.
pub struct JrVae {
    encoder: Encoder,
    decoder: CoordinateDecoder,
    input_dim: (usize, usize),
    latent_dim: usize,
    discrete_dims: Vec<usize>,
    translation: bool,
    config: VaeConfig,
    loss_history: Vec<f32>,
    rng: StdRng,
}

impl JrVae {
    pub fn new(
        input_dim: (usize, usize),
        latent_dim: usize,
        discrete_dims: Vec<usize>,
        translation: bool,
        config: VaeConfig,
    ) -> Result<Self> {
        config.validate(input_dim, latent_dim)?;
        validate_discrete_dims(&discrete_dims)?;
        if config.num_classes.is_some() {
            return Err(LatenteError::InvalidHyperparameter {
                param: "num_classes".into(),
                value: format!("{:?}", config.num_classes),
                constraint: "joint models learn categories unsupervised".into(),
            });
        }

        let pose_dim = if translation { 3 } else { 1 };
        let discrete_dim: usize = discrete_dims.iter().sum();
        let encoder = Encoder::new(input_dim, latent_dim + pose_dim, discrete_dim, &config);
        let decoder = CoordinateDecoder::new(latent_dim + discrete_dim, input_dim, &config);
        let rng = match config.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            encoder,
            decoder,
            input_dim,
            latent_dim,
            discrete_dims,
            translation,
            config,
            loss_history: Vec::new(),
            rng,
        })
    }

    /// Pose components preceding the content block.
    pub fn pose_dim(&self) -> usize {
        if self.translation {
            3
        } else {
            1
        }
    }

    /// Trailing dimension of the encoded Gaussian statistics.
    pub fn encoded_dim(&self) -> usize {
        self.latent_dim + self.pose_dim()
    }

    /// Total number of categories across all discrete variables.
    pub fn discrete_dim(&self) -> usize {
        self.discrete_dims.iter().sum()
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
    pub fn fit(&mut self, data: &Tensor, training_cycles: usize) -> Result<()> {
        validate_cycles(training_cycles)?;
        let x = flatten_batch(data, self.input_dim)?;
        let n = x.shape()[0];
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

                let (mu, log_var, logits) = self.encoder.forward(&xb);
                let logits = logits.expect("joint encoder emits logits");
                let z = reparameterize(&mu, &log_var, &mut self.rng);

                let theta = z.narrow_cols(0, 1);
                let offsets = self.translation.then(|| z.narrow_cols(1, 2));
                let content = z.narrow_cols(pose, self.latent_dim);
                let (alphas, kl_cat) = relax_blocks(
                    &logits,
                    &self.discrete_dims,
                    self.config.temperature,
                    &mut self.rng,
                );
                let reconstruction =
                    self.decoder
                        .forward(&theta, offsets.as_ref(), &content.cat_cols(&alphas));

                let loss = reconstruction_loss(&reconstruction, &xb.view(&[b, h, w]))
                    .add(&kl_normal(&mu, &log_var).mul_scalar(self.config.beta))
                    .add(&kl_cat.mul_scalar(self.config.beta));
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

    /// Posterior statistics `(mu, log_var, logits)`. The Gaussian pair
    /// has trailing dimension [`JrVae::encoded_dim`] with pose
    /// components first; logits trailing dimension is the total
    /// category count.
    pub fn encode(&self, data: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
        let x = flatten_batch(data, self.input_dim)?;
        let (mu, log_var, logits) = no_grad(|| self.encoder.forward(&x));
        let logits = logits.expect("joint encoder emits logits");
        Ok((mu, log_var, logits))
    }

    /// Decode joint latents `[B, latent_dim + discrete_dim]` at the
    /// canonical pose.
    pub fn decode(&self, z: &Tensor, y: Option<usize>) -> Result<Tensor> {
        if let Some(label) = y {
            return Err(LatenteError::UnexpectedClassLabel { label });
        }
        let z = normalize_latent(z, self.latent_dim + self.discrete_dim())?;
        Ok(no_grad(|| self.decoder.forward_canonical(&z)))
    }

    /// Draw `num_samples` posterior samples for one input and decode
    /// each with its sampled pose, returning `[num_samples, H, W]`.
    pub fn reconstruct(&mut self, x: &Tensor, num_samples: usize) -> Result<Tensor> {
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
        let discrete_dims = self.discrete_dims.clone();
        let rng = &mut self.rng;
        let (encoder, decoder) = (&self.encoder, &self.decoder);
        Ok(no_grad(|| {
            let (mu, log_var, logits) = encoder.forward(&flat);
            let logits = logits.expect("joint encoder emits logits");
            let mu_s = repeat_rows(&mu, num_samples);
            let log_var_s = repeat_rows(&log_var, num_samples);
            let z = reparameterize(&mu_s, &log_var_s, rng);

            let theta = z.narrow_cols(0, 1);
            let offsets = translation.then(|| z.narrow_cols(1, 2));
            let content = z.narrow_cols(pose, latent_dim);
            let probs = softmax_blocks(&repeat_rows(&logits, num_samples), &discrete_dims);
            decoder.forward(&theta, offsets.as_ref(), &content.cat_cols(&probs))
        }))
    }

    /// Dense latent map over a larger image stack; the map carries the
    /// Gaussian posterior means, pose components included.
    pub fn encode_images(&self, images: &Tensor) -> Result<(Tensor, Tensor)> {
        super::encode_stack(images, self.input_dim, |batch| {
            no_grad(|| self.encoder.forward(batch).0)
        })
    }

    /// Decode a `d x d` grid over the first two continuous content
    /// dimensions at the canonical pose with all categorical blocks
    /// zeroed, tiled to `(d*H, d*W)`.
    pub fn manifold2d(&self, d: usize) -> Result<Tensor> {
        if self.latent_dim < 2 {
            return Err(LatenteError::InvalidHyperparameter {
                param: "latent_dim".into(),
                value: self.latent_dim.to_string(),
                constraint: "manifold2d needs at least two continuous dims".into(),
            });
        }
        validate_grid(d)?;
        let width = self.latent_dim + self.discrete_dim();
        let grid = normal_grid(d);
        let mut z = vec![0.0; d * d * width];
        for i in 0..d {
            for j in 0..d {
                let row = (i * d + j) * width;
                z[row] = grid[i];
                z[row + 1] = grid[j];
            }
        }
        let z = Tensor::from_vec(z, &[d * d, width]);
        let decoded = no_grad(|| self.decoder.forward_canonical(&z));
        Ok(tile_decoded(&decoded, d, d, 0))
    }

    /// Sweep one continuous content dimension against every category at
    /// the canonical pose.
    pub fn manifold_traversal(&self, cont_idx: usize, d: usize, pad: usize) -> Result<Tensor> {
        traverse(
            cont_idx,
            d,
            pad,
            self.latent_dim,
            self.discrete_dim(),
            |z| no_grad(|| self.decoder.forward_canonical(z)),
        )
    }

    /// Save all weights to a JSON checkpoint.
    pub fn save_weights(&self, path: &Path) -> Result<()> {
        let mut params = self.encoder.parameters();
        params.extend(self.decoder.parameters());
        serialize::save_params(path, &self.config, &params)
    }

    /// Load weights saved by [`JrVae::save_weights`].
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
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> VaeConfig {
        VaeConfig::new()
            .hidden_encoder(16)
            .hidden_decoder(16)
            .batch_size(8)
            .seed(11)
    }

    #[test]
    fn test_encode_triple_dims() {
        let jrvae = JrVae::new((8, 8), 2, vec![5], false, small_config()).unwrap();
        let (mu, log_var, logits) = jrvae.encode(&Tensor::zeros(&[3, 8, 8])).unwrap();
        assert_eq!(mu.shape(), &[3, 3]);
        assert_eq!(log_var.shape(), &[3, 3]);
        assert_eq!(logits.shape(), &[3, 5]);
    }

    #[test]
    fn test_translation_widens_statistics() {
        let jrvae = JrVae::new((8, 8), 2, vec![5], true, small_config()).unwrap();
        assert_eq!(jrvae.encoded_dim(), 5);
        let (mu, _, _) = jrvae.encode(&Tensor::zeros(&[2, 8, 8])).unwrap();
        assert_eq!(mu.shape(), &[2, 5]);
    }

    #[test]
    fn test_decode_joint_width() {
        let jrvae = JrVae::new((8, 8), 2, vec![5], false, small_config()).unwrap();
        let img = jrvae.decode(&Tensor::zeros(&[1, 7]), None).unwrap();
        assert_eq!(img.shape(), &[1, 8, 8]);
        assert!(jrvae.decode(&Tensor::zeros(&[1, 2]), None).is_err());
    }

    #[test]
    fn test_fit_records_history() {
        let mut jrvae = JrVae::new((8, 8), 2, vec![3], false, small_config()).unwrap();
        let data = Tensor::ones(&[12, 8, 8]);
        jrvae.fit(&data, 2).unwrap();
        assert_eq!(jrvae.loss_history().len(), 2);
        assert!(jrvae.loss_history().iter().all(|l| l.is_finite()));
    }

    #[test]
    fn test_reconstruct_shape() {
        let mut jrvae = JrVae::new((8, 8), 2, vec![5], true, small_config()).unwrap();
        let rec = jrvae.reconstruct(&Tensor::ones(&[8, 8]), 16).unwrap();
        assert_eq!(rec.shape(), &[16, 8, 8]);
    }

    #[test]
    fn test_manifold_traversal_shape() {
        let jrvae = JrVae::new((8, 8), 2, vec![3], false, small_config()).unwrap();
        let sheet = jrvae.manifold_traversal(0, 5, 0).unwrap();
        assert_eq!(sheet.shape(), &[24, 40]);
    }

    #[test]
    fn test_manifold2d_shape() {
        let jrvae = JrVae::new((8, 8), 2, vec![3], false, small_config()).unwrap();
        assert_eq!(jrvae.manifold2d(4).unwrap().shape(), &[32, 32]);
    }

    #[test]
    fn test_encode_images_map_width() {
        let jrvae = JrVae::new((4, 4), 2, vec![3], false, small_config()).unwrap();
        let images = Tensor::zeros(&[2, 10, 10]);
        let (cropped, encoded) = jrvae.encode_images(&images).unwrap();
        assert_eq!(cropped.shape(), &[2, 7, 7]);
        assert_eq!(encoded.shape(), &[2, 7, 7, 3]);
    }

    #[test]
    fn test_rejects_class_conditioning() {
        let config = small_config().num_classes(4);
        assert!(JrVae::new((8, 8), 2, vec![3], false, config).is_err());
    }
}
