//! Joint discrete-continuous variational autoencoder.
//!
//! Alongside the Gaussian latent block the encoder emits logits for one
//! or more categorical variables. During training each categorical
//! block is relaxed with Gumbel-softmax so gradients flow through the
//! sampling step; the decoder consumes the continuous sample
//! concatenated with the relaxed one-hot blocks.

use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::autograd::{clear_graph, no_grad, Tensor};
use crate::error::{LatenteError, Result};
use crate::imgproc::normal_grid;
use crate::nn::Adam;

use super::config::VaeConfig;
use super::decoder::Decoder;
use super::elbo::{gumbel_softmax, kl_discrete, kl_normal, reconstruction_loss, reparameterize};
use super::encoder::Encoder;
use super::serialize;
use super::vae::{normalize_latent, repeat_rows};
use super::{
    flatten_batch, gather_rows, shuffled_batches, tile_decoded, validate_cycles, validate_grid,
};

/// VAE with continuous and categorical latent variables.
///
/// `encode` returns a `(mu, log_var, logits)` triple; `decode` expects
/// `latent_dim + sum(discrete_dims)` columns, the trailing block being
/// (relaxed) one-hot category encodings.
pub struct JVae {
    encoder: Encoder,
    decoder: Decoder,
    input_dim: (usize, usize),
    latent_dim: usize,
    discrete_dims: Vec<usize>,
    config: VaeConfig,
    loss_history: Vec<f32>,
    rng: StdRng,
}

pub(super) fn validate_discrete_dims(discrete_dims: &[usize]) -> Result<()> {
    if discrete_dims.is_empty() {
        return Err(LatenteError::InvalidHyperparameter {
            param: "discrete_dims".into(),
            value: "[]".into(),
            constraint: "at least one categorical variable is required".into(),
        });
    }
    for &d in discrete_dims {
        if d < 2 {
            return Err(LatenteError::InvalidHyperparameter {
                param: "discrete_dims".into(),
                value: d.to_string(),
                constraint: "each categorical variable needs at least two categories".into(),
            });
        }
    }
    Ok(())
}

impl JVae {
    pub fn new(
        input_dim: (usize, usize),
        latent_dim: usize,
        discrete_dims: Vec<usize>,
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

        let discrete_dim: usize = discrete_dims.iter().sum();
        let encoder = Encoder::new(input_dim, latent_dim, discrete_dim, &config);
        let decoder = Decoder::new(latent_dim + discrete_dim, input_dim, &config);
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
            config,
            loss_history: Vec::new(),
            rng,
        })
    }

    /// Total number of categories across all discrete variables.
    pub fn discrete_dim(&self) -> usize {
        self.discrete_dims.iter().sum()
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

    /// Train on an unlabelled image batch.
    pub fn fit(&mut self, data: &Tensor, training_cycles: usize) -> Result<()> {
        validate_cycles(training_cycles)?;
        let x = flatten_batch(data, self.input_dim)?;
        let n = x.shape()[0];
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

                let (mu, log_var, logits) = self.encoder.forward(&xb);
                let logits = logits.expect("joint encoder emits logits");
                let z = reparameterize(&mu, &log_var, &mut self.rng);

                let (alphas, kl_cat) = relax_blocks(
                    &logits,
                    &self.discrete_dims,
                    self.config.temperature,
                    &mut self.rng,
                );
                let reconstruction = self.decoder.forward(&z.cat_cols(&alphas));

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
    /// has trailing dimension `latent_dim`; the logits trailing
    /// dimension is the total category count.
    pub fn encode(&self, data: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
        let x = flatten_batch(data, self.input_dim)?;
        let (mu, log_var, logits) = no_grad(|| self.encoder.forward(&x));
        let logits = logits.expect("joint encoder emits logits");
        Ok((mu, log_var, logits))
    }

    /// Decode joint latents `[B, latent_dim + discrete_dim]`.
    pub fn decode(&self, z: &Tensor, y: Option<usize>) -> Result<Tensor> {
        if let Some(label) = y {
            return Err(LatenteError::UnexpectedClassLabel { label });
        }
        let z = normalize_latent(z, self.latent_dim + self.discrete_dim())?;
        Ok(no_grad(|| self.decoder.forward(&z)))
    }

    /// Draw `num_samples` posterior samples for one input and decode
    /// each, returning `[num_samples, H, W]`. Categorical blocks use
    /// their softmax probabilities.
    pub fn reconstruct(&mut self, x: &Tensor, num_samples: usize) -> Result<Tensor> {
        if num_samples == 0 {
            return Err(LatenteError::InvalidHyperparameter {
                param: "num_samples".into(),
                value: "0".into(),
                constraint: "must draw at least one sample".into(),
            });
        }
        let flat = flatten_batch(x, self.input_dim)?;
        let discrete_dims = self.discrete_dims.clone();
        let rng = &mut self.rng;
        let (encoder, decoder) = (&self.encoder, &self.decoder);
        Ok(no_grad(|| {
            let (mu, log_var, logits) = encoder.forward(&flat);
            let logits = logits.expect("joint encoder emits logits");
            let mu_s = repeat_rows(&mu, num_samples);
            let log_var_s = repeat_rows(&log_var, num_samples);
            let z = reparameterize(&mu_s, &log_var_s, rng);

            let probs = softmax_blocks(&repeat_rows(&logits, num_samples), &discrete_dims);
            decoder.forward(&z.cat_cols(&probs))
        }))
    }

    /// Dense latent map over a larger image stack; the map carries the
    /// continuous posterior means only.
    pub fn encode_images(&self, images: &Tensor) -> Result<(Tensor, Tensor)> {
        super::encode_stack(images, self.input_dim, |batch| {
            no_grad(|| self.encoder.forward(batch).0)
        })
    }

    /// Decode a `d x d` grid over the first two continuous dimensions
    /// with all categorical blocks zeroed, tiled to `(d*H, d*W)`.
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
        let decoded = no_grad(|| self.decoder.forward(&z));
        Ok(tile_decoded(&decoded, d, d, 0))
    }

    /// Sweep one continuous dimension against every category.
    ///
    /// Each row fixes one category (one-hot, all other blocks zero) and
    /// sweeps `cont_idx` across `d` prior quantiles, giving a
    /// `(discrete_dim * H + pad rows, d * W + pad cols)` sheet.
    pub fn manifold_traversal(&self, cont_idx: usize, d: usize, pad: usize) -> Result<Tensor> {
        traverse(
            cont_idx,
            d,
            pad,
            self.latent_dim,
            self.discrete_dim(),
            |z| no_grad(|| self.decoder.forward(z)),
        )
    }

    /// Save all weights to a JSON checkpoint.
    pub fn save_weights(&self, path: &Path) -> Result<()> {
        let mut params = self.encoder.parameters();
        params.extend(self.decoder.parameters());
        serialize::save_params(path, &self.config, &params)
    }

    /// Load weights saved by [`JVae::save_weights`].
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

/// Gumbel-softmax relaxation per categorical block, plus the summed
/// categorical KL term.
pub(super) fn relax_blocks(
    logits: &Tensor,
    discrete_dims: &[usize],
    temperature: f32,
    rng: &mut StdRng,
) -> (Tensor, Tensor) {
    let mut offset = 0;
    let mut alphas: Option<Tensor> = None;
    let mut kl: Option<Tensor> = None;
    for &dsz in discrete_dims {
        let block = logits.narrow_cols(offset, dsz);
        let alpha = gumbel_softmax(&block, temperature, rng);
        let block_kl = kl_discrete(&block.softmax());
        alphas = Some(match alphas {
            Some(a) => a.cat_cols(&alpha),
            None => alpha,
        });
        kl = Some(match kl {
            Some(k) => k.add(&block_kl),
            None => block_kl,
        });
        offset += dsz;
    }
    (
        alphas.expect("at least one block"),
        kl.expect("at least one block"),
    )
}

/// Row-wise softmax applied independently to each categorical block.
pub(super) fn softmax_blocks(logits: &Tensor, discrete_dims: &[usize]) -> Tensor {
    let mut offset = 0;
    let mut out: Option<Tensor> = None;
    for &dsz in discrete_dims {
        let probs = logits.narrow_cols(offset, dsz).softmax();
        out = Some(match out {
            Some(o) => o.cat_cols(&probs),
            None => probs,
        });
        offset += dsz;
    }
    out.expect("at least one block")
}

/// Shared traversal-sheet builder for the joint models.
pub(super) fn traverse(
    cont_idx: usize,
    d: usize,
    pad: usize,
    latent_dim: usize,
    discrete_dim: usize,
    decode: impl Fn(&Tensor) -> Tensor,
) -> Result<Tensor> {
    if cont_idx >= latent_dim {
        return Err(LatenteError::InvalidHyperparameter {
            param: "cont_idx".into(),
            value: cont_idx.to_string(),
            constraint: format!("must be below latent_dim = {latent_dim}"),
        });
    }
    validate_grid(d)?;
    let width = latent_dim + discrete_dim;
    let grid = normal_grid(d);
    let mut z = vec![0.0; discrete_dim * d * width];
    for cat in 0..discrete_dim {
        for j in 0..d {
            let row = (cat * d + j) * width;
            z[row + cont_idx] = grid[j];
            z[row + latent_dim + cat] = 1.0;
        }
    }
    let z = Tensor::from_vec(z, &[discrete_dim * d, width]);
    let decoded = decode(&z);
    Ok(tile_decoded(&decoded, discrete_dim, d, pad))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> VaeConfig {
        VaeConfig::new()
            .hidden_encoder(16)
            .hidden_decoder(16)
            .batch_size(8)
            .seed(7)
    }

    #[test]
    fn test_encode_triple_dims() {
        let jvae = JVae::new((8, 8), 2, vec![5], small_config()).unwrap();
        let (mu, log_var, logits) = jvae.encode(&Tensor::zeros(&[3, 8, 8])).unwrap();
        assert_eq!(mu.shape(), &[3, 2]);
        assert_eq!(log_var.shape(), &[3, 2]);
        assert_eq!(logits.shape(), &[3, 5]);
    }

    #[test]
    fn test_multiple_discrete_blocks() {
        let jvae = JVae::new((8, 8), 2, vec![3, 4], small_config()).unwrap();
        assert_eq!(jvae.discrete_dim(), 7);
        let (_, _, logits) = jvae.encode(&Tensor::zeros(&[2, 8, 8])).unwrap();
        assert_eq!(logits.shape(), &[2, 7]);
    }

    #[test]
    fn test_rejects_empty_discrete_dims() {
        assert!(JVae::new((8, 8), 2, vec![], small_config()).is_err());
        assert!(JVae::new((8, 8), 2, vec![1], small_config()).is_err());
    }

    #[test]
    fn test_rejects_class_conditioning() {
        let config = small_config().num_classes(3);
        assert!(JVae::new((8, 8), 2, vec![5], config).is_err());
    }

    #[test]
    fn test_decode_joint_width() {
        let jvae = JVae::new((8, 8), 2, vec![5], small_config()).unwrap();
        let img = jvae.decode(&Tensor::zeros(&[1, 7]), None).unwrap();
        assert_eq!(img.shape(), &[1, 8, 8]);
        // continuous width alone is rejected
        assert!(jvae.decode(&Tensor::zeros(&[1, 2]), None).is_err());
    }

    #[test]
    fn test_fit_records_history() {
        let mut jvae = JVae::new((8, 8), 2, vec![3], small_config()).unwrap();
        let data = Tensor::ones(&[12, 8, 8]);
        jvae.fit(&data, 2).unwrap();
        assert_eq!(jvae.loss_history().len(), 2);
        assert!(jvae.loss_history().iter().all(|l| l.is_finite()));
    }

    #[test]
    fn test_reconstruct_shape() {
        let mut jvae = JVae::new((8, 8), 2, vec![5], small_config()).unwrap();
        let rec = jvae.reconstruct(&Tensor::ones(&[8, 8]), 32).unwrap();
        assert_eq!(rec.shape(), &[32, 8, 8]);
    }

    #[test]
    fn test_manifold_traversal_shape() {
        let jvae = JVae::new((8, 8), 2, vec![3], small_config()).unwrap();
        let sheet = jvae.manifold_traversal(0, 5, 0).unwrap();
        assert_eq!(sheet.shape(), &[24, 40]);
    }

    #[test]
    fn test_manifold_traversal_with_pad() {
        let jvae = JVae::new((8, 8), 2, vec![3], small_config()).unwrap();
        let sheet = jvae.manifold_traversal(1, 4, 2).unwrap();
        assert_eq!(sheet.shape(), &[3 * 8 + 2 * 2, 4 * 8 + 3 * 2]);
    }

    #[test]
    fn test_manifold_traversal_rejects_bad_index() {
        let jvae = JVae::new((8, 8), 2, vec![3], small_config()).unwrap();
        assert!(jvae.manifold_traversal(2, 5, 0).is_err());
    }

    #[test]
    fn test_softmax_blocks_rows_sum_to_one() {
        let logits = Tensor::from_vec(vec![1.0, 2.0, 3.0, 0.5, 0.5], &[1, 5]);
        let probs = softmax_blocks(&logits, &[3, 2]);
        let data = probs.data();
        assert!((data[..3].iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((data[3..].iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
}
