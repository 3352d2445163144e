//! Evidence lower bound terms and stochastic sampling helpers.
//!
//! Every loss is assembled from tape-recorded tensor ops, so a single
//! `backward()` on the total trains encoder and decoder together.

use rand::rngs::StdRng;
use rand::Rng;

use crate::autograd::Tensor;

/// Mean per-image summed squared error between reconstruction and target.
///
/// Both tensors must share a shape whose leading axis is the batch.
pub(crate) fn reconstruction_loss(reconstruction: &Tensor, target: &Tensor) -> Tensor {
    let batch = reconstruction.shape()[0] as f32;
    reconstruction
        .sub(target)
        .pow(2.0)
        .sum()
        .mul_scalar(1.0 / batch)
}

/// KL divergence between the Gaussian posterior N(mu, exp(log_var)) and
/// the standard normal prior, averaged over the batch.
///
/// KL = -0.5 * sum(1 + log_var - mu^2 - exp(log_var))
pub(crate) fn kl_normal(mu: &Tensor, log_var: &Tensor) -> Tensor {
    let batch = mu.shape()[0] as f32;
    log_var
        .add_scalar(1.0)
        .sub(&mu.pow(2.0))
        .sub(&log_var.exp())
        .sum()
        .mul_scalar(-0.5 / batch)
}

/// KL divergence between relaxed categorical probabilities `alphas`
/// `[B, D]` and the uniform prior over `D` categories, averaged over
/// the batch: sum alpha * (log alpha + log D).
pub(crate) fn kl_discrete(alphas: &Tensor) -> Tensor {
    let batch = alphas.shape()[0] as f32;
    let categories = alphas.shape()[1] as f32;
    alphas
        .mul(&alphas.add_scalar(1e-10).log().add_scalar(categories.ln()))
        .sum()
        .mul_scalar(1.0 / batch)
}

/// Reparameterization trick: z = mu + exp(0.5 * log_var) * eps with
/// eps ~ N(0, I).
pub(crate) fn reparameterize(mu: &Tensor, log_var: &Tensor, rng: &mut StdRng) -> Tensor {
    let eps = standard_normal(mu.shape(), rng);
    mu.add(&log_var.mul_scalar(0.5).exp().mul(&eps))
}

/// Differentiable relaxed one-hot sample from `logits` `[B, D]` at
/// temperature `tau` (Gumbel-softmax). Gradient flows through the
/// logits; the noise is a constant.
pub(crate) fn gumbel_softmax(logits: &Tensor, tau: f32, rng: &mut StdRng) -> Tensor {
    let noise: Vec<f32> = (0..logits.numel())
        .map(|_| {
            let u: f32 = rng.gen_range(1e-10_f32..1.0);
            -(-u.ln()).ln()
        })
        .collect();
    let gumbel = Tensor::from_vec(noise, logits.shape());
    logits.add(&gumbel).mul_scalar(1.0 / tau).softmax()
}

/// Constant tensor of standard-normal draws (Box-Muller).
pub(crate) fn standard_normal(shape: &[usize], rng: &mut StdRng) -> Tensor {
    let numel: usize = shape.iter().product();
    let data: Vec<f32> = (0..numel)
        .map(|_| {
            let u1: f32 = rng.gen_range(0.0001_f32..1.0);
            let u2: f32 = rng.gen_range(0.0_f32..1.0);
            (-2.0_f32 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
        })
        .collect();
    Tensor::from_vec(data, shape)
}
