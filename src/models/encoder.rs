//! Encoder networks producing posterior statistics.
//!
//! Two backbones are available: a fully connected net with two tanh
//! hidden layers, and a strided convolutional net. Both end in linear
//! heads for the posterior mean and log-variance, plus an optional
//! logits head for the discrete latent blocks of the joint models.

use crate::autograd::Tensor;
use crate::nn::{Conv2d, LeakyReLU, Linear, Module, Tanh};

use super::config::VaeConfig;

enum Backbone {
    Fc {
        fc1: Linear,
        fc2: Linear,
        act: Tanh,
    },
    Conv {
        conv1: Conv2d,
        conv2: Conv2d,
        act: LeakyReLU,
        flat_dim: usize,
    },
}

/// Encoder: image batch -> (mu, log_var, optional discrete logits).
pub(crate) struct Encoder {
    backbone: Backbone,
    fc_mu: Linear,
    fc_log_var: Linear,
    fc_logits: Option<Linear>,
    input_dim: (usize, usize),
}

impl Encoder {
    /// Build an encoder for `input_dim` images with `cont_dim` output
    /// statistics and `logits_dim` discrete logits (0 for none).
    pub(crate) fn new(
        input_dim: (usize, usize),
        cont_dim: usize,
        logits_dim: usize,
        config: &VaeConfig,
    ) -> Self {
        let (h, w) = input_dim;
        let hidden = config.hidden_encoder;
        // Distinct per-layer seeds so layers do not share initial weights
        let seed = |k: u64| config.seed.map(|s| s.wrapping_add(k));

        let (backbone, head_in) = if config.conv_encoder {
            let conv1 = Conv2d::with_seed(1, hidden, (3, 3), (2, 2), (1, 1), seed(1));
            let conv2 = Conv2d::with_seed(hidden, hidden, (3, 3), (2, 2), (1, 1), seed(2));
            let (h1, w1) = conv1.output_size(h, w);
            let (h2, w2) = conv2.output_size(h1, w1);
            let flat_dim = hidden * h2 * w2;
            (
                Backbone::Conv {
                    conv1,
                    conv2,
                    act: LeakyReLU::new(0.1),
                    flat_dim,
                },
                flat_dim,
            )
        } else {
            (
                Backbone::Fc {
                    fc1: Linear::with_seed(h * w, hidden, seed(1)),
                    fc2: Linear::with_seed(hidden, hidden, seed(2)),
                    act: Tanh::new(),
                },
                hidden,
            )
        };

        let fc_mu = Linear::with_seed(head_in, cont_dim, seed(3));
        let fc_log_var = Linear::with_seed(head_in, cont_dim, seed(4));
        let fc_logits =
            (logits_dim > 0).then(|| Linear::with_seed(head_in, logits_dim, seed(5)));

        Self {
            backbone,
            fc_mu,
            fc_log_var,
            fc_logits,
            input_dim,
        }
    }

    /// Encode a flattened image batch `[B, H*W]`.
    pub(crate) fn forward(&self, x: &Tensor) -> (Tensor, Tensor, Option<Tensor>) {
        let features = match &self.backbone {
            Backbone::Fc { fc1, fc2, act } => {
                let h = act.forward(&fc1.forward(x));
                act.forward(&fc2.forward(&h))
            }
            Backbone::Conv {
                conv1,
                conv2,
                act,
                flat_dim,
            } => {
                let b = x.shape()[0];
                let (h, w) = self.input_dim;
                let img = x.view(&[b, 1, h, w]);
                let c1 = act.forward(&conv1.forward(&img));
                let c2 = act.forward(&conv2.forward(&c1));
                c2.view(&[b, *flat_dim])
            }
        };

        let mu = self.fc_mu.forward(&features);
        let log_var = self.fc_log_var.forward(&features);
        let logits = self.fc_logits.as_ref().map(|fc| fc.forward(&features));

        (mu, log_var, logits)
    }

    pub(crate) fn parameters(&self) -> Vec<&Tensor> {
        let mut params = match &self.backbone {
            Backbone::Fc { fc1, fc2, .. } => {
                let mut p = fc1.parameters();
                p.extend(fc2.parameters());
                p
            }
            Backbone::Conv { conv1, conv2, .. } => {
                let mut p = conv1.parameters();
                p.extend(conv2.parameters());
                p
            }
        };
        params.extend(self.fc_mu.parameters());
        params.extend(self.fc_log_var.parameters());
        if let Some(fc) = &self.fc_logits {
            params.extend(fc.parameters());
        }
        params
    }

    pub(crate) fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = match &mut self.backbone {
            Backbone::Fc { fc1, fc2, .. } => {
                let mut p = fc1.parameters_mut();
                p.extend(fc2.parameters_mut());
                p
            }
            Backbone::Conv { conv1, conv2, .. } => {
                let mut p = conv1.parameters_mut();
                p.extend(conv2.parameters_mut());
                p
            }
        };
        params.extend(self.fc_mu.parameters_mut());
        params.extend(self.fc_log_var.parameters_mut());
        if let Some(fc) = &mut self.fc_logits {
            params.extend(fc.parameters_mut());
        }
        params
    }

    pub(crate) fn refresh_caches(&mut self) {
        match &mut self.backbone {
            Backbone::Fc { fc1, fc2, .. } => {
                fc1.refresh_caches();
                fc2.refresh_caches();
            }
            Backbone::Conv { conv1, conv2, .. } => {
                conv1.refresh_caches();
                conv2.refresh_caches();
            }
        }
        self.fc_mu.refresh_caches();
        self.fc_log_var.refresh_caches();
        if let Some(fc) = &mut self.fc_logits {
            fc.refresh_caches();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fc_encoder_output_dims() {
        let cfg = VaeConfig::new().hidden_encoder(16).seed(0);
        let enc = Encoder::new((8, 8), 5, 0, &cfg);
        let x = Tensor::ones(&[3, 64]);
        let (mu, log_var, logits) = enc.forward(&x);
        assert_eq!(mu.shape(), &[3, 5]);
        assert_eq!(log_var.shape(), &[3, 5]);
        assert!(logits.is_none());
    }

    #[test]
    fn test_conv_encoder_output_dims() {
        let cfg = VaeConfig::new().conv_encoder(true).hidden_encoder(8).seed(0);
        let enc = Encoder::new((16, 16), 3, 0, &cfg);
        let x = Tensor::ones(&[2, 256]);
        let (mu, log_var, _) = enc.forward(&x);
        assert_eq!(mu.shape(), &[2, 3]);
        assert_eq!(log_var.shape(), &[2, 3]);
    }

    #[test]
    fn test_logits_head_dims() {
        let cfg = VaeConfig::new().hidden_encoder(16).seed(0);
        let enc = Encoder::new((8, 8), 2, 5, &cfg);
        let x = Tensor::ones(&[4, 64]);
        let (_, _, logits) = enc.forward(&x);
        assert_eq!(logits.expect("logits head").shape(), &[4, 5]);
    }

    #[test]
    fn test_parameter_count_stable() {
        let cfg = VaeConfig::new().hidden_encoder(16).seed(0);
        let mut enc = Encoder::new((8, 8), 2, 0, &cfg);
        assert_eq!(enc.parameters().len(), enc.parameters_mut().len());
    }
}
