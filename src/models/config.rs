//! Model configuration shared across the VAE family.

use serde::{Deserialize, Serialize};

use crate::error::{LatenteError, Result};

/// Configuration for encoder/decoder construction and training.
///
/// Built with chained setters:
///
/// ```ignore
/// let cfg = VaeConfig::new()
///     .conv_encoder(true)
///     .hidden_encoder(64)
///     .seed(42);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaeConfig {
    /// Use a convolutional encoder instead of fully connected.
    pub conv_encoder: bool,
    /// Use a convolutional decoder instead of fully connected.
    /// Ignored by the rotational models, which always decode through
    /// the coordinate network.
    pub conv_decoder: bool,
    /// Hidden width of the encoder (units for fc, channels for conv).
    pub hidden_encoder: usize,
    /// Hidden width of the decoder.
    pub hidden_decoder: usize,
    /// Number of classes for label-conditioned decoding. `None` means
    /// unconditioned.
    pub num_classes: Option<usize>,
    /// Seed for weight init, posterior sampling and batch shuffling.
    pub seed: Option<u64>,
    /// Adam learning rate.
    pub learning_rate: f32,
    /// Mini-batch size for training.
    pub batch_size: usize,
    /// KL weight (β-VAE style scaling).
    pub beta: f32,
    /// Relaxation temperature for the discrete latent blocks.
    pub temperature: f32,
}

impl Default for VaeConfig {
    fn default() -> Self {
        Self {
            conv_encoder: false,
            conv_decoder: false,
            hidden_encoder: 128,
            hidden_decoder: 128,
            num_classes: None,
            seed: None,
            learning_rate: 1e-3,
            batch_size: 100,
            beta: 1.0,
            temperature: 1.0,
        }
    }
}

impl VaeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn conv_encoder(mut self, conv: bool) -> Self {
        self.conv_encoder = conv;
        self
    }

    #[must_use]
    pub fn conv_decoder(mut self, conv: bool) -> Self {
        self.conv_decoder = conv;
        self
    }

    #[must_use]
    pub fn hidden_encoder(mut self, width: usize) -> Self {
        self.hidden_encoder = width;
        self
    }

    #[must_use]
    pub fn hidden_decoder(mut self, width: usize) -> Self {
        self.hidden_decoder = width;
        self
    }

    #[must_use]
    pub fn num_classes(mut self, n: usize) -> Self {
        self.num_classes = Some(n);
        self
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn learning_rate(mut self, lr: f32) -> Self {
        self.learning_rate = lr;
        self
    }

    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    #[must_use]
    pub fn beta(mut self, beta: f32) -> Self {
        self.beta = beta;
        self
    }

    #[must_use]
    pub fn temperature(mut self, tau: f32) -> Self {
        self.temperature = tau;
        self
    }

    /// Validate the fields every model requires.
    pub(crate) fn validate(&self, input_dim: (usize, usize), latent_dim: usize) -> Result<()> {
        if input_dim.0 == 0 || input_dim.1 == 0 {
            return Err(LatenteError::InvalidHyperparameter {
                param: "input_dim".into(),
                value: format!("{input_dim:?}"),
                constraint: "both spatial dimensions must be positive".into(),
            });
        }
        if latent_dim == 0 {
            return Err(LatenteError::InvalidHyperparameter {
                param: "latent_dim".into(),
                value: "0".into(),
                constraint: "must be at least 1".into(),
            });
        }
        if self.hidden_encoder == 0 || self.hidden_decoder == 0 {
            return Err(LatenteError::InvalidHyperparameter {
                param: "hidden width".into(),
                value: format!("{}/{}", self.hidden_encoder, self.hidden_decoder),
                constraint: "hidden widths must be positive".into(),
            });
        }
        if self.batch_size == 0 {
            return Err(LatenteError::InvalidHyperparameter {
                param: "batch_size".into(),
                value: "0".into(),
                constraint: "must be at least 1".into(),
            });
        }
        if let Some(0) = self.num_classes {
            return Err(LatenteError::InvalidHyperparameter {
                param: "num_classes".into(),
                value: "0".into(),
                constraint: "conditioned models need at least one class".into(),
            });
        }
        Ok(())
    }
}
