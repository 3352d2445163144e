//! Convenience re-exports for common usage.
//!
//! ```
//! use latente::prelude::*;
//!
//! let config = VaeConfig::new().seed(1);
//! let vae = Vae::new((8, 8), 2, config).unwrap();
//! assert_eq!(vae.latent_dim(), 2);
//! ```

pub use crate::autograd::{clear_graph, no_grad, Tensor};
pub use crate::error::{LatenteError, Result};
pub use crate::models::{JrVae, JVae, RVae, Vae, VaeConfig};
pub use crate::nn::{Adam, Module};
