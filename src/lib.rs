//! Latente: variational autoencoders for image patches in pure Rust.
//!
//! Latente implements a family of VAEs for unsupervised representation
//! learning on grayscale image patches: the plain [`models::Vae`], the
//! rotation-invariant [`models::RVae`], and the joint
//! discrete-continuous [`models::JVae`] and [`models::JrVae`]. Training
//! runs on a tape-based autograd engine with SIMD matrix kernels from
//! `trueno`.
//!
//! # Quick Start
//!
//! ```
//! use latente::prelude::*;
//!
//! // 32 random 8x8 patches
//! let data = Tensor::rand(&[32, 8, 8], Some(0));
//!
//! let config = VaeConfig::new()
//!     .hidden_encoder(32)
//!     .hidden_decoder(32)
//!     .batch_size(16)
//!     .seed(0);
//! let mut vae = Vae::new((8, 8), 2, config).unwrap();
//! vae.fit(&data, 2).unwrap();
//!
//! // Posterior statistics for the training stack
//! let (mu, _log_var) = vae.encode(&data).unwrap();
//! assert_eq!(mu.shape(), &[32, 2]);
//!
//! // Decode a point from the prior
//! let img = vae.decode(&Tensor::zeros(&[1, 2]), None).unwrap();
//! assert_eq!(img.shape(), &[1, 8, 8]);
//! ```
//!
//! # Modules
//!
//! - [`autograd`]: Tensor type and reverse-mode automatic differentiation
//! - [`nn`]: Layers (linear, convolutional), activations, initializers, Adam
//! - [`models`]: The VAE family and its configuration
//! - [`imgproc`]: Sliding windows, grid assembly, prior quantile grids
//! - [`error`]: Error and result types

pub mod autograd;
pub mod error;
pub mod imgproc;
pub mod models;
pub mod nn;
pub mod prelude;
