//! Neural network building blocks.
//!
//! Organized around the [`Module`] trait, which every layer and model
//! implements:
//!
//! - **Layers**: [`Linear`], [`Conv2d`], [`Upsample2d`]
//! - **Activations**: [`ReLU`], [`LeakyReLU`], [`Sigmoid`], [`Tanh`]
//! - **Optimizers**: [`Adam`]
//!
//! Weight initialization helpers ([`xavier_uniform`], [`kaiming_normal`],
//! and friends) are re-exported at this level.

mod activation;
mod conv;
pub(crate) mod init;
mod linear;
mod module;
mod optim;

pub use activation::{LeakyReLU, ReLU, Sigmoid, Tanh};
pub use conv::{Conv2d, Upsample2d};
pub use init::{kaiming_normal, kaiming_uniform, xavier_normal, xavier_uniform};
pub use linear::Linear;
pub use module::Module;
pub use optim::Adam;
