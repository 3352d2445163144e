//! Core module trait for neural network layers.

use crate::autograd::Tensor;

/// Common interface for all neural network layers and models.
pub trait Module {
    /// Forward pass through the module.
    fn forward(&self, input: &Tensor) -> Tensor;

    /// All learnable parameters, in a stable order.
    fn parameters(&self) -> Vec<&Tensor>;

    /// Mutable access to all learnable parameters, in the same order
    /// as `parameters`.
    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;

    /// Recompute any derived tensors after parameters changed.
    ///
    /// Must be called after each optimizer step and graph clear, so
    /// cached tensors (such as transposed weights) are re-recorded on
    /// the fresh tape.
    fn refresh_caches(&mut self) {}

    /// Switch to training mode.
    fn train(&mut self) {}

    /// Switch to evaluation mode.
    fn eval(&mut self) {}

    /// Whether the module is in training mode.
    fn training(&self) -> bool {
        true
    }

    /// Total number of learnable scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}
