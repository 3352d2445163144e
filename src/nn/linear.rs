//! Fully connected (linear) layer.
//!
//! Implements the transformation y = xW^T + b.

use super::init::{xavier_uniform, zeros};
use super::module::Module;
use crate::autograd::Tensor;

/// Fully connected layer: y = xW^T + b
///
/// Weight initialization follows Xavier/Glorot. The transposed weight
/// is cached so the forward pass pays for one transpose per training
/// step rather than one per call.
///
/// # Shape
///
/// - Input: `(*, in_features)` where `*` means any number of batch dimensions
/// - Output: `(*, out_features)`
pub struct Linear {
    /// Weight matrix, shape: [out_features, in_features]
    weight: Tensor,

    /// Cached transposed weight [in_features, out_features].
    /// Recomputed by `refresh_caches` after each optimizer step so the
    /// transpose is re-recorded on the fresh tape.
    weight_t: Tensor,

    /// Bias vector, shape: [out_features]
    bias: Tensor,

    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Create a new Linear layer with Xavier initialization.
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self::with_seed(in_features, out_features, None)
    }

    /// Create a Linear layer with a specific random seed.
    pub fn with_seed(in_features: usize, out_features: usize, seed: Option<u64>) -> Self {
        let weight = xavier_uniform(
            &[out_features, in_features],
            in_features,
            out_features,
            seed,
        )
        .requires_grad();
        let weight_t = weight.transpose();
        let bias = zeros(&[out_features]).requires_grad();

        Self {
            weight,
            weight_t,
            bias,
            in_features,
            out_features,
        }
    }

    /// Get the input feature dimension.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Get the output feature dimension.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Get reference to weight tensor.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Get reference to bias tensor.
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Overwrite the weight data in place, keeping the tensor id so any
    /// optimizer state stays attached. Used when loading saved models.
    pub fn load_weight(&mut self, data: &[f32]) {
        self.weight.data_mut().copy_from_slice(data);
        self.weight_t = self.weight.transpose();
    }

    /// Overwrite the bias data in place.
    pub fn load_bias(&mut self, data: &[f32]) {
        self.bias.data_mut().copy_from_slice(data);
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Tensor {
        // y = x @ W^T + b
        let input_shape = input.shape();
        let ndim = input_shape.len();

        // Flatten extra batch dimensions down to 2D
        let (reshaped, batch_shape) = if ndim > 2 {
            let batch_size: usize = input_shape[..ndim - 1].iter().product();
            let in_features = input_shape[ndim - 1];
            let batch_shape: Vec<usize> = input_shape[..ndim - 1].to_vec();

            (input.view(&[batch_size, in_features]), Some(batch_shape))
        } else {
            (input.clone(), None)
        };

        let output = reshaped.matmul(&self.weight_t).broadcast_add(&self.bias);

        match batch_shape {
            Some(mut shape) => {
                shape.push(self.out_features);
                output.view(&shape)
            }
            None => output,
        }
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.weight, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.weight, &mut self.bias]
    }

    fn refresh_caches(&mut self) {
        self.weight_t = self.weight.transpose();
    }
}

impl std::fmt::Debug for Linear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linear")
            .field("in_features", &self.in_features)
            .field("out_features", &self.out_features)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, get_grad};

    #[test]
    fn test_linear_forward_shape() {
        let layer = Linear::new(10, 5);
        let x = Tensor::ones(&[32, 10]);
        let output = layer.forward(&x);

        assert_eq!(output.shape(), &[32, 5]);
    }

    #[test]
    fn test_linear_3d_input() {
        let layer = Linear::new(4, 6);
        let x = Tensor::ones(&[2, 3, 4]);
        let output = layer.forward(&x);

        assert_eq!(output.shape(), &[2, 3, 6]);
    }

    #[test]
    fn test_linear_reproducible_with_seed() {
        let a = Linear::with_seed(8, 4, Some(7));
        let b = Linear::with_seed(8, 4, Some(7));
        assert_eq!(a.weight().data(), b.weight().data());
    }

    #[test]
    fn test_gradients_reach_weight_via_cache() {
        clear_graph();
        let mut layer = Linear::with_seed(3, 2, Some(0));
        // Re-record the transpose on the fresh tape
        layer.refresh_caches();
        let weight_id = layer.weight().id();

        let x = Tensor::ones(&[4, 3]);
        layer.forward(&x).sum().backward();

        assert!(get_grad(weight_id).is_some(), "weight must receive gradient");
    }

    #[test]
    fn test_load_weight_keeps_id() {
        let mut layer = Linear::with_seed(2, 2, Some(1));
        let id = layer.weight().id();
        layer.load_weight(&[1.0, 0.0, 0.0, 1.0]);
        assert_eq!(layer.weight().id(), id);
        assert_eq!(layer.weight().data(), &[1.0, 0.0, 0.0, 1.0]);
    }
}
