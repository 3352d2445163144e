//! Optimizers for gradient-based training.

use std::collections::HashMap;

use crate::autograd::{get_grad, Tensor, TensorId};

/// Adam optimizer (adaptive moment estimation).
///
/// ```text
/// m_t = β₁ * m_{t-1} + (1 - β₁) * g
/// v_t = β₂ * v_{t-1} + (1 - β₂) * g²
/// m̂_t = m_t / (1 - β₁ᵗ)
/// v̂_t = v_t / (1 - β₂ᵗ)
/// param = param - lr * m̂_t / (√v̂_t + ε)
/// ```
///
/// Gradients are read off the tape by tensor id, and the moment
/// estimates are keyed by the same id, so the borrow of the parameter
/// references only lasts for the duration of [`Adam::step`]. Parameter
/// ids must be stable across steps; the layers here guarantee that by
/// updating weights in place. Parameters without a recorded gradient
/// are left untouched.
#[derive(Debug)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    /// First and second moment estimates per parameter id.
    moments: HashMap<TensorId, (Vec<f32>, Vec<f32>)>,
    /// Timestep for bias correction.
    t: i32,
}

impl Adam {
    /// Create an Adam optimizer with β₁=0.9, β₂=0.999, ε=1e-8.
    #[must_use]
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            moments: HashMap::new(),
            t: 0,
        }
    }

    /// Apply one update to every parameter that has a gradient on the
    /// tape.
    pub fn step(&mut self, params: &mut [&mut Tensor]) {
        self.t += 1;
        let bias_correction1 = 1.0 - self.beta1.powi(self.t);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t);

        for param in params.iter_mut() {
            let Some(grad) = get_grad(param.id()) else {
                continue;
            };
            let grad = grad.data().to_vec();
            let id = param.id();
            let data = param.data_mut();

            let (m, v) = self
                .moments
                .entry(id)
                .or_insert_with(|| (vec![0.0; data.len()], vec![0.0; data.len()]));

            for i in 0..data.len() {
                let g = grad[i];
                m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
                v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;

                let m_hat = m[i] / bias_correction1;
                let v_hat = v[i] / bias_correction2;

                data[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
            }
        }
    }
}
