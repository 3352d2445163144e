//! Gradient function trait and implementations.
//!
//! Each differentiable operation implements `GradFn` to define how
//! gradients flow backward through the operation.

use super::tensor::Tensor;

/// Trait for functions that compute gradients during the backward pass.
///
/// Each differentiable operation creates a `GradFn` implementation that
/// captures the context needed for gradient computation.
pub trait GradFn: Send + Sync {
    /// Compute gradients with respect to inputs.
    ///
    /// Returns one gradient per input tensor, in the input order used
    /// during the forward pass.
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor>;

    /// Human-readable name for debugging.
    fn name(&self) -> &'static str;
}

fn map_grad<F: Fn(f32) -> f32>(grad_output: &Tensor, f: F) -> Tensor {
    let data: Vec<f32> = grad_output.data().iter().map(|&g| f(g)).collect();
    Tensor::from_vec(data, grad_output.shape())
}

fn zip_grad<F: Fn(f32, f32) -> f32>(grad_output: &Tensor, other: &Tensor, f: F) -> Tensor {
    let data: Vec<f32> = grad_output
        .data()
        .iter()
        .zip(other.data().iter())
        .map(|(&g, &o)| f(g, o))
        .collect();
    Tensor::from_vec(data, grad_output.shape())
}

// ============================================================================
// Element-wise operations
// ============================================================================

/// z = x + y
pub(crate) struct AddBackward;

impl GradFn for AddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.clone(), grad_output.clone()]
    }

    fn name(&self) -> &'static str {
        "AddBackward"
    }
}

/// z = x - y
pub(crate) struct SubBackward;

impl GradFn for SubBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.clone(), map_grad(grad_output, |g| -g)]
    }

    fn name(&self) -> &'static str {
        "SubBackward"
    }
}

/// z = x * y
pub(crate) struct MulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![
            zip_grad(grad_output, &self.y, |g, y| g * y),
            zip_grad(grad_output, &self.x, |g, x| g * x),
        ]
    }

    fn name(&self) -> &'static str {
        "MulBackward"
    }
}

/// z = x / y
pub(crate) struct DivBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for DivBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad_x = zip_grad(grad_output, &self.y, |g, y| g / y);
        let grad_y_data: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter().zip(self.y.data().iter()))
            .map(|(&g, (&x, &y))| -g * x / (y * y))
            .collect();
        vec![grad_x, Tensor::from_vec(grad_y_data, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "DivBackward"
    }
}

/// z = -x
pub(crate) struct NegBackward;

impl GradFn for NegBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![map_grad(grad_output, |g| -g)]
    }

    fn name(&self) -> &'static str {
        "NegBackward"
    }
}

/// z = x * scalar
pub(crate) struct MulScalarBackward {
    pub(crate) scalar: f32,
}

impl GradFn for MulScalarBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let s = self.scalar;
        vec![map_grad(grad_output, |g| g * s)]
    }

    fn name(&self) -> &'static str {
        "MulScalarBackward"
    }
}

/// z = x + scalar
pub(crate) struct AddScalarBackward;

impl GradFn for AddScalarBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.clone()]
    }

    fn name(&self) -> &'static str {
        "AddScalarBackward"
    }
}

// ============================================================================
// Transcendental operations
// ============================================================================

/// z = exp(x); dz/dx = z
pub(crate) struct ExpBackward {
    pub(crate) output: Tensor,
}

impl GradFn for ExpBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![zip_grad(grad_output, &self.output, |g, z| g * z)]
    }

    fn name(&self) -> &'static str {
        "ExpBackward"
    }
}

/// z = ln(x); dz/dx = 1/x
pub(crate) struct LogBackward {
    pub(crate) x: Tensor,
}

impl GradFn for LogBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![zip_grad(grad_output, &self.x, |g, x| g / x)]
    }

    fn name(&self) -> &'static str {
        "LogBackward"
    }
}

/// z = x^n; dz/dx = n * x^(n-1)
pub(crate) struct PowBackward {
    pub(crate) x: Tensor,
    pub(crate) n: f32,
}

impl GradFn for PowBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let n = self.n;
        vec![zip_grad(grad_output, &self.x, move |g, x| {
            g * n * x.powf(n - 1.0)
        })]
    }

    fn name(&self) -> &'static str {
        "PowBackward"
    }
}

/// z = sqrt(x); dz/dx = 0.5 / z
pub(crate) struct SqrtBackward {
    pub(crate) output: Tensor,
}

impl GradFn for SqrtBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![zip_grad(grad_output, &self.output, |g, z| g * 0.5 / z)]
    }

    fn name(&self) -> &'static str {
        "SqrtBackward"
    }
}

/// z = sin(x); dz/dx = cos(x)
pub(crate) struct SinBackward {
    pub(crate) x: Tensor,
}

impl GradFn for SinBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![zip_grad(grad_output, &self.x, |g, x| g * x.cos())]
    }

    fn name(&self) -> &'static str {
        "SinBackward"
    }
}

/// z = cos(x); dz/dx = -sin(x)
pub(crate) struct CosBackward {
    pub(crate) x: Tensor,
}

impl GradFn for CosBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![zip_grad(grad_output, &self.x, |g, x| -g * x.sin())]
    }

    fn name(&self) -> &'static str {
        "CosBackward"
    }
}

// ============================================================================
// Reductions
// ============================================================================

/// z = sum(x); gradient broadcasts back to the input shape.
pub(crate) struct SumBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for SumBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let g = grad_output.data()[0];
        let numel: usize = self.input_shape.iter().product();
        vec![Tensor::from_vec(vec![g; numel], &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "SumBackward"
    }
}

/// z = mean(x); gradient is 1/n broadcast back to the input shape.
pub(crate) struct MeanBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for MeanBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let numel: usize = self.input_shape.iter().product();
        let g = grad_output.data()[0] / numel as f32;
        vec![Tensor::from_vec(vec![g; numel], &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "MeanBackward"
    }
}

// ============================================================================
// Activations
// ============================================================================

/// z = relu(x)
pub(crate) struct ReluBackward {
    pub(crate) x: Tensor,
}

impl GradFn for ReluBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![zip_grad(grad_output, &self.x, |g, x| {
            if x > 0.0 {
                g
            } else {
                0.0
            }
        })]
    }

    fn name(&self) -> &'static str {
        "ReluBackward"
    }
}

/// z = leaky_relu(x)
pub(crate) struct LeakyReluBackward {
    pub(crate) x: Tensor,
    pub(crate) negative_slope: f32,
}

impl GradFn for LeakyReluBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let slope = self.negative_slope;
        vec![zip_grad(grad_output, &self.x, move |g, x| {
            if x > 0.0 {
                g
            } else {
                g * slope
            }
        })]
    }

    fn name(&self) -> &'static str {
        "LeakyReluBackward"
    }
}

/// z = sigmoid(x); dz/dx = z * (1 - z)
pub(crate) struct SigmoidBackward {
    pub(crate) output: Tensor,
}

impl GradFn for SigmoidBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![zip_grad(grad_output, &self.output, |g, z| g * z * (1.0 - z))]
    }

    fn name(&self) -> &'static str {
        "SigmoidBackward"
    }
}

/// z = tanh(x); dz/dx = 1 - z^2
pub(crate) struct TanhBackward {
    pub(crate) output: Tensor,
}

impl GradFn for TanhBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![zip_grad(grad_output, &self.output, |g, z| g * (1.0 - z * z))]
    }

    fn name(&self) -> &'static str {
        "TanhBackward"
    }
}

/// Row-wise softmax over a 2D tensor.
///
/// gx_i = y_i * (g_i - Σ_j g_j y_j) per row.
pub(crate) struct SoftmaxBackward {
    pub(crate) output: Tensor,
}

impl GradFn for SoftmaxBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let shape = self.output.shape();
        let (rows, cols) = (shape[0], shape[1]);
        let y = self.output.data();
        let g = grad_output.data();
        let mut grad = vec![0.0; rows * cols];

        for r in 0..rows {
            let base = r * cols;
            let dot: f32 = (0..cols).map(|j| g[base + j] * y[base + j]).sum();
            for j in 0..cols {
                grad[base + j] = y[base + j] * (g[base + j] - dot);
            }
        }

        vec![Tensor::from_vec(grad, shape)]
    }

    fn name(&self) -> &'static str {
        "SoftmaxBackward"
    }
}

// ============================================================================
// Linear algebra and shape operations
// ============================================================================

/// z = x @ y; gx = g @ y^T, gy = x^T @ g
pub(crate) struct MatmulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MatmulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad_x = raw_matmul(grad_output, &raw_transpose(&self.y));
        let grad_y = raw_matmul(&raw_transpose(&self.x), grad_output);
        vec![grad_x, grad_y]
    }

    fn name(&self) -> &'static str {
        "MatmulBackward"
    }
}

/// z = x^T
pub(crate) struct TransposeBackward;

impl GradFn for TransposeBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![raw_transpose(grad_output)]
    }

    fn name(&self) -> &'static str {
        "TransposeBackward"
    }
}

/// z = matrix + row-broadcast vector
pub(crate) struct BroadcastAddBackward {
    pub(crate) cols: usize,
}

impl GradFn for BroadcastAddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let rows = grad_output.shape()[0];
        let cols = self.cols;
        let g = grad_output.data();

        // Vector gradient sums over rows
        let mut grad_vec = vec![0.0; cols];
        for r in 0..rows {
            for c in 0..cols {
                grad_vec[c] += g[r * cols + c];
            }
        }

        vec![grad_output.clone(), Tensor::from_vec(grad_vec, &[cols])]
    }

    fn name(&self) -> &'static str {
        "BroadcastAddBackward"
    }
}

/// Reshape; gradient reshapes back.
pub(crate) struct ViewBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for ViewBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![Tensor::new(grad_output.data(), &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "ViewBackward"
    }
}

/// Column slice of a 2D tensor; gradient zero-pads into the full width.
pub(crate) struct NarrowColsBackward {
    pub(crate) in_cols: usize,
    pub(crate) start: usize,
    pub(crate) len: usize,
}

impl GradFn for NarrowColsBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let rows = grad_output.shape()[0];
        let g = grad_output.data();
        let mut grad = vec![0.0; rows * self.in_cols];

        for r in 0..rows {
            for c in 0..self.len {
                grad[r * self.in_cols + self.start + c] = g[r * self.len + c];
            }
        }

        vec![Tensor::from_vec(grad, &[rows, self.in_cols])]
    }

    fn name(&self) -> &'static str {
        "NarrowColsBackward"
    }
}

/// Row tiling: each row of a `[B, C]` tensor repeated `reps` consecutive
/// times. Gradient sums each block of `reps` rows.
pub(crate) struct TileRowsBackward {
    pub(crate) reps: usize,
}

impl GradFn for TileRowsBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let out_rows = grad_output.shape()[0];
        let cols = grad_output.shape()[1];
        let rows = out_rows / self.reps;
        let g = grad_output.data();
        let mut grad = vec![0.0; rows * cols];

        for r in 0..rows {
            for k in 0..self.reps {
                let base = (r * self.reps + k) * cols;
                for c in 0..cols {
                    grad[r * cols + c] += g[base + c];
                }
            }
        }

        vec![Tensor::from_vec(grad, &[rows, cols])]
    }

    fn name(&self) -> &'static str {
        "TileRowsBackward"
    }
}

/// Column-wise concatenation of two 2D tensors; gradient splits back.
pub(crate) struct CatColsBackward {
    pub(crate) left_cols: usize,
    pub(crate) right_cols: usize,
}

impl GradFn for CatColsBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let rows = grad_output.shape()[0];
        let total = self.left_cols + self.right_cols;
        let g = grad_output.data();

        let mut grad_left = vec![0.0; rows * self.left_cols];
        let mut grad_right = vec![0.0; rows * self.right_cols];

        for r in 0..rows {
            let base = r * total;
            grad_left[r * self.left_cols..(r + 1) * self.left_cols]
                .copy_from_slice(&g[base..base + self.left_cols]);
            grad_right[r * self.right_cols..(r + 1) * self.right_cols]
                .copy_from_slice(&g[base + self.left_cols..base + total]);
        }

        vec![
            Tensor::from_vec(grad_left, &[rows, self.left_cols]),
            Tensor::from_vec(grad_right, &[rows, self.right_cols]),
        ]
    }

    fn name(&self) -> &'static str {
        "CatColsBackward"
    }
}

/// 3D axis permutation; gradient applies the inverse permutation.
pub(crate) struct Permute3Backward {
    pub(crate) input_shape: [usize; 3],
    pub(crate) perm: [usize; 3],
}

impl GradFn for Permute3Backward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let [d0, d1, d2] = self.input_shape;
        let out_shape = [
            self.input_shape[self.perm[0]],
            self.input_shape[self.perm[1]],
            self.input_shape[self.perm[2]],
        ];
        let g = grad_output.data();
        let mut grad = vec![0.0; d0 * d1 * d2];

        let out_strides = [out_shape[1] * out_shape[2], out_shape[2], 1];
        for i0 in 0..d0 {
            for i1 in 0..d1 {
                for i2 in 0..d2 {
                    let idx = [i0, i1, i2];
                    let out_idx = idx[self.perm[0]] * out_strides[0]
                        + idx[self.perm[1]] * out_strides[1]
                        + idx[self.perm[2]] * out_strides[2];
                    grad[(i0 * d1 + i1) * d2 + i2] = g[out_idx];
                }
            }
        }

        vec![Tensor::from_vec(grad, &[d0, d1, d2])]
    }

    fn name(&self) -> &'static str {
        "Permute3Backward"
    }
}

/// im2col extraction; gradient scatter-adds patch columns back into the
/// padded input positions.
pub(crate) struct Unfold2dBackward {
    pub(crate) input_shape: [usize; 4],
    pub(crate) kernel: (usize, usize),
    pub(crate) stride: (usize, usize),
    pub(crate) padding: (usize, usize),
    pub(crate) out_hw: (usize, usize),
}

impl GradFn for Unfold2dBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let [b, c, h, w] = self.input_shape;
        let (kh, kw) = self.kernel;
        let (sh, sw) = self.stride;
        let (ph, pw) = self.padding;
        let (oh, ow) = self.out_hw;
        let patch = c * kh * kw;
        let g = grad_output.data();

        let mut grad = vec![0.0; b * c * h * w];

        for n in 0..b {
            for oy in 0..oh {
                for ox in 0..ow {
                    let row = (n * oh + oy) * ow + ox;
                    for ic in 0..c {
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let iy = oy * sh + ky;
                                let ix = ox * sw + kx;
                                if iy < ph || iy >= h + ph || ix < pw || ix >= w + pw {
                                    continue;
                                }
                                let col = (ic * kh + ky) * kw + kx;
                                grad[((n * c + ic) * h + (iy - ph)) * w + (ix - pw)] +=
                                    g[row * patch + col];
                            }
                        }
                    }
                }
            }
        }

        vec![Tensor::from_vec(grad, &[b, c, h, w])]
    }

    fn name(&self) -> &'static str {
        "Unfold2dBackward"
    }
}

/// Nearest-neighbor upsampling; gradient accumulates each output pixel
/// into its source pixel.
pub(crate) struct Upsample2dBackward {
    pub(crate) input_shape: [usize; 4],
    pub(crate) out_hw: (usize, usize),
}

impl GradFn for Upsample2dBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let [b, c, in_h, in_w] = self.input_shape;
        let (out_h, out_w) = self.out_hw;
        let g = grad_output.data();
        let mut grad = vec![0.0; b * c * in_h * in_w];

        for n in 0..b {
            for ic in 0..c {
                for oy in 0..out_h {
                    let sy = (oy * in_h) / out_h;
                    for ox in 0..out_w {
                        let sx = (ox * in_w) / out_w;
                        grad[((n * c + ic) * in_h + sy) * in_w + sx] +=
                            g[((n * c + ic) * out_h + oy) * out_w + ox];
                    }
                }
            }
        }

        vec![Tensor::from_vec(grad, &[b, c, in_h, in_w])]
    }

    fn name(&self) -> &'static str {
        "Upsample2dBackward"
    }
}

// ============================================================================
// Raw kernels shared with the forward ops (no graph recording)
// ============================================================================

pub(crate) fn raw_transpose(t: &Tensor) -> Tensor {
    let (rows, cols) = (t.shape()[0], t.shape()[1]);
    let mut data = vec![0.0; rows * cols];
    for i in 0..rows {
        for j in 0..cols {
            data[j * rows + i] = t.data()[i * cols + j];
        }
    }
    Tensor::from_vec(data, &[cols, rows])
}

pub(crate) fn raw_matmul(a: &Tensor, b: &Tensor) -> Tensor {
    let (m, k) = (a.shape()[0], a.shape()[1]);
    let n = b.shape()[1];

    // trueno's SIMD matmul, as in all hot paths
    let a_matrix =
        trueno::Matrix::from_vec(m, k, a.data().to_vec()).expect("valid matrix dimensions");
    let b_matrix =
        trueno::Matrix::from_vec(k, n, b.data().to_vec()).expect("valid matrix dimensions");
    let result = a_matrix.matmul(&b_matrix).expect("matmul should succeed");

    Tensor::from_vec(result.as_slice().to_vec(), &[m, n])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_transpose() {
        let t = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let tt = raw_transpose(&t);
        assert_eq!(tt.shape(), &[3, 2]);
        assert_eq!(tt.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_raw_matmul() {
        let a = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = Tensor::new(&[5.0, 6.0, 7.0, 8.0], &[2, 2]);
        let c = raw_matmul(&a, &b);
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_tile_rows_backward_sums_blocks() {
        let fn_ = TileRowsBackward { reps: 2 };
        // grad for output [[1,1],[2,2],[3,3],[4,4]] tiled from 2 rows
        let g = Tensor::new(&[1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0], &[4, 2]);
        let grads = fn_.backward(&g);
        assert_eq!(grads[0].shape(), &[2, 2]);
        assert_eq!(grads[0].data(), &[3.0, 3.0, 7.0, 7.0]);
    }

    #[test]
    fn test_cat_cols_backward_splits() {
        let fn_ = CatColsBackward {
            left_cols: 1,
            right_cols: 2,
        };
        let g = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let grads = fn_.backward(&g);
        assert_eq!(grads[0].data(), &[1.0, 4.0]);
        assert_eq!(grads[1].data(), &[2.0, 3.0, 5.0, 6.0]);
    }

    #[test]
    fn test_narrow_cols_backward_pads() {
        let fn_ = NarrowColsBackward {
            in_cols: 4,
            start: 1,
            len: 2,
        };
        let g = Tensor::new(&[1.0, 2.0], &[1, 2]);
        let grads = fn_.backward(&g);
        assert_eq!(grads[0].data(), &[0.0, 1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_softmax_backward_rows_sum_to_zero() {
        // Softmax Jacobian rows are orthogonal to the all-ones vector
        let fn_ = SoftmaxBackward {
            output: Tensor::new(&[0.2, 0.3, 0.5], &[1, 3]),
        };
        let g = Tensor::new(&[1.0, 0.0, 0.0], &[1, 3]);
        let grads = fn_.backward(&g);
        let sum: f32 = grads[0].data().iter().sum();
        assert!(sum.abs() < 1e-6);
    }
}
