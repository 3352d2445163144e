//! Differentiable operations for tensors.
//!
//! Each operation computes the forward result, then records a `GradFn`
//! to the computation graph when gradient tracking is enabled.
//! Matrix multiplication goes through trueno's SIMD kernels.

use std::sync::Arc;

use super::grad_fn::{
    raw_matmul, raw_transpose, AddBackward, AddScalarBackward, BroadcastAddBackward,
    CatColsBackward, CosBackward, DivBackward, ExpBackward, GradFn, LeakyReluBackward, LogBackward,
    MatmulBackward, MeanBackward, MulBackward, MulScalarBackward, NarrowColsBackward, NegBackward,
    Permute3Backward, PowBackward, ReluBackward, SigmoidBackward, SinBackward, SoftmaxBackward,
    SqrtBackward, SubBackward, SumBackward, TanhBackward, TileRowsBackward, TransposeBackward,
    Unfold2dBackward, Upsample2dBackward, ViewBackward,
};
use super::tensor::Tensor;
use super::{is_grad_enabled, with_graph};

/// Record a unary operation on the tape if gradient tracking is active.
fn record_unary(input: &Tensor, result: &mut Tensor, grad_fn: Arc<dyn GradFn>) {
    if is_grad_enabled() && input.requires_grad_enabled() {
        result.requires_grad_(true);
        result.set_grad_fn(grad_fn.clone());
        with_graph(|graph| {
            graph.register_tensor(input.clone());
            graph.record(result.id(), grad_fn, vec![input.id()]);
        });
    }
}

/// Record a binary operation on the tape if gradient tracking is active.
fn record_binary(x: &Tensor, y: &Tensor, result: &mut Tensor, grad_fn: Arc<dyn GradFn>) {
    if is_grad_enabled() && (x.requires_grad_enabled() || y.requires_grad_enabled()) {
        result.requires_grad_(true);
        result.set_grad_fn(grad_fn.clone());
        with_graph(|graph| {
            graph.register_tensor(x.clone());
            graph.register_tensor(y.clone());
            graph.record(result.id(), grad_fn, vec![x.id(), y.id()]);
        });
    }
}

fn zip_map<F: Fn(f32, f32) -> f32>(x: &Tensor, y: &Tensor, f: F) -> Vec<f32> {
    debug_assert_eq!(x.shape(), y.shape(), "element-wise op shape mismatch");
    x.data()
        .iter()
        .zip(y.data().iter())
        .map(|(&a, &b)| f(a, b))
        .collect()
}

// ============================================================================
// Element-wise operations
// ============================================================================

impl Tensor {
    /// Element-wise addition: z = self + other
    #[must_use]
    pub fn add(&self, other: &Tensor) -> Tensor {
        let mut result = Tensor::from_vec(zip_map(self, other, |a, b| a + b), self.shape());
        record_binary(self, other, &mut result, Arc::new(AddBackward));
        result
    }

    /// Element-wise subtraction: z = self - other
    #[must_use]
    pub fn sub(&self, other: &Tensor) -> Tensor {
        let mut result = Tensor::from_vec(zip_map(self, other, |a, b| a - b), self.shape());
        record_binary(self, other, &mut result, Arc::new(SubBackward));
        result
    }

    /// Element-wise multiplication: z = self * other
    #[must_use]
    pub fn mul(&self, other: &Tensor) -> Tensor {
        let mut result = Tensor::from_vec(zip_map(self, other, |a, b| a * b), self.shape());
        record_binary(
            self,
            other,
            &mut result,
            Arc::new(MulBackward {
                x: self.clone(),
                y: other.clone(),
            }),
        );
        result
    }

    /// Element-wise division: z = self / other
    #[must_use]
    pub fn div(&self, other: &Tensor) -> Tensor {
        let mut result = Tensor::from_vec(zip_map(self, other, |a, b| a / b), self.shape());
        record_binary(
            self,
            other,
            &mut result,
            Arc::new(DivBackward {
                x: self.clone(),
                y: other.clone(),
            }),
        );
        result
    }

    /// Element-wise negation: z = -self
    #[must_use]
    pub fn neg(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| -a).collect();
        let mut result = Tensor::from_vec(data, self.shape());
        record_unary(self, &mut result, Arc::new(NegBackward));
        result
    }

    /// Multiply every element by a scalar.
    #[must_use]
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a * scalar).collect();
        let mut result = Tensor::from_vec(data, self.shape());
        record_unary(self, &mut result, Arc::new(MulScalarBackward { scalar }));
        result
    }

    /// Add a scalar to every element.
    #[must_use]
    pub fn add_scalar(&self, scalar: f32) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a + scalar).collect();
        let mut result = Tensor::from_vec(data, self.shape());
        record_unary(self, &mut result, Arc::new(AddScalarBackward));
        result
    }
}

// ============================================================================
// Transcendental operations
// ============================================================================

impl Tensor {
    /// Element-wise exponential: z = exp(self)
    #[must_use]
    pub fn exp(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a.exp()).collect();
        let mut result = Tensor::from_vec(data, self.shape());
        let output = result.clone();
        record_unary(self, &mut result, Arc::new(ExpBackward { output }));
        result
    }

    /// Element-wise natural logarithm: z = ln(self)
    #[must_use]
    pub fn log(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a.ln()).collect();
        let mut result = Tensor::from_vec(data, self.shape());
        record_unary(self, &mut result, Arc::new(LogBackward { x: self.clone() }));
        result
    }

    /// Element-wise power: z = self^n
    #[must_use]
    pub fn pow(&self, n: f32) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a.powf(n)).collect();
        let mut result = Tensor::from_vec(data, self.shape());
        record_unary(
            self,
            &mut result,
            Arc::new(PowBackward { x: self.clone(), n }),
        );
        result
    }

    /// Element-wise square root: z = sqrt(self)
    #[must_use]
    pub fn sqrt(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a.sqrt()).collect();
        let mut result = Tensor::from_vec(data, self.shape());
        let output = result.clone();
        record_unary(self, &mut result, Arc::new(SqrtBackward { output }));
        result
    }

    /// Element-wise sine: z = sin(self)
    #[must_use]
    pub fn sin(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a.sin()).collect();
        let mut result = Tensor::from_vec(data, self.shape());
        record_unary(self, &mut result, Arc::new(SinBackward { x: self.clone() }));
        result
    }

    /// Element-wise cosine: z = cos(self)
    #[must_use]
    pub fn cos(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a.cos()).collect();
        let mut result = Tensor::from_vec(data, self.shape());
        record_unary(self, &mut result, Arc::new(CosBackward { x: self.clone() }));
        result
    }
}

// ============================================================================
// Reductions
// ============================================================================

impl Tensor {
    /// Sum of all elements, as a scalar tensor.
    #[must_use]
    pub fn sum(&self) -> Tensor {
        let total: f32 = self.data().iter().sum();
        let mut result = Tensor::from_vec(vec![total], &[1]);
        record_unary(
            self,
            &mut result,
            Arc::new(SumBackward {
                input_shape: self.shape().to_vec(),
            }),
        );
        result
    }

    /// Mean of all elements, as a scalar tensor.
    #[must_use]
    pub fn mean(&self) -> Tensor {
        let total: f32 = self.data().iter().sum();
        let mean = total / self.numel() as f32;
        let mut result = Tensor::from_vec(vec![mean], &[1]);
        record_unary(
            self,
            &mut result,
            Arc::new(MeanBackward {
                input_shape: self.shape().to_vec(),
            }),
        );
        result
    }
}

// ============================================================================
// Activations
// ============================================================================

impl Tensor {
    /// Rectified linear unit: z = max(0, self)
    #[must_use]
    pub fn relu(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a.max(0.0)).collect();
        let mut result = Tensor::from_vec(data, self.shape());
        record_unary(self, &mut result, Arc::new(ReluBackward { x: self.clone() }));
        result
    }

    /// Leaky rectified linear unit.
    #[must_use]
    pub fn leaky_relu(&self, negative_slope: f32) -> Tensor {
        let data: Vec<f32> = self
            .data()
            .iter()
            .map(|&a| if a > 0.0 { a } else { a * negative_slope })
            .collect();
        let mut result = Tensor::from_vec(data, self.shape());
        record_unary(
            self,
            &mut result,
            Arc::new(LeakyReluBackward {
                x: self.clone(),
                negative_slope,
            }),
        );
        result
    }

    /// Logistic sigmoid: z = 1 / (1 + exp(-self))
    #[must_use]
    pub fn sigmoid(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| 1.0 / (1.0 + (-a).exp())).collect();
        let mut result = Tensor::from_vec(data, self.shape());
        let output = result.clone();
        record_unary(self, &mut result, Arc::new(SigmoidBackward { output }));
        result
    }

    /// Hyperbolic tangent.
    #[must_use]
    pub fn tanh_(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a.tanh()).collect();
        let mut result = Tensor::from_vec(data, self.shape());
        let output = result.clone();
        record_unary(self, &mut result, Arc::new(TanhBackward { output }));
        result
    }

    /// Row-wise softmax over a 2D tensor, with max subtraction for
    /// numerical stability.
    #[must_use]
    pub fn softmax(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "softmax requires a 2D tensor");
        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let x = self.data();
        let mut data = vec![0.0; rows * cols];

        for r in 0..rows {
            let row = &x[r * cols..(r + 1) * cols];
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for (j, &v) in row.iter().enumerate() {
                let e = (v - max).exp();
                data[r * cols + j] = e;
                sum += e;
            }
            for j in 0..cols {
                data[r * cols + j] /= sum;
            }
        }

        let mut result = Tensor::from_vec(data, self.shape());
        let output = result.clone();
        record_unary(self, &mut result, Arc::new(SoftmaxBackward { output }));
        result
    }
}

// ============================================================================
// Linear algebra
// ============================================================================

impl Tensor {
    /// Matrix multiplication: z = self @ other
    ///
    /// Supports 2D tensors only.
    #[must_use]
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(other.ndim(), 2, "matmul requires 2D tensors");
        let (k1, k2) = (self.shape()[1], other.shape()[0]);
        assert_eq!(k1, k2, "matmul dimension mismatch: {k1} vs {k2}");

        let mut result = raw_matmul(self, other);
        record_binary(
            self,
            other,
            &mut result,
            Arc::new(MatmulBackward {
                x: self.clone(),
                y: other.clone(),
            }),
        );
        result
    }

    /// 2D transpose: z = self^T
    #[must_use]
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose requires a 2D tensor");
        let mut result = raw_transpose(self);
        record_unary(self, &mut result, Arc::new(TransposeBackward));
        result
    }

    /// Add a 1D vector to every row of a 2D matrix.
    #[must_use]
    pub fn broadcast_add(&self, vec: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "broadcast_add requires a 2D matrix");
        assert_eq!(vec.ndim(), 1, "broadcast_add requires a 1D vector");
        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        assert_eq!(cols, vec.numel(), "broadcast_add width mismatch");

        let m = self.data();
        let v = vec.data();
        let mut data = vec![0.0; rows * cols];
        for r in 0..rows {
            for c in 0..cols {
                data[r * cols + c] = m[r * cols + c] + v[c];
            }
        }

        let mut result = Tensor::from_vec(data, self.shape());
        record_binary(self, vec, &mut result, Arc::new(BroadcastAddBackward { cols }));
        result
    }
}

// ============================================================================
// Shape operations
// ============================================================================

impl Tensor {
    /// Reshape to a new shape with the same number of elements.
    #[must_use]
    pub fn view(&self, shape: &[usize]) -> Tensor {
        let new_numel: usize = shape.iter().product();
        assert_eq!(
            self.numel(),
            new_numel,
            "view cannot change element count: {} vs {new_numel}",
            self.numel()
        );

        let mut result = Tensor::new(self.data(), shape);
        record_unary(
            self,
            &mut result,
            Arc::new(ViewBackward {
                input_shape: self.shape().to_vec(),
            }),
        );
        result
    }

    /// Slice `len` columns of a 2D tensor starting at `start`.
    #[must_use]
    pub fn narrow_cols(&self, start: usize, len: usize) -> Tensor {
        assert_eq!(self.ndim(), 2, "narrow_cols requires a 2D tensor");
        let (rows, in_cols) = (self.shape()[0], self.shape()[1]);
        assert!(start + len <= in_cols, "narrow_cols out of bounds");

        let x = self.data();
        let mut data = vec![0.0; rows * len];
        for r in 0..rows {
            data[r * len..(r + 1) * len]
                .copy_from_slice(&x[r * in_cols + start..r * in_cols + start + len]);
        }

        let mut result = Tensor::from_vec(data, &[rows, len]);
        record_unary(
            self,
            &mut result,
            Arc::new(NarrowColsBackward {
                in_cols,
                start,
                len,
            }),
        );
        result
    }

    /// Repeat each row of a 2D tensor `reps` consecutive times,
    /// producing a `[rows * reps, cols]` tensor.
    #[must_use]
    pub fn tile_rows(&self, reps: usize) -> Tensor {
        assert_eq!(self.ndim(), 2, "tile_rows requires a 2D tensor");
        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let x = self.data();

        let mut data = vec![0.0; rows * reps * cols];
        for r in 0..rows {
            let src = &x[r * cols..(r + 1) * cols];
            for k in 0..reps {
                let base = (r * reps + k) * cols;
                data[base..base + cols].copy_from_slice(src);
            }
        }

        let mut result = Tensor::from_vec(data, &[rows * reps, cols]);
        record_unary(self, &mut result, Arc::new(TileRowsBackward { reps }));
        result
    }

    /// Concatenate two 2D tensors along the column axis.
    #[must_use]
    pub fn cat_cols(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "cat_cols requires 2D tensors");
        assert_eq!(other.ndim(), 2, "cat_cols requires 2D tensors");
        let rows = self.shape()[0];
        assert_eq!(rows, other.shape()[0], "cat_cols row count mismatch");
        let (lc, rc) = (self.shape()[1], other.shape()[1]);

        let (a, b) = (self.data(), other.data());
        let mut data = vec![0.0; rows * (lc + rc)];
        for r in 0..rows {
            let base = r * (lc + rc);
            data[base..base + lc].copy_from_slice(&a[r * lc..(r + 1) * lc]);
            data[base + lc..base + lc + rc].copy_from_slice(&b[r * rc..(r + 1) * rc]);
        }

        let mut result = Tensor::from_vec(data, &[rows, lc + rc]);
        record_binary(
            self,
            other,
            &mut result,
            Arc::new(CatColsBackward {
                left_cols: lc,
                right_cols: rc,
            }),
        );
        result
    }

    /// Permute the axes of a 3D tensor.
    #[must_use]
    pub fn permute3(&self, perm: [usize; 3]) -> Tensor {
        assert_eq!(self.ndim(), 3, "permute3 requires a 3D tensor");
        let shape = [self.shape()[0], self.shape()[1], self.shape()[2]];
        let out_shape = [shape[perm[0]], shape[perm[1]], shape[perm[2]]];

        let x = self.data();
        let mut data = vec![0.0; x.len()];
        let out_strides = [out_shape[1] * out_shape[2], out_shape[2], 1];
        for i0 in 0..shape[0] {
            for i1 in 0..shape[1] {
                for i2 in 0..shape[2] {
                    let idx = [i0, i1, i2];
                    let out_idx = idx[perm[0]] * out_strides[0]
                        + idx[perm[1]] * out_strides[1]
                        + idx[perm[2]] * out_strides[2];
                    data[out_idx] = x[(i0 * shape[1] + i1) * shape[2] + i2];
                }
            }
        }

        let mut result = Tensor::from_vec(data, &out_shape);
        record_unary(
            self,
            &mut result,
            Arc::new(Permute3Backward {
                input_shape: shape,
                perm,
            }),
        );
        result
    }

    /// im2col patch extraction for convolution.
    ///
    /// Turns a `[B, C, H, W]` tensor into `[B * oh * ow, C * kh * kw]`
    /// where each row holds one receptive field, so convolution reduces
    /// to a single matmul against the flattened kernel bank.
    #[must_use]
    pub fn unfold2d(
        &self,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Tensor {
        assert_eq!(self.ndim(), 4, "unfold2d requires a 4D tensor");
        let [b, c, h, w] = [
            self.shape()[0],
            self.shape()[1],
            self.shape()[2],
            self.shape()[3],
        ];
        let (kh, kw) = kernel;
        let (sh, sw) = stride;
        let (ph, pw) = padding;
        let oh = (h + 2 * ph - kh) / sh + 1;
        let ow = (w + 2 * pw - kw) / sw + 1;
        let patch = c * kh * kw;

        let x = self.data();
        let mut data = vec![0.0; b * oh * ow * patch];
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
                                    continue; // padded region stays zero
                                }
                                let col = (ic * kh + ky) * kw + kx;
                                data[row * patch + col] =
                                    x[((n * c + ic) * h + (iy - ph)) * w + (ix - pw)];
                            }
                        }
                    }
                }
            }
        }

        let mut result = Tensor::from_vec(data, &[b * oh * ow, patch]);
        record_unary(
            self,
            &mut result,
            Arc::new(Unfold2dBackward {
                input_shape: [b, c, h, w],
                kernel,
                stride,
                padding,
                out_hw: (oh, ow),
            }),
        );
        result
    }

    /// Nearest-neighbor upsampling of a `[B, C, H, W]` tensor to the
    /// given spatial size.
    #[must_use]
    pub fn upsample2d(&self, out_h: usize, out_w: usize) -> Tensor {
        assert_eq!(self.ndim(), 4, "upsample2d requires a 4D tensor");
        let [b, c, in_h, in_w] = [
            self.shape()[0],
            self.shape()[1],
            self.shape()[2],
            self.shape()[3],
        ];

        let x = self.data();
        let mut data = vec![0.0; b * c * out_h * out_w];
        for n in 0..b {
            for ic in 0..c {
                for oy in 0..out_h {
                    let sy = (oy * in_h) / out_h;
                    for ox in 0..out_w {
                        let sx = (ox * in_w) / out_w;
                        data[((n * c + ic) * out_h + oy) * out_w + ox] =
                            x[((n * c + ic) * in_h + sy) * in_w + sx];
                    }
                }
            }
        }

        let mut result = Tensor::from_vec(data, &[b, c, out_h, out_w]);
        record_unary(
            self,
            &mut result,
            Arc::new(Upsample2dBackward {
                input_shape: [b, c, in_h, in_w],
                out_hw: (out_h, out_w),
            }),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::super::{clear_graph, get_grad};
    use super::*;

    #[test]
    fn test_add_forward() {
        let a = Tensor::new(&[1.0, 2.0], &[2]);
        let b = Tensor::new(&[3.0, 4.0], &[2]);
        assert_eq!(a.add(&b).data(), &[4.0, 6.0]);
    }

    #[test]
    fn test_matmul_forward() {
        let a = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = Tensor::new(&[5.0, 6.0, 7.0, 8.0], &[2, 2]);
        let c = a.matmul(&b);
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_mul_backward() {
        clear_graph();
        let a = Tensor::new(&[2.0, 3.0], &[2]).requires_grad();
        let b = Tensor::new(&[4.0, 5.0], &[2]).requires_grad();
        let (a_id, b_id) = (a.id(), b.id());

        let loss = a.mul(&b).sum();
        loss.backward();

        let grad_a = get_grad(a_id).expect("grad_a");
        let grad_b = get_grad(b_id).expect("grad_b");
        assert_eq!(grad_a.data(), &[4.0, 5.0]);
        assert_eq!(grad_b.data(), &[2.0, 3.0]);
    }

    #[test]
    fn test_matmul_backward() {
        // For z = sum(A @ B): dL/dA = grad @ B^T, dL/dB = A^T @ grad
        clear_graph();
        let a = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).requires_grad();
        let b = Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]).requires_grad();
        let (a_id, b_id) = (a.id(), b.id());

        let loss = a.matmul(&b).sum();
        loss.backward();

        let grad_a = get_grad(a_id).expect("grad_a");
        let grad_b = get_grad(b_id).expect("grad_b");
        assert_eq!(grad_a.data(), &[1.0, 1.0, 1.0, 1.0]);
        // A^T @ ones = [[1+3, 1+3], [2+4, 2+4]]
        assert_eq!(grad_b.data(), &[4.0, 4.0, 6.0, 6.0]);
    }

    #[test]
    fn test_sigmoid_range() {
        let x = Tensor::new(&[-10.0, 0.0, 10.0], &[3]);
        let y = x.sigmoid();
        assert!(y.data().iter().all(|&v| v > 0.0 && v < 1.0));
        assert!((y.data()[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let x = Tensor::new(&[1.0, 2.0, 3.0, 1.0, 1.0, 1.0], &[2, 3]);
        let y = x.softmax();
        for r in 0..2 {
            let sum: f32 = y.data()[r * 3..(r + 1) * 3].iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_exp_backward() {
        clear_graph();
        let x = Tensor::new(&[0.0, 1.0], &[2]).requires_grad();
        let x_id = x.id();
        x.exp().sum().backward();
        let grad = get_grad(x_id).expect("grad");
        assert!((grad.data()[0] - 1.0).abs() < 1e-6);
        assert!((grad.data()[1] - std::f32::consts::E).abs() < 1e-5);
    }

    #[test]
    fn test_sin_cos_backward() {
        clear_graph();
        let x = Tensor::new(&[0.0], &[1]).requires_grad();
        let x_id = x.id();
        x.sin().sum().backward();
        let grad = get_grad(x_id).expect("grad");
        assert!((grad.data()[0] - 1.0).abs() < 1e-6); // d sin / dx at 0 = cos(0)

        clear_graph();
        let y = Tensor::new(&[0.0], &[1]).requires_grad();
        let y_id = y.id();
        y.cos().sum().backward();
        let grad = get_grad(y_id).expect("grad");
        assert!(grad.data()[0].abs() < 1e-6); // d cos / dx at 0 = -sin(0)
    }

    #[test]
    fn test_view_round_trip_backward() {
        clear_graph();
        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).requires_grad();
        let x_id = x.id();
        x.view(&[4]).mul_scalar(2.0).sum().backward();
        let grad = get_grad(x_id).expect("grad");
        assert_eq!(grad.shape(), &[2, 2]);
        assert_eq!(grad.data(), &[2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_narrow_cols_forward() {
        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let y = x.narrow_cols(1, 2);
        assert_eq!(y.shape(), &[2, 2]);
        assert_eq!(y.data(), &[2.0, 3.0, 5.0, 6.0]);
    }

    #[test]
    fn test_tile_rows_forward() {
        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let y = x.tile_rows(2);
        assert_eq!(y.shape(), &[4, 2]);
        assert_eq!(y.data(), &[1.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 4.0]);
    }

    #[test]
    fn test_cat_cols_forward() {
        let a = Tensor::new(&[1.0, 2.0], &[2, 1]);
        let b = Tensor::new(&[3.0, 4.0, 5.0, 6.0], &[2, 2]);
        let c = a.cat_cols(&b);
        assert_eq!(c.shape(), &[2, 3]);
        assert_eq!(c.data(), &[1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);
    }

    #[test]
    fn test_permute3_forward() {
        // [1, 2, 3] -> [1, 3, 2] swaps the last two axes
        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[1, 2, 3]);
        let y = x.permute3([0, 2, 1]);
        assert_eq!(y.shape(), &[1, 3, 2]);
        assert_eq!(y.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_unfold2d_shape() {
        // 1x1x4x4 input, 3x3 kernel, stride 2, padding 1 -> 2x2 output grid
        let x = Tensor::zeros(&[1, 1, 4, 4]);
        let y = x.unfold2d((3, 3), (2, 2), (1, 1));
        assert_eq!(y.shape(), &[4, 9]);
    }

    #[test]
    fn test_unfold2d_values_no_padding() {
        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
        let y = x.unfold2d((2, 2), (1, 1), (0, 0));
        assert_eq!(y.shape(), &[1, 4]);
        assert_eq!(y.data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_unfold2d_backward_counts_overlaps() {
        clear_graph();
        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0], &[1, 1, 3, 3])
            .requires_grad();
        let x_id = x.id();
        // 2x2 kernel stride 1: center pixel appears in all 4 patches
        x.unfold2d((2, 2), (1, 1), (0, 0)).sum().backward();
        let grad = get_grad(x_id).expect("grad");
        assert_eq!(grad.data()[4], 4.0);
        assert_eq!(grad.data()[0], 1.0);
        assert_eq!(grad.data()[1], 2.0);
    }

    #[test]
    fn test_upsample2d_nearest() {
        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
        let y = x.upsample2d(4, 4);
        assert_eq!(y.shape(), &[1, 1, 4, 4]);
        assert_eq!(y.data()[0], 1.0);
        assert_eq!(y.data()[3], 2.0);
        assert_eq!(y.data()[15], 4.0);
    }

    #[test]
    fn test_broadcast_add_backward() {
        clear_graph();
        let m = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).requires_grad();
        let v = Tensor::new(&[10.0, 20.0], &[2]).requires_grad();
        let v_id = v.id();
        m.broadcast_add(&v).sum().backward();
        let grad_v = get_grad(v_id).expect("grad_v");
        assert_eq!(grad_v.data(), &[2.0, 2.0]);
    }
}
