//! The VAE model family.
//!
//! Four models share one construction kit: [`Vae`] (plain), [`RVae`]
//! (rotation/translation-invariant), [`JVae`] (joint discrete and
//! continuous latents) and [`JrVae`] (joint + rotation-invariant).

mod config;
mod decoder;
mod elbo;
mod encoder;
mod jrvae;
mod jvae;
mod rvae;
mod serialize;
mod vae;

pub use config::VaeConfig;
pub use jrvae::JrVae;
pub use jvae::JVae;
pub use rvae::RVae;
pub use vae::Vae;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::autograd::Tensor;
use crate::error::{LatenteError, Result};
use crate::imgproc;

/// Number of sliding windows encoded per forward pass in
/// [`encode_stack`]. Bounds peak memory for large images.
const ENCODE_CHUNK: usize = 1024;

/// Validate an image batch against the configured spatial shape and
/// flatten it to `[N, H*W]`. Accepts `[N, H, W]` or a single `[H, W]`
/// image.
pub(crate) fn flatten_batch(data: &Tensor, input_dim: (usize, usize)) -> Result<Tensor> {
    let (h, w) = input_dim;
    let shape = data.shape();
    let n = match shape {
        [ih, iw] if *ih == h && *iw == w => 1,
        [n, ih, iw] if *n > 0 && *ih == h && *iw == w => *n,
        _ => {
            return Err(LatenteError::DimensionMismatch {
                expected: format!("a non-empty stack of ({h}, {w}) patches"),
                actual: format!("{shape:?}"),
            })
        }
    };
    Ok(Tensor::new(data.data(), &[n, h * w]))
}

/// Copy selected rows of a `[N, K]` tensor into a fresh `[idx.len(), K]`
/// tensor. Used to slice mini-batches without touching the tape.
pub(crate) fn gather_rows(x: &Tensor, idx: &[usize]) -> Tensor {
    let k = x.shape()[1];
    let src = x.data();
    let mut data = Vec::with_capacity(idx.len() * k);
    for &i in idx {
        data.extend_from_slice(&src[i * k..(i + 1) * k]);
    }
    Tensor::from_vec(data, &[idx.len(), k])
}

/// Shuffled mini-batch index lists covering `0..n`.
pub(crate) fn shuffled_batches(n: usize, batch_size: usize, rng: &mut StdRng) -> Vec<Vec<usize>> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices
        .chunks(batch_size.max(1))
        .map(<[usize]>::to_vec)
        .collect()
}

/// One-hot rows, the same `label` repeated `batch` times.
pub(crate) fn one_hot(label: usize, num_classes: usize, batch: usize) -> Tensor {
    let mut data = vec![0.0; batch * num_classes];
    for b in 0..batch {
        data[b * num_classes + label] = 1.0;
    }
    Tensor::from_vec(data, &[batch, num_classes])
}

/// One-hot rows from per-row labels.
pub(crate) fn one_hot_rows(labels: &[usize], num_classes: usize) -> Tensor {
    let mut data = vec![0.0; labels.len() * num_classes];
    for (b, &label) in labels.iter().enumerate() {
        data[b * num_classes + label] = 1.0;
    }
    Tensor::from_vec(data, &[labels.len(), num_classes])
}

/// Slide the model window over every image of a stack and encode each
/// crop.
///
/// `encode_fn` maps a flattened window batch `[B, wh*ww]` to latent
/// rows `[B, D]`. Returns the center-cropped reference stack
/// `[N, H-wh+1, W-ww+1]` and the latent map `[N, H-wh+1, W-ww+1, D]`.
pub(crate) fn encode_stack<F>(
    images: &Tensor,
    window: (usize, usize),
    encode_fn: F,
) -> Result<(Tensor, Tensor)>
where
    F: Fn(&Tensor) -> Tensor,
{
    let shape = images.shape();
    let (n, h, w) = match shape {
        [h, w] => (1, *h, *w),
        [n, h, w] => (*n, *h, *w),
        _ => {
            return Err(LatenteError::DimensionMismatch {
                expected: "[H, W] or [N, H, W]".to_string(),
                actual: format!("{shape:?}"),
            })
        }
    };
    let (wh, ww) = window;
    if wh > h || ww > w {
        return Err(LatenteError::DimensionMismatch {
            expected: format!("images at least ({wh}, {ww})"),
            actual: format!("({h}, {w})"),
        });
    }

    let out_h = h - wh + 1;
    let out_w = w - ww + 1;
    let k = wh * ww;

    let mut cropped = Vec::with_capacity(n * out_h * out_w);
    let mut encoded: Vec<f32> = Vec::new();
    let mut latent_dim = 0;

    for i in 0..n {
        let image = &images.data()[i * h * w..(i + 1) * h * w];
        cropped.extend(imgproc::crop_to_window_grid(image, h, w, window));

        let windows = imgproc::sliding_windows(image, h, w, window);
        for chunk in windows.chunks(ENCODE_CHUNK) {
            let mut flat = Vec::with_capacity(chunk.len() * k);
            for patch in chunk {
                flat.extend_from_slice(patch);
            }
            let batch = Tensor::from_vec(flat, &[chunk.len(), k]);
            let codes = encode_fn(&batch);
            latent_dim = codes.shape()[1];
            encoded.extend_from_slice(codes.data());
        }
    }

    Ok((
        Tensor::from_vec(cropped, &[n, out_h, out_w]),
        Tensor::from_vec(encoded, &[n, out_h, out_w, latent_dim]),
    ))
}

/// Tile a decoded batch `[rows*cols, H, W]` into one canvas with `pad`
/// pixels between tiles.
pub(crate) fn tile_decoded(decoded: &Tensor, rows: usize, cols: usize, pad: usize) -> Tensor {
    let (h, w) = (decoded.shape()[1], decoded.shape()[2]);
    let tiles: Vec<Vec<f32>> = (0..rows * cols)
        .map(|i| decoded.data()[i * h * w..(i + 1) * h * w].to_vec())
        .collect();
    let (canvas, out_h, out_w) = imgproc::tile_grid(&tiles, rows, cols, h, w, pad);
    Tensor::from_vec(canvas, &[out_h, out_w])
}

/// Manifold grids need at least one point per axis.
pub(crate) fn validate_grid(d: usize) -> Result<()> {
    if d == 0 {
        return Err(LatenteError::InvalidHyperparameter {
            param: "d".into(),
            value: "0".into(),
            constraint: "grid needs at least one point".into(),
        });
    }
    Ok(())
}

/// Shared hyperparameter checks for the per-model training loops.
pub(crate) fn validate_cycles(training_cycles: usize) -> Result<()> {
    if training_cycles == 0 {
        return Err(LatenteError::InvalidHyperparameter {
            param: "training_cycles".into(),
            value: "0".into(),
            constraint: "must run at least one cycle".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_flatten_batch_accepts_single_image() {
        let img = Tensor::zeros(&[8, 8]);
        let flat = flatten_batch(&img, (8, 8)).unwrap();
        assert_eq!(flat.shape(), &[1, 64]);
    }

    #[test]
    fn test_flatten_batch_rejects_wrong_size() {
        let img = Tensor::zeros(&[3, 8, 9]);
        assert!(matches!(
            flatten_batch(&img, (8, 8)).unwrap_err(),
            LatenteError::DimensionMismatch { .. }
        ));
    }

    #[test]
    fn test_flatten_batch_rejects_empty_stack() {
        let img = Tensor::zeros(&[0, 8, 8]);
        assert!(matches!(
            flatten_batch(&img, (8, 8)).unwrap_err(),
            LatenteError::DimensionMismatch { .. }
        ));
    }

    #[test]
    fn test_gather_rows_picks_in_order() {
        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);
        let picked = gather_rows(&x, &[2, 0]);
        assert_eq!(picked.data(), &[5.0, 6.0, 1.0, 2.0]);
    }

    #[test]
    fn test_shuffled_batches_cover_all() {
        let mut rng = StdRng::seed_from_u64(0);
        let batches = shuffled_batches(10, 3, &mut rng);
        let mut seen: Vec<usize> = batches.into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_one_hot_rows() {
        let oh = one_hot_rows(&[1, 0], 3);
        assert_eq!(oh.data(), &[0.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_encode_stack_shapes() {
        let images = Tensor::zeros(&[2, 12, 12]);
        let (cropped, encoded) =
            encode_stack(&images, (4, 4), |batch| Tensor::zeros(&[batch.shape()[0], 3])).unwrap();
        assert_eq!(cropped.shape(), &[2, 9, 9]);
        assert_eq!(encoded.shape(), &[2, 9, 9, 3]);
    }

    #[test]
    fn test_encode_stack_window_too_large() {
        let images = Tensor::zeros(&[1, 4, 4]);
        assert!(encode_stack(&images, (8, 8), |b| b.clone()).is_err());
    }

    #[test]
    fn test_tile_decoded_shape() {
        let decoded = Tensor::ones(&[6, 3, 3]);
        let canvas = tile_decoded(&decoded, 2, 3, 0);
        assert_eq!(canvas.shape(), &[6, 9]);
    }
}
