//! Image-stack utilities shared by the model family.
//!
//! Sliding-window extraction for dense latent maps, grid tiling for
//! manifold visualizations, and the inverse normal CDF used to place
//! manifold grid points at equal probability quantiles.

use rayon::prelude::*;

/// Extract all sliding windows of `win` size with stride 1 from a
/// single `h` x `w` image, in row-major window order.
///
/// Returns one flattened window per position; there are
/// `(h - win.0 + 1) * (w - win.1 + 1)` of them.
pub fn sliding_windows(image: &[f32], h: usize, w: usize, win: (usize, usize)) -> Vec<Vec<f32>> {
    let (wh, ww) = win;
    assert!(wh <= h && ww <= w, "window larger than image");
    let out_h = h - wh + 1;
    let out_w = w - ww + 1;

    (0..out_h * out_w)
        .into_par_iter()
        .map(|pos| {
            let (oy, ox) = (pos / out_w, pos % out_w);
            let mut patch = Vec::with_capacity(wh * ww);
            for ky in 0..wh {
                let row = (oy + ky) * w + ox;
                patch.extend_from_slice(&image[row..row + ww]);
            }
            patch
        })
        .collect()
}

/// Center crop of an `h` x `w` image down to
/// `(h - win.0 + 1, w - win.1 + 1)`, matching the window-position grid
/// of [`sliding_windows`].
pub fn crop_to_window_grid(image: &[f32], h: usize, w: usize, win: (usize, usize)) -> Vec<f32> {
    let (wh, ww) = win;
    let out_h = h - wh + 1;
    let out_w = w - ww + 1;
    let (oy, ox) = ((wh - 1) / 2, (ww - 1) / 2);

    let mut out = Vec::with_capacity(out_h * out_w);
    for y in 0..out_h {
        let row = (oy + y) * w + ox;
        out.extend_from_slice(&image[row..row + out_w]);
    }
    out
}

/// Assemble `rows * cols` tiles of `h` x `w` pixels into one canvas,
/// with `pad` blank pixels between adjacent tiles.
///
/// Tiles are consumed in row-major order. Output is
/// `(rows * h + (rows - 1) * pad, cols * w + (cols - 1) * pad)`.
pub fn tile_grid(
    tiles: &[Vec<f32>],
    rows: usize,
    cols: usize,
    h: usize,
    w: usize,
    pad: usize,
) -> (Vec<f32>, usize, usize) {
    assert_eq!(tiles.len(), rows * cols, "tile count mismatch");
    let out_h = rows * h + rows.saturating_sub(1) * pad;
    let out_w = cols * w + cols.saturating_sub(1) * pad;
    let mut canvas = vec![0.0; out_h * out_w];

    for (idx, tile) in tiles.iter().enumerate() {
        assert_eq!(tile.len(), h * w, "tile size mismatch");
        let (r, c) = (idx / cols, idx % cols);
        let (oy, ox) = (r * (h + pad), c * (w + pad));
        for y in 0..h {
            let dst = (oy + y) * out_w + ox;
            canvas[dst..dst + w].copy_from_slice(&tile[y * w..(y + 1) * w]);
        }
    }

    (canvas, out_h, out_w)
}

/// `d` probability quantiles of the standard normal, evenly spaced over
/// [0.05, 0.95], mapped through the inverse CDF. Used to place manifold
/// grid points where the prior has mass.
pub fn normal_grid(d: usize) -> Vec<f32> {
    assert!(d >= 1, "grid needs at least one point");
    (0..d)
        .map(|i| {
            let p = if d == 1 {
                0.5
            } else {
                0.05 + 0.9 * i as f32 / (d - 1) as f32
            };
            norm_ppf(p)
        })
        .collect()
}

/// Inverse CDF of the standard normal distribution.
///
/// Acklam's rational approximation, accurate to about 1.15e-9 over the
/// open unit interval.
pub fn norm_ppf(p: f32) -> f32 {
    assert!(p > 0.0 && p < 1.0, "quantile must be in (0, 1)");

    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];

    const P_LOW: f64 = 0.02425;
    let p = f64::from(p);

    let x = if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    x as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sliding_windows_count_and_content() {
        // 3x3 image, 2x2 window -> 4 windows
        let img: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let wins = sliding_windows(&img, 3, 3, (2, 2));
        assert_eq!(wins.len(), 4);
        assert_eq!(wins[0], vec![1.0, 2.0, 4.0, 5.0]);
        assert_eq!(wins[3], vec![5.0, 6.0, 8.0, 9.0]);
    }

    #[test]
    fn test_sliding_windows_map_size() {
        let img = vec![0.0; 64 * 64];
        let wins = sliding_windows(&img, 64, 64, (16, 16));
        assert_eq!(wins.len(), 49 * 49);
        assert_eq!(wins[0].len(), 256);
    }

    #[test]
    fn test_crop_matches_window_grid() {
        let img = vec![1.0; 64 * 64];
        let crop = crop_to_window_grid(&img, 64, 64, (16, 16));
        assert_eq!(crop.len(), 49 * 49);
    }

    #[test]
    fn test_tile_grid_no_pad() {
        let tiles = vec![vec![1.0; 4]; 6];
        let (canvas, h, w) = tile_grid(&tiles, 2, 3, 2, 2, 0);
        assert_eq!((h, w), (4, 6));
        assert_eq!(canvas.len(), 24);
        assert!(canvas.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_tile_grid_with_pad() {
        let tiles = vec![vec![1.0; 4]; 4];
        let (canvas, h, w) = tile_grid(&tiles, 2, 2, 2, 2, 1);
        assert_eq!((h, w), (5, 5));
        // Padding row stays blank
        assert_eq!(canvas[2 * 5 + 2], 0.0);
    }

    #[test]
    fn test_norm_ppf_symmetry() {
        assert!(norm_ppf(0.5).abs() < 1e-6);
        assert!((norm_ppf(0.05) + norm_ppf(0.95)).abs() < 1e-5);
        assert!((norm_ppf(0.975) - 1.959_964).abs() < 1e-4);
    }

    #[test]
    fn test_normal_grid_monotone() {
        let grid = normal_grid(5);
        assert_eq!(grid.len(), 5);
        assert!(grid.windows(2).all(|p| p[0] < p[1]));
        assert!(grid[2].abs() < 1e-6);
    }
}
