//! Target field construction and the regression loss.
//!
//! For every perturbed point the target is a normalized, distance-weighted
//! average of the directions back to the real (z = 0) rows: nearby rows
//! dominate through an inverse-distance power weighting, the result is
//! normalized with an additive floor Γ, then rescaled by √D so target
//! magnitudes stay comparable across embedding widths.

use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;

const DISTANCE_EPS: f32 = 1e-7;

/// Compute the target field at each perturbed point.
///
/// `perturbed` is `[small, D + 1]`, `real` is `[large, D + 1]` with its last
/// column all zeros.
pub fn field_target(perturbed: &Array2<f32>, real: &Array2<f32>, gamma: f32) -> Array2<f32> {
    let width = perturbed.ncols();
    debug_assert_eq!(width, real.ncols());
    let power = width as i32;
    let feat_scale = ((width - 1) as f32).sqrt();

    let rows: Vec<Array1<f32>> = perturbed
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|p| {
            let distances: Vec<f32> = real
                .axis_iter(Axis(0))
                .map(|r| {
                    p.iter()
                        .zip(r.iter())
                        .map(|(&a, &b)| (a - b) * (a - b))
                        .sum::<f32>()
                        .sqrt()
                })
                .collect();

            let min_distance = distances.iter().cloned().fold(f32::INFINITY, f32::min);

            // Inverse-distance weights, sharpened to the (D+1)-th power.
            let weights: Vec<f32> = distances
                .iter()
                .map(|&d| (min_distance / (d + DISTANCE_EPS)).powi(power))
                .collect();
            let weight_sum = weights.iter().sum::<f32>() + DISTANCE_EPS;

            let mut target = Array1::<f32>::zeros(width);
            for (r, &w) in real.axis_iter(Axis(0)).zip(weights.iter()) {
                let coeff = w / weight_sum;
                for (t, (&rv, &pv)) in target.iter_mut().zip(r.iter().zip(p.iter())) {
                    *t += coeff * (rv - pv);
                }
            }

            let norm = target.iter().map(|&v| v * v).sum::<f32>().sqrt();
            target.mapv_inplace(|v| v / (norm + gamma) * feat_scale);
            target
        })
        .collect();

    let mut out = Array2::zeros((perturbed.nrows(), width));
    for (i, row) in rows.into_iter().enumerate() {
        out.row_mut(i).assign(&row);
    }
    out
}

/// Mean squared error between predicted and target fields, averaged per row
/// then over the batch, plus the gradient with respect to the prediction.
pub fn field_loss(pred: &Array2<f32>, target: &Array2<f32>) -> (f32, Array2<f32>) {
    debug_assert_eq!(pred.dim(), target.dim());
    let (rows, width) = pred.dim();
    let scale = 1.0 / (rows.max(1) * width) as f32;

    let mut loss = 0.0f32;
    let mut grad = Array2::zeros(pred.raw_dim());
    for ((g, &p), &t) in grad.iter_mut().zip(pred.iter()).zip(target.iter()) {
        let diff = p - t;
        loss += diff * diff;
        *g = 2.0 * diff * scale;
    }

    (loss * scale, grad)
}
