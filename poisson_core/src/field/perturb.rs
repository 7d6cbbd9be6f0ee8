//! Geometric perturbation of embeddings into the augmented space.
//!
//! Each row is pushed off the `z = 0` hyperplane by an amount controlled by
//! an exponent `m`: both the `z` coordinate and the feature-space displacement
//! scale with `(1 + τ)^m`, so small exponents stay near the data and large
//! exponents reach far into the halfspace.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal, StandardNormal};

/// Floor on the perturbed `z` coordinate so augmented points never sit
/// exactly on the data hyperplane.
pub const Z_FLOOR: f32 = 1e-10;

/// Perturb a `[rows, D]` batch into `[rows, D + 1]` augmented points.
///
/// Per row, with `k = (1 + tau)^m`:
/// - `z = |g| · sigma · k` for scalar unit normal `g`,
/// - the feature displacement has norm `‖n‖ · k` where `n ~ N(0, sigma²)^D`,
///   in a direction drawn uniformly from the sphere.
pub fn forward_pz(
    batch: &Array2<f32>,
    m: &Array1<f32>,
    tau: f32,
    sigma: f32,
    rng: &mut StdRng,
) -> Array2<f32> {
    let (rows, dim) = batch.dim();
    debug_assert_eq!(rows, m.len());

    let noise = Normal::new(0.0f32, sigma).expect("sigma is validated positive");
    let mut perturbed = Array2::zeros((rows, dim + 1));

    for i in 0..rows {
        let multiplier = (1.0 + tau).powf(m[i]);

        let z_sample: f32 = StandardNormal.sample(rng);
        let z = (z_sample.abs() * sigma * multiplier).max(Z_FLOOR);

        let noise_norm = (0..dim)
            .map(|_| {
                let n: f32 = noise.sample(rng);
                n * n
            })
            .sum::<f32>()
            .sqrt();

        let direction: Vec<f32> = (0..dim).map(|_| StandardNormal.sample(rng)).collect();
        let direction_norm = direction
            .iter()
            .map(|&v| v * v)
            .sum::<f32>()
            .sqrt()
            .max(1e-12);

        let scale = noise_norm * multiplier / direction_norm;
        for j in 0..dim {
            perturbed[[i, j]] = batch[[i, j]] + direction[j] * scale;
        }
        perturbed[[i, dim]] = z;
    }

    perturbed
}
