//! Poisson field stage: an MLP trained to point from perturbed embeddings
//! back toward the data manifold, plus the Euler integrator that rides the
//! learned field.
//!
//! All tensors in this module live in the augmented space: the `feat_dim`
//! embedding coordinates plus one extra `z` coordinate appended as the last
//! column. Real data sits on the `z = 0` hyperplane.

pub mod loss;
pub mod model;
pub mod ode;
pub mod perturb;
pub mod training;

use ndarray::{Array2, ArrayView2};

pub use loss::{field_loss, field_target};
pub use model::FieldNetwork;
pub use ode::{integrate_split, ode_forward};
pub use perturb::forward_pz;
pub use training::{train_field, FieldTrainingResult};

/// Append a constant `z` column, lifting `[rows, D]` features into the
/// `[rows, D + 1]` augmented space.
pub fn with_z_column(features: ArrayView2<'_, f32>, z: f32) -> Array2<f32> {
    let (rows, dim) = features.dim();
    let mut augmented = Array2::from_elem((rows, dim + 1), z);
    augmented
        .slice_mut(ndarray::s![.., ..dim])
        .assign(&features);
    augmented
}

/// Drop the `z` column, projecting augmented rows back to feature space.
pub fn without_z_column(augmented: ArrayView2<'_, f32>) -> Array2<f32> {
    let dim = augmented.ncols() - 1;
    augmented.slice(ndarray::s![.., ..dim]).to_owned()
}
