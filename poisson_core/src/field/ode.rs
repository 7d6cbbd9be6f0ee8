//! Explicit-Euler integration along the learned field.
//!
//! Each step divides the field vector by its inner product with the current
//! point, so trajectories advance in a scale-free way. Rows whose normalizer
//! falls below a floor take a zero step instead of blowing up.

use ndarray::Array2;

use super::model::FieldNetwork;
use super::with_z_column;
use crate::config::OdeConfig;
use crate::features::FeatureSplit;

/// Inner products smaller than this leave the row unchanged for the step.
pub const NORMALIZER_FLOOR: f32 = 1e-8;

/// Integrate augmented points `[rows, D + 1]` for the configured number of
/// Euler steps, in evaluation mode.
pub fn ode_forward(model: &mut FieldNetwork, x: &Array2<f32>, config: &OdeConfig) -> Array2<f32> {
    let mut state = x.clone();

    for _ in 0..config.steps {
        let field = model.forward(&state, false);

        for i in 0..state.nrows() {
            let normalizer: f32 = field
                .row(i)
                .iter()
                .zip(state.row(i).iter())
                .map(|(&f, &s)| f * s)
                .sum();
            if normalizer.abs() < NORMALIZER_FLOOR {
                continue;
            }

            let step = config.delta / normalizer;
            let field_row = field.row(i).to_owned();
            for (s, &f) in state.row_mut(i).iter_mut().zip(field_row.iter()) {
                *s += step * f;
            }
        }
    }

    state
}

/// Lift a feature split onto the `z = 0` hyperplane and integrate it,
/// producing the flowed representation used for probing.
pub fn integrate_split(
    model: &mut FieldNetwork,
    split: &FeatureSplit,
    config: &OdeConfig,
) -> Array2<f32> {
    let augmented = with_z_column(split.data.view(), 0.0);
    ode_forward(model, &augmented, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;

    fn test_points() -> Array2<f32> {
        Array2::from_shape_fn((3, 5), |(i, j)| (i as f32 + 1.0) * 0.2 - j as f32 * 0.1)
    }

    #[test]
    fn zero_steps_is_identity() {
        let mut model = FieldNetwork::new(&FieldConfig::default(), 4);
        let x = test_points();
        let config = OdeConfig {
            delta: 0.01,
            steps: 0,
        };
        assert_eq!(ode_forward(&mut model, &x, &config), x);
    }

    #[test]
    fn zero_delta_is_identity() {
        let mut model = FieldNetwork::new(&FieldConfig::default(), 4);
        let x = test_points();
        let config = OdeConfig {
            delta: 0.0,
            steps: 50,
        };
        assert_eq!(ode_forward(&mut model, &x, &config), x);
    }

    #[test]
    fn integration_is_deterministic() {
        let field_config = FieldConfig::default();
        let mut a = FieldNetwork::new(&field_config, 4);
        let mut b = FieldNetwork::new(&field_config, 4);
        let x = test_points();
        let config = OdeConfig {
            delta: 0.01,
            steps: 20,
        };
        assert_eq!(
            ode_forward(&mut a, &x, &config),
            ode_forward(&mut b, &x, &config)
        );
    }

    #[test]
    fn vanishing_field_leaves_points_unchanged() {
        let mut model = FieldNetwork::new(&FieldConfig::default(), 4);
        model.zero_parameters();
        let x = test_points();
        let config = OdeConfig {
            delta: 0.01,
            steps: 10,
        };
        assert_eq!(ode_forward(&mut model, &x, &config), x);
    }

    #[test]
    fn integration_moves_points_and_keeps_shape() {
        let mut model = FieldNetwork::new(&FieldConfig::default(), 4);
        let x = test_points();
        let config = OdeConfig {
            delta: 0.01,
            steps: 5,
        };
        let flowed = ode_forward(&mut model, &x, &config);
        assert_eq!(flowed.dim(), x.dim());
        assert!(flowed.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn split_integration_appends_zero_anchor() {
        let mut model = FieldNetwork::new(&FieldConfig::default(), 3);
        let split = FeatureSplit {
            data: Array2::from_shape_fn((4, 3), |(i, j)| (i + j) as f32 * 0.1),
            labels: vec![0, 1, 2, 3],
        };
        let config = OdeConfig {
            delta: 0.01,
            steps: 2,
        };
        let flowed = integrate_split(&mut model, &split, &config);
        assert_eq!(flowed.dim(), (4, 4));
    }
}
