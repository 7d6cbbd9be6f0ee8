//! Adam optimizer shared by the extractor and the field network.

use std::collections::HashMap;

use ndarray::{Array, Dimension};
use serde::{Deserialize, Serialize};

/// Serializable optimizer state, stored inside model checkpoints so training
/// can resume with its moment estimates intact.
#[derive(Clone, Serialize, Deserialize)]
pub struct AdamOptimizerState {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub weight_decay: f32,
    pub first_moments: HashMap<String, Vec<f32>>,
    pub second_moments: HashMap<String, Vec<f32>>,
    pub t: usize,
}

/// Adaptive moment estimation over named parameter tensors.
///
/// Call [`AdamOptimizer::begin_step`] once per mini-batch, then
/// [`AdamOptimizer::update`] for every parameter; the step counter drives the
/// shared bias correction.
pub struct AdamOptimizer {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub weight_decay: f32,
    first_moments: HashMap<String, Vec<f32>>,
    second_moments: HashMap<String, Vec<f32>>,
    t: usize,
}

impl AdamOptimizer {
    pub fn new(learning_rate: f32, weight_decay: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay,
            first_moments: HashMap::new(),
            second_moments: HashMap::new(),
            t: 0,
        }
    }

    /// Advance the shared time step. Call once per mini-batch, before the
    /// per-parameter updates.
    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    /// Update one named parameter tensor in place.
    pub fn update<D: Dimension>(
        &mut self,
        param_name: &str,
        param: &mut Array<f32, D>,
        gradient: &Array<f32, D>,
    ) {
        debug_assert_eq!(param.raw_dim(), gradient.raw_dim());
        let t = self.t.max(1);

        let param_slice = param
            .as_slice_mut()
            .expect("parameters use standard layout");
        let grad_slice = gradient.as_slice().expect("gradients use standard layout");

        let m = self
            .first_moments
            .entry(param_name.to_string())
            .or_insert_with(|| vec![0.0; param_slice.len()]);
        let v = self
            .second_moments
            .entry(param_name.to_string())
            .or_insert_with(|| vec![0.0; param_slice.len()]);

        let bias1 = 1.0 - self.beta1.powi(t as i32);
        let bias2 = 1.0 - self.beta2.powi(t as i32);

        for ((p, &g), (m_i, v_i)) in param_slice
            .iter_mut()
            .zip(grad_slice.iter())
            .zip(m.iter_mut().zip(v.iter_mut()))
        {
            let g = g + self.weight_decay * *p;
            *m_i = self.beta1 * *m_i + (1.0 - self.beta1) * g;
            *v_i = self.beta2 * *v_i + (1.0 - self.beta2) * g * g;

            let m_hat = *m_i / bias1;
            let v_hat = *v_i / bias2;
            *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }

    pub fn to_state(&self) -> AdamOptimizerState {
        AdamOptimizerState {
            learning_rate: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
            weight_decay: self.weight_decay,
            first_moments: self.first_moments.clone(),
            second_moments: self.second_moments.clone(),
            t: self.t,
        }
    }

    pub fn apply_state(&mut self, state: AdamOptimizerState) {
        self.learning_rate = state.learning_rate;
        self.beta1 = state.beta1;
        self.beta2 = state.beta2;
        self.epsilon = state.epsilon;
        self.weight_decay = state.weight_decay;
        self.first_moments = state.first_moments;
        self.second_moments = state.second_moments;
        self.t = state.t;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    #[test]
    fn update_moves_parameter_against_gradient() {
        let mut opt = AdamOptimizer::new(0.1, 0.0);
        let mut param = Array1::from_vec(vec![1.0f32, -1.0]);
        let grad = Array1::from_vec(vec![1.0f32, -1.0]);

        opt.begin_step();
        opt.update("w", &mut param, &grad);

        assert!(param[0] < 1.0);
        assert!(param[1] > -1.0);
    }

    #[test]
    fn state_roundtrip_preserves_moments() {
        let mut opt = AdamOptimizer::new(0.01, 0.0);
        let mut param = Array1::from_vec(vec![0.5f32; 4]);
        let grad = Array1::from_vec(vec![0.25f32; 4]);
        opt.begin_step();
        opt.update("w", &mut param, &grad);

        let state = opt.to_state();
        let mut restored = AdamOptimizer::new(1.0, 1.0);
        restored.apply_state(state);

        assert_eq!(restored.t, opt.t);
        assert_eq!(restored.first_moments["w"], opt.first_moments["w"]);
        assert!((restored.learning_rate - 0.01).abs() < f32::EPSILON);
    }

    #[test]
    fn repeated_steps_converge_toward_minimum() {
        // Minimize (x - 3)² with gradient 2(x - 3).
        let mut opt = AdamOptimizer::new(0.1, 0.0);
        let mut param = Array1::from_vec(vec![0.0f32]);
        for _ in 0..500 {
            let grad = Array1::from_vec(vec![2.0 * (param[0] - 3.0)]);
            opt.begin_step();
            opt.update("x", &mut param, &grad);
        }
        assert!((param[0] - 3.0).abs() < 0.1);
    }
}
