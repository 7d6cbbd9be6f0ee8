//! Training loop for the field network.
//!
//! Every step draws a large batch of real embeddings (the attraction
//! targets), perturbs a small sub-batch of them into the augmented halfspace
//! with uniformly sampled exponents, and regresses the network onto the
//! normalized target field.

use std::io;

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::loss::{field_loss, field_target};
use super::model::FieldNetwork;
use super::perturb::forward_pz;
use super::with_z_column;
use crate::config::FieldTrainConfig;
use crate::features::FeatureSplit;
use crate::logging::log_training_epoch;
use crate::nn::optimizer::AdamOptimizer;

#[derive(Debug, Clone)]
pub struct FieldTrainingResult {
    /// Average loss per epoch.
    pub epoch_losses: Vec<f32>,
}

impl FieldTrainingResult {
    pub fn final_loss(&self) -> Option<f32> {
        self.epoch_losses.last().copied()
    }
}

fn gather_rows(data: &Array2<f32>, indices: &[usize]) -> Array2<f32> {
    let mut rows = Array2::zeros((indices.len(), data.ncols()));
    for (out, &idx) in indices.iter().enumerate() {
        rows.row_mut(out).assign(&data.index_axis(Axis(0), idx));
    }
    rows
}

/// Train the field network on exported embeddings, running every configured
/// epoch to completion and logging one JSONL record per epoch.
pub fn train_field(
    model: &mut FieldNetwork,
    split: &FeatureSplit,
    config: &FieldTrainConfig,
) -> io::Result<FieldTrainingResult> {
    assert_eq!(
        split.feat_dim(),
        model.feat_dim(),
        "feature width must match the field network"
    );

    let mut opt = AdamOptimizer::new(config.learning_rate, 0.0);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut indices: Vec<usize> = (0..split.len()).collect();
    let mut epoch_losses = Vec::with_capacity(config.epochs);

    for epoch in 0..config.epochs {
        indices.shuffle(&mut rng);

        let mut loss_sum = 0.0f32;
        let mut batches = 0usize;

        for chunk in indices.chunks(config.large_batch) {
            let real_features = gather_rows(&split.data, chunk);
            let real = with_z_column(real_features.view(), 0.0);

            // The perturbed sub-batch is a prefix of the (shuffled) chunk.
            let small = chunk.len().min(config.small_batch);
            let small_features = gather_rows(&split.data, &chunk[..small]);

            let m = Array1::from_shape_fn(small, |_| rng.gen::<f32>() * config.m_max);
            let perturbed = forward_pz(&small_features, &m, config.tau, config.sigma, &mut rng);

            let target = field_target(&perturbed, &real, config.gamma);
            let pred = model.forward(&perturbed, true);
            let (loss, grad) = field_loss(&pred, &target);

            let _ = model.backward(&grad);
            opt.begin_step();
            model.apply_gradients(&mut opt);

            loss_sum += loss;
            batches += 1;
        }

        let avg_loss = loss_sum / batches.max(1) as f32;
        log_training_epoch("field", epoch, avg_loss, None, config.learning_rate)?;
        epoch_losses.push(avg_loss);
    }

    Ok(FieldTrainingResult { epoch_losses })
}
