//! Supervised training and evaluation for the feature extractor.

use std::io;

use ndarray::Array4;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::network::SupervisedExtractor;
use crate::config::{DataConfig, ExtractorTrainConfig};
use crate::data::{augment_sample, ImageDataset};
use crate::logging::log_training_epoch;
use crate::nn::loss::accuracy;
use crate::nn::optimizer::AdamOptimizer;

/// Averaged statistics for one training epoch.
#[derive(Debug, Clone)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub avg_loss: f32,
    pub accuracy: f32,
}

#[derive(Debug, Clone)]
pub struct TrainingResult {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingResult {
    pub fn final_loss(&self) -> Option<f32> {
        self.epochs.last().map(|m| m.avg_loss)
    }
}

/// Stack the samples at `indices` into a batch, applying crop/flip
/// augmentation to each image.
fn collect_augmented_batch(
    dataset: &ImageDataset,
    indices: &[usize],
    padding: usize,
    rng: &mut StdRng,
) -> (Array4<f32>, Vec<usize>) {
    let (channels, height, width) = dataset.image_shape();
    let mut batch = Array4::zeros((indices.len(), channels, height, width));
    let mut labels = Vec::with_capacity(indices.len());

    for (row, &idx) in indices.iter().enumerate() {
        let sample = &dataset.samples[idx];
        let augmented = augment_sample(&sample.pixels, padding, rng);
        batch
            .index_axis_mut(ndarray::Axis(0), row)
            .assign(&augmented);
        labels.push(sample.label);
    }

    (batch, labels)
}

/// Train the extractor with cross-entropy on its classification head.
///
/// Shuffles per epoch, augments every training image, and appends one JSONL
/// record per epoch to the run log.
pub fn train_extractor(
    extractor: &mut SupervisedExtractor,
    dataset: &ImageDataset,
    data_config: &DataConfig,
    config: &ExtractorTrainConfig,
) -> io::Result<TrainingResult> {
    let mut opt = AdamOptimizer::new(config.learning_rate, 0.0);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut indices: Vec<usize> = (0..dataset.len()).collect();
    let mut epochs = Vec::with_capacity(config.epochs);

    for epoch in 0..config.epochs {
        indices.shuffle(&mut rng);

        let mut loss_sum = 0.0f32;
        let mut accuracy_sum = 0.0f32;
        let mut batches = 0usize;

        for chunk in indices.chunks(config.batch_size) {
            let (images, labels) =
                collect_augmented_batch(dataset, chunk, data_config.augment_padding, &mut rng);
            let (loss, batch_accuracy) = extractor.train_step(&images, &labels, &mut opt);
            loss_sum += loss;
            accuracy_sum += batch_accuracy;
            batches += 1;
        }

        let metrics = EpochMetrics {
            epoch,
            avg_loss: loss_sum / batches.max(1) as f32,
            accuracy: accuracy_sum / batches.max(1) as f32,
        };
        log_training_epoch(
            "extractor",
            epoch,
            metrics.avg_loss,
            Some(metrics.accuracy),
            config.learning_rate,
        )?;
        epochs.push(metrics);
    }

    Ok(TrainingResult { epochs })
}

/// Classification accuracy of the trained head over a full split, in
/// evaluation mode.
pub fn evaluate_classifier(
    extractor: &mut SupervisedExtractor,
    dataset: &ImageDataset,
    batch_size: usize,
) -> f32 {
    let indices: Vec<usize> = (0..dataset.len()).collect();
    let mut weighted_sum = 0.0f32;

    for chunk in indices.chunks(batch_size) {
        let (images, labels) = dataset.collect_batch(chunk);
        let logits = extractor.predict(&images);
        weighted_sum += accuracy(&logits, &labels) * chunk.len() as f32;
    }

    weighted_sum / dataset.len().max(1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::data::{generate_synthetic_dataset, SyntheticConfig};

    fn tiny_setup() -> (SupervisedExtractor, ImageDataset) {
        let dataset = generate_synthetic_dataset(&SyntheticConfig {
            image_size: (16, 16),
            samples_per_class: 2,
            ..Default::default()
        });
        let config = ExtractorConfig {
            conv_channels: [4, 4, 4, 4, 4],
            fc_dim: 8,
            feat_dim: 6,
            ..Default::default()
        };
        let extractor = SupervisedExtractor::new(&config, dataset.num_classes, (16, 16));
        (extractor, dataset)
    }

    #[test]
    fn records_one_metric_per_epoch() {
        let (mut extractor, dataset) = tiny_setup();
        let train_config = ExtractorTrainConfig {
            batch_size: 10,
            epochs: 2,
            learning_rate: 1e-3,
            seed: 3,
        };
        let result = train_extractor(
            &mut extractor,
            &dataset,
            &DataConfig::default(),
            &train_config,
        )
        .unwrap();

        assert_eq!(result.epochs.len(), 2);
        assert!(result.final_loss().unwrap().is_finite());
    }

    #[test]
    fn evaluation_accuracy_is_a_fraction() {
        let (mut extractor, dataset) = tiny_setup();
        let value = evaluate_classifier(&mut extractor, &dataset, 8);
        assert!((0.0..=1.0).contains(&value));
    }
}
