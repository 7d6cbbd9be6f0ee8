//! Linear-probe evaluation: fit a softmax regression on frozen
//! representations and report classification accuracy.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::config::ProbeConfig;
use crate::nn::layers::INIT_STD;
use crate::nn::loss::{accuracy, cross_entropy_loss, softmax_rows};

/// Multinomial logistic regression trained with full-batch gradient descent
/// and an L2 penalty on the weights. The representation is never updated.
pub struct LinearProbe {
    /// `[classes, dim]`
    weight: Array2<f32>,
    bias: Array1<f32>,
}

/// Accuracy of one fitted probe on its train and test representations.
#[derive(Debug, Clone, Copy)]
pub struct ProbeReport {
    pub train_accuracy: f32,
    pub test_accuracy: f32,
}

impl LinearProbe {
    /// Fit a probe on `[rows, dim]` representations with integer labels.
    pub fn fit(
        data: &Array2<f32>,
        labels: &[u32],
        num_classes: usize,
        config: &ProbeConfig,
    ) -> Self {
        assert_eq!(data.nrows(), labels.len(), "one label per row");

        let mut rng = StdRng::seed_from_u64(config.seed);
        let dist = Normal::new(0.0f32, INIT_STD).expect("valid normal parameters");
        let mut weight =
            Array2::from_shape_fn((num_classes, data.ncols()), |_| dist.sample(&mut rng));
        let mut bias = Array1::<f32>::zeros(num_classes);

        let label_indices: Vec<usize> = labels.iter().map(|&l| l as usize).collect();

        for _ in 0..config.epochs {
            let logits = data.dot(&weight.t()) + &bias;
            let (_, grad_logits) = cross_entropy_loss(&logits, &label_indices);

            let grad_weight = grad_logits.t().dot(data) + &(config.l2 * &weight);
            let grad_bias = grad_logits.sum_axis(Axis(0));

            weight.zip_mut_with(&grad_weight, |w, &g| *w -= config.learning_rate * g);
            bias.zip_mut_with(&grad_bias, |b, &g| *b -= config.learning_rate * g);
        }

        Self { weight, bias }
    }

    pub fn predict(&self, data: &Array2<f32>) -> Array2<f32> {
        data.dot(&self.weight.t()) + &self.bias
    }

    /// Per-class probabilities.
    pub fn predict_proba(&self, data: &Array2<f32>) -> Array2<f32> {
        softmax_rows(self.predict(data).view())
    }

    pub fn score(&self, data: &Array2<f32>, labels: &[u32]) -> f32 {
        let label_indices: Vec<usize> = labels.iter().map(|&l| l as usize).collect();
        accuracy(&self.predict(data), &label_indices)
    }
}

/// Fit a probe on the train representation and score both splits.
pub fn probe_representation(
    train_data: &Array2<f32>,
    train_labels: &[u32],
    test_data: &Array2<f32>,
    test_labels: &[u32],
    num_classes: usize,
    config: &ProbeConfig,
) -> ProbeReport {
    let probe = LinearProbe::fit(train_data, train_labels, num_classes, config);
    ProbeReport {
        train_accuracy: probe.score(train_data, train_labels),
        test_accuracy: probe.score(test_data, test_labels),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    /// Three well-separated Gaussian blobs in 4 dimensions.
    fn blob_data(rows_per_class: usize, seed: u64) -> (Array2<f32>, Vec<u32>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let centers = [
            [2.0f32, 0.0, 0.0, 0.0],
            [0.0, 2.0, 0.0, 0.0],
            [0.0, 0.0, 2.0, 0.0],
        ];

        let rows = rows_per_class * centers.len();
        let mut data = Array2::zeros((rows, 4));
        let mut labels = Vec::with_capacity(rows);
        for (class, center) in centers.iter().enumerate() {
            for i in 0..rows_per_class {
                let row = class * rows_per_class + i;
                for j in 0..4 {
                    data[[row, j]] = center[j] + rng.gen::<f32>() * 0.2 - 0.1;
                }
                labels.push(class as u32);
            }
        }
        (data, labels)
    }

    #[test]
    fn probe_separates_linear_blobs() {
        let (train_data, train_labels) = blob_data(20, 1);
        let (test_data, test_labels) = blob_data(10, 2);

        let config = ProbeConfig {
            epochs: 300,
            learning_rate: 0.1,
            l2: 1e-4,
            seed: 0,
        };
        let report = probe_representation(
            &train_data,
            &train_labels,
            &test_data,
            &test_labels,
            3,
            &config,
        );

        assert!(report.train_accuracy > 0.95);
        assert!(report.test_accuracy > 0.95);
    }

    #[test]
    fn probabilities_are_normalized() {
        let (data, labels) = blob_data(5, 3);
        let probe = LinearProbe::fit(&data, &labels, 3, &ProbeConfig::default());
        let probs = probe.predict_proba(&data);
        for row in probs.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    #[should_panic(expected = "one label per row")]
    fn fit_rejects_misaligned_labels() {
        let data = Array2::<f32>::zeros((4, 2));
        let labels = vec![0u32; 3];
        let _ = LinearProbe::fit(&data, &labels, 2, &ProbeConfig::default());
    }
}
