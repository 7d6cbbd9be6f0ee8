//! The field network: a plain MLP over the augmented space.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::checkpoint::{CheckpointError, Checkpointable};
use crate::config::FieldConfig;
use crate::nn::layers::{Dense, Relu2};
use crate::nn::optimizer::AdamOptimizer;

#[derive(Serialize, Deserialize)]
struct HiddenLayer {
    linear: Dense,
    #[serde(skip)]
    relu: Relu2,
}

/// Maps augmented points `[rows, feat_dim + 1]` to field vectors of the same
/// width. Hidden layers keep the width constant.
#[derive(Serialize, Deserialize)]
pub struct FieldNetwork {
    config: FieldConfig,
    feat_dim: usize,
    hidden: Vec<HiddenLayer>,
    output: Dense,
}

const FIELD_SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct FieldSnapshotRef<'a> {
    version: u32,
    network: &'a FieldNetwork,
}

#[derive(Deserialize)]
struct FieldSnapshot {
    version: u32,
    network: FieldNetwork,
}

impl FieldNetwork {
    pub fn new(config: &FieldConfig, feat_dim: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let dim = feat_dim + 1;

        let hidden = (0..config.hidden_layers)
            .map(|_| HiddenLayer {
                linear: Dense::new(dim, dim, true, &mut rng),
                relu: Relu2::new(),
            })
            .collect();
        let output = Dense::new(dim, dim, true, &mut rng);

        Self {
            config: config.clone(),
            feat_dim,
            hidden,
            output,
        }
    }

    pub fn feat_dim(&self) -> usize {
        self.feat_dim
    }

    /// Width of the augmented space the network operates in.
    pub fn dim(&self) -> usize {
        self.feat_dim + 1
    }

    pub fn forward(&mut self, x: &Array2<f32>, train: bool) -> Array2<f32> {
        let mut h = x.clone();
        for layer in &mut self.hidden {
            h = layer.linear.forward(&h, train);
            h = layer.relu.forward(&h, train);
        }
        self.output.forward(&h, train)
    }

    pub fn backward(&mut self, grad_out: &Array2<f32>) -> Array2<f32> {
        let mut grad = self.output.backward(grad_out);
        for layer in self.hidden.iter_mut().rev() {
            grad = layer.relu.backward(&grad);
            grad = layer.linear.backward(&grad);
        }
        grad
    }

    pub fn apply_gradients(&mut self, opt: &mut AdamOptimizer) {
        for (i, layer) in self.hidden.iter_mut().enumerate() {
            layer.linear.apply_gradients(opt, &format!("hidden{i}"));
        }
        self.output.apply_gradients(opt, "output");
    }

    /// Zero every parameter; used by tests that need a degenerate field.
    #[cfg(test)]
    pub(crate) fn zero_parameters(&mut self) {
        for layer in &mut self.hidden {
            layer.linear.weight.fill(0.0);
            if let Some(bias) = &mut layer.linear.bias {
                bias.fill(0.0);
            }
        }
        self.output.weight.fill(0.0);
        if let Some(bias) = &mut self.output.bias {
            bias.fill(0.0);
        }
    }
}

impl Checkpointable for FieldNetwork {
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let snapshot = FieldSnapshotRef {
            version: FIELD_SNAPSHOT_VERSION,
            network: self,
        };
        Self::write_snapshot(&snapshot, path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let snapshot: FieldSnapshot = Self::read_snapshot(path)?;
        if snapshot.version != FIELD_SNAPSHOT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: FIELD_SNAPSHOT_VERSION,
                found: snapshot.version,
            });
        }

        let network = snapshot.network;
        if network.output.out_features() != network.feat_dim + 1 {
            return Err(CheckpointError::InvalidFormat(format!(
                "output width {} disagrees with augmented dimension {}",
                network.output.out_features(),
                network.feat_dim + 1
            )));
        }
        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> FieldConfig {
        FieldConfig {
            hidden_layers: 2,
            seed: 9,
        }
    }

    #[test]
    fn forward_keeps_augmented_width() {
        let mut net = FieldNetwork::new(&small_config(), 4);
        assert_eq!(net.dim(), 5);
        let x = Array2::from_shape_fn((3, 5), |(i, j)| (i + j) as f32 * 0.1);
        let y = net.forward(&x, false);
        assert_eq!(y.dim(), (3, 5));
    }

    #[test]
    fn backward_returns_input_shaped_gradient() {
        let mut net = FieldNetwork::new(&small_config(), 4);
        let x = Array2::from_shape_fn((2, 5), |(i, j)| (i as f32 - j as f32) * 0.2);
        let _ = net.forward(&x, true);
        let grad = net.backward(&Array2::ones((2, 5)));
        assert_eq!(grad.dim(), (2, 5));
    }

    #[test]
    fn checkpoint_roundtrip_preserves_outputs() {
        let mut net = FieldNetwork::new(&small_config(), 4);
        let x = Array2::from_shape_fn((2, 5), |(i, j)| (i * 5 + j) as f32 * 0.05);
        let before = net.forward(&x, false);

        let dir = std::env::temp_dir().join(format!("field-{}", uuid::Uuid::new_v4()));
        let path = dir.join("field.bin");
        net.save_checkpoint(&path).unwrap();

        let mut restored = FieldNetwork::load_checkpoint(&path).unwrap();
        assert_eq!(restored.forward(&x, false), before);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
