//! Exported embedding artifacts.
//!
//! After supervised training the extractor is run once over both splits in
//! evaluation mode (no augmentation) and the unit-norm embeddings are stored
//! together with their labels as one versioned binary artifact. The field
//! stage consumes this artifact and never touches raw pixels again.

use std::path::Path;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointError, Checkpointable};
use crate::data::ImageDataset;
use crate::extractor::SmallConvNet;

const FEATURE_ARTIFACT_VERSION: u32 = 1;

/// Embeddings and labels for one dataset split, row-aligned.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeatureSplit {
    /// `[rows, feat_dim]`
    pub data: Array2<f32>,
    pub labels: Vec<u32>,
}

impl FeatureSplit {
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    pub fn feat_dim(&self) -> usize {
        self.data.ncols()
    }
}

/// Train and test embeddings produced by one extractor.
#[derive(Clone, Debug)]
pub struct FeatureArtifact {
    pub feat_dim: usize,
    pub train: FeatureSplit,
    pub test: FeatureSplit,
}

#[derive(Serialize)]
struct ArtifactSnapshotRef<'a> {
    version: u32,
    feat_dim: usize,
    train: &'a FeatureSplit,
    test: &'a FeatureSplit,
}

#[derive(Deserialize)]
struct ArtifactSnapshot {
    version: u32,
    feat_dim: usize,
    train: FeatureSplit,
    test: FeatureSplit,
}

impl Checkpointable for FeatureArtifact {
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let snapshot = ArtifactSnapshotRef {
            version: FEATURE_ARTIFACT_VERSION,
            feat_dim: self.feat_dim,
            train: &self.train,
            test: &self.test,
        };
        Self::write_snapshot(&snapshot, path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let snapshot: ArtifactSnapshot = Self::read_snapshot(path)?;
        if snapshot.version != FEATURE_ARTIFACT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: FEATURE_ARTIFACT_VERSION,
                found: snapshot.version,
            });
        }
        for (name, split) in [("train", &snapshot.train), ("test", &snapshot.test)] {
            if split.feat_dim() != snapshot.feat_dim {
                return Err(CheckpointError::InvalidFormat(format!(
                    "{name} split is {}-dimensional, artifact says {}",
                    split.feat_dim(),
                    snapshot.feat_dim
                )));
            }
            if split.labels.len() != split.len() {
                return Err(CheckpointError::InvalidFormat(format!(
                    "{name} split has {} rows but {} labels",
                    split.len(),
                    split.labels.len()
                )));
            }
        }

        Ok(Self {
            feat_dim: snapshot.feat_dim,
            train: snapshot.train,
            test: snapshot.test,
        })
    }
}

fn export_split(net: &mut SmallConvNet, dataset: &ImageDataset, batch_size: usize) -> FeatureSplit {
    let mut data = Array2::zeros((dataset.len(), net.feat_dim()));
    let mut labels = Vec::with_capacity(dataset.len());

    let indices: Vec<usize> = (0..dataset.len()).collect();
    let mut row = 0;
    for chunk in indices.chunks(batch_size) {
        let (images, chunk_labels) = dataset.collect_batch(chunk);
        let embeddings = net.forward(&images, false);
        for embedding in embeddings.axis_iter(Axis(0)) {
            data.row_mut(row).assign(&embedding);
            row += 1;
        }
        labels.extend(chunk_labels.into_iter().map(|l| l as u32));
    }

    FeatureSplit { data, labels }
}

/// Run the extractor over both splits in evaluation mode.
pub fn export_features(
    net: &mut SmallConvNet,
    train: &ImageDataset,
    test: &ImageDataset,
    batch_size: usize,
) -> FeatureArtifact {
    FeatureArtifact {
        feat_dim: net.feat_dim(),
        train: export_split(net, train, batch_size),
        test: export_split(net, test, batch_size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::data::{generate_synthetic_dataset, SyntheticConfig};
    use approx::assert_abs_diff_eq;

    fn tiny_net() -> SmallConvNet {
        SmallConvNet::new(
            &ExtractorConfig {
                conv_channels: [4, 4, 4, 4, 4],
                fc_dim: 8,
                feat_dim: 6,
                ..Default::default()
            },
            (16, 16),
        )
    }

    fn tiny_split(seed: u64) -> ImageDataset {
        generate_synthetic_dataset(&SyntheticConfig {
            image_size: (16, 16),
            samples_per_class: 2,
            seed,
            ..Default::default()
        })
    }

    #[test]
    fn exported_rows_align_with_labels() {
        let mut net = tiny_net();
        let train = tiny_split(1);
        let test = tiny_split(2);

        let artifact = export_features(&mut net, &train, &test, 7);
        assert_eq!(artifact.feat_dim, 6);
        assert_eq!(artifact.train.len(), train.len());
        assert_eq!(artifact.test.len(), test.len());
        assert_eq!(artifact.train.labels.len(), train.len());

        for (row, sample) in artifact.train.labels.iter().zip(train.samples.iter()) {
            assert_eq!(*row as usize, sample.label);
        }
    }

    #[test]
    fn exported_embeddings_have_unit_norm() {
        let mut net = tiny_net();
        let train = tiny_split(1);
        let test = tiny_split(2);
        let artifact = export_features(&mut net, &train, &test, 8);

        for row in artifact.train.data.axis_iter(Axis(0)) {
            let norm = row.iter().map(|&v| v * v).sum::<f32>().sqrt();
            assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn artifact_roundtrips_through_disk() {
        let mut net = tiny_net();
        let train = tiny_split(1);
        let test = tiny_split(2);
        let artifact = export_features(&mut net, &train, &test, 8);

        let dir = std::env::temp_dir().join(format!("features-{}", uuid::Uuid::new_v4()));
        let path = dir.join("features.bin");
        artifact.save_checkpoint(&path).unwrap();

        let restored = FeatureArtifact::load_checkpoint(&path).unwrap();
        assert_eq!(restored.feat_dim, artifact.feat_dim);
        assert_eq!(restored.train.data, artifact.train.data);
        assert_eq!(restored.test.labels, artifact.test.labels);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load_rejects_mismatched_dimension() {
        let train = FeatureSplit {
            data: Array2::zeros((4, 6)),
            labels: vec![0; 4],
        };
        let artifact = FeatureArtifact {
            feat_dim: 5,
            train: train.clone(),
            test: train,
        };

        let dir = std::env::temp_dir().join(format!("features-{}", uuid::Uuid::new_v4()));
        let path = dir.join("bad.bin");
        artifact.save_checkpoint(&path).unwrap();

        let err = FeatureArtifact::load_checkpoint(&path).unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidFormat(_)));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
