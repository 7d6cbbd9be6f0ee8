//! The extractor network and its supervised training head.
//!
//! Topology: five convolutional blocks (3×3 conv, batch norm, ReLU, with max
//! pooling after blocks 1, 2 and 5), two fully-connected blocks, and a biased
//! projection whose output is L2-normalized onto the unit sphere. Block widths
//! come from [`ExtractorConfig`] so tests can run a narrow variant.

use ndarray::{Array1, Array2, Array4};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::checkpoint::{CheckpointError, Checkpointable};
use crate::config::ExtractorConfig;
use crate::nn::layers::{
    BatchNorm1d, BatchNorm2d, Conv2d, Dense, L2Norm, MaxPool2d, Relu2, Relu4,
};
use crate::nn::loss::{accuracy, cross_entropy_loss};
use crate::nn::optimizer::{AdamOptimizer, AdamOptimizerState};

/// Number of addressable blocks in the truncated forward pass: five conv
/// blocks, fc6, fc7, and the normalized projection.
pub const NUM_BLOCKS: usize = 8;

const POOLED_BLOCKS: [bool; 5] = [true, true, false, false, true];

/// Output of a truncated forward pass; convolutional blocks yield feature
/// maps, fully-connected blocks yield feature vectors.
pub enum BlockOutput {
    Maps(Array4<f32>),
    Features(Array2<f32>),
}

/// Convolution, batch norm, ReLU, and optional max pooling.
#[derive(Serialize, Deserialize)]
struct ConvBlock {
    conv: Conv2d,
    norm: BatchNorm2d,
    #[serde(skip)]
    relu: Relu4,
    pool: Option<MaxPool2d>,
    #[serde(skip)]
    norm_grads: Option<(Array1<f32>, Array1<f32>)>,
}

impl ConvBlock {
    fn new(in_channels: usize, out_channels: usize, pooled: bool, rng: &mut StdRng) -> Self {
        Self {
            conv: Conv2d::new(in_channels, out_channels, 3, 1, rng),
            norm: BatchNorm2d::new(out_channels),
            relu: Relu4::new(),
            pool: pooled.then(|| MaxPool2d::new(3, 2)),
            norm_grads: None,
        }
    }

    fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array4<f32> {
        let x = self.conv.forward(x, train);
        let x = self.norm.forward(&x, train);
        let x = self.relu.forward(&x, train);
        match &mut self.pool {
            Some(pool) => pool.forward(&x, train),
            None => x,
        }
    }

    fn backward(&mut self, grad_out: &Array4<f32>) -> Array4<f32> {
        let grad = match &mut self.pool {
            Some(pool) => pool.backward(grad_out),
            None => grad_out.clone(),
        };
        let grad = self.relu.backward(&grad);
        let (grad, grad_gamma, grad_beta) = self.norm.backward(&grad);
        self.norm_grads = Some((grad_gamma, grad_beta));
        self.conv.backward(&grad)
    }

    fn apply_gradients(&mut self, opt: &mut AdamOptimizer, prefix: &str) {
        self.conv.apply_gradients(opt, &format!("{prefix}.conv"));
        if let Some((grad_gamma, grad_beta)) = self.norm_grads.take() {
            self.norm
                .apply_gradients(opt, &format!("{prefix}.norm"), &grad_gamma, &grad_beta);
        }
    }
}

/// Unbiased linear layer, batch norm, ReLU.
#[derive(Serialize, Deserialize)]
struct FcBlock {
    linear: Dense,
    norm: BatchNorm1d,
    #[serde(skip)]
    relu: Relu2,
    #[serde(skip)]
    norm_grads: Option<(Array1<f32>, Array1<f32>)>,
}

impl FcBlock {
    fn new(in_features: usize, out_features: usize, rng: &mut StdRng) -> Self {
        Self {
            linear: Dense::new(in_features, out_features, false, rng),
            norm: BatchNorm1d::new(out_features),
            relu: Relu2::new(),
            norm_grads: None,
        }
    }

    fn forward(&mut self, x: &Array2<f32>, train: bool) -> Array2<f32> {
        let x = self.linear.forward(x, train);
        let x = self.norm.forward(&x, train);
        self.relu.forward(&x, train)
    }

    fn backward(&mut self, grad_out: &Array2<f32>) -> Array2<f32> {
        let grad = self.relu.backward(grad_out);
        let (grad, grad_gamma, grad_beta) = self.norm.backward(&grad);
        self.norm_grads = Some((grad_gamma, grad_beta));
        self.linear.backward(&grad)
    }

    fn apply_gradients(&mut self, opt: &mut AdamOptimizer, prefix: &str) {
        self.linear.apply_gradients(opt, &format!("{prefix}.linear"));
        if let Some((grad_gamma, grad_beta)) = self.norm_grads.take() {
            self.norm
                .apply_gradients(opt, &format!("{prefix}.norm"), &grad_gamma, &grad_beta);
        }
    }
}

/// The embedding network. `forward` produces unit-norm rows of width
/// `feat_dim`; `forward_until` exposes intermediate block outputs, with
/// negative indices counting back from the final block.
#[derive(Serialize, Deserialize)]
pub struct SmallConvNet {
    config: ExtractorConfig,
    blocks: Vec<ConvBlock>,
    fc6: FcBlock,
    fc7: FcBlock,
    proj: Dense,
    #[serde(skip)]
    l2: L2Norm,
    /// Flattened width of the final feature maps.
    flat_dim: usize,
    /// Spatial size of the final feature maps, needed to un-flatten gradients.
    final_hw: (usize, usize),
}

impl SmallConvNet {
    /// Build a freshly initialized network for `image_hw`-sized inputs.
    pub fn new(config: &ExtractorConfig, image_hw: (usize, usize)) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut blocks = Vec::with_capacity(5);
        let mut in_channels = config.in_channels;
        let (mut height, mut width) = image_hw;
        for (i, &out_channels) in config.conv_channels.iter().enumerate() {
            let pooled = POOLED_BLOCKS[i];
            blocks.push(ConvBlock::new(in_channels, out_channels, pooled, &mut rng));
            in_channels = out_channels;
            if pooled {
                height = (height - 3) / 2 + 1;
                width = (width - 3) / 2 + 1;
            }
        }

        let flat_dim = config.conv_channels[4] * height * width;
        let fc6 = FcBlock::new(flat_dim, config.fc_dim, &mut rng);
        let fc7 = FcBlock::new(config.fc_dim, config.fc_dim, &mut rng);
        let proj = Dense::new(config.fc_dim, config.feat_dim, true, &mut rng);

        Self {
            config: config.clone(),
            blocks,
            fc6,
            fc7,
            proj,
            l2: L2Norm::new(),
            flat_dim,
            final_hw: (height, width),
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn feat_dim(&self) -> usize {
        self.config.feat_dim
    }

    /// Run the network up to and including block `index` (negative indices
    /// count from the end, so `-1` is the full normalized embedding).
    pub fn forward_until(&mut self, x: &Array4<f32>, index: isize, train: bool) -> BlockOutput {
        let index = if index < 0 {
            index + NUM_BLOCKS as isize
        } else {
            index
        };
        assert!(
            (0..NUM_BLOCKS as isize).contains(&index),
            "block index out of range"
        );
        let stop = index as usize;

        let mut maps = x.clone();
        for (i, block) in self.blocks.iter_mut().enumerate() {
            maps = block.forward(&maps, train);
            if stop == i {
                return BlockOutput::Maps(maps);
            }
        }

        let batch = maps.dim().0;
        let flat = maps
            .into_shape((batch, self.flat_dim))
            .expect("contiguous feature maps");

        let features = self.fc6.forward(&flat, train);
        if stop == 5 {
            return BlockOutput::Features(features);
        }
        let features = self.fc7.forward(&features, train);
        if stop == 6 {
            return BlockOutput::Features(features);
        }
        let projected = self.proj.forward(&features, train);
        BlockOutput::Features(self.l2.forward(&projected, train))
    }

    /// Full forward pass to the unit-norm embedding.
    pub fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array2<f32> {
        match self.forward_until(x, -1, train) {
            BlockOutput::Features(features) => features,
            BlockOutput::Maps(_) => unreachable!("final block is fully connected"),
        }
    }

    /// Backward pass matching a full training-mode `forward`.
    pub fn backward(&mut self, grad_out: &Array2<f32>) -> Array4<f32> {
        let grad = self.l2.backward(grad_out);
        let grad = self.proj.backward(&grad);
        let grad = self.fc7.backward(&grad);
        let grad = self.fc6.backward(&grad);

        let batch = grad.dim().0;
        let (height, width) = self.final_hw;
        let mut grad = grad
            .into_shape((batch, self.config.conv_channels[4], height, width))
            .expect("contiguous feature gradients");

        for block in self.blocks.iter_mut().rev() {
            grad = block.backward(&grad);
        }
        grad
    }

    pub fn apply_gradients(&mut self, opt: &mut AdamOptimizer) {
        for (i, block) in self.blocks.iter_mut().enumerate() {
            block.apply_gradients(opt, &format!("conv{}", i + 1));
        }
        self.fc6.apply_gradients(opt, "fc6");
        self.fc7.apply_gradients(opt, "fc7");
        self.proj.apply_gradients(opt, "proj");
    }
}

/// The extractor network plus its linear classification head; the head is
/// used only during supervised training and evaluation, never for export.
pub struct SupervisedExtractor {
    pub net: SmallConvNet,
    pub head: Dense,
}

const EXTRACTOR_SNAPSHOT_VERSION: u32 = 1;

/// Borrowed view used when writing; field order must match
/// [`ExtractorSnapshot`] for the two to be binary compatible.
#[derive(Serialize)]
struct ExtractorSnapshotRef<'a> {
    version: u32,
    net: &'a SmallConvNet,
    head: &'a Dense,
    optimizer: Option<AdamOptimizerState>,
}

#[derive(Deserialize)]
struct ExtractorSnapshot {
    version: u32,
    net: SmallConvNet,
    head: Dense,
    optimizer: Option<AdamOptimizerState>,
}

impl SupervisedExtractor {
    pub fn new(config: &ExtractorConfig, num_classes: usize, image_hw: (usize, usize)) -> Self {
        let net = SmallConvNet::new(config, image_hw);
        // Offset seed so the head does not share initial weights with proj.
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
        let head = Dense::new(config.feat_dim, num_classes, true, &mut rng);
        Self { net, head }
    }

    /// One optimization step over a mini-batch; returns (loss, accuracy).
    pub fn train_step(
        &mut self,
        images: &Array4<f32>,
        labels: &[usize],
        opt: &mut AdamOptimizer,
    ) -> (f32, f32) {
        let embeddings = self.net.forward(images, true);
        let logits = self.head.forward(&embeddings, true);

        let (loss, grad_logits) = cross_entropy_loss(&logits, labels);
        let batch_accuracy = accuracy(&logits, labels);

        let grad_embeddings = self.head.backward(&grad_logits);
        let _ = self.net.backward(&grad_embeddings);

        opt.begin_step();
        self.head.apply_gradients(opt, "head");
        self.net.apply_gradients(opt);

        (loss, batch_accuracy)
    }

    /// Class logits in evaluation mode (running batch-norm statistics).
    pub fn predict(&mut self, images: &Array4<f32>) -> Array2<f32> {
        let embeddings = self.net.forward(images, false);
        self.head.forward(&embeddings, false)
    }

    /// Save including the optimizer's moment estimates so training can resume.
    pub fn save_with_optimizer<P: AsRef<Path>>(
        &self,
        opt: &AdamOptimizer,
        path: P,
    ) -> Result<(), CheckpointError> {
        let snapshot = ExtractorSnapshotRef {
            version: EXTRACTOR_SNAPSHOT_VERSION,
            net: &self.net,
            head: &self.head,
            optimizer: Some(opt.to_state()),
        };
        Self::write_snapshot(&snapshot, path)
    }

    /// Load a snapshot plus any stored optimizer state.
    pub fn load_with_optimizer<P: AsRef<Path>>(
        path: P,
    ) -> Result<(Self, Option<AdamOptimizerState>), CheckpointError> {
        let snapshot: ExtractorSnapshot = Self::read_snapshot(path)?;
        Self::from_snapshot(snapshot)
    }

    fn from_snapshot(
        snapshot: ExtractorSnapshot,
    ) -> Result<(Self, Option<AdamOptimizerState>), CheckpointError> {
        if snapshot.version != EXTRACTOR_SNAPSHOT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: EXTRACTOR_SNAPSHOT_VERSION,
                found: snapshot.version,
            });
        }
        if snapshot.net.proj.out_features() != snapshot.net.config.feat_dim {
            return Err(CheckpointError::InvalidFormat(format!(
                "projection width {} disagrees with feat_dim {}",
                snapshot.net.proj.out_features(),
                snapshot.net.config.feat_dim
            )));
        }
        if snapshot.head.in_features() != snapshot.net.config.feat_dim {
            return Err(CheckpointError::InvalidFormat(format!(
                "head input width {} disagrees with feat_dim {}",
                snapshot.head.in_features(),
                snapshot.net.config.feat_dim
            )));
        }

        Ok((
            Self {
                net: snapshot.net,
                head: snapshot.head,
            },
            snapshot.optimizer,
        ))
    }
}

impl Checkpointable for SupervisedExtractor {
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let snapshot = ExtractorSnapshotRef {
            version: EXTRACTOR_SNAPSHOT_VERSION,
            net: &self.net,
            head: &self.head,
            optimizer: None,
        };
        Self::write_snapshot(&snapshot, path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let snapshot: ExtractorSnapshot = Self::read_snapshot(path)?;
        Self::from_snapshot(snapshot).map(|(extractor, _)| extractor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Axis;

    fn narrow_config() -> ExtractorConfig {
        ExtractorConfig {
            in_channels: 3,
            conv_channels: [4, 4, 4, 4, 4],
            fc_dim: 8,
            feat_dim: 6,
            seed: 7,
        }
    }

    fn test_batch(batch: usize) -> Array4<f32> {
        Array4::from_shape_fn((batch, 3, 16, 16), |(b, c, y, x)| {
            ((b + 1) * (c + 1)) as f32 * 0.01 * ((y * 16 + x) as f32 * 0.003 - 0.3)
        })
    }

    #[test]
    fn forward_produces_unit_norm_embeddings() {
        let mut net = SmallConvNet::new(&narrow_config(), (16, 16));
        let embeddings = net.forward(&test_batch(3), false);
        assert_eq!(embeddings.dim(), (3, 6));
        for row in embeddings.axis_iter(Axis(0)) {
            let norm = row.iter().map(|&v| v * v).sum::<f32>().sqrt();
            assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn negative_index_matches_positive() {
        let config = narrow_config();
        let x = test_batch(2);
        let mut a = SmallConvNet::new(&config, (16, 16));
        let mut b = SmallConvNet::new(&config, (16, 16));

        let from_neg = match a.forward_until(&x, -1, false) {
            BlockOutput::Features(f) => f,
            BlockOutput::Maps(_) => panic!("expected features"),
        };
        let from_pos = match b.forward_until(&x, 7, false) {
            BlockOutput::Features(f) => f,
            BlockOutput::Maps(_) => panic!("expected features"),
        };
        assert_eq!(from_neg, from_pos);
    }

    #[test]
    fn truncated_forward_exposes_feature_maps() {
        let mut net = SmallConvNet::new(&narrow_config(), (16, 16));
        let x = test_batch(2);

        // 16 → pool → 7 after block 1, → 3 after block 2, → 1 after block 5.
        match net.forward_until(&x, 0, false) {
            BlockOutput::Maps(maps) => assert_eq!(maps.dim(), (2, 4, 7, 7)),
            BlockOutput::Features(_) => panic!("expected maps"),
        }
        match net.forward_until(&x, 4, false) {
            BlockOutput::Maps(maps) => assert_eq!(maps.dim(), (2, 4, 1, 1)),
            BlockOutput::Features(_) => panic!("expected maps"),
        }
        match net.forward_until(&x, 5, false) {
            BlockOutput::Features(f) => assert_eq!(f.dim(), (2, 8)),
            BlockOutput::Maps(_) => panic!("expected features"),
        }
    }

    #[test]
    fn training_steps_reduce_loss() {
        let config = narrow_config();
        let mut extractor = SupervisedExtractor::new(&config, 10, (16, 16));
        let mut opt = AdamOptimizer::new(1e-2, 0.0);

        let images = test_batch(4);
        let labels = vec![0usize, 1, 2, 3];

        let (first_loss, _) = extractor.train_step(&images, &labels, &mut opt);
        let mut last_loss = first_loss;
        for _ in 0..20 {
            let (loss, _) = extractor.train_step(&images, &labels, &mut opt);
            last_loss = loss;
        }
        assert!(last_loss < first_loss);
    }

    #[test]
    fn checkpoint_roundtrip_preserves_predictions() {
        let config = narrow_config();
        let mut extractor = SupervisedExtractor::new(&config, 10, (16, 16));
        let images = test_batch(2);
        let before = extractor.predict(&images);

        let dir = std::env::temp_dir().join(format!("extractor-{}", uuid::Uuid::new_v4()));
        let path = dir.join("extractor.bin");
        extractor.save_checkpoint(&path).unwrap();

        let mut restored = SupervisedExtractor::load_checkpoint(&path).unwrap();
        let after = restored.predict(&images);
        assert_eq!(before, after);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
