//! Supervised convolutional feature extractor: a compact AlexNet-style
//! network producing L2-normalized embeddings, plus its training loop.

pub mod network;
pub mod training;

pub use network::{BlockOutput, SmallConvNet, SupervisedExtractor, NUM_BLOCKS};
pub use training::{evaluate_classifier, train_extractor, EpochMetrics, TrainingResult};
