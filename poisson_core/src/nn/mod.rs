//! Shared neural-network building blocks: layers with explicit forward and
//! backward passes, the Adam optimizer, and classification losses. Used by
//! both the convolutional feature extractor and the field network.

pub mod layers;
pub mod loss;
pub mod optimizer;

pub use layers::{BatchNorm1d, BatchNorm2d, Conv2d, Dense, L2Norm, MaxPool2d, Relu};
pub use loss::{accuracy, cross_entropy_loss, softmax_rows};
pub use optimizer::{AdamOptimizer, AdamOptimizerState};
