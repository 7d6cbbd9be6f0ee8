//! Poisson-field representation pipeline.
//!
//! The crate implements a complete small-scale pipeline for learning a
//! generative vector field over image embeddings:
//!
//! 1. **Extractor** — a compact AlexNet-style CNN is trained with
//!    cross-entropy on a 10-class image benchmark and produces unit-norm
//!    embeddings ([`extractor`]).
//! 2. **Export** — both dataset splits are embedded once and persisted as a
//!    versioned binary artifact ([`features`]).
//! 3. **Field** — an MLP is regressed onto the normalized attraction field of
//!    the embedding cloud, viewed from an augmented halfspace with one extra
//!    coordinate ([`field`]).
//! 4. **Flow** — embeddings are advanced along the learned field with an
//!    explicit Euler integrator, and both the raw and the flowed
//!    representations are scored with a linear probe ([`eval`]).
//!
//! Every stage takes an explicit configuration struct ([`config`]), appends
//! JSONL training records ([`logging`]), and persists its result through the
//! versioned [`checkpoint`] codec.

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod eval;
pub mod extractor;
pub mod features;
pub mod field;
pub mod logging;
pub mod nn;

pub use checkpoint::{CheckpointError, Checkpointable};
pub use config::{ConfigError, PipelineConfig};
pub use data::{DataError, ImageDataset, ImageSample, NUM_CLASSES};
pub use eval::{probe_representation, LinearProbe, ProbeReport};
pub use extractor::{SmallConvNet, SupervisedExtractor};
pub use features::{export_features, FeatureArtifact, FeatureSplit};
pub use field::{integrate_split, train_field, FieldNetwork};
