//! Labeled image datasets: on-disk loading, augmentation, synthetic generation.

pub mod augment;
pub mod cifar;
pub mod synthetic;

use std::fmt;

use ndarray::{Array3, Array4};

pub use augment::augment_sample;
pub use cifar::load_cifar10_dir;
pub use synthetic::{generate_synthetic_dataset, SyntheticConfig};

/// Number of classes in the supported benchmarks.
pub const NUM_CLASSES: usize = 10;

/// A single labeled image: `[channels, height, width]` pixels in [0, 1].
#[derive(Clone)]
pub struct ImageSample {
    pub pixels: Array3<f32>,
    pub label: usize,
}

/// An in-memory split (train or test) of a labeled image dataset.
pub struct ImageDataset {
    pub samples: Vec<ImageSample>,
    pub num_classes: usize,
}

impl ImageDataset {
    pub fn new(samples: Vec<ImageSample>, num_classes: usize) -> Self {
        Self {
            samples,
            num_classes,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `[channels, height, width]` of the stored images.
    pub fn image_shape(&self) -> (usize, usize, usize) {
        let dim = self.samples[0].pixels.dim();
        (dim.0, dim.1, dim.2)
    }

    /// Number of batches for a given batch size (last batch may be short).
    pub fn num_batches(&self, batch_size: usize) -> usize {
        (self.samples.len() + batch_size - 1) / batch_size
    }

    /// Stack the samples at `indices` into a `[B, C, H, W]` batch plus labels.
    pub fn collect_batch(&self, indices: &[usize]) -> (Array4<f32>, Vec<usize>) {
        let (channels, height, width) = self.image_shape();
        let mut batch = Array4::zeros((indices.len(), channels, height, width));
        let mut labels = Vec::with_capacity(indices.len());

        for (row, &idx) in indices.iter().enumerate() {
            let sample = &self.samples[idx];
            batch.index_axis_mut(ndarray::Axis(0), row).assign(&sample.pixels);
            labels.push(sample.label);
        }

        (batch, labels)
    }
}

/// Errors that can occur while reading a dataset from disk.
#[derive(Debug)]
pub enum DataError {
    Io(std::io::Error),
    /// The file existed but its size or contents do not match the format.
    Malformed(String),
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::Io(err) => write!(f, "I/O error while reading dataset: {err}"),
            DataError::Malformed(msg) => write!(f, "Malformed dataset file: {msg}"),
        }
    }
}

impl std::error::Error for DataError {}

impl From<std::io::Error> for DataError {
    fn from(err: std::io::Error) -> Self {
        DataError::Io(err)
    }
}
