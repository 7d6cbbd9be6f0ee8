//! Reader for the CIFAR-10 binary directory layout.
//!
//! Each batch file holds consecutive records of one label byte followed by
//! 3072 pixel bytes (channel-major 32×32 RGB). The directory carries five
//! training batches plus one test batch, so the train/test partitioning is
//! built into the format.

use std::fs;
use std::path::Path;

use ndarray::Array3;

use super::{DataError, ImageDataset, ImageSample, NUM_CLASSES};

const IMAGE_CHANNELS: usize = 3;
const IMAGE_HEIGHT: usize = 32;
const IMAGE_WIDTH: usize = 32;
const PIXEL_BYTES: usize = IMAGE_CHANNELS * IMAGE_HEIGHT * IMAGE_WIDTH;
const RECORD_BYTES: usize = 1 + PIXEL_BYTES;

const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILE: &str = "test_batch.bin";

/// Load the train and test splits from a CIFAR-10 binary directory.
pub fn load_cifar10_dir<P: AsRef<Path>>(root: P) -> Result<(ImageDataset, ImageDataset), DataError> {
    let root = root.as_ref();

    let mut train_samples = Vec::new();
    for name in TRAIN_FILES {
        train_samples.extend(load_batch_file(&root.join(name))?);
    }
    let test_samples = load_batch_file(&root.join(TEST_FILE))?;

    Ok((
        ImageDataset::new(train_samples, NUM_CLASSES),
        ImageDataset::new(test_samples, NUM_CLASSES),
    ))
}

fn load_batch_file(path: &Path) -> Result<Vec<ImageSample>, DataError> {
    let bytes = fs::read(path)?;

    if bytes.is_empty() || bytes.len() % RECORD_BYTES != 0 {
        return Err(DataError::Malformed(format!(
            "{}: size {} is not a multiple of the {}-byte record",
            path.display(),
            bytes.len(),
            RECORD_BYTES
        )));
    }

    let mut samples = Vec::with_capacity(bytes.len() / RECORD_BYTES);
    for record in bytes.chunks_exact(RECORD_BYTES) {
        let label = record[0] as usize;
        if label >= NUM_CLASSES {
            return Err(DataError::Malformed(format!(
                "{}: label {} out of range",
                path.display(),
                label
            )));
        }

        let mut pixels = Array3::zeros((IMAGE_CHANNELS, IMAGE_HEIGHT, IMAGE_WIDTH));
        {
            let flat = pixels.as_slice_mut().expect("freshly allocated array");
            for (dst, &src) in flat.iter_mut().zip(&record[1..]) {
                *dst = src as f32 / 255.0;
            }
        }

        samples.push(ImageSample { pixels, label });
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_batch(dir: &Path, name: &str, records: &[(u8, u8)]) {
        // Each record: (label, fill byte for every pixel).
        let mut bytes = Vec::new();
        for &(label, fill) in records {
            bytes.push(label);
            bytes.extend(std::iter::repeat(fill).take(PIXEL_BYTES));
        }
        fs::write(dir.join(name), bytes).unwrap();
    }

    fn temp_dir() -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("cifar_reader_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn loads_well_formed_directory() {
        let dir = temp_dir();
        for name in TRAIN_FILES {
            write_batch(&dir, name, &[(0, 0), (9, 255)]);
        }
        write_batch(&dir, TEST_FILE, &[(3, 128)]);

        let (train, test) = load_cifar10_dir(&dir).unwrap();
        fs::remove_dir_all(&dir).ok();

        assert_eq!(train.len(), 10);
        assert_eq!(test.len(), 1);
        assert_eq!(train.image_shape(), (3, 32, 32));
        assert_eq!(test.samples[0].label, 3);
        let pixel = test.samples[0].pixels[[0, 0, 0]];
        assert!((pixel - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_truncated_file() {
        let dir = temp_dir();
        for name in TRAIN_FILES {
            write_batch(&dir, name, &[(0, 0)]);
        }
        fs::write(dir.join(TEST_FILE), vec![0u8; RECORD_BYTES - 1]).unwrap();

        let result = load_cifar10_dir(&dir);
        fs::remove_dir_all(&dir).ok();

        assert!(matches!(result, Err(DataError::Malformed(_))));
    }

    #[test]
    fn rejects_out_of_range_label() {
        let dir = temp_dir();
        for name in TRAIN_FILES {
            write_batch(&dir, name, &[(0, 0)]);
        }
        write_batch(&dir, TEST_FILE, &[(10, 0)]);

        let result = load_cifar10_dir(&dir);
        fs::remove_dir_all(&dir).ok();

        assert!(matches!(result, Err(DataError::Malformed(_))));
    }
}
