//! Versioned binary persistence for model parameters and feature artifacts.
//!
//! Both parameter sets (extractor plus head, and the field network) and the
//! exported feature artifact implement [`Checkpointable`]. Each snapshot
//! carries a version header so incompatible files are rejected at load time
//! instead of producing silently wrong tensors.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bincode::Options;

/// Errors raised while persisting or restoring a snapshot.
#[derive(Debug)]
pub enum CheckpointError {
    /// The snapshot file could not be read or written.
    Io(std::io::Error),
    /// The binary codec rejected the payload.
    Serialization(bincode::Error),
    /// The header decoded but names an incompatible schema version.
    VersionMismatch { expected: u32, found: u32 },
    /// The payload decoded but is internally inconsistent, e.g. a tensor
    /// whose width disagrees with the stored configuration.
    InvalidFormat(String),
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Io(err) => write!(f, "snapshot I/O failed: {err}"),
            CheckpointError::Serialization(err) => {
                write!(f, "snapshot payload could not be (de)serialized: {err}")
            }
            CheckpointError::VersionMismatch { expected, found } => write!(
                f,
                "snapshot schema version {found} is not the supported version {expected}",
            ),
            CheckpointError::InvalidFormat(msg) => {
                write!(f, "snapshot contents are inconsistent: {msg}")
            }
        }
    }
}

impl std::error::Error for CheckpointError {}

impl From<std::io::Error> for CheckpointError {
    fn from(err: std::io::Error) -> Self {
        CheckpointError::Io(err)
    }
}

impl From<bincode::Error> for CheckpointError {
    fn from(err: bincode::Error) -> Self {
        CheckpointError::Serialization(err)
    }
}

/// Codec shared by every snapshot: fixed-width integers, little-endian, so
/// files are byte-stable across runs and platforms.
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_little_endian()
}

/// Implemented by every pipeline artifact that persists to disk. Implementors
/// serialize through a versioned snapshot struct and validate shapes against
/// the stored configuration on load.
pub trait Checkpointable: Sized {
    /// Write the current state to `path`.
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError>;

    /// Read a previously saved state from `path`.
    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError>;

    /// Serialize `snapshot` to `path` with the shared codec, creating parent
    /// directories as needed.
    fn write_snapshot<P, T>(snapshot: &T, path: P) -> Result<(), CheckpointError>
    where
        P: AsRef<Path>,
        T: serde::Serialize,
    {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        codec().serialize_into(&mut writer, snapshot)?;
        writer.flush()?;
        Ok(())
    }

    /// Deserialize a snapshot from `path` with the shared codec.
    fn read_snapshot<P, T>(path: P) -> Result<T, CheckpointError>
    where
        P: AsRef<Path>,
        T: serde::de::DeserializeOwned,
    {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Ok(codec().deserialize_from(&mut reader)?)
    }
}
