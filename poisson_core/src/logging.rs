use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

fn log_dir() -> io::Result<()> {
    fs::create_dir_all("logs")
}

fn append_json_line<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, value)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    file.write_all(b"\n")
}

fn timestamp_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Debug, Serialize)]
pub struct EpochLogEntry {
    pub stage: String,
    pub epoch: usize,
    pub avg_loss: f32,
    /// Classification accuracy; absent for stages without labels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f32>,
    pub learning_rate: f32,
    pub timestamp_ms: u128,
}

/// Append one per-epoch training record to `logs/run.jsonl`.
pub fn log_training_epoch(
    stage: &str,
    epoch: usize,
    avg_loss: f32,
    accuracy: Option<f32>,
    learning_rate: f32,
) -> io::Result<()> {
    log_dir()?;
    let entry = EpochLogEntry {
        stage: stage.to_string(),
        epoch,
        avg_loss,
        accuracy,
        learning_rate,
        timestamp_ms: timestamp_ms(),
    };
    append_json_line("logs/run.jsonl", &entry)
}

#[derive(Debug, Serialize)]
pub struct ProbeLogEntry {
    pub stage: String,
    pub train_accuracy: f32,
    pub test_accuracy: f32,
    pub timestamp_ms: u128,
}

/// Append a linear-probe evaluation record to `logs/eval.jsonl`.
pub fn log_probe_result(stage: &str, train_accuracy: f32, test_accuracy: f32) -> io::Result<()> {
    log_dir()?;
    let entry = ProbeLogEntry {
        stage: stage.to_string(),
        train_accuracy,
        test_accuracy,
        timestamp_ms: timestamp_ms(),
    };
    append_json_line("logs/eval.jsonl", &entry)
}
