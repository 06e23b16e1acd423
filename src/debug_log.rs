//! Per-sample debug capture for evaluation runs.
//!
//! Every sample that yields a parsed prediction becomes one JSON line. Writes
//! happen on a background thread so the evaluation loop never blocks on disk.

use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::extract::JsonObject;

#[derive(Debug, Clone, Serialize)]
pub struct DebugRecord {
    pub timestamp_ms: i64,
    /// 1-based line in `metadata.jsonl`.
    pub line: usize,
    pub file_name: String,
    pub provider: String,
    pub model: String,
    pub ground_truth: String,
    pub predicted: String,
    pub correct: bool,
    pub latency_ms: u64,
    /// Extraction strategy that produced the parsed object.
    pub strategy: String,
    pub raw_response: String,
    /// Task-specific extras (e.g. detector color and position).
    pub extras: JsonObject,
}

#[derive(Debug, thiserror::Error)]
pub enum DebugSinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("debug channel closed")]
    Closed,
    #[error("debug worker failed: {0}")]
    Join(String),
}

pub trait DebugSink: Send + Sync {
    fn record(&self, record: DebugRecord) -> Result<(), DebugSinkError>;
}

#[derive(Clone)]
pub struct JsonlDebugSink {
    sender: mpsc::Sender<DebugRecord>,
}

pub struct DebugWorker {
    handle: Option<std::thread::JoinHandle<Result<usize, DebugSinkError>>>,
}

impl DebugWorker {
    /// Wait for the writer to drain. Returns the number of lines written.
    ///
    /// Every [`JsonlDebugSink`] clone must be dropped first, otherwise this
    /// blocks forever.
    pub fn join(mut self) -> Result<usize, DebugSinkError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(DebugSinkError::Join("debug worker panicked".to_string())),
            },
            None => Ok(0),
        }
    }
}

impl JsonlDebugSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, DebugWorker), DebugSinkError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<DebugRecord>();
        let handle = std::thread::spawn(move || write_debug_loop(file, receiver));
        Ok((
            Self { sender },
            DebugWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl DebugSink for JsonlDebugSink {
    fn record(&self, record: DebugRecord) -> Result<(), DebugSinkError> {
        self.sender.send(record).map_err(|_| DebugSinkError::Closed)
    }
}

fn write_debug_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<DebugRecord>,
) -> Result<usize, DebugSinkError> {
    let mut writer = BufWriter::new(file);
    let mut written = 0;
    for record in receiver {
        let line =
            serde_json::to_string(&record).map_err(|e| DebugSinkError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// `<out_dir>/debug_<task>_<unix_seconds>.jsonl`
pub fn debug_file_path(out_dir: &Path, task_slug: &str, unix_seconds: i64) -> PathBuf {
    out_dir.join(format!("debug_{task_slug}_{unix_seconds}.jsonl"))
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_file_name() {
        let p = debug_file_path(Path::new("/tmp/out"), "co_detector", 1_700_000_000);
        assert_eq!(p, PathBuf::from("/tmp/out/debug_co_detector_1700000000.jsonl"));
    }
}
