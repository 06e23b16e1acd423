//! Labeled dataset loading from `metadata.jsonl`.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::warn;

use crate::tasks::EvalTask;

pub const METADATA_FILE: &str = "metadata.jsonl";

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("metadata file not found: {}", .0.display())]
    MissingMetadata(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample<L> {
    /// 1-based line number in `metadata.jsonl`.
    pub line: usize,
    /// Image path relative to the dataset root, e.g. `images/frame_0012.jpg`.
    pub file_name: String,
    pub ground_truth: L,
}

impl<L> Sample<L> {
    pub fn image_path(&self, root: &Path) -> PathBuf {
        root.join(&self.file_name)
    }
}

/// Metadata line that could not be turned into a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Dataset<L> {
    pub root: PathBuf,
    pub samples: Vec<Sample<L>>,
    pub skipped: Vec<SkippedRow>,
}

impl<L> Dataset<L> {
    /// Non-blank metadata lines.
    pub fn rows(&self) -> usize {
        self.samples.len() + self.skipped.len()
    }
}

/// Load `<root>/metadata.jsonl` for `task`.
///
/// Lines that are not JSON objects, lack `file_name`, or lack a valid label are
/// skipped with a warning; they never abort the load.
pub fn load_dataset<T: EvalTask>(root: &Path, task: &T) -> Result<Dataset<T::Label>, DatasetError> {
    let path = root.join(METADATA_FILE);
    if !path.is_file() {
        return Err(DatasetError::MissingMetadata(path));
    }
    let raw = std::fs::read_to_string(&path).map_err(|source| DatasetError::Io {
        path: path.clone(),
        source,
    })?;

    let mut samples = Vec::new();
    let mut skipped = Vec::new();

    for (idx, line) in raw.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        match parse_row(line, task) {
            Ok((file_name, ground_truth)) => samples.push(Sample {
                line: line_no,
                file_name,
                ground_truth,
            }),
            Err(reason) => {
                warn!(line = line_no, %reason, "skipping metadata row");
                skipped.push(SkippedRow {
                    line: line_no,
                    reason,
                });
            }
        }
    }

    Ok(Dataset {
        root: root.to_path_buf(),
        samples,
        skipped,
    })
}

fn parse_row<T: EvalTask>(line: &str, task: &T) -> Result<(String, T::Label), String> {
    let value: Value = serde_json::from_str(line).map_err(|e| format!("invalid JSON: {e}"))?;
    let row = value
        .as_object()
        .ok_or_else(|| "row is not a JSON object".to_string())?;

    let file_name = row
        .get("file_name")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| "missing 'file_name'".to_string())?;

    let field = task.label_field();
    let raw_label = row
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| format!("missing '{field}'"))?;
    let label = task
        .parse_ground_truth(raw_label)
        .ok_or_else(|| format!("invalid '{field}': {raw_label}"))?;

    Ok((file_name.to_string(), label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{CoDetectorTask, GazeDirection, GazeDirectionTask};

    #[test]
    fn test_load_skips_incomplete_rows() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(METADATA_FILE),
            concat!(
                "{\"file_name\": \"images/a.jpg\", \"has-co-detector\": true}\n",
                "\n",
                "{\"file_name\": \"images/b.jpg\"}\n",
                "{\"has-co-detector\": false}\n",
                "not json\n",
                "{\"file_name\": \"images/c.jpg\", \"has-co-detector\": \"yes\"}\n",
                "{\"file_name\": \"images/d.png\", \"has-co-detector\": false}\n",
            ),
        )
        .unwrap();

        let ds = load_dataset(dir.path(), &CoDetectorTask).unwrap();
        assert_eq!(ds.samples.len(), 2);
        assert_eq!(ds.samples[0].line, 1);
        assert!(ds.samples[0].ground_truth);
        assert_eq!(ds.samples[1].file_name, "images/d.png");
        assert_eq!(ds.samples[1].line, 7);
        assert_eq!(ds.skipped.len(), 4);
        assert_eq!(ds.rows(), 6);
        assert_eq!(ds.skipped[0].reason, "missing 'has-co-detector'");
        assert_eq!(ds.skipped[1].reason, "missing 'file_name'");
        assert_eq!(
            ds.samples[1].image_path(dir.path()),
            dir.path().join("images/d.png")
        );
    }

    #[test]
    fn test_gaze_rows() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(METADATA_FILE),
            "{\"file_name\": \"images/x.jpg\", \"gaze_direction\": \"downstream\"}\n",
        )
        .unwrap();
        let ds = load_dataset(dir.path(), &GazeDirectionTask).unwrap();
        assert_eq!(ds.samples[0].ground_truth, GazeDirection::Downstream);
    }

    #[test]
    fn test_missing_metadata_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_dataset(dir.path(), &CoDetectorTask).unwrap_err();
        assert!(matches!(err, DatasetError::MissingMetadata(_)));
    }
}
