use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::models::error::ScanError;
use crate::models::recording_result::RecordingMetadata;

/// Sidecar path for a recording: `run.csv` → `run.metadata.json`.
pub fn metadata_path(recording_path: &Path) -> PathBuf {
    recording_path.with_extension("metadata.json")
}

/// Write the JSON sidecar next to `recording_path`.
pub fn write_metadata(metadata: &RecordingMetadata, recording_path: &Path) -> Result<(), ScanError> {
    let path = metadata_path(recording_path);
    let write_error = |e: &dyn std::fmt::Display| ScanError::WriteError(format!("{}: {}", path.display(), e));

    let file = File::create(&path).map_err(|e| write_error(&e))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, metadata).map_err(|e| write_error(&e))?;
    out.flush().map_err(|e| write_error(&e))
}

/// Load the sidecar of `recording_path`.
pub fn read_metadata(recording_path: &Path) -> Result<RecordingMetadata, ScanError> {
    let path = metadata_path(recording_path);
    let unreadable = |reason: String| ScanError::MetadataUnreadable {
        path: path.display().to_string(),
        reason,
    };

    let file = File::open(&path).map_err(|e| unreadable(e.to_string()))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| unreadable(e.to_string()))
}
