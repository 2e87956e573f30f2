use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::{ScanConfig, VoltageRange};

/// Result returned when a file sink is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub duration_secs: f64,
    pub samples_written: u64,
    pub metadata: RecordingMetadata,
    pub checksum: String,
}

/// Metadata stored alongside a recording as a JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub file_path: String,
    pub created_at: String,
    pub channels: Vec<String>,
    pub rate_hz: u32,
    pub range: VoltageRange,
    pub frames_written: u64,
    pub duration_secs: f64,
    pub checksum: String,
}

impl RecordingMetadata {
    pub fn for_scan(scan: &ScanConfig, file_path: &str, samples_written: u64, checksum: &str) -> Self {
        let frames_written = samples_written / scan.channel_count() as u64;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_path: file_path.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            channels: scan.channel_labels(),
            rate_hz: scan.rate_hz,
            range: scan.range,
            frames_written,
            duration_secs: frames_written as f64 / scan.rate_hz as f64,
            checksum: checksum.to_string(),
        }
    }
}
