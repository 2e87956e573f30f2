use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use daq_scan_core::storage::metadata::metadata_path;
use daq_scan_core::{
    CsvFileSink, DaqDriver, LiveSampleFeed, RecordingLength, ScanConfig, ScanError, ScanPoller, ScanSettings,
};

use crate::recorder_state::{DiagnosticsInfo, RecordingFinishedPayload, RecorderState};

/// Frames per channel kept for the live view.
const LIVE_WINDOW_POINTS: usize = 500;

/// Recording settings read from a JSON file, before command-line overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingConfig {
    #[serde(flatten)]
    pub settings: ScanSettings,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            settings: ScanSettings::new(ScanConfig::new(0, 3, 1000)),
            output: None,
        }
    }
}

impl RecordingConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        serde_json::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e))
    }
}

/// Info about a saved recording.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInfo {
    pub file_path: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub created_at: String,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub product_id: u32,
    pub name: String,
    pub unique_id: String,
}

pub fn recordings_dir() -> PathBuf {
    let dir = dirs_next::document_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("DAQ Recordings");
    fs::create_dir_all(&dir).ok();
    dir
}

fn default_output(dir: &Path) -> PathBuf {
    dir.join(format!("scan-{}.csv", chrono::Local::now().format("%Y%m%d-%H%M%S")))
}

pub fn list_devices(state: &RecorderState) -> Result<Vec<DeviceInfo>, String> {
    let devices = state.daq.inventory().map_err(|e| e.to_string())?;
    Ok(devices
        .into_iter()
        .map(|d| DeviceInfo {
            product_id: d.product_id,
            name: d.product_name,
            unique_id: d.unique_id,
        })
        .collect())
}

/// Acquire the board if needed, attach the file sink and live feed, start
/// the scan and its poller. Returns the output path.
pub fn start_recording(state: &RecorderState, config: &RecordingConfig) -> Result<PathBuf, String> {
    if state.session.handle().is_none() {
        state.session.acquire().map_err(|e| e.to_string())?;
    }

    let output = config
        .output
        .clone()
        .unwrap_or_else(|| default_output(&recordings_dir()));
    // the board may run fewer channels than requested; size the sinks for
    // the stream it will actually produce
    let settings = &state
        .controller
        .resolve_settings(&config.settings)
        .map_err(|e| e.to_string())?;
    state.delegate.take_finished();

    let sink = CsvFileSink::create(&output, &settings.scan).map_err(|e| e.to_string())?;
    let feed = LiveSampleFeed::for_scan(&settings.scan, LIVE_WINDOW_POINTS);
    state.controller.add_consumer(Box::new(sink));
    state.controller.add_consumer(Box::new(feed.clone()));

    // A dead sink means the recording is lost; end the scan with it.
    let controller = Arc::downgrade(&state.controller);
    state.controller.on_sink_error(Arc::new(move |e: &ScanError| {
        log::error!("file sink failed, stopping scan: {}", e);
        if let Some(controller) = controller.upgrade() {
            controller.stop_scan();
        }
    }));

    let geometry = state.controller.start_scan(settings).map_err(|e| e.to_string())?;
    if let RecordingLength::Buffers(n) = settings.length {
        log::info!(
            "bounded recording: {} buffers of {} samples",
            n,
            geometry.buffer_length()
        );
    }

    let poller = ScanPoller::spawn(Arc::clone(&state.controller), settings.poll_interval()).map_err(|e| {
        state.controller.stop_scan();
        e.to_string()
    })?;
    *state.poller.lock() = Some(poller);
    *state.feed.lock() = Some(feed);
    Ok(output)
}

/// Whether the scan is still being polled.
pub fn is_recording(state: &RecorderState) -> bool {
    state.poller.lock().as_ref().is_some_and(|p| p.is_running())
}

pub fn stop_recording(state: &RecorderState) -> Result<Option<RecordingFinishedPayload>, String> {
    // stopping acknowledges a failure, so read it first
    let failure = state.controller.state().error().map(|e| e.to_string());
    state.controller.stop_scan();
    if let Some(poller) = state.poller.lock().take() {
        poller.stop();
    }
    *state.feed.lock() = None;

    if let Some(message) = failure {
        return Err(message);
    }
    Ok(state.delegate.take_finished())
}

pub fn get_recordings(dir: &Path) -> Result<Vec<RecordingInfo>, String> {
    let mut recordings = Vec::new();

    let entries = fs::read_dir(dir).map_err(|e| e.to_string())?;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if !name.ends_with(".csv") {
            continue;
        }

        let meta = fs::metadata(&path).map_err(|e| e.to_string())?;
        let created = meta
            .modified()
            .ok()
            .map(|t| {
                let dt: chrono::DateTime<chrono::Utc> = t.into();
                dt.to_rfc3339()
            })
            .unwrap_or_default();

        recordings.push(RecordingInfo {
            file_path: path.to_string_lossy().to_string(),
            file_name: name,
            size_bytes: meta.len(),
            created_at: created,
        });
    }

    // Sort newest first
    recordings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(recordings)
}

pub fn delete_recording(dir: &Path, path: &Path) -> Result<(), String> {
    let target = fs::canonicalize(path).map_err(|e| e.to_string())?;
    let allowed_dir = fs::canonicalize(dir).map_err(|e| e.to_string())?;

    if !target.starts_with(&allowed_dir) {
        return Err("Path is outside the recordings directory".into());
    }

    fs::remove_file(&target).map_err(|e| e.to_string())?;
    let _ = fs::remove_file(metadata_path(&target));
    Ok(())
}

pub fn get_diagnostics(state: &RecorderState) -> DiagnosticsInfo {
    DiagnosticsInfo::new(&state.controller.state(), state.controller.diagnostics())
}
