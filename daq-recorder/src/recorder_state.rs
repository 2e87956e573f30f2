use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use daq_scan_core::{
    DeviceSession, DeviceSessionConfig, LiveSampleFeed, RecordingResult, ScanController, ScanDelegate,
    ScanDiagnostics, ScanError, ScanPoller, ScanState,
};
use daq_scan_sim::SimulatedDaq;

pub type Controller = ScanController<SimulatedDaq>;

/// Everything the recorder holds while a board is acquired.
pub struct RecorderState {
    pub daq: Arc<SimulatedDaq>,
    pub session: Arc<DeviceSession<SimulatedDaq>>,
    pub controller: Arc<Controller>,
    pub poller: Mutex<Option<ScanPoller>>,
    pub feed: Mutex<Option<LiveSampleFeed>>,
    pub delegate: Arc<JsonLineDelegate>,
}

impl RecorderState {
    pub fn new(daq: Arc<SimulatedDaq>, config: DeviceSessionConfig, echo_events: bool) -> Self {
        let session = Arc::new(DeviceSession::new(Arc::clone(&daq), config));
        let controller = Arc::new(ScanController::new(Arc::clone(&session)));
        let delegate = JsonLineDelegate::new(echo_events);
        controller.set_delegate(delegate.clone());
        Self {
            daq,
            controller,
            session,
            poller: Mutex::new(None),
            feed: Mutex::new(None),
            delegate,
        }
    }
}

/// ScanDelegate that prints events as JSON lines on stdout, one object per
/// line, for whatever front end is reading the recorder's output.
///
/// Also keeps the last finished recording, since a bounded recording ends
/// on the poller thread before anyone calls stop.
pub struct JsonLineDelegate {
    echo: bool,
    finished: Mutex<Option<RecordingFinishedPayload>>,
}

impl JsonLineDelegate {
    pub fn new(echo: bool) -> Arc<Self> {
        Arc::new(Self {
            echo,
            finished: Mutex::new(None),
        })
    }

    pub fn take_finished(&self) -> Option<RecordingFinishedPayload> {
        self.finished.lock().take()
    }

    fn emit<T: Serialize>(&self, event: &str, payload: T) {
        if !self.echo {
            return;
        }
        let line = Event { event, payload };
        match serde_json::to_string(&line) {
            Ok(json) => println!("{}", json),
            Err(e) => log::warn!("failed to serialize {} event: {}", event, e),
        }
    }
}

// -- Event payloads --

#[derive(Serialize)]
struct Event<'a, T> {
    event: &'a str,
    payload: T,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StateChangedPayload {
    state: String,
    samples_consumed: u64,
}

#[derive(Clone, Serialize)]
struct MessagePayload {
    message: String,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingFinishedPayload {
    pub file_path: String,
    pub samples_written: u64,
    pub frames_written: u64,
    pub duration_secs: f64,
    pub checksum: String,
}

impl From<&RecordingResult> for RecordingFinishedPayload {
    fn from(result: &RecordingResult) -> Self {
        Self {
            file_path: result.file_path.to_string_lossy().to_string(),
            samples_written: result.samples_written,
            frames_written: result.metadata.frames_written,
            duration_secs: result.duration_secs,
            checksum: result.checksum.clone(),
        }
    }
}

impl ScanDelegate for JsonLineDelegate {
    fn on_state_changed(&self, state: &ScanState) {
        let samples_consumed = match state {
            ScanState::Running { consumed } => *consumed,
            _ => 0,
        };
        self.emit(
            "scan://state-changed",
            StateChangedPayload {
                state: state.name().to_string(),
                samples_consumed,
            },
        );
    }

    fn on_notice(&self, notice: &ScanError) {
        self.emit(
            "scan://notice",
            MessagePayload {
                message: notice.to_string(),
            },
        );
    }

    fn on_error(&self, error: &ScanError) {
        self.emit(
            "scan://error",
            MessagePayload {
                message: error.to_string(),
            },
        );
    }

    fn on_recording_finished(&self, result: &RecordingResult) {
        let payload = RecordingFinishedPayload::from(result);
        *self.finished.lock() = Some(payload.clone());
        self.emit("scan://recording-finished", payload);
    }
}

// -- Helpers to convert core types to serializable ones --

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsInfo {
    pub state: String,
    pub polls: u64,
    pub idle_polls: u64,
    pub chunks_extracted: u64,
    pub samples_consumed: u64,
    pub max_backlog: u64,
    pub consumer_failures: u64,
    pub error: Option<String>,
}

impl DiagnosticsInfo {
    pub fn new(state: &ScanState, d: ScanDiagnostics) -> Self {
        Self {
            state: state.name().to_string(),
            polls: d.polls,
            idle_polls: d.idle_polls,
            chunks_extracted: d.chunks_extracted,
            samples_consumed: d.samples_consumed,
            max_backlog: d.max_backlog,
            consumer_failures: d.consumer_failures,
            error: state.error().map(|e| e.to_string()),
        }
    }
}
