use crate::models::error::ScanError;
use crate::models::recording_result::RecordingResult;
use crate::models::state::ScanState;

/// Event delegate for scan controller notifications.
///
/// Methods are called from whichever thread drove the transition (usually
/// the poller thread) after the controller released its internal lock, so
/// an implementation may call `stop_scan` from inside a callback.
/// Implementations should marshal to a UI thread if needed.
pub trait ScanDelegate: Send + Sync {
    /// Called when the controller state changes.
    fn on_state_changed(&self, state: &ScanState);

    /// Called after each chunk was handed to the consumers.
    fn on_chunk(&self, _sequence: u64, _consumed: u64) {}

    /// Called for conditions that end a scan without being an error,
    /// e.g. a continuous scan stopping on its own.
    fn on_notice(&self, notice: &ScanError);

    /// Called when a scan fails or a consumer is detached.
    fn on_error(&self, error: &ScanError);

    /// Called when a file sink finalized its recording.
    fn on_recording_finished(&self, _result: &RecordingResult) {}
}
