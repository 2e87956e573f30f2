use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::config::{RecordingLength, ScanConfig, ScanSettings};
use crate::models::error::ScanError;
use crate::models::recording_result::RecordingResult;
use crate::models::scan_models::{AnalogInputInfo, DeviceHandle, HardwareStatus, ScanDiagnostics};
use crate::models::state::ScanState;
use crate::processing::scan_buffer::{AcquisitionBuffer, ScanCursor, ScanGeometry};
use crate::session::device_session::DeviceSession;
use crate::traits::chunk_consumer::{Chunk, ChunkConsumer};
use crate::traits::daq_driver::DaqDriver;
use crate::traits::scan_delegate::ScanDelegate;

/// Callback invoked when a chunk consumer fails and is detached.
pub type SinkErrorCallback = Arc<dyn Fn(&ScanError) + Send + Sync + 'static>;

/// What one `poll` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No scan is running; nothing was read.
    NotRunning,
    /// A stop request is pending; the poll did not touch the hardware.
    StopPending,
    /// Fewer than one chunk of unread samples.
    CaughtUp { available: u64 },
    /// One chunk was extracted and delivered.
    Chunk { sequence: u64, available: u64 },
    /// A bounded recording reached its length and was stopped.
    Completed { consumed: u64 },
    /// The hardware ended the scan on its own and it was wound down.
    HardwareEnded { consumed: u64 },
}

/// Notifications collected under the lock, delivered after it is released.
enum ScanEvent {
    State(ScanState),
    Chunk { sequence: u64, consumed: u64 },
    Notice(ScanError),
    Error(ScanError),
    ConsumerFailed(ScanError),
    RecordingFinished(RecordingResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Requested,
    Completed,
    HardwareEnded,
}

/// Everything owned for the duration of one scan.
struct ActiveScan {
    handle: DeviceHandle,
    config: ScanConfig,
    buffer: AcquisitionBuffer,
    cursor: ScanCursor,
    // reused for every chunk; consumers only see a borrow
    staging: Vec<f64>,
    next_sequence: u64,
    target: Option<u64>,
}

impl ActiveScan {
    fn geometry(&self) -> &ScanGeometry {
        self.buffer.geometry()
    }
}

struct ControllerState {
    state: ScanState,
    active: Option<ActiveScan>,
    consumers: Vec<Box<dyn ChunkConsumer>>,
    diagnostics: ScanDiagnostics,
    geometry: Option<ScanGeometry>,
}

/// Continuous scan controller.
///
/// Starts a hardware-clocked background scan into a driver-owned circular
/// buffer and drains it chunk by chunk on every `poll`:
/// ```text
/// [Hardware] → [AcquisitionBuffer] → poll() → [staging chunk] → [ChunkConsumer]*
///                     ↑ cursor (total consumed, mod buffer length)
/// ```
///
/// Only one thread may drive `poll`; `stop_scan` may be called from any
/// thread, including concurrently with a poll or from a delegate callback.
pub struct ScanController<D: DaqDriver> {
    session: Arc<DeviceSession<D>>,
    inner: Mutex<ControllerState>,
    stop_requested: AtomicBool,
    delegate: Mutex<Option<Arc<dyn ScanDelegate>>>,
    sink_error_callback: Mutex<Option<SinkErrorCallback>>,
}

impl<D: DaqDriver> ScanController<D> {
    pub fn new(session: Arc<DeviceSession<D>>) -> Self {
        Self {
            session,
            inner: Mutex::new(ControllerState {
                state: ScanState::Idle,
                active: None,
                consumers: Vec::new(),
                diagnostics: ScanDiagnostics::default(),
                geometry: None,
            }),
            stop_requested: AtomicBool::new(false),
            delegate: Mutex::new(None),
            sink_error_callback: Mutex::new(None),
        }
    }

    pub fn set_delegate(&self, delegate: Arc<dyn ScanDelegate>) {
        *self.delegate.lock() = Some(delegate);
    }

    /// Register a callback for consumer failures, e.g. to stop the scan
    /// when the file sink can no longer write.
    pub fn on_sink_error(&self, callback: SinkErrorCallback) {
        *self.sink_error_callback.lock() = Some(callback);
    }

    /// Attach a consumer. Consumers belong to one scan: they are closed and
    /// detached when it ends.
    pub fn add_consumer(&self, consumer: Box<dyn ChunkConsumer>) {
        log::debug!("consumer attached: {}", consumer.name());
        self.inner.lock().consumers.push(consumer);
    }

    pub fn consumer_count(&self) -> usize {
        self.inner.lock().consumers.len()
    }

    pub fn session(&self) -> &Arc<DeviceSession<D>> {
        &self.session
    }

    pub fn state(&self) -> ScanState {
        self.inner.lock().state.clone()
    }

    pub fn diagnostics(&self) -> ScanDiagnostics {
        self.inner.lock().diagnostics.clone()
    }

    /// Geometry of the current or most recent scan.
    pub fn geometry(&self) -> Option<ScanGeometry> {
        self.inner.lock().geometry
    }

    /// Cursor of the running scan.
    pub fn cursor(&self) -> Option<ScanCursor> {
        self.inner.lock().active.as_ref().map(|a| a.cursor)
    }

    /// Allocate the buffer and start the hardware scan.
    /// Transitions: idle/failed → starting → running.
    ///
    /// On allocation failure the controller returns to idle. If the driver
    /// rejects the start, the buffer is freed, the board is released and the
    /// controller ends in `Failed`.
    ///
    /// Consumers attached for a start that fails are closed and dropped,
    /// unless the failure is that another scan is already running.
    pub fn start_scan(&self, settings: &ScanSettings) -> Result<ScanGeometry, ScanError> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            let result = self.start_locked(&mut inner, settings, &mut events);
            if result.is_err() && inner.active.is_none() {
                Self::close_consumers(&mut inner, &mut events);
            }
            result
        };
        self.dispatch(events);
        result
    }

    /// Settings as the bound board will actually run them: analog input
    /// is required and `high_channel` is clamped to the board's last
    /// channel. Build consumers from these, not from the requested ones.
    pub fn resolve_settings(&self, settings: &ScanSettings) -> Result<ScanSettings, ScanError> {
        self.resolve(settings).map(|(_, _, resolved)| resolved)
    }

    /// One steady-state poll cycle. Extracts at most one chunk.
    pub fn poll(&self) -> Result<PollOutcome, ScanError> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            self.poll_locked(&mut inner, &mut events)
        };
        self.dispatch(events);
        result
    }

    /// Stop the scan, drain what is left, close consumers and free the
    /// buffer. Returns the recordings finalized by this stop.
    ///
    /// Idempotent: stopping an idle controller does nothing; stopping a
    /// failed one acknowledges the failure and returns to idle.
    pub fn stop_scan(&self) -> Vec<RecordingResult> {
        self.stop_requested.store(true, Ordering::SeqCst);
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            match inner.state {
                ScanState::Idle => {}
                ScanState::Failed(_) => {
                    self.set_state(&mut inner, ScanState::Idle, &mut events);
                }
                ScanState::Starting | ScanState::Running { .. } | ScanState::Stopping => {
                    self.wind_down(&mut inner, StopReason::Requested, &mut events);
                }
            }
            self.stop_requested.store(false, Ordering::SeqCst);
        }
        let finished = events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::RecordingFinished(r) => Some(r.clone()),
                _ => None,
            })
            .collect();
        self.dispatch(events);
        finished
    }

    // --- Internal helpers ---

    fn driver(&self) -> &D {
        self.session.driver()
    }

    fn set_state(&self, inner: &mut ControllerState, state: ScanState, events: &mut Vec<ScanEvent>) {
        log::info!("scan state: {} → {}", inner.state.name(), state.name());
        inner.state = state.clone();
        events.push(ScanEvent::State(state));
    }

    fn resolve(&self, settings: &ScanSettings) -> Result<(DeviceHandle, AnalogInputInfo, ScanSettings), ScanError> {
        settings.validate()?;

        let handle = self
            .session
            .handle()
            .ok_or_else(|| ScanError::DeviceUnavailable("no device acquired".into()))?;
        let info = self.session.analog_input_info(handle)?;
        if !info.supports_analog_input {
            return Err(ScanError::DeviceUnavailable(
                "the DAQ device does not support analog input".into(),
            ));
        }

        let mut settings = settings.clone();
        let last_channel = info.num_channels.saturating_sub(1);
        if settings.scan.high_channel > last_channel {
            log::warn!(
                "high channel {} exceeds board's {} channels; clamping to {}",
                settings.scan.high_channel,
                info.num_channels,
                last_channel
            );
            settings.scan.high_channel = last_channel;
            settings.validate()?;
        }
        Ok((handle, info, settings))
    }

    fn start_locked(
        &self,
        inner: &mut ControllerState,
        settings: &ScanSettings,
        events: &mut Vec<ScanEvent>,
    ) -> Result<ScanGeometry, ScanError> {
        if !inner.state.can_start() {
            return Err(ScanError::InvalidState(format!(
                "cannot start a scan while {}",
                inner.state.name()
            )));
        }
        let (handle, info, settings) = self.resolve(settings)?;

        let geometry = ScanGeometry::plan(&settings, info.packet_size)?;
        let buffer_length = geometry.buffer_length();

        self.stop_requested.store(false, Ordering::SeqCst);
        inner.diagnostics = ScanDiagnostics::default();
        inner.geometry = Some(geometry);
        self.set_state(inner, ScanState::Starting, events);

        let buffer_id = match self.driver().alloc_buffer(buffer_length) {
            Ok(id) => id,
            Err(e) => {
                let err = ScanError::AllocationFailed {
                    samples: buffer_length,
                    reason: e.to_string(),
                };
                log::error!("{}", err);
                self.set_state(inner, ScanState::Idle, events);
                return Err(err);
            }
        };

        if let Err(e) = self
            .driver()
            .start_continuous_scan(handle, &settings.scan, buffer_id, buffer_length)
        {
            let err = ScanError::scan_start_rejected(e);
            log::error!("{} ({} channels, {}-sample buffer)", err, geometry.channel_count(), buffer_length);
            self.driver().free_buffer(buffer_id);
            Self::close_consumers(inner, events);
            self.session.release(handle);
            self.set_state(inner, ScanState::Failed(err.clone()), events);
            events.push(ScanEvent::Error(err.clone()));
            return Err(err);
        }

        inner.active = Some(ActiveScan {
            handle,
            config: settings.scan.clone(),
            buffer: AcquisitionBuffer::new(buffer_id, geometry),
            cursor: ScanCursor::new(buffer_length),
            staging: vec![0.0; geometry.chunk_size()],
            next_sequence: 0,
            target: match settings.length {
                RecordingLength::Unbounded => None,
                RecordingLength::Buffers(n) => Some(n as u64 * buffer_length as u64),
            },
        });

        log::info!(
            "scan started: channels {}..={} at {} Hz, {} samples/buffer, {} samples/chunk",
            settings.scan.low_channel,
            settings.scan.high_channel,
            settings.scan.rate_hz,
            buffer_length,
            geometry.chunk_size()
        );
        self.set_state(inner, ScanState::Running { consumed: 0 }, events);
        Ok(geometry)
    }

    fn poll_locked(&self, inner: &mut ControllerState, events: &mut Vec<ScanEvent>) -> Result<PollOutcome, ScanError> {
        if self.stop_requested.load(Ordering::SeqCst) {
            return Ok(PollOutcome::StopPending);
        }
        if !inner.state.is_running() || inner.active.is_none() {
            return Ok(PollOutcome::NotRunning);
        }

        match self.poll_running(inner, events) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.fail(inner, e.clone(), events);
                Err(e)
            }
        }
    }

    fn poll_running(&self, inner: &mut ControllerState, events: &mut Vec<ScanEvent>) -> Result<PollOutcome, ScanError> {
        let (handle, cursor, chunk_size, continuous, target) = match inner.active.as_ref() {
            Some(a) => (a.handle, a.cursor, a.geometry().chunk_size(), a.config.options.continuous, a.target),
            None => return Ok(PollOutcome::NotRunning),
        };
        inner.diagnostics.polls += 1;

        let status = self.driver().query_status(handle).map_err(ScanError::driver_fault)?;
        let available = cursor.available(status.cumulative_sample_count);
        inner.diagnostics.max_backlog = inner.diagnostics.max_backlog.max(available);

        if cursor.is_overrun(status.cumulative_sample_count) {
            return Err(ScanError::BufferOverrun {
                available,
                buffer_length: inner.geometry.map_or(0, |g| g.buffer_length()),
                consumed: cursor.total_consumed(),
                hardware_count: status.cumulative_sample_count,
            });
        }

        let mut outcome = PollOutcome::CaughtUp { available };
        if available >= chunk_size as u64 {
            let sequence = self.extract_and_deliver(inner, chunk_size, events)?;
            outcome = PollOutcome::Chunk { sequence, available };
        } else {
            inner.diagnostics.idle_polls += 1;
        }

        let consumed = inner.active.as_ref().map_or(0, |a| a.cursor.total_consumed());
        inner.state = ScanState::Running { consumed };

        if target.is_some_and(|t| consumed >= t) {
            log::info!("bounded recording complete after {} samples", consumed);
            self.wind_down(inner, StopReason::Completed, events);
            return Ok(PollOutcome::Completed { consumed });
        }

        if status.status == HardwareStatus::Idle {
            if continuous {
                let notice = ScanError::ScanEndedUnexpectedly { consumed };
                log::warn!("{}", notice);
                events.push(ScanEvent::Notice(notice));
            } else {
                log::info!("finite scan finished after {} samples", status.cumulative_sample_count);
            }
            self.wind_down(inner, StopReason::HardwareEnded, events);
            let consumed = inner.diagnostics.samples_consumed;
            return Ok(PollOutcome::HardwareEnded { consumed });
        }

        Ok(outcome)
    }

    /// Copy `count` samples at the cursor into staging, re-check for an
    /// overrun that raced the copy, advance the cursor and hand the chunk to
    /// every consumer. Returns the chunk's sequence number.
    fn extract_and_deliver(
        &self,
        inner: &mut ControllerState,
        count: usize,
        events: &mut Vec<ScanEvent>,
    ) -> Result<u64, ScanError> {
        let ControllerState {
            active,
            consumers,
            diagnostics,
            ..
        } = inner;
        let Some(active) = active.as_mut() else {
            return Err(ScanError::InvalidState("no active scan".into()));
        };
        let driver = self.driver();

        let before = active.cursor;
        let span = before.span(count);
        active
            .buffer
            .copy_span(&span, &mut active.staging[..count], |id, start, out| {
                driver.copy_range(id, start, out)
            })
            .map_err(ScanError::driver_fault)?;
        if span.wraps() {
            diagnostics.wrapped_copies += 1;
        }

        // The hardware kept writing during the copy; if it lapped the
        // cursor, part of what was copied is already overwritten.
        let after = driver.query_status(active.handle).map_err(ScanError::driver_fault)?;
        if before.is_overrun(after.cumulative_sample_count) {
            return Err(ScanError::BufferOverrun {
                available: before.available(after.cumulative_sample_count),
                buffer_length: active.geometry().buffer_length(),
                consumed: before.total_consumed(),
                hardware_count: after.cumulative_sample_count,
            });
        }

        active.cursor.advance(count);
        let sequence = active.next_sequence;
        active.next_sequence += 1;
        diagnostics.chunks_extracted += 1;
        diagnostics.samples_consumed = active.cursor.total_consumed();

        let chunk = Chunk {
            sequence,
            first_sample: before.total_consumed(),
            channel_count: active.geometry().channel_count(),
            low_channel: active.config.low_channel,
            samples: &active.staging[..count],
        };
        log::trace!(
            "chunk {}: {} samples from index {}{}",
            sequence,
            count,
            before.buffer_index(),
            if span.wraps() { " (wrapped)" } else { "" }
        );

        let mut i = 0;
        while i < consumers.len() {
            match consumers[i].accept(&chunk) {
                Ok(()) => i += 1,
                Err(e) => {
                    let mut consumer = consumers.remove(i);
                    log::error!("consumer {} failed and was detached: {}", consumer.name(), e);
                    diagnostics.consumer_failures += 1;
                    events.push(ScanEvent::ConsumerFailed(e));
                    Self::close_consumer(consumer.as_mut(), events);
                }
            }
        }

        events.push(ScanEvent::Chunk {
            sequence,
            consumed: active.cursor.total_consumed(),
        });
        Ok(sequence)
    }

    /// Extract whatever complete frames remain after the hardware stopped.
    fn drain(&self, inner: &mut ControllerState, events: &mut Vec<ScanEvent>) -> Result<(), ScanError> {
        loop {
            let Some(active) = inner.active.as_ref() else {
                return Ok(());
            };
            let status = self.driver().query_status(active.handle).map_err(ScanError::driver_fault)?;
            let cursor = active.cursor;
            if cursor.is_overrun(status.cumulative_sample_count) {
                return Err(ScanError::BufferOverrun {
                    available: cursor.available(status.cumulative_sample_count),
                    buffer_length: active.geometry().buffer_length(),
                    consumed: cursor.total_consumed(),
                    hardware_count: status.cumulative_sample_count,
                });
            }

            let mut remaining = cursor.available(status.cumulative_sample_count);
            if let Some(target) = active.target {
                remaining = remaining.min(target.saturating_sub(cursor.total_consumed()));
            }
            let geometry = active.geometry();
            let channels = geometry.channel_count() as u64;
            let count = (remaining.min(geometry.chunk_size() as u64) / channels * channels) as usize;
            if count == 0 {
                return Ok(());
            }
            self.extract_and_deliver(inner, count, events)?;
        }
    }

    /// Orderly end of a scan: stop hardware, drain, close consumers, free
    /// the buffer, return to idle.
    fn wind_down(&self, inner: &mut ControllerState, reason: StopReason, events: &mut Vec<ScanEvent>) {
        self.set_state(inner, ScanState::Stopping, events);

        if let Some(handle) = inner.active.as_ref().map(|a| a.handle) {
            if let Err(e) = self.driver().stop_scan(handle) {
                log::warn!("hardware stop failed: {}", e);
            }
            if reason != StopReason::Completed {
                if let Err(e) = self.drain(inner, events) {
                    log::error!("final drain abandoned: {}", e);
                    events.push(ScanEvent::Error(e));
                }
            }
        }

        self.release_buffer(inner);
        Self::close_consumers(inner, events);
        self.set_state(inner, ScanState::Idle, events);
    }

    /// Fatal end of a scan: stop hardware immediately, no drain.
    fn fail(&self, inner: &mut ControllerState, error: ScanError, events: &mut Vec<ScanEvent>) {
        log::error!("scan failed: {}", error);
        if let Some(handle) = inner.active.as_ref().map(|a| a.handle) {
            if let Err(e) = self.driver().stop_scan(handle) {
                log::warn!("hardware stop failed: {}", e);
            }
        }
        self.release_buffer(inner);
        Self::close_consumers(inner, events);
        self.set_state(inner, ScanState::Failed(error.clone()), events);
        events.push(ScanEvent::Error(error));
    }

    fn release_buffer(&self, inner: &mut ControllerState) {
        if let Some(active) = inner.active.take() {
            inner.diagnostics.samples_consumed = active.cursor.total_consumed();
            self.driver().free_buffer(active.buffer.id());
            log::debug!(
                "buffer released after {} samples in {} chunks",
                active.cursor.total_consumed(),
                active.next_sequence
            );
        }
    }

    fn close_consumers(inner: &mut ControllerState, events: &mut Vec<ScanEvent>) {
        for mut consumer in inner.consumers.drain(..) {
            Self::close_consumer(consumer.as_mut(), events);
        }
    }

    fn close_consumer(consumer: &mut dyn ChunkConsumer, events: &mut Vec<ScanEvent>) {
        match consumer.close() {
            Ok(Some(result)) => {
                log::info!(
                    "{} finished: {} samples → {}",
                    consumer.name(),
                    result.samples_written,
                    result.file_path.display()
                );
                events.push(ScanEvent::RecordingFinished(result));
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("{} failed to close: {}", consumer.name(), e);
                events.push(ScanEvent::Error(e));
            }
        }
    }

    fn dispatch(&self, events: Vec<ScanEvent>) {
        if events.is_empty() {
            return;
        }
        let delegate = self.delegate.lock().clone();
        let callback = self.sink_error_callback.lock().clone();

        for event in events {
            match event {
                ScanEvent::State(state) => {
                    if let Some(d) = &delegate {
                        d.on_state_changed(&state);
                    }
                }
                ScanEvent::Chunk { sequence, consumed } => {
                    if let Some(d) = &delegate {
                        d.on_chunk(sequence, consumed);
                    }
                }
                ScanEvent::Notice(notice) => {
                    if let Some(d) = &delegate {
                        d.on_notice(&notice);
                    }
                }
                ScanEvent::Error(error) => {
                    if let Some(d) = &delegate {
                        d.on_error(&error);
                    }
                }
                ScanEvent::ConsumerFailed(error) => {
                    if let Some(d) = &delegate {
                        d.on_error(&error);
                    }
                    if let Some(cb) = &callback {
                        cb(&error);
                    }
                }
                ScanEvent::RecordingFinished(result) => {
                    if let Some(d) = &delegate {
                        d.on_recording_finished(&result);
                    }
                }
            }
        }
    }
}

impl<D: DaqDriver> Drop for ScanController<D> {
    fn drop(&mut self) {
        let running = !self.inner.get_mut().state.is_idle();
        if running {
            self.stop_scan();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::{BufferSizing, DeviceSessionConfig, RecordingLength};
    use crate::models::error::DriverError;
    use crate::testing::FakeDriver;

    /// Consumer that records every sample it receives.
    struct Collector {
        samples: Arc<Mutex<Vec<f64>>>,
        sequences: Arc<Mutex<Vec<u64>>>,
        closed: Arc<AtomicBool>,
        fail_at: Option<u64>,
    }

    impl ChunkConsumer for Collector {
        fn name(&self) -> &str {
            "collector"
        }

        fn accept(&mut self, chunk: &Chunk<'_>) -> Result<(), ScanError> {
            if self.fail_at == Some(chunk.sequence) {
                return Err(ScanError::WriteError("disk full".into()));
            }
            self.samples.lock().extend_from_slice(chunk.samples);
            self.sequences.lock().push(chunk.sequence);
            Ok(())
        }

        fn close(&mut self) -> Result<Option<RecordingResult>, ScanError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(None)
        }
    }

    struct Harness {
        driver: Arc<FakeDriver>,
        controller: Arc<ScanController<FakeDriver>>,
        samples: Arc<Mutex<Vec<f64>>>,
        sequences: Arc<Mutex<Vec<u64>>>,
        closed: Arc<AtomicBool>,
    }

    impl Harness {
        fn new() -> Self {
            let driver = Arc::new(FakeDriver::new());
            let session = Arc::new(DeviceSession::new(Arc::clone(&driver), DeviceSessionConfig::default()));
            session.acquire().unwrap();
            Self {
                driver,
                controller: Arc::new(ScanController::new(session)),
                samples: Arc::default(),
                sequences: Arc::default(),
                closed: Arc::default(),
            }
        }

        fn attach(&self, fail_at: Option<u64>) {
            self.controller.add_consumer(Box::new(Collector {
                samples: Arc::clone(&self.samples),
                sequences: Arc::clone(&self.sequences),
                closed: Arc::clone(&self.closed),
                fail_at,
            }));
        }
    }

    /// channel_count=1, rate=10, points_per_channel=100, chunk=10
    fn single_channel_settings() -> ScanSettings {
        let mut s = ScanSettings::new(ScanConfig::new(0, 0, 10));
        s.sizing = BufferSizing::PointsPerChannel(100);
        s.chunks_per_buffer = 10;
        s
    }

    #[derive(Default)]
    struct RecordingDelegate {
        states: Mutex<Vec<&'static str>>,
        notices: Mutex<Vec<ScanError>>,
        errors: Mutex<Vec<ScanError>>,
    }

    impl ScanDelegate for RecordingDelegate {
        fn on_state_changed(&self, state: &ScanState) {
            self.states.lock().push(state.name());
        }

        fn on_notice(&self, notice: &ScanError) {
            self.notices.lock().push(notice.clone());
        }

        fn on_error(&self, error: &ScanError) {
            self.errors.lock().push(error.clone());
        }
    }

    #[test]
    fn steady_polling_extracts_every_sample_once() {
        let h = Harness::new();
        h.attach(None);
        let geometry = h.controller.start_scan(&single_channel_settings()).unwrap();
        assert_eq!(geometry.buffer_length(), 100);
        assert_eq!(geometry.chunk_size(), 10);

        for i in 0..25u64 {
            h.driver.advance(10);
            let outcome = h.controller.poll().unwrap();
            assert_eq!(outcome, PollOutcome::Chunk { sequence: i, available: 10 });
        }

        assert_eq!(h.controller.cursor().unwrap().total_consumed(), 250);
        assert_eq!(h.controller.diagnostics().chunks_extracted, 25);
        assert_eq!(*h.sequences.lock(), (0..25).collect::<Vec<_>>());
        let expected: Vec<f64> = (0..250).map(|n| n as f64).collect();
        assert_eq!(*h.samples.lock(), expected);
        assert!(h.controller.state().is_running());
    }

    #[test]
    fn jittery_polling_round_trips_the_stream() {
        let h = Harness::new();
        h.attach(None);
        h.controller.start_scan(&single_channel_settings()).unwrap();

        // uneven hardware progress, always under one buffer of backlog
        let steps = [3u64, 17, 0, 25, 9, 40, 1, 12, 30, 8, 0, 0, 22, 5, 14];
        for step in steps {
            h.driver.advance(step);
            h.controller.poll().unwrap();
        }
        for _ in 0..20 {
            h.controller.poll().unwrap();
        }

        let samples = h.samples.lock().clone();
        assert_eq!(samples.len() % 10, 0);
        let expected: Vec<f64> = (0..samples.len()).map(|n| n as f64).collect();
        assert_eq!(samples, expected);
        // everything whole-chunk has been drained
        assert!(186 - samples.len() < 10);
    }

    #[test]
    fn lagging_consumer_gets_one_chunk_per_poll() {
        let h = Harness::new();
        h.attach(None);
        h.controller.start_scan(&single_channel_settings()).unwrap();

        h.driver.advance(45);
        assert_eq!(
            h.controller.poll().unwrap(),
            PollOutcome::Chunk { sequence: 0, available: 45 }
        );
        assert_eq!(h.controller.cursor().unwrap().total_consumed(), 10);
        assert_eq!(h.controller.diagnostics().max_backlog, 45);
    }

    #[test]
    fn short_backlog_is_a_no_op() {
        let h = Harness::new();
        h.attach(None);
        h.controller.start_scan(&single_channel_settings()).unwrap();
        h.driver.advance(9);
        assert_eq!(h.controller.poll().unwrap(), PollOutcome::CaughtUp { available: 9 });
        assert!(h.samples.lock().is_empty());
        assert_eq!(h.controller.diagnostics().idle_polls, 1);
    }

    #[test]
    fn overrun_fails_and_stops_within_the_same_poll() {
        let h = Harness::new();
        h.attach(None);
        let delegate = Arc::new(RecordingDelegate::default());
        h.controller.set_delegate(delegate.clone());
        h.controller.start_scan(&single_channel_settings()).unwrap();

        h.driver.advance(10);
        h.controller.poll().unwrap();
        let stops_before = h.driver.stop_calls();

        h.driver.advance(150);
        let err = h.controller.poll().unwrap_err();
        assert_eq!(
            err,
            ScanError::BufferOverrun {
                available: 150,
                buffer_length: 100,
                consumed: 10,
                hardware_count: 160,
            }
        );
        assert_eq!(h.driver.stop_calls(), stops_before + 1);
        assert_eq!(h.driver.live_buffers(), 0);
        assert!(h.closed.load(Ordering::SeqCst));
        assert_eq!(h.controller.state(), ScanState::Failed(err.clone()));
        assert_eq!(delegate.errors.lock().as_slice(), &[err]);
        // no stale data was delivered
        assert_eq!(h.samples.lock().len(), 10);
    }

    #[test]
    fn overrun_during_copy_is_detected() {
        let h = Harness::new();
        h.attach(None);
        h.controller.start_scan(&single_channel_settings()).unwrap();
        h.driver.advance(95);
        h.driver.advance_during_copy(10);

        let err = h.controller.poll().unwrap_err();
        assert!(matches!(err, ScanError::BufferOverrun { available: 105, .. }));
        assert!(h.samples.lock().is_empty());
        assert!(h.controller.state().is_failed());
    }

    #[test]
    fn exactly_one_buffer_of_backlog_is_not_an_overrun() {
        let h = Harness::new();
        h.attach(None);
        h.controller.start_scan(&single_channel_settings()).unwrap();
        h.driver.advance(100);
        assert!(h.controller.poll().is_ok());
        assert!(h.controller.state().is_running());
    }

    #[test]
    fn stop_is_idempotent() {
        let h = Harness::new();
        assert!(h.controller.stop_scan().is_empty());
        assert!(h.controller.state().is_idle());

        h.attach(None);
        h.controller.start_scan(&single_channel_settings()).unwrap();
        h.controller.stop_scan();
        h.controller.stop_scan();
        assert!(h.controller.state().is_idle());
        assert_eq!(h.driver.live_buffers(), 0);
        assert_eq!(h.driver.freed_buffers(), 1);
        assert!(!h.driver.is_running());
        assert_eq!(h.controller.poll().unwrap(), PollOutcome::NotRunning);
    }

    #[test]
    fn stop_drains_remaining_frames() {
        let h = Harness::new();
        h.attach(None);
        let mut settings = ScanSettings::new(ScanConfig::new(0, 1, 10));
        settings.sizing = BufferSizing::PointsPerChannel(20);
        settings.chunks_per_buffer = 5;
        let geometry = h.controller.start_scan(&settings).unwrap();
        assert_eq!((geometry.buffer_length(), geometry.chunk_size()), (40, 8));

        h.driver.advance(8);
        h.controller.poll().unwrap();
        // 13 more samples: one full chunk, one 4-sample frame-aligned tail,
        // and one dangling half-frame that is dropped
        h.driver.advance(13);
        h.controller.stop_scan();

        let expected: Vec<f64> = (0..20).map(|n| n as f64).collect();
        assert_eq!(*h.samples.lock(), expected);
        assert_eq!(h.controller.diagnostics().samples_consumed, 20);
    }

    #[test]
    fn allocation_failure_leaves_controller_idle() {
        let h = Harness::new();
        h.driver.fail_alloc(DriverError::new(33, "out of memory"));
        let err = h.controller.start_scan(&single_channel_settings()).unwrap_err();
        assert!(matches!(err, ScanError::AllocationFailed { samples: 100, .. }));
        assert!(h.controller.state().is_idle());
        assert!(h.controller.session().handle().is_some());
    }

    #[test]
    fn failed_start_drops_attached_consumers() {
        let h = Harness::new();
        h.attach(None);
        let mut invalid = single_channel_settings();
        invalid.chunks_per_buffer = 0;
        assert!(matches!(
            h.controller.start_scan(&invalid),
            Err(ScanError::InvalidConfiguration(_))
        ));
        assert!(h.closed.load(Ordering::SeqCst));
        assert_eq!(h.controller.consumer_count(), 0);

        // the consumer of the failed start must not see the next scan
        h.controller.start_scan(&single_channel_settings()).unwrap();
        h.driver.advance(10);
        h.controller.poll().unwrap();
        assert!(h.samples.lock().is_empty());
    }

    #[test]
    fn allocation_failure_drops_attached_consumers() {
        let h = Harness::new();
        h.attach(None);
        h.driver.fail_alloc(DriverError::new(33, "out of memory"));
        h.controller.start_scan(&single_channel_settings()).unwrap_err();
        assert!(h.closed.load(Ordering::SeqCst));
        assert_eq!(h.controller.consumer_count(), 0);
    }

    #[test]
    fn start_while_running_keeps_the_running_consumers() {
        let h = Harness::new();
        h.attach(None);
        h.controller.start_scan(&single_channel_settings()).unwrap();
        h.controller.start_scan(&single_channel_settings()).unwrap_err();
        assert_eq!(h.controller.consumer_count(), 1);
        assert!(!h.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn rejected_start_unwinds_buffer_and_board() {
        let h = Harness::new();
        h.attach(None);
        h.driver.reject_start(DriverError::new(101, "trigger source busy"));
        let err = h.controller.start_scan(&single_channel_settings()).unwrap_err();

        assert_eq!(
            err,
            ScanError::ScanStartRejected {
                code: 101,
                message: "trigger source busy".into()
            }
        );
        assert!(h.controller.state().is_failed());
        assert_eq!(h.driver.live_buffers(), 0);
        assert_eq!(h.driver.bound_boards(), 0);
        assert!(h.controller.session().handle().is_none());
        assert!(h.closed.load(Ordering::SeqCst));

        h.controller.stop_scan();
        assert!(h.controller.state().is_idle());
    }

    #[test]
    fn start_requires_idle_and_a_device() {
        let h = Harness::new();
        h.controller.start_scan(&single_channel_settings()).unwrap();
        assert!(matches!(
            h.controller.start_scan(&single_channel_settings()),
            Err(ScanError::InvalidState(_))
        ));
        h.controller.stop_scan();

        let handle = h.controller.session().handle().unwrap();
        h.controller.session().release(handle);
        assert!(h.controller.start_scan(&single_channel_settings()).unwrap_err().is_device_unavailable());
    }

    #[test]
    fn high_channel_is_clamped_to_board() {
        let h = Harness::new();
        let geometry = h
            .controller
            .start_scan(&ScanSettings::new(ScanConfig::new(0, 15, 100)))
            .unwrap();
        assert_eq!(geometry.channel_count(), 8);
    }

    #[test]
    fn resolved_settings_match_the_clamped_stream() {
        let h = Harness::new();
        let requested = ScanSettings::new(ScanConfig::new(2, 15, 100));
        let resolved = h.controller.resolve_settings(&requested).unwrap();
        assert_eq!(resolved.scan.high_channel, 7);
        assert_eq!(resolved.scan.channel_count(), 6);

        let geometry = h.controller.start_scan(&requested).unwrap();
        assert_eq!(geometry.channel_count(), resolved.scan.channel_count());
    }

    #[test]
    fn continuous_scan_ending_on_its_own_is_a_notice() {
        let h = Harness::new();
        h.attach(None);
        let delegate = Arc::new(RecordingDelegate::default());
        h.controller.set_delegate(delegate.clone());
        h.controller.start_scan(&single_channel_settings()).unwrap();

        h.driver.advance(25);
        h.driver.halt();
        let outcome = h.controller.poll().unwrap();

        assert_eq!(outcome, PollOutcome::HardwareEnded { consumed: 25 });
        assert!(h.controller.state().is_idle());
        assert_eq!(
            delegate.notices.lock().as_slice(),
            &[ScanError::ScanEndedUnexpectedly { consumed: 10 }]
        );
        assert!(delegate.errors.lock().is_empty());
        assert_eq!(h.samples.lock().len(), 25);
        assert_eq!(
            *delegate.states.lock(),
            vec!["starting", "running", "stopping", "idle"]
        );
    }

    #[test]
    fn bounded_recording_stops_itself() {
        let h = Harness::new();
        h.attach(None);
        let mut settings = single_channel_settings();
        settings.length = RecordingLength::Buffers(2);
        h.controller.start_scan(&settings).unwrap();

        let mut outcome = PollOutcome::NotRunning;
        for _ in 0..20 {
            h.driver.advance(10);
            outcome = h.controller.poll().unwrap();
        }
        assert_eq!(outcome, PollOutcome::Completed { consumed: 200 });
        assert!(h.controller.state().is_idle());

        h.driver.advance(10);
        assert_eq!(h.controller.poll().unwrap(), PollOutcome::NotRunning);
        assert_eq!(h.samples.lock().len(), 200);
    }

    #[test]
    fn failing_consumer_is_detached_and_reported() {
        let h = Harness::new();
        h.attach(Some(1));
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink_errors = Arc::clone(&fired);
        h.controller
            .on_sink_error(Arc::new(move |e: &ScanError| sink_errors.lock().push(e.clone())));
        h.controller.start_scan(&single_channel_settings()).unwrap();

        for _ in 0..3 {
            h.driver.advance(10);
            h.controller.poll().unwrap();
        }

        assert!(h.controller.state().is_running());
        assert_eq!(h.controller.consumer_count(), 0);
        assert_eq!(h.samples.lock().len(), 10);
        assert_eq!(fired.lock().as_slice(), &[ScanError::WriteError("disk full".into())]);
        assert_eq!(h.controller.diagnostics().consumer_failures, 1);
        assert_eq!(h.controller.cursor().unwrap().total_consumed(), 30);
    }

    #[test]
    fn sink_error_callback_may_stop_the_scan() {
        let h = Harness::new();
        h.attach(Some(0));
        let controller = Arc::downgrade(&h.controller);
        h.controller.on_sink_error(Arc::new(move |_e: &ScanError| {
            if let Some(c) = controller.upgrade() {
                c.stop_scan();
            }
        }));
        h.controller.start_scan(&single_channel_settings()).unwrap();

        h.driver.advance(10);
        h.controller.poll().unwrap();
        assert!(h.controller.state().is_idle());
        assert_eq!(h.driver.live_buffers(), 0);
    }

    #[test]
    fn copy_fault_is_fatal() {
        let h = Harness::new();
        h.controller.start_scan(&single_channel_settings()).unwrap();
        h.driver.fail_copy(DriverError::new(5, "usb transfer failed"));
        h.driver.advance(10);
        let err = h.controller.poll().unwrap_err();
        assert_eq!(
            err,
            ScanError::DriverFault {
                code: 5,
                message: "usb transfer failed".into()
            }
        );
        assert!(!h.driver.is_running());
        assert_eq!(h.driver.live_buffers(), 0);
    }

    #[test]
    fn stop_request_preempts_the_next_poll() {
        let h = Harness::new();
        h.controller.start_scan(&single_channel_settings()).unwrap();
        h.controller.stop_requested.store(true, Ordering::SeqCst);
        let status_calls = h.driver.status_calls();
        assert_eq!(h.controller.poll().unwrap(), PollOutcome::StopPending);
        assert_eq!(h.driver.status_calls(), status_calls);
        h.controller.stop_scan();
        assert!(h.controller.state().is_idle());
    }

    #[test]
    fn concurrent_stop_never_leaks_the_scan() {
        let h = Harness::new();
        h.attach(None);
        h.controller.start_scan(&single_channel_settings()).unwrap();

        let poller = {
            let controller = Arc::clone(&h.controller);
            let driver = Arc::clone(&h.driver);
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    driver.advance(5);
                    if controller.poll().map_or(true, |o| o == PollOutcome::NotRunning) {
                        break;
                    }
                }
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(1));
        h.controller.stop_scan();
        poller.join().unwrap();

        assert!(h.controller.state().is_idle());
        assert!(!h.driver.is_running());
        assert_eq!(h.driver.live_buffers(), 0);
        let samples = h.samples.lock();
        let expected: Vec<f64> = (0..samples.len()).map(|n| n as f64).collect();
        assert_eq!(*samples, expected);
    }

    #[test]
    fn dropping_the_controller_stops_the_scan() {
        let h = Harness::new();
        h.controller.start_scan(&single_channel_settings()).unwrap();
        let driver = Arc::clone(&h.driver);
        drop(h);
        assert!(!driver.is_running());
        assert_eq!(driver.live_buffers(), 0);
    }
}
