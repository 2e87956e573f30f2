use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::error::ScanError;
use crate::session::controller::{PollOutcome, ScanController};
use crate::traits::daq_driver::DaqDriver;

/// Drives `ScanController::poll` on a dedicated thread at a fixed cadence.
///
/// Ticks are scheduled from the start instant, so a slow poll shortens the
/// next sleep instead of shifting every later tick. The thread exits when
/// the scan is no longer running or a poll fails; the controller has
/// already torn the scan down and notified its delegate by then.
pub struct ScanPoller {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ScanPoller {
    pub fn spawn<D: DaqDriver + 'static>(
        controller: Arc<ScanController<D>>,
        interval: Duration,
    ) -> Result<Self, ScanError> {
        if interval.is_zero() {
            return Err(ScanError::InvalidConfiguration("poll interval must be positive".into()));
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("scan-poller".into())
            .spawn(move || {
                poll_loop(&controller, interval, &flag);
                flag.store(false, Ordering::SeqCst);
            })
            .map_err(|e| ScanError::WorkerSpawn(format!("scan-poller: {}", e)))?;

        Ok(Self {
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Whether the polling thread is still active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the thread to exit after its current tick and wait for it.
    /// Does not stop the scan itself.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Block until the thread exits on its own (scan ended or failed).
    pub fn join(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ScanPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop<D: DaqDriver>(controller: &ScanController<D>, interval: Duration, running: &AtomicBool) {
    let started = Instant::now();
    let mut tick: u32 = 0;

    while running.load(Ordering::SeqCst) {
        match controller.poll() {
            Ok(PollOutcome::NotRunning) => break,
            Ok(PollOutcome::Completed { consumed }) => {
                log::info!("poller: recording complete ({} samples)", consumed);
                break;
            }
            Ok(PollOutcome::HardwareEnded { consumed }) => {
                log::info!("poller: hardware ended the scan ({} samples)", consumed);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                log::error!("poller: {}", e);
                break;
            }
        }

        tick = tick.saturating_add(1);
        let next = started + interval * tick;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            // fell more than a tick behind; resync rather than burst
            tick = (now.duration_since(started).as_nanos() / interval.as_nanos()) as u32;
        }
    }
    log::debug!("poller exited after {} ticks", tick);
}
