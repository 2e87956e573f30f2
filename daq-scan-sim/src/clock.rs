use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use daq_scan_core::models::error::DriverError;

use crate::board::SimState;

/// Background thread standing in for the board's sample clock.
///
/// Every tick it tops the running scan up to `elapsed × rate × channels`
/// samples, so the scan keeps advancing at wall-clock pace whether or not
/// anyone is reading the buffer.
pub(crate) struct SimClock {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SimClock {
    pub(crate) fn spawn(state: Arc<Mutex<SimState>>, tick: Duration) -> Result<Self, DriverError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("sim-scan-clock".into())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    thread::sleep(tick);
                    let mut state = state.lock();
                    let due = match state.scan.as_ref() {
                        Some(scan) if scan.running => {
                            let per_second = scan.rate_hz as f64 * scan.channel_count as f64;
                            let target = (scan.started.elapsed().as_secs_f64() * per_second) as u64;
                            // whole frames only
                            let target = target - target % scan.channel_count as u64;
                            target.saturating_sub(scan.cumulative)
                        }
                        _ => 0,
                    };
                    if due > 0 {
                        state.advance(due);
                    }
                }
            })
            .map_err(|e| DriverError::new(-1, format!("failed to spawn scan clock: {}", e)))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SimClock {
    fn drop(&mut self) {
        self.shutdown();
    }
}
