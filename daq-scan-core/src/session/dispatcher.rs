use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::error::ScanError;
use crate::traits::tick_observer::TickObserver;

/// Finest granularity the dispatcher sleeps at when no tick is due sooner.
const MAX_IDLE_SLEEP: Duration = Duration::from_millis(50);

struct Registration {
    observer: Box<dyn TickObserver>,
    next_due: Instant,
}

/// One timing thread shared by every periodic observer (indicator widgets,
/// counter displays). Each observer keeps its own interval.
pub struct TickDispatcher {
    observers: Arc<Mutex<Vec<Registration>>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TickDispatcher {
    pub fn new() -> Self {
        Self {
            observers: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Register an observer. Its first tick is due one interval from now.
    pub fn register(&self, observer: Box<dyn TickObserver>) {
        let next_due = Instant::now() + observer.interval();
        self.observers.lock().push(Registration { observer, next_due });
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Tick every observer that is due at `now`. Returns how long until the
    /// next observer is due.
    pub fn tick_due(&self, now: Instant) -> Duration {
        run_due(&self.observers, now)
    }

    pub fn start(&self) -> Result<(), ScanError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let observers = Arc::clone(&self.observers);
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name("tick-dispatcher".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let wait = run_due(&observers, Instant::now());
                    thread::sleep(wait.min(MAX_IDLE_SLEEP));
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                ScanError::WorkerSpawn(format!("tick-dispatcher: {}", e))
            })?;

        *self.handle.lock() = Some(handle);
        log::debug!("tick dispatcher started with {} observers", self.observer_count());
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Default for TickDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TickDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_due(observers: &Mutex<Vec<Registration>>, now: Instant) -> Duration {
    let mut observers = observers.lock();
    let mut wait = MAX_IDLE_SLEEP;
    for reg in observers.iter_mut() {
        if reg.next_due <= now {
            reg.observer.on_tick();
            let interval = reg.observer.interval();
            reg.next_due += interval;
            if reg.next_due <= now {
                // missed ticks are skipped, not replayed
                reg.next_due = now + interval;
            }
        }
        wait = wait.min(reg.next_due.saturating_duration_since(now));
    }
    wait
}
