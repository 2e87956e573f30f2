use std::time::Duration;

/// Observer driven by the shared `TickDispatcher`.
///
/// Replaces one timer per widget: the dispatcher owns the only timing
/// thread and calls `on_tick` once `interval` has elapsed since the
/// observer's previous tick.
pub trait TickObserver: Send {
    fn interval(&self) -> Duration;

    fn on_tick(&mut self);
}
