//! Display models for the interactive discrete I/O blocks.
//!
//! Each model is a cheap `Clone` handle over shared state: one clone is
//! registered with the `TickDispatcher`, others are kept by the UI to read
//! labels and values.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::io::discrete::{DiscreteIo, HeldValue};
use crate::models::error::ScanError;
use crate::models::scan_models::{DeviceHandle, DigitalPort};
use crate::traits::daq_driver::DaqDriver;
use crate::traits::tick_observer::TickObserver;

pub const DIGITAL_INPUT_INTERVAL: Duration = Duration::from_millis(100);
pub const COUNTER_INTERVAL: Duration = Duration::from_millis(500);

struct IndicatorState {
    name: String,
    value: HeldValue<u16>,
}

/// Shows a digital input port's bitmask; "on" while any line is high.
pub struct DigitalInputIndicator<D: DaqDriver> {
    io: DiscreteIo<D>,
    handle: DeviceHandle,
    port: DigitalPort,
    state: Arc<Mutex<IndicatorState>>,
}

impl<D: DaqDriver> DigitalInputIndicator<D> {
    pub fn new(io: DiscreteIo<D>, handle: DeviceHandle, port: DigitalPort) -> Self {
        Self {
            io,
            handle,
            port,
            state: Arc::new(Mutex::new(IndicatorState {
                name: "Digital In".into(),
                value: HeldValue::new(0),
            })),
        }
    }

    pub fn port(&self) -> DigitalPort {
        self.port
    }

    pub fn value(&self) -> u16 {
        self.state.lock().value.get()
    }

    pub fn is_on(&self) -> bool {
        self.value() != 0
    }

    pub fn is_stale(&self) -> bool {
        self.state.lock().value.is_stale()
    }

    pub fn rename(&self, name: impl Into<String>) {
        self.state.lock().name = name.into();
    }

    pub fn label(&self) -> String {
        let state = self.state.lock();
        format!("{} {}: {}", state.name, self.port.name(), state.value.get())
    }

    pub fn refresh(&self) -> u16 {
        let result = self.io.read_digital_port(self.handle, self.port);
        let point = format!("digital input {}", self.port.name());
        self.state.lock().value.update(&point, result)
    }
}

impl<D: DaqDriver> Clone for DigitalInputIndicator<D> {
    fn clone(&self) -> Self {
        Self {
            io: self.io.clone(),
            handle: self.handle,
            port: self.port,
            state: Arc::clone(&self.state),
        }
    }
}

impl<D: DaqDriver + 'static> TickObserver for DigitalInputIndicator<D> {
    fn interval(&self) -> Duration {
        DIGITAL_INPUT_INTERVAL
    }

    fn on_tick(&mut self) {
        self.refresh();
    }
}

struct CounterState {
    name: String,
    value: HeldValue<u32>,
}

/// Renameable display of one event counter.
pub struct CounterDisplay<D: DaqDriver> {
    io: DiscreteIo<D>,
    handle: DeviceHandle,
    counter: u8,
    state: Arc<Mutex<CounterState>>,
}

impl<D: DaqDriver> CounterDisplay<D> {
    pub fn new(io: DiscreteIo<D>, handle: DeviceHandle, counter: u8) -> Self {
        Self {
            io,
            handle,
            counter,
            state: Arc::new(Mutex::new(CounterState {
                name: "Counter".into(),
                value: HeldValue::new(0),
            })),
        }
    }

    pub fn counter(&self) -> u8 {
        self.counter
    }

    pub fn value(&self) -> u32 {
        self.state.lock().value.get()
    }

    pub fn rename(&self, name: impl Into<String>) {
        self.state.lock().name = name.into();
    }

    pub fn label(&self) -> String {
        let state = self.state.lock();
        format!("{}: {}", state.name, state.value.get())
    }

    pub fn refresh(&self) -> u32 {
        let result = self.io.read_counter(self.handle, self.counter);
        let point = format!("counter {}", self.counter);
        self.state.lock().value.update(&point, result)
    }
}

impl<D: DaqDriver> Clone for CounterDisplay<D> {
    fn clone(&self) -> Self {
        Self {
            io: self.io.clone(),
            handle: self.handle,
            counter: self.counter,
            state: Arc::clone(&self.state),
        }
    }
}

impl<D: DaqDriver + 'static> TickObserver for CounterDisplay<D> {
    fn interval(&self) -> Duration {
        COUNTER_INTERVAL
    }

    fn on_tick(&mut self) {
        self.refresh();
    }
}

struct ToggleState {
    name: String,
    on: bool,
}

/// Drives one output bit. A failed write keeps the previous state.
pub struct DigitalOutputToggle<D: DaqDriver> {
    io: DiscreteIo<D>,
    handle: DeviceHandle,
    port: DigitalPort,
    bit: u8,
    state: Arc<Mutex<ToggleState>>,
}

impl<D: DaqDriver> DigitalOutputToggle<D> {
    pub fn new(io: DiscreteIo<D>, handle: DeviceHandle, port: DigitalPort, bit: u8) -> Self {
        Self {
            io,
            handle,
            port,
            bit,
            state: Arc::new(Mutex::new(ToggleState {
                name: "Digital Out".into(),
                on: false,
            })),
        }
    }

    pub fn bit(&self) -> u8 {
        self.bit
    }

    pub fn is_on(&self) -> bool {
        self.state.lock().on
    }

    pub fn rename(&self, name: impl Into<String>) {
        self.state.lock().name = name.into();
    }

    pub fn label(&self) -> String {
        let state = self.state.lock();
        format!("{}: {}", state.name, if state.on { "ON" } else { "OFF" })
    }

    pub fn set(&self, on: bool) -> Result<(), ScanError> {
        let mut state = self.state.lock();
        if let Err(e) = self.io.write_digital_bit(self.handle, self.port, self.bit, on) {
            log::warn!(
                "digital output {} bit {}: keeping {} after write failure: {}",
                self.port.name(),
                self.bit,
                if state.on { "ON" } else { "OFF" },
                e
            );
            return Err(e);
        }
        state.on = on;
        Ok(())
    }

    /// Flip the bit. Returns the new state.
    pub fn toggle(&self) -> Result<bool, ScanError> {
        let next = !self.is_on();
        self.set(next)?;
        Ok(next)
    }
}

impl<D: DaqDriver> Clone for DigitalOutputToggle<D> {
    fn clone(&self) -> Self {
        Self {
            io: self.io.clone(),
            handle: self.handle,
            port: self.port,
            bit: self.bit,
            state: Arc::clone(&self.state),
        }
    }
}

impl<D: DaqDriver + 'static> TickObserver for DigitalOutputToggle<D> {
    fn interval(&self) -> Duration {
        DIGITAL_INPUT_INTERVAL
    }

    /// Reflect the line's actual level, e.g. after another client wrote it.
    fn on_tick(&mut self) {
        match self.io.read_digital_port(self.handle, self.port) {
            Ok(mask) => self.state.lock().on = mask & (1 << self.bit) != 0,
            Err(e) => log::warn!("digital output {} read-back failed: {}", self.port.name(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::DeviceSessionConfig;
    use crate::models::error::DriverError;
    use crate::session::device_session::DeviceSession;
    use crate::session::dispatcher::TickDispatcher;
    use crate::testing::FakeDriver;
    use std::time::Instant;

    fn setup() -> (Arc<FakeDriver>, DeviceSession<FakeDriver>, DiscreteIo<FakeDriver>, DeviceHandle) {
        let driver = Arc::new(FakeDriver::new());
        let session = DeviceSession::new(Arc::clone(&driver), DeviceSessionConfig::default());
        let handle = session.acquire().unwrap();
        let io = DiscreteIo::new(Arc::clone(&driver));
        (driver, session, io, handle)
    }

    #[test]
    fn indicator_tracks_port_and_holds_on_failure() {
        let (driver, _session, io, handle) = setup();
        let indicator = DigitalInputIndicator::new(io, handle, DigitalPort::FirstPortB);

        driver.set_port(DigitalPort::FirstPortB, 0b0100);
        assert_eq!(indicator.refresh(), 4);
        assert!(indicator.is_on());
        assert_eq!(indicator.label(), "Digital In FIRSTPORTB: 4");

        driver.fail_io(Some(DriverError::new(9, "timeout")));
        driver.set_port(DigitalPort::FirstPortB, 0);
        assert_eq!(indicator.refresh(), 4);
        assert!(indicator.is_stale());

        driver.fail_io(None);
        indicator.refresh();
        assert!(!indicator.is_on());
    }

    #[test]
    fn counter_rename_keeps_value() {
        let (driver, _session, io, handle) = setup();
        let counter = CounterDisplay::new(io, handle, 1);
        driver.set_counter(1, 1234);
        counter.refresh();
        counter.rename("Flow pulses");
        assert_eq!(counter.label(), "Flow pulses: 1234");
    }

    #[test]
    fn toggle_holds_state_when_write_fails() {
        let (driver, _session, io, handle) = setup();
        let toggle = DigitalOutputToggle::new(io, handle, DigitalPort::FirstPortA, 2);

        assert!(toggle.toggle().unwrap());
        assert_eq!(driver.port(DigitalPort::FirstPortA), 0b100);
        assert_eq!(toggle.label(), "Digital Out: ON");

        driver.fail_io(Some(DriverError::new(3, "bus error")));
        assert!(toggle.toggle().is_err());
        assert!(toggle.is_on());
        assert_eq!(driver.port(DigitalPort::FirstPortA), 0b100);
    }

    #[test]
    fn dispatcher_refreshes_registered_widgets() {
        let (driver, _session, io, handle) = setup();
        let indicator = DigitalInputIndicator::new(io.clone(), handle, DigitalPort::FirstPortA);
        let counter = CounterDisplay::new(io, handle, 0);

        let dispatcher = TickDispatcher::new();
        dispatcher.register(Box::new(indicator.clone()));
        dispatcher.register(Box::new(counter.clone()));

        driver.set_port(DigitalPort::FirstPortA, 1);
        driver.set_counter(0, 7);
        let start = Instant::now();
        dispatcher.tick_due(start + DIGITAL_INPUT_INTERVAL);
        assert_eq!(indicator.value(), 1);
        assert_eq!(counter.value(), 0);

        dispatcher.tick_due(start + COUNTER_INTERVAL);
        assert_eq!(counter.value(), 7);
    }
}
