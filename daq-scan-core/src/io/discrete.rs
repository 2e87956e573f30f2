use std::fmt;
use std::sync::Arc;

use crate::models::error::ScanError;
use crate::models::scan_models::{DeviceHandle, DigitalPort, PortDirection};
use crate::traits::daq_driver::DaqDriver;

/// Single-point digital and counter I/O on the bound board.
///
/// Every call is a plain request/response to the driver; failures become
/// `ScanError::IoTransport` and are never fatal to a running scan.
pub struct DiscreteIo<D: DaqDriver> {
    driver: Arc<D>,
}

impl<D: DaqDriver> DiscreteIo<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self { driver }
    }

    pub fn configure_digital_port(
        &self,
        handle: DeviceHandle,
        port: DigitalPort,
        direction: PortDirection,
    ) -> Result<(), ScanError> {
        self.driver
            .configure_digital_port(handle, port, direction)
            .map_err(ScanError::io_transport)?;
        log::debug!("{} configured as {:?}", port.name(), direction);
        Ok(())
    }

    /// Bitmask of the port's input lines.
    pub fn read_digital_port(&self, handle: DeviceHandle, port: DigitalPort) -> Result<u16, ScanError> {
        self.driver
            .read_digital_port(handle, port)
            .map_err(ScanError::io_transport)
    }

    pub fn write_digital_bit(
        &self,
        handle: DeviceHandle,
        port: DigitalPort,
        bit: u8,
        value: bool,
    ) -> Result<(), ScanError> {
        if bit >= 16 {
            return Err(ScanError::InvalidConfiguration(format!(
                "bit {} is outside the 16-bit port",
                bit
            )));
        }
        self.driver
            .write_digital_bit(handle, port, bit, value)
            .map_err(ScanError::io_transport)
    }

    pub fn read_counter(&self, handle: DeviceHandle, counter: u8) -> Result<u32, ScanError> {
        self.driver
            .read_counter(handle, counter)
            .map_err(ScanError::io_transport)
    }
}

impl<D: DaqDriver> Clone for DiscreteIo<D> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
        }
    }
}

/// Last successfully read value of a discrete point.
///
/// A failed read keeps the previous value and is counted, so a display
/// never flickers to a default on a transient transport error.
#[derive(Debug, Clone, PartialEq)]
pub struct HeldValue<T> {
    value: T,
    failures: u64,
    last_error: Option<ScanError>,
}

impl<T: Copy + fmt::Debug> HeldValue<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: initial,
            failures: 0,
            last_error: None,
        }
    }

    pub fn get(&self) -> T {
        self.value
    }

    /// Whether the most recent update failed.
    pub fn is_stale(&self) -> bool {
        self.last_error.is_some()
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn last_error(&self) -> Option<&ScanError> {
        self.last_error.as_ref()
    }

    /// Apply a read result. Returns the value now held.
    pub fn update(&mut self, point: &str, result: Result<T, ScanError>) -> T {
        match result {
            Ok(v) => {
                self.value = v;
                self.last_error = None;
            }
            Err(e) => {
                self.failures += 1;
                log::warn!("{}: holding {:?} after read failure: {}", point, self.value, e);
                self.last_error = Some(e);
            }
        }
        self.value
    }
}
