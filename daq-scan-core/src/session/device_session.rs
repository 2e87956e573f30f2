use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::config::{ChannelMode, DeviceSessionConfig};
use crate::models::error::ScanError;
use crate::models::scan_models::{AnalogInputInfo, DeviceDescriptor, DeviceHandle};
use crate::traits::daq_driver::DaqDriver;

#[derive(Debug, Clone)]
struct BoundDevice {
    handle: DeviceHandle,
    descriptor: DeviceDescriptor,
}

/// Owns the lifecycle of the single active board connection.
///
/// Only the session creates or releases a `DeviceHandle`; the controller
/// and the discrete I/O façade borrow it. Dropping the session releases a
/// still-bound board.
pub struct DeviceSession<D: DaqDriver> {
    driver: Arc<D>,
    config: DeviceSessionConfig,
    bound: Mutex<Option<BoundDevice>>,
}

impl<D: DaqDriver> DeviceSession<D> {
    pub fn new(driver: Arc<D>, config: DeviceSessionConfig) -> Self {
        Self {
            driver,
            config,
            bound: Mutex::new(None),
        }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Currently bound handle, if any.
    pub fn handle(&self) -> Option<DeviceHandle> {
        self.bound.lock().as_ref().map(|b| b.handle)
    }

    pub fn descriptor(&self) -> Option<DeviceDescriptor> {
        self.bound.lock().as_ref().map(|b| b.descriptor.clone())
    }

    /// Discover the first supported board and bind it.
    ///
    /// Applies the configured default channel setup; if the driver rejects
    /// it the board is released again before the error is returned.
    pub fn acquire(&self) -> Result<DeviceHandle, ScanError> {
        let mut bound = self.bound.lock();
        if let Some(existing) = bound.as_ref() {
            return Err(ScanError::DeviceBusy {
                board: existing.handle.board(),
            });
        }

        let inventory = self
            .driver
            .inventory()
            .map_err(|e| ScanError::DeviceUnavailable(format!("inventory failed: {}", e)))?;
        if inventory.is_empty() {
            return Err(ScanError::NoDeviceFound);
        }

        let descriptor = inventory
            .iter()
            .find(|d| self.config.supported_product_ids.contains(&d.product_id))
            .cloned()
            .ok_or(ScanError::NoSupportedDeviceFound { found: inventory.len() })?;

        self.driver
            .create_device(self.config.board, &descriptor)
            .map_err(|e| ScanError::DeviceUnavailable(format!("failed to bind {}: {}", descriptor.product_name, e)))?;
        let handle = DeviceHandle::new(self.config.board);

        if let Some(setup) = self.config.channel_setup {
            if let Err(e) = self
                .driver
                .configure_channel(handle, setup.channel, setup.mode, setup.data_rate)
            {
                self.driver.release_device(handle.board());
                return Err(ScanError::configuration_rejected(e));
            }
        }

        log::info!(
            "acquired {} ({}) as board {}",
            descriptor.product_name,
            descriptor.unique_id,
            handle.board()
        );
        *bound = Some(BoundDevice { handle, descriptor });
        Ok(handle)
    }

    /// Set a channel's electrical mode and internal data rate.
    pub fn configure(
        &self,
        handle: DeviceHandle,
        channel: u32,
        mode: ChannelMode,
        data_rate: u32,
    ) -> Result<(), ScanError> {
        self.ensure_bound(handle)?;
        self.driver
            .configure_channel(handle, channel, mode, data_rate)
            .map_err(ScanError::configuration_rejected)?;
        log::debug!("channel {} configured: {:?} at {} Hz", channel, mode, data_rate);
        Ok(())
    }

    pub fn analog_input_info(&self, handle: DeviceHandle) -> Result<AnalogInputInfo, ScanError> {
        self.ensure_bound(handle)?;
        self.driver
            .analog_input_info(handle)
            .map_err(|e| ScanError::DeviceUnavailable(format!("cannot read analog input info: {}", e)))
    }

    /// Release `handle`. A handle that is not bound (never acquired or
    /// already released) is ignored.
    pub fn release(&self, handle: DeviceHandle) {
        let mut bound = self.bound.lock();
        if bound.as_ref().is_some_and(|b| b.handle == handle) {
            self.driver.release_device(handle.board());
            *bound = None;
            log::info!("released board {}", handle.board());
        }
    }

    fn ensure_bound(&self, handle: DeviceHandle) -> Result<(), ScanError> {
        match self.handle() {
            Some(h) if h == handle => Ok(()),
            _ => Err(ScanError::DeviceUnavailable(format!("board {} is not acquired", handle.board()))),
        }
    }
}

impl<D: DaqDriver> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle() {
            self.release(handle);
        }
    }
}
