use crate::models::config::{ChannelMode, ScanConfig};
use crate::models::error::DriverError;
use crate::models::scan_models::{
    AnalogInputInfo, BufferId, DeviceDescriptor, DeviceHandle, DigitalPort, PortDirection, ScanStatus,
};

/// Capability interface of a DAQ board driver.
///
/// Implemented by:
/// - `SimulatedDaq` (software board with a simulated scan clock)
/// - Future: bindings to a vendor universal library
///
/// The driver owns scan buffers: the hardware writes into them at the
/// configured rate while software reads back through `copy_range`. All
/// methods may be called from any thread.
pub trait DaqDriver: Send + Sync {
    /// Boards currently attached, in discovery order.
    fn inventory(&self) -> Result<Vec<DeviceDescriptor>, DriverError>;

    /// Bind `descriptor` to a board number.
    fn create_device(&self, board: u32, descriptor: &DeviceDescriptor) -> Result<(), DriverError>;

    /// Unbind a board number. Unknown boards are ignored.
    fn release_device(&self, board: u32);

    fn analog_input_info(&self, handle: DeviceHandle) -> Result<AnalogInputInfo, DriverError>;

    /// Set the electrical mode and internal data rate of one channel.
    fn configure_channel(
        &self,
        handle: DeviceHandle,
        channel: u32,
        mode: ChannelMode,
        data_rate: u32,
    ) -> Result<(), DriverError>;

    /// Allocate a scaled sample buffer of `samples` entries.
    fn alloc_buffer(&self, samples: usize) -> Result<BufferId, DriverError>;

    fn free_buffer(&self, buffer: BufferId);

    /// Start a background scan writing `buffer_length` samples circularly
    /// into `buffer`.
    fn start_continuous_scan(
        &self,
        handle: DeviceHandle,
        config: &ScanConfig,
        buffer: BufferId,
        buffer_length: usize,
    ) -> Result<(), DriverError>;

    fn query_status(&self, handle: DeviceHandle) -> Result<ScanStatus, DriverError>;

    /// Stop the background scan. Stopping an idle board succeeds.
    fn stop_scan(&self, handle: DeviceHandle) -> Result<(), DriverError>;

    /// Copy `out.len()` samples starting at `start` without wrapping.
    fn copy_range(&self, buffer: BufferId, start: usize, out: &mut [f64]) -> Result<(), DriverError>;

    fn configure_digital_port(
        &self,
        handle: DeviceHandle,
        port: DigitalPort,
        direction: PortDirection,
    ) -> Result<(), DriverError>;

    fn read_digital_port(&self, handle: DeviceHandle, port: DigitalPort) -> Result<u16, DriverError>;

    fn write_digital_bit(
        &self,
        handle: DeviceHandle,
        port: DigitalPort,
        bit: u8,
        value: bool,
    ) -> Result<(), DriverError>;

    fn read_counter(&self, handle: DeviceHandle, counter: u8) -> Result<u32, DriverError>;
}
