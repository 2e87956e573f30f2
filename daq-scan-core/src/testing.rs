//! In-crate fake driver for unit tests.
//!
//! The fake "hardware" only moves when a test calls `advance`, which writes
//! the cumulative sample index as each sample's value so extracted chunks can
//! be checked against the exact produced stream.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::models::config::{ChannelMode, ScanConfig};
use crate::models::error::DriverError;
use crate::models::scan_models::{
    AnalogInputInfo, BufferId, DeviceDescriptor, DeviceHandle, DigitalPort, HardwareStatus, PortDirection,
    ScanStatus,
};
use crate::traits::daq_driver::DaqDriver;

struct FakeScan {
    buffer: u64,
    length: usize,
    continuous: bool,
}

struct FakeState {
    inventory: Vec<DeviceDescriptor>,
    bound: HashSet<u32>,
    release_calls: usize,
    configured: Vec<(u32, ChannelMode, u32)>,
    configure_error: Option<DriverError>,
    ai_info: AnalogInputInfo,
    alloc_error: Option<DriverError>,
    start_error: Option<DriverError>,
    buffers: HashMap<u64, Vec<f64>>,
    next_buffer: u64,
    freed: Vec<u64>,
    scan: Option<FakeScan>,
    cumulative: u64,
    running: bool,
    stop_calls: usize,
    status_calls: usize,
    copy_error: Option<DriverError>,
    advance_on_copy: u64,
    ports: HashMap<DigitalPort, u16>,
    directions: HashMap<DigitalPort, PortDirection>,
    counters: HashMap<u8, u32>,
    io_error: Option<DriverError>,
}

pub(crate) struct FakeDriver {
    state: Mutex<FakeState>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                inventory: vec![Self::descriptor(0x7D)],
                bound: HashSet::new(),
                release_calls: 0,
                configured: Vec::new(),
                configure_error: None,
                ai_info: AnalogInputInfo {
                    supports_analog_input: true,
                    num_channels: 8,
                    packet_size: 1,
                },
                alloc_error: None,
                start_error: None,
                buffers: HashMap::new(),
                next_buffer: 1,
                freed: Vec::new(),
                scan: None,
                cumulative: 0,
                running: false,
                stop_calls: 0,
                status_calls: 0,
                copy_error: None,
                advance_on_copy: 0,
                ports: HashMap::new(),
                directions: HashMap::new(),
                counters: HashMap::new(),
                io_error: None,
            }),
        }
    }

    pub fn descriptor(product_id: u32) -> DeviceDescriptor {
        DeviceDescriptor {
            product_id,
            product_name: format!("FAKE-{:X}", product_id),
            unique_id: format!("fake-{}", product_id),
        }
    }

    pub fn set_inventory(&self, inventory: Vec<DeviceDescriptor>) {
        self.state.lock().inventory = inventory;
    }

    pub fn set_ai_info(&self, info: AnalogInputInfo) {
        self.state.lock().ai_info = info;
    }

    pub fn fail_configure(&self, e: DriverError) {
        self.state.lock().configure_error = Some(e);
    }

    pub fn fail_alloc(&self, e: DriverError) {
        self.state.lock().alloc_error = Some(e);
    }

    pub fn reject_start(&self, e: DriverError) {
        self.state.lock().start_error = Some(e);
    }

    pub fn fail_copy(&self, e: DriverError) {
        self.state.lock().copy_error = Some(e);
    }

    pub fn fail_io(&self, e: Option<DriverError>) {
        self.state.lock().io_error = e;
    }

    /// Samples the hardware writes while each copy is in flight.
    pub fn advance_during_copy(&self, samples: u64) {
        self.state.lock().advance_on_copy = samples;
    }

    /// Let the hardware write `samples` more samples.
    pub fn advance(&self, samples: u64) {
        Self::advance_locked(&mut self.state.lock(), samples);
    }

    /// Simulate the hardware ending the scan on its own.
    pub fn halt(&self) {
        self.state.lock().running = false;
    }

    pub fn set_port(&self, port: DigitalPort, value: u16) {
        self.state.lock().ports.insert(port, value);
    }

    pub fn port(&self, port: DigitalPort) -> u16 {
        self.state.lock().ports.get(&port).copied().unwrap_or(0)
    }

    pub fn direction(&self, port: DigitalPort) -> Option<PortDirection> {
        self.state.lock().directions.get(&port).copied()
    }

    pub fn set_counter(&self, counter: u8, value: u32) {
        self.state.lock().counters.insert(counter, value);
    }

    pub fn configured_channels(&self) -> Vec<(u32, ChannelMode, u32)> {
        self.state.lock().configured.clone()
    }

    pub fn bound_boards(&self) -> usize {
        self.state.lock().bound.len()
    }

    pub fn release_calls(&self) -> usize {
        self.state.lock().release_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.state.lock().stop_calls
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().status_calls
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn freed_buffers(&self) -> usize {
        self.state.lock().freed.len()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn advance_locked(s: &mut FakeState, samples: u64) {
        if !s.running {
            return;
        }
        let Some(scan) = s.scan.as_ref() else {
            return;
        };
        let (id, length, continuous) = (scan.buffer, scan.length, scan.continuous);
        for _ in 0..samples {
            if !continuous && s.cumulative >= length as u64 {
                s.running = false;
                break;
            }
            let at = (s.cumulative % length as u64) as usize;
            if let Some(buf) = s.buffers.get_mut(&id) {
                buf[at] = s.cumulative as f64;
            }
            s.cumulative += 1;
        }
    }
}

impl DaqDriver for FakeDriver {
    fn inventory(&self) -> Result<Vec<DeviceDescriptor>, DriverError> {
        Ok(self.state.lock().inventory.clone())
    }

    fn create_device(&self, board: u32, _descriptor: &DeviceDescriptor) -> Result<(), DriverError> {
        self.state.lock().bound.insert(board);
        Ok(())
    }

    fn release_device(&self, board: u32) {
        let mut s = self.state.lock();
        if s.bound.remove(&board) {
            s.release_calls += 1;
        }
    }

    fn analog_input_info(&self, _handle: DeviceHandle) -> Result<AnalogInputInfo, DriverError> {
        Ok(self.state.lock().ai_info.clone())
    }

    fn configure_channel(
        &self,
        _handle: DeviceHandle,
        channel: u32,
        mode: ChannelMode,
        data_rate: u32,
    ) -> Result<(), DriverError> {
        let mut s = self.state.lock();
        if let Some(e) = s.configure_error.clone() {
            return Err(e);
        }
        s.configured.push((channel, mode, data_rate));
        Ok(())
    }

    fn alloc_buffer(&self, samples: usize) -> Result<BufferId, DriverError> {
        let mut s = self.state.lock();
        if let Some(e) = s.alloc_error.clone() {
            return Err(e);
        }
        let id = s.next_buffer;
        s.next_buffer += 1;
        s.buffers.insert(id, vec![f64::NAN; samples]);
        Ok(BufferId(id))
    }

    fn free_buffer(&self, buffer: BufferId) {
        let mut s = self.state.lock();
        if s.buffers.remove(&buffer.0).is_some() {
            s.freed.push(buffer.0);
        }
    }

    fn start_continuous_scan(
        &self,
        _handle: DeviceHandle,
        config: &ScanConfig,
        buffer: BufferId,
        buffer_length: usize,
    ) -> Result<(), DriverError> {
        let mut s = self.state.lock();
        if let Some(e) = s.start_error.clone() {
            return Err(e);
        }
        s.scan = Some(FakeScan {
            buffer: buffer.0,
            length: buffer_length,
            continuous: config.options.continuous,
        });
        s.cumulative = 0;
        s.running = true;
        Ok(())
    }

    fn query_status(&self, _handle: DeviceHandle) -> Result<ScanStatus, DriverError> {
        let mut s = self.state.lock();
        s.status_calls += 1;
        let length = s.scan.as_ref().map_or(1, |scan| scan.length) as u64;
        Ok(ScanStatus {
            status: if s.running {
                HardwareStatus::Running
            } else {
                HardwareStatus::Idle
            },
            cumulative_sample_count: s.cumulative,
            current_index: (s.cumulative.saturating_sub(1) % length) as usize,
        })
    }

    fn stop_scan(&self, _handle: DeviceHandle) -> Result<(), DriverError> {
        let mut s = self.state.lock();
        s.stop_calls += 1;
        s.running = false;
        Ok(())
    }

    fn copy_range(&self, buffer: BufferId, start: usize, out: &mut [f64]) -> Result<(), DriverError> {
        let mut s = self.state.lock();
        if let Some(e) = s.copy_error.clone() {
            return Err(e);
        }
        let buf = s
            .buffers
            .get(&buffer.0)
            .ok_or_else(|| DriverError::new(-1, "unknown buffer"))?;
        let src = buf
            .get(start..start + out.len())
            .ok_or_else(|| DriverError::new(-2, "copy out of range"))?;
        out.copy_from_slice(src);
        let during = s.advance_on_copy;
        Self::advance_locked(&mut s, during);
        Ok(())
    }

    fn configure_digital_port(
        &self,
        _handle: DeviceHandle,
        port: DigitalPort,
        direction: PortDirection,
    ) -> Result<(), DriverError> {
        let mut s = self.state.lock();
        if let Some(e) = s.io_error.clone() {
            return Err(e);
        }
        s.directions.insert(port, direction);
        Ok(())
    }

    fn read_digital_port(&self, _handle: DeviceHandle, port: DigitalPort) -> Result<u16, DriverError> {
        let s = self.state.lock();
        if let Some(e) = s.io_error.clone() {
            return Err(e);
        }
        Ok(s.ports.get(&port).copied().unwrap_or(0))
    }

    fn write_digital_bit(
        &self,
        _handle: DeviceHandle,
        port: DigitalPort,
        bit: u8,
        value: bool,
    ) -> Result<(), DriverError> {
        let mut s = self.state.lock();
        if let Some(e) = s.io_error.clone() {
            return Err(e);
        }
        let entry = s.ports.entry(port).or_insert(0);
        if value {
            *entry |= 1 << bit;
        } else {
            *entry &= !(1 << bit);
        }
        Ok(())
    }

    fn read_counter(&self, _handle: DeviceHandle, counter: u8) -> Result<u32, DriverError> {
        let s = self.state.lock();
        if let Some(e) = s.io_error.clone() {
            return Err(e);
        }
        Ok(s.counters.get(&counter).copied().unwrap_or(0))
    }
}
