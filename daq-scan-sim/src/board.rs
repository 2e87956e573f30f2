use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use daq_scan_core::models::config::{ChannelMode, ScanConfig};
use daq_scan_core::models::error::DriverError;
use daq_scan_core::models::scan_models::{
    AnalogInputInfo, BufferId, DeviceDescriptor, DeviceHandle, DigitalPort, HardwareStatus, PortDirection,
    ScanStatus,
};
use daq_scan_core::traits::daq_driver::DaqDriver;

use crate::clock::SimClock;
use crate::waveform::Waveform;

// Driver error codes reported by the simulated board.
pub const ERR_BAD_BOARD: i32 = 1;
pub const ERR_BOARD_IN_USE: i32 = 2;
pub const ERR_BAD_CHANNEL: i32 = 3;
pub const ERR_BAD_RATE: i32 = 4;
pub const ERR_NO_MEMORY: i32 = 5;
pub const ERR_BAD_BUFFER: i32 = 6;
pub const ERR_SCAN_ACTIVE: i32 = 7;

/// One attachable simulated board.
#[derive(Debug, Clone, PartialEq)]
pub struct SimBoard {
    pub descriptor: DeviceDescriptor,
    pub analog_input: AnalogInputInfo,
    /// Highest per-channel rate the board accepts.
    pub max_rate_hz: u32,
}

impl SimBoard {
    /// An eight-channel, 16-bit style multifunction board.
    pub fn multifunction() -> Self {
        Self {
            descriptor: DeviceDescriptor {
                product_id: 0xD0,
                product_name: "SIM-1608".into(),
                unique_id: "SIM0001".into(),
            },
            analog_input: AnalogInputInfo {
                supports_analog_input: true,
                num_channels: 8,
                packet_size: 1,
            },
            max_rate_hz: 500_000,
        }
    }

    /// A digital-only board with no analog input subsystem.
    pub fn digital_only() -> Self {
        Self {
            descriptor: DeviceDescriptor {
                product_id: 0x93,
                product_name: "SIM-DIO24".into(),
                unique_id: "SIM0002".into(),
            },
            analog_input: AnalogInputInfo {
                supports_analog_input: false,
                num_channels: 0,
                packet_size: 1,
            },
            max_rate_hz: 0,
        }
    }

    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.analog_input.packet_size = packet_size;
        self
    }
}

/// Errors armed by tests; each fires on every matching call until cleared.
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    pub inventory: Option<DriverError>,
    pub configure: Option<DriverError>,
    pub alloc: Option<DriverError>,
    pub start: Option<DriverError>,
    pub status: Option<DriverError>,
    pub copy: Option<DriverError>,
    pub io: Option<DriverError>,
}

pub(crate) struct ScanRun {
    pub(crate) board: u32,
    pub(crate) buffer: u64,
    pub(crate) length: usize,
    pub(crate) channel_count: usize,
    pub(crate) low_channel: u32,
    pub(crate) rate_hz: u32,
    pub(crate) continuous: bool,
    pub(crate) cumulative: u64,
    pub(crate) running: bool,
    pub(crate) started: Instant,
}

pub(crate) struct SimState {
    attached: Vec<SimBoard>,
    bound: HashMap<u32, SimBoard>,
    channel_modes: HashMap<(u32, u32), (ChannelMode, u32)>,
    buffers: HashMap<u64, Vec<f64>>,
    next_buffer: u64,
    pub(crate) scan: Option<ScanRun>,
    waveform: Waveform,
    ports: HashMap<DigitalPort, u16>,
    directions: HashMap<DigitalPort, PortDirection>,
    counters: HashMap<u8, u32>,
    faults: SimFaults,
    stop_calls: usize,
}

impl SimState {
    /// Let the scan hardware write `samples` more samples.
    pub(crate) fn advance(&mut self, samples: u64) {
        let Some(scan) = self.scan.as_mut() else {
            return;
        };
        if !scan.running {
            return;
        }
        let Some(buffer) = self.buffers.get_mut(&scan.buffer) else {
            // buffer freed under a running scan; the hardware stops
            scan.running = false;
            return;
        };
        for _ in 0..samples {
            if !scan.continuous && scan.cumulative >= scan.length as u64 {
                scan.running = false;
                break;
            }
            let at = (scan.cumulative % scan.length as u64) as usize;
            buffer[at] = self
                .waveform
                .sample(scan.cumulative, scan.channel_count, scan.low_channel, scan.rate_hz);
            scan.cumulative += 1;
        }
    }
}

/// Software DAQ board.
///
/// Scans only progress when something advances them: call `advance`
/// directly for deterministic tests, or `start_clock` to have a background
/// thread write samples at the configured rate like real hardware.
pub struct SimulatedDaq {
    state: Arc<Mutex<SimState>>,
    clock: Mutex<Option<SimClock>>,
}

impl SimulatedDaq {
    pub fn new() -> Self {
        Self::with_boards(vec![SimBoard::multifunction()])
    }

    pub fn with_boards(boards: Vec<SimBoard>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                attached: boards,
                bound: HashMap::new(),
                channel_modes: HashMap::new(),
                buffers: HashMap::new(),
                next_buffer: 1,
                scan: None,
                waveform: Waveform::default(),
                ports: HashMap::new(),
                directions: HashMap::new(),
                counters: HashMap::new(),
                faults: SimFaults::default(),
                stop_calls: 0,
            })),
            clock: Mutex::new(None),
        }
    }

    pub fn set_waveform(&self, waveform: Waveform) {
        self.state.lock().waveform = waveform;
    }

    pub fn attach(&self, board: SimBoard) {
        self.state.lock().attached.push(board);
    }

    pub fn detach_all(&self) {
        self.state.lock().attached.clear();
    }

    /// Replace the armed faults.
    pub fn set_faults(&self, faults: SimFaults) {
        self.state.lock().faults = faults;
    }

    pub fn faults(&self) -> SimFaults {
        self.state.lock().faults.clone()
    }

    pub fn advance(&self, samples: u64) {
        self.state.lock().advance(samples);
    }

    /// Make the running scan end on its own, as a device fault would.
    pub fn halt(&self) {
        if let Some(scan) = self.state.lock().scan.as_mut() {
            scan.running = false;
        }
    }

    /// Start writing samples in real time, checking every `tick`.
    pub fn start_clock(&self, tick: Duration) -> Result<(), DriverError> {
        let mut clock = self.clock.lock();
        if clock.is_some() {
            return Ok(());
        }
        *clock = Some(SimClock::spawn(Arc::clone(&self.state), tick)?);
        Ok(())
    }

    pub fn stop_clock(&self) {
        if let Some(clock) = self.clock.lock().take() {
            clock.stop();
        }
    }

    pub fn cumulative_samples(&self) -> u64 {
        self.state.lock().scan.as_ref().map_or(0, |s| s.cumulative)
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scan.as_ref().is_some_and(|s| s.running)
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn bound_boards(&self) -> usize {
        self.state.lock().bound.len()
    }

    pub fn stop_calls(&self) -> usize {
        self.state.lock().stop_calls
    }

    pub fn channel_mode(&self, board: u32, channel: u32) -> Option<(ChannelMode, u32)> {
        self.state.lock().channel_modes.get(&(board, channel)).copied()
    }

    pub fn set_input_port(&self, port: DigitalPort, value: u16) {
        self.state.lock().ports.insert(port, value);
    }

    pub fn port_value(&self, port: DigitalPort) -> u16 {
        self.state.lock().ports.get(&port).copied().unwrap_or(0)
    }

    /// Register `count` edges on a counter input.
    pub fn pulse_counter(&self, counter: u8, count: u32) {
        let mut state = self.state.lock();
        let value = state.counters.entry(counter).or_insert(0);
        *value = value.wrapping_add(count);
    }
}

impl Default for SimulatedDaq {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SimulatedDaq {
    fn drop(&mut self) {
        self.stop_clock();
    }
}

fn bound_board<'a>(state: &'a SimState, handle: DeviceHandle) -> Result<&'a SimBoard, DriverError> {
    state
        .bound
        .get(&handle.board())
        .ok_or_else(|| DriverError::new(ERR_BAD_BOARD, format!("board {} is not bound", handle.board())))
}

impl DaqDriver for SimulatedDaq {
    fn inventory(&self) -> Result<Vec<DeviceDescriptor>, DriverError> {
        let state = self.state.lock();
        if let Some(e) = state.faults.inventory.clone() {
            return Err(e);
        }
        Ok(state.attached.iter().map(|b| b.descriptor.clone()).collect())
    }

    fn create_device(&self, board: u32, descriptor: &DeviceDescriptor) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if state.bound.contains_key(&board) {
            return Err(DriverError::new(ERR_BOARD_IN_USE, format!("board {} already in use", board)));
        }
        let found = state
            .attached
            .iter()
            .find(|b| b.descriptor.unique_id == descriptor.unique_id)
            .cloned()
            .ok_or_else(|| DriverError::new(ERR_BAD_BOARD, format!("{} is not attached", descriptor.unique_id)))?;
        log::debug!("sim: bound {} to board {}", found.descriptor.product_name, board);
        state.bound.insert(board, found);
        Ok(())
    }

    fn release_device(&self, board: u32) {
        let mut state = self.state.lock();
        state.bound.remove(&board);
        state.channel_modes.retain(|(b, _), _| *b != board);
    }

    fn analog_input_info(&self, handle: DeviceHandle) -> Result<AnalogInputInfo, DriverError> {
        let state = self.state.lock();
        Ok(bound_board(&state, handle)?.analog_input.clone())
    }

    fn configure_channel(
        &self,
        handle: DeviceHandle,
        channel: u32,
        mode: ChannelMode,
        data_rate: u32,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if let Some(e) = state.faults.configure.clone() {
            return Err(e);
        }
        let board = bound_board(&state, handle)?;
        if channel >= board.analog_input.num_channels {
            return Err(DriverError::new(ERR_BAD_CHANNEL, format!("no analog channel {}", channel)));
        }
        if data_rate == 0 || data_rate > board.max_rate_hz {
            return Err(DriverError::new(ERR_BAD_RATE, format!("data rate {} out of range", data_rate)));
        }
        state.channel_modes.insert((handle.board(), channel), (mode, data_rate));
        Ok(())
    }

    fn alloc_buffer(&self, samples: usize) -> Result<BufferId, DriverError> {
        let mut state = self.state.lock();
        if let Some(e) = state.faults.alloc.clone() {
            return Err(e);
        }
        if samples == 0 {
            return Err(DriverError::new(ERR_NO_MEMORY, "zero-length buffer"));
        }
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(samples)
            .map_err(|e| DriverError::new(ERR_NO_MEMORY, format!("cannot allocate {} samples: {}", samples, e)))?;
        buffer.resize(samples, 0.0);
        let id = state.next_buffer;
        state.next_buffer += 1;
        state.buffers.insert(id, buffer);
        Ok(BufferId(id))
    }

    fn free_buffer(&self, buffer: BufferId) {
        self.state.lock().buffers.remove(&buffer.0);
    }

    fn start_continuous_scan(
        &self,
        handle: DeviceHandle,
        config: &ScanConfig,
        buffer: BufferId,
        buffer_length: usize,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if let Some(e) = state.faults.start.clone() {
            return Err(e);
        }
        let board = bound_board(&state, handle)?;
        if config.high_channel >= board.analog_input.num_channels {
            return Err(DriverError::new(
                ERR_BAD_CHANNEL,
                format!("channel {} out of range", config.high_channel),
            ));
        }
        if config.rate_hz == 0 || config.rate_hz > board.max_rate_hz {
            return Err(DriverError::new(ERR_BAD_RATE, format!("rate {} Hz out of range", config.rate_hz)));
        }
        if state.scan.as_ref().is_some_and(|s| s.running) {
            return Err(DriverError::new(ERR_SCAN_ACTIVE, "a scan is already running"));
        }
        match state.buffers.get(&buffer.0) {
            Some(b) if b.len() >= buffer_length => {}
            _ => return Err(DriverError::new(ERR_BAD_BUFFER, "buffer missing or too small")),
        }
        if buffer_length % config.channel_count() != 0 {
            return Err(DriverError::new(ERR_BAD_BUFFER, "buffer is not a whole number of frames"));
        }

        state.scan = Some(ScanRun {
            board: handle.board(),
            buffer: buffer.0,
            length: buffer_length,
            channel_count: config.channel_count(),
            low_channel: config.low_channel,
            rate_hz: config.rate_hz,
            continuous: config.options.continuous,
            cumulative: 0,
            running: true,
            started: Instant::now(),
        });
        log::debug!(
            "sim: scan started on board {} ({} channels @ {} Hz, {} samples)",
            handle.board(),
            config.channel_count(),
            config.rate_hz,
            buffer_length
        );
        Ok(())
    }

    fn query_status(&self, handle: DeviceHandle) -> Result<ScanStatus, DriverError> {
        let state = self.state.lock();
        if let Some(e) = state.faults.status.clone() {
            return Err(e);
        }
        bound_board(&state, handle)?;
        Ok(match state.scan.as_ref().filter(|s| s.board == handle.board()) {
            Some(scan) => ScanStatus {
                status: if scan.running {
                    HardwareStatus::Running
                } else {
                    HardwareStatus::Idle
                },
                cumulative_sample_count: scan.cumulative,
                current_index: (scan.cumulative.saturating_sub(1) % scan.length as u64) as usize,
            },
            None => ScanStatus {
                status: HardwareStatus::Idle,
                cumulative_sample_count: 0,
                current_index: 0,
            },
        })
    }

    fn stop_scan(&self, handle: DeviceHandle) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        bound_board(&state, handle)?;
        state.stop_calls += 1;
        if let Some(scan) = state.scan.as_mut() {
            scan.running = false;
        }
        Ok(())
    }

    fn copy_range(&self, buffer: BufferId, start: usize, out: &mut [f64]) -> Result<(), DriverError> {
        let state = self.state.lock();
        if let Some(e) = state.faults.copy.clone() {
            return Err(e);
        }
        let src = state
            .buffers
            .get(&buffer.0)
            .and_then(|b| b.get(start..start + out.len()))
            .ok_or_else(|| DriverError::new(ERR_BAD_BUFFER, format!("range {}+{} out of bounds", start, out.len())))?;
        out.copy_from_slice(src);
        Ok(())
    }

    fn configure_digital_port(
        &self,
        handle: DeviceHandle,
        port: DigitalPort,
        direction: PortDirection,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if let Some(e) = state.faults.io.clone() {
            return Err(e);
        }
        bound_board(&state, handle)?;
        state.directions.insert(port, direction);
        Ok(())
    }

    fn read_digital_port(&self, handle: DeviceHandle, port: DigitalPort) -> Result<u16, DriverError> {
        let state = self.state.lock();
        if let Some(e) = state.faults.io.clone() {
            return Err(e);
        }
        bound_board(&state, handle)?;
        Ok(state.ports.get(&port).copied().unwrap_or(0))
    }

    fn write_digital_bit(
        &self,
        handle: DeviceHandle,
        port: DigitalPort,
        bit: u8,
        value: bool,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if let Some(e) = state.faults.io.clone() {
            return Err(e);
        }
        bound_board(&state, handle)?;
        if state.directions.get(&port) == Some(&PortDirection::Input) {
            return Err(DriverError::new(ERR_BAD_CHANNEL, format!("{} is configured as input", port.name())));
        }
        let mask = state.ports.entry(port).or_insert(0);
        if value {
            *mask |= 1 << bit;
        } else {
            *mask &= !(1 << bit);
        }
        Ok(())
    }

    fn read_counter(&self, handle: DeviceHandle, counter: u8) -> Result<u32, DriverError> {
        let state = self.state.lock();
        if let Some(e) = state.faults.io.clone() {
            return Err(e);
        }
        bound_board(&state, handle)?;
        Ok(state.counters.get(&counter).copied().unwrap_or(0))
    }
}
