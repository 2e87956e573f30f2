use serde::{Deserialize, Serialize};

/// Opaque identifier for one bound board.
///
/// Created by `DeviceSession::acquire` and only valid until the session
/// releases it. Everything else borrows it by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    board: u32,
}

impl DeviceHandle {
    pub(crate) fn new(board: u32) -> Self {
        Self { board }
    }

    /// Board number the handle is bound to.
    pub fn board(&self) -> u32 {
        self.board
    }
}

/// Driver-side identifier of an allocated scan buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// A device reported by the driver's inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub product_id: u32,
    pub product_name: String,
    pub unique_id: String,
}

/// Analog-input capabilities of a bound board.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogInputInfo {
    pub supports_analog_input: bool,
    pub num_channels: u32,
    /// Native transfer packet size in samples; 1 when the board has none.
    pub packet_size: usize,
}

/// Hardware run state of a background scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareStatus {
    Running,
    Idle,
}

/// One status snapshot read from the hardware. Never cached past a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStatus {
    pub status: HardwareStatus,
    /// Samples written by the hardware since the scan started, all channels.
    pub cumulative_sample_count: u64,
    /// Index of the last sample the hardware wrote into the buffer.
    pub current_index: usize,
}

impl ScanStatus {
    pub fn is_running(&self) -> bool {
        self.status == HardwareStatus::Running
    }
}

/// Digital I/O port selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigitalPort {
    FirstPortA,
    FirstPortB,
    AuxPort,
}

impl DigitalPort {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FirstPortA => "FIRSTPORTA",
            Self::FirstPortB => "FIRSTPORTB",
            Self::AuxPort => "AUXPORT",
        }
    }
}

/// Direction of a digital port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

/// Counters collected by the scan controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanDiagnostics {
    pub polls: u64,
    pub idle_polls: u64,
    pub chunks_extracted: u64,
    pub samples_consumed: u64,
    pub wrapped_copies: u64,
    /// Largest number of unread samples seen at any poll.
    pub max_backlog: u64,
    pub consumer_failures: u64,
}
