use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ScanError;

/// Product IDs of boards known to support hardware-paced background scans.
pub const DEFAULT_SUPPORTED_PRODUCT_IDS: &[u32] = &[0x7D, 0x82, 0xD0, 0xDF, 0xE5, 0x12E];

/// Smallest buffer the driver accepts per channel.
pub const MIN_POINTS_PER_CHANNEL: usize = 10;

/// Analog input voltage range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoltageRange {
    Bip10Volts,
    Bip5Volts,
    Bip2Volts,
    Bip1Volts,
    Uni10Volts,
    Uni5Volts,
}

impl VoltageRange {
    /// (min, max) in volts.
    pub fn span(&self) -> (f64, f64) {
        match self {
            Self::Bip10Volts => (-10.0, 10.0),
            Self::Bip5Volts => (-5.0, 5.0),
            Self::Bip2Volts => (-2.0, 2.0),
            Self::Bip1Volts => (-1.0, 1.0),
            Self::Uni10Volts => (0.0, 10.0),
            Self::Uni5Volts => (0.0, 5.0),
        }
    }
}

impl Default for VoltageRange {
    fn default() -> Self {
        Self::Bip10Volts
    }
}

/// Electrical input mode of an analog channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    Differential,
    SingleEnded,
}

/// Scan mode flags passed to the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Free-run into the circular buffer until stopped.
    pub continuous: bool,
    /// Return from the start call immediately; the scan runs asynchronously.
    pub background: bool,
    /// Deliver engineering units (volts) instead of raw codes.
    pub scaled: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            continuous: true,
            background: true,
            scaled: true,
        }
    }
}

/// Immutable parameters of one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub low_channel: u32,
    pub high_channel: u32,
    /// Samples per second per channel.
    pub rate_hz: u32,
    #[serde(default)]
    pub range: VoltageRange,
    #[serde(default)]
    pub options: ScanOptions,
}

impl ScanConfig {
    pub fn new(low_channel: u32, high_channel: u32, rate_hz: u32) -> Self {
        Self {
            low_channel,
            high_channel,
            rate_hz,
            range: VoltageRange::default(),
            options: ScanOptions::default(),
        }
    }

    pub fn channel_count(&self) -> usize {
        (self.high_channel - self.low_channel + 1) as usize
    }

    /// Header labels, one per scanned channel.
    pub fn channel_labels(&self) -> Vec<String> {
        (self.low_channel..=self.high_channel)
            .map(|ch| format!("Channel {}", ch))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.high_channel < self.low_channel {
            return Err(ScanError::InvalidConfiguration(format!(
                "high channel {} is below low channel {}",
                self.high_channel, self.low_channel
            )));
        }
        if self.rate_hz == 0 {
            return Err(ScanError::InvalidConfiguration("sample rate must be positive".into()));
        }
        if !self.options.background {
            return Err(ScanError::InvalidConfiguration(
                "foreground scans cannot be polled; enable background mode".into(),
            ));
        }
        Ok(())
    }
}

/// How the per-channel buffer depth is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferSizing {
    /// Hold this many seconds of data per channel.
    Duration { seconds: f64 },
    PointsPerChannel(usize),
}

impl BufferSizing {
    /// Requested points per channel before alignment rounding.
    pub fn requested_points(&self, rate_hz: u32) -> Result<usize, ScanError> {
        let points = match *self {
            Self::Duration { seconds } => {
                let points = (rate_hz as f64 * seconds).ceil();
                if !(points.is_finite() && points < usize::MAX as f64) {
                    return Err(ScanError::InvalidConfiguration(format!(
                        "{} s at {} Hz does not fit in a scan buffer",
                        seconds, rate_hz
                    )));
                }
                points as usize
            }
            Self::PointsPerChannel(n) => n,
        };
        Ok(points.max(MIN_POINTS_PER_CHANNEL))
    }
}

impl Default for BufferSizing {
    fn default() -> Self {
        Self::Duration { seconds: 2.0 }
    }
}

/// Whether a recording stops itself after a fixed number of buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingLength {
    Unbounded,
    Buffers(u32),
}

impl Default for RecordingLength {
    fn default() -> Self {
        Self::Unbounded
    }
}

/// Everything the controller needs to start a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    pub scan: ScanConfig,
    #[serde(default)]
    pub sizing: BufferSizing,
    /// Chunks per buffer length; the chunk size is buffer_length / this.
    #[serde(default = "default_chunks_per_buffer")]
    pub chunks_per_buffer: usize,
    #[serde(default)]
    pub length: RecordingLength,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_chunks_per_buffer() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl ScanSettings {
    pub fn new(scan: ScanConfig) -> Self {
        Self {
            scan,
            sizing: BufferSizing::default(),
            chunks_per_buffer: default_chunks_per_buffer(),
            length: RecordingLength::default(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        self.scan.validate()?;
        if self.chunks_per_buffer == 0 {
            return Err(ScanError::InvalidConfiguration("chunks per buffer must be at least 1".into()));
        }
        if let BufferSizing::Duration { seconds } = self.sizing {
            if !(seconds > 0.0 && seconds.is_finite()) {
                return Err(ScanError::InvalidConfiguration("buffer duration must be positive".into()));
            }
        }
        if self.length == RecordingLength::Buffers(0) {
            return Err(ScanError::InvalidConfiguration("bounded recording needs at least one buffer".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ScanError::InvalidConfiguration("poll interval must be positive".into()));
        }
        Ok(())
    }
}

/// Default analog channel setup applied right after a board is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSetup {
    pub channel: u32,
    pub mode: ChannelMode,
    /// Internal A/D data rate in Hz.
    pub data_rate: u32,
}

impl Default for ChannelSetup {
    fn default() -> Self {
        Self {
            channel: 0,
            mode: ChannelMode::Differential,
            data_rate: 1000,
        }
    }
}

/// How the device session discovers and prepares a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSessionConfig {
    pub board: u32,
    pub supported_product_ids: Vec<u32>,
    /// Applied after binding; `None` leaves the board's defaults.
    pub channel_setup: Option<ChannelSetup>,
}

impl Default for DeviceSessionConfig {
    fn default() -> Self {
        Self {
            board: 0,
            supported_product_ids: DEFAULT_SUPPORTED_PRODUCT_IDS.to_vec(),
            channel_setup: Some(ChannelSetup::default()),
        }
    }
}
