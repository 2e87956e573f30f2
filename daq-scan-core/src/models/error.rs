use thiserror::Error;

/// Failure reported by the vendor driver binding.
///
/// Carries the driver's numeric error code alongside its message so callers
/// can surface the exact code to the operator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("driver error {code}: {message}")]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors that can occur while acquiring a board, running a scan,
/// writing chunks, or driving discrete I/O.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("no DAQ devices found")]
    NoDeviceFound,

    #[error("no supported DAQ device found among {found} detected")]
    NoSupportedDeviceFound { found: usize },

    #[error("a DAQ device is already bound to board {board}")]
    DeviceBusy { board: u32 },

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("configuration rejected by driver (code {code}): {message}")]
    ConfigurationRejected { code: i32, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to allocate {samples}-sample scan buffer: {reason}")]
    AllocationFailed { samples: usize, reason: String },

    #[error("scan start rejected by driver (code {code}): {message}")]
    ScanStartRejected { code: i32, message: String },

    #[error(
        "buffer overrun: {available} samples pending exceed the {buffer_length}-sample buffer \
         (consumed {consumed}, hardware count {hardware_count}); unread data was overwritten"
    )]
    BufferOverrun {
        available: u64,
        buffer_length: usize,
        consumed: u64,
        hardware_count: u64,
    },

    #[error("continuous scan ended without a stop request after {consumed} samples")]
    ScanEndedUnexpectedly { consumed: u64 },

    #[error("driver fault during scan (code {code}): {message}")]
    DriverFault { code: i32, message: String },

    #[error("cannot open output file: {0}")]
    FileUnwritable(String),

    #[error("write error: {0}")]
    WriteError(String),

    #[error("cannot read recording metadata {path}: {reason}")]
    MetadataUnreadable { path: String, reason: String },

    #[error("discrete I/O transport error (code {code}): {message}")]
    IoTransport { code: i32, message: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
}

impl ScanError {
    /// Whether this error ends the active scan.
    pub fn is_fatal_to_scan(&self) -> bool {
        matches!(
            self,
            Self::BufferOverrun { .. } | Self::DriverFault { .. } | Self::ScanStartRejected { .. }
        )
    }

    /// Device discovery and binding failures.
    pub fn is_device_unavailable(&self) -> bool {
        matches!(
            self,
            Self::NoDeviceFound
                | Self::NoSupportedDeviceFound { .. }
                | Self::DeviceBusy { .. }
                | Self::DeviceUnavailable(_)
        )
    }

    pub(crate) fn configuration_rejected(e: DriverError) -> Self {
        Self::ConfigurationRejected {
            code: e.code,
            message: e.message,
        }
    }

    pub(crate) fn scan_start_rejected(e: DriverError) -> Self {
        Self::ScanStartRejected {
            code: e.code,
            message: e.message,
        }
    }

    pub(crate) fn driver_fault(e: DriverError) -> Self {
        Self::DriverFault {
            code: e.code,
            message: e.message,
        }
    }

    pub(crate) fn io_transport(e: DriverError) -> Self {
        Self::IoTransport {
            code: e.code,
            message: e.message,
        }
    }
}
