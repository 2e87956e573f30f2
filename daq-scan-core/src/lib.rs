//! # daq-scan-core
//!
//! Platform-agnostic continuous analog-input scanning core.
//!
//! Starts a hardware-clocked background scan into a driver-owned circular
//! buffer, tracks the software read cursor against the hardware's sample
//! count, and drains the buffer chunk by chunk into consumers (a CSV file
//! sink, a live rolling window) without re-reading or skipping samples.
//! Board drivers implement the `DaqDriver` trait and plug into the generic
//! `DeviceSession` and `ScanController`.
//!
//! ## Architecture
//!
//! ```text
//! daq-scan-core (this crate)
//! ├── traits/       ← DaqDriver, ChunkConsumer, ScanDelegate, TickObserver
//! ├── models/       ← ScanError, ScanState, ScanConfig/ScanSettings, device models
//! ├── processing/   ← ScanGeometry, ScanCursor, AcquisitionBuffer, LiveSampleFeed
//! ├── session/      ← DeviceSession, ScanController, ScanPoller, TickDispatcher
//! ├── storage/      ← CsvFileSink, metadata sidecar
//! └── io/           ← DiscreteIo façade and widget models
//! ```

pub mod io;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

#[cfg(test)]
mod testing;

// Re-export key types at crate root for convenience.
pub use io::discrete::{DiscreteIo, HeldValue};
pub use io::widgets::{CounterDisplay, DigitalInputIndicator, DigitalOutputToggle};
pub use models::config::{
    BufferSizing, ChannelMode, ChannelSetup, DeviceSessionConfig, RecordingLength, ScanConfig, ScanOptions,
    ScanSettings, VoltageRange,
};
pub use models::error::{DriverError, ScanError};
pub use models::recording_result::{RecordingMetadata, RecordingResult};
pub use models::scan_models::{
    AnalogInputInfo, BufferId, DeviceDescriptor, DeviceHandle, DigitalPort, HardwareStatus, PortDirection,
    ScanDiagnostics, ScanStatus,
};
pub use models::state::ScanState;
pub use processing::live_feed::LiveSampleFeed;
pub use processing::scan_buffer::{AcquisitionBuffer, CopySpan, ScanCursor, ScanGeometry};
pub use session::controller::{PollOutcome, ScanController, SinkErrorCallback};
pub use session::device_session::DeviceSession;
pub use session::dispatcher::TickDispatcher;
pub use session::poller::ScanPoller;
pub use storage::csv_writer::CsvFileSink;
pub use traits::chunk_consumer::{Chunk, ChunkConsumer};
pub use traits::daq_driver::DaqDriver;
pub use traits::scan_delegate::ScanDelegate;
pub use traits::tick_observer::TickObserver;
