//! # daq-scan-sim
//!
//! Simulated DAQ board backend for daq-scan-core.
//!
//! Provides:
//! - `SimulatedDaq`: a `DaqDriver` with driver-owned scan buffers,
//!   digital ports, counters and armed fault injection
//! - `SimBoard`: attachable board descriptions
//! - `Waveform`: the signal written into the scan buffer
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use daq_scan_core::{DeviceSession, DeviceSessionConfig, ScanController};
//! use daq_scan_sim::SimulatedDaq;
//!
//! let daq = Arc::new(SimulatedDaq::new());
//! daq.start_clock(std::time::Duration::from_millis(5))?;
//! let session = Arc::new(DeviceSession::new(daq, DeviceSessionConfig::default()));
//! session.acquire()?;
//! let controller = ScanController::new(session);
//! ```

pub mod board;
mod clock;
pub mod waveform;

pub use board::{SimBoard, SimFaults, SimulatedDaq};
pub use waveform::Waveform;
