pub mod config;
pub mod error;
pub mod recording_result;
pub mod scan_models;
pub mod state;
