pub mod chunk_consumer;
pub mod daq_driver;
pub mod scan_delegate;
pub mod tick_observer;
