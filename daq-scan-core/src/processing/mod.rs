pub mod live_feed;
pub mod scan_buffer;
