use crate::models::error::ScanError;
use crate::models::recording_result::RecordingResult;

/// A channel-aligned span of samples extracted in one poll.
///
/// Borrows the controller's staging memory; consumers must copy anything
/// they keep past `accept`.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    /// Increments by one per chunk within a scan, starting at 0.
    pub sequence: u64,
    /// Cumulative index of the first sample in the scan stream.
    pub first_sample: u64,
    pub channel_count: usize,
    pub low_channel: u32,
    pub samples: &'a [f64],
}

impl<'a> Chunk<'a> {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of complete scans (one sample per channel) in the chunk.
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channel_count
    }

    pub fn frames(&self) -> std::slice::ChunksExact<'a, f64> {
        self.samples.chunks_exact(self.channel_count)
    }
}

/// Downstream receiver of extracted chunks.
///
/// `accept` runs synchronously on the poll thread and must return within
/// the poll interval. An error detaches the consumer from the running scan
/// without affecting the scan itself.
pub trait ChunkConsumer: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn accept(&mut self, chunk: &Chunk<'_>) -> Result<(), ScanError>;

    /// Flush and finalize. Called once when the scan ends or the consumer
    /// is detached.
    fn close(&mut self) -> Result<Option<RecordingResult>, ScanError> {
        Ok(None)
    }
}
