use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::config::ScanConfig;
use crate::models::error::ScanError;
use crate::traits::chunk_consumer::{Chunk, ChunkConsumer};

/// Fixed-size rolling window of the most recent frames.
#[derive(Debug)]
struct RollingWindow {
    channel_count: usize,
    capacity_frames: usize,
    // frame-major, channel-interleaved
    data: Vec<f64>,
    next_frame: usize,
    filled_frames: usize,
    last_sequence: Option<u64>,
    sequence_gaps: u64,
    frames_seen: u64,
}

impl RollingWindow {
    fn push_frames(&mut self, samples: &[f64]) {
        let cc = self.channel_count;
        let frames = samples.len() / cc;
        // Only the newest `capacity_frames` frames can survive the write.
        let skip = frames.saturating_sub(self.capacity_frames);
        for frame in samples.chunks_exact(cc).skip(skip) {
            let at = self.next_frame * cc;
            self.data[at..at + cc].copy_from_slice(frame);
            self.next_frame = (self.next_frame + 1) % self.capacity_frames;
        }
        self.filled_frames = (self.filled_frames + frames).min(self.capacity_frames);
        self.frames_seen += frames as u64;
    }

    fn oldest_frame(&self) -> usize {
        if self.filled_frames < self.capacity_frames {
            0
        } else {
            self.next_frame
        }
    }
}

/// Live sample feed for plot rendering.
///
/// Keeps the last `points_per_channel` values of every scanned channel.
/// Cloning yields another handle to the same window, so one clone can be
/// registered with the controller while a renderer reads from another.
/// `accept` never allocates.
#[derive(Debug, Clone)]
pub struct LiveSampleFeed {
    low_channel: u32,
    window: Arc<Mutex<RollingWindow>>,
}

impl LiveSampleFeed {
    pub fn new(low_channel: u32, channel_count: usize, points_per_channel: usize) -> Self {
        let channel_count = channel_count.max(1);
        let capacity_frames = points_per_channel.max(1);
        Self {
            low_channel,
            window: Arc::new(Mutex::new(RollingWindow {
                channel_count,
                capacity_frames,
                data: vec![0.0; channel_count * capacity_frames],
                next_frame: 0,
                filled_frames: 0,
                last_sequence: None,
                sequence_gaps: 0,
                frames_seen: 0,
            })),
        }
    }

    pub fn for_scan(config: &ScanConfig, points_per_channel: usize) -> Self {
        Self::new(config.low_channel, config.channel_count(), points_per_channel)
    }

    pub fn channel_count(&self) -> usize {
        self.window.lock().channel_count
    }

    /// Frames currently held (at most `points_per_channel`).
    pub fn len(&self) -> usize {
        self.window.lock().filled_frames
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames accepted since creation.
    pub fn frames_seen(&self) -> u64 {
        self.window.lock().frames_seen
    }

    /// Chunks that arrived out of sequence.
    pub fn sequence_gaps(&self) -> u64 {
        self.window.lock().sequence_gaps
    }

    /// Oldest-to-newest values of one scanned channel, by board channel number.
    pub fn channel(&self, channel: u32) -> Vec<f64> {
        let mut out = Vec::new();
        self.channel_into(channel, &mut out);
        out
    }

    /// Like `channel`, reusing the caller's vector.
    pub fn channel_into(&self, channel: u32, out: &mut Vec<f64>) {
        out.clear();
        let w = self.window.lock();
        let Some(offset) = channel.checked_sub(self.low_channel).map(|c| c as usize) else {
            return;
        };
        if offset >= w.channel_count {
            return;
        }
        let start = w.oldest_frame();
        out.extend((0..w.filled_frames).map(|i| {
            let frame = (start + i) % w.capacity_frames;
            w.data[frame * w.channel_count + offset]
        }));
    }

    /// The most recent frame, one value per channel.
    pub fn latest(&self) -> Option<Vec<f64>> {
        let w = self.window.lock();
        if w.filled_frames == 0 {
            return None;
        }
        let frame = (w.next_frame + w.capacity_frames - 1) % w.capacity_frames;
        let at = frame * w.channel_count;
        Some(w.data[at..at + w.channel_count].to_vec())
    }

    pub fn clear(&self) {
        let mut w = self.window.lock();
        w.next_frame = 0;
        w.filled_frames = 0;
        w.last_sequence = None;
    }
}

impl ChunkConsumer for LiveSampleFeed {
    fn name(&self) -> &str {
        "live-feed"
    }

    fn accept(&mut self, chunk: &Chunk<'_>) -> Result<(), ScanError> {
        let mut w = self.window.lock();
        if chunk.channel_count != w.channel_count || chunk.low_channel != self.low_channel {
            return Err(ScanError::InvalidConfiguration(format!(
                "live feed holds {} channels from {}, chunk has {} from {}",
                w.channel_count, self.low_channel, chunk.channel_count, chunk.low_channel
            )));
        }
        match w.last_sequence {
            // a new scan restarts numbering at zero
            Some(prev) if chunk.sequence != 0 && chunk.sequence != prev + 1 => {
                w.sequence_gaps += 1;
                log::warn!("live feed: chunk {} follows {}", chunk.sequence, prev);
            }
            _ => {}
        }
        w.last_sequence = Some(chunk.sequence);
        w.push_frames(chunk.samples);
        Ok(())
    }
}
