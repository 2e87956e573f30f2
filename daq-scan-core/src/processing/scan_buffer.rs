use std::ops::Range;

use crate::models::config::ScanSettings;
use crate::models::error::{DriverError, ScanError};
use crate::models::scan_models::BufferId;

/// Geometry of the circular acquisition buffer.
///
/// Samples are channel-interleaved: sample `i` belongs to channel
/// `i % channel_count`. `chunk_size` divides `buffer_length` and is a
/// multiple of `channel_count`, so no chunk ever splits a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanGeometry {
    channel_count: usize,
    points_per_channel: usize,
    chunk_size: usize,
}

impl ScanGeometry {
    pub fn new(channel_count: usize, points_per_channel: usize, chunk_size: usize) -> Result<Self, ScanError> {
        if channel_count == 0 || points_per_channel == 0 || chunk_size == 0 {
            return Err(ScanError::InvalidConfiguration(
                "channel count, points per channel and chunk size must be non-zero".into(),
            ));
        }
        let buffer_length = channel_count
            .checked_mul(points_per_channel)
            .ok_or_else(|| too_large(channel_count, points_per_channel))?;
        if chunk_size % channel_count != 0 {
            return Err(ScanError::InvalidConfiguration(format!(
                "chunk size {} is not a multiple of {} channels",
                chunk_size, channel_count
            )));
        }
        if buffer_length % chunk_size != 0 {
            return Err(ScanError::InvalidConfiguration(format!(
                "chunk size {} does not divide buffer length {}",
                chunk_size, buffer_length
            )));
        }
        Ok(Self {
            channel_count,
            points_per_channel,
            chunk_size,
        })
    }

    /// Size the buffer for `settings` on a board with the given transfer
    /// packet size.
    ///
    /// Points per channel are rounded up to a multiple of both the packet
    /// size and `chunks_per_buffer`, which keeps the buffer packet-aligned
    /// and makes `buffer_length / chunks_per_buffer` a whole number of scans.
    pub fn plan(settings: &ScanSettings, packet_size: usize) -> Result<Self, ScanError> {
        settings.validate()?;
        let channel_count = settings.scan.channel_count();
        let requested = settings.sizing.requested_points(settings.scan.rate_hz)?;
        let align = lcm(settings.chunks_per_buffer, packet_size.max(1))
            .ok_or_else(|| too_large(channel_count, requested))?;
        let points_per_channel = requested
            .div_ceil(align)
            .checked_mul(align)
            .ok_or_else(|| too_large(channel_count, requested))?;
        let chunk_size = points_per_channel / settings.chunks_per_buffer * channel_count;
        Self::new(channel_count, points_per_channel, chunk_size)
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn points_per_channel(&self) -> usize {
        self.points_per_channel
    }

    pub fn buffer_length(&self) -> usize {
        self.channel_count * self.points_per_channel
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn lcm(a: usize, b: usize) -> Option<usize> {
    (a / gcd(a, b)).checked_mul(b)
}

fn too_large(channel_count: usize, points_per_channel: usize) -> ScanError {
    ScanError::InvalidConfiguration(format!(
        "{} channels × {} points per channel does not fit in a scan buffer",
        channel_count, points_per_channel
    ))
}

/// Software read position over the hardware-written buffer.
///
/// `total_consumed` only grows; the buffer index is derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCursor {
    total_consumed: u64,
    buffer_length: usize,
}

impl ScanCursor {
    pub fn new(buffer_length: usize) -> Self {
        Self::at(buffer_length, 0)
    }

    /// Cursor that has already consumed `total_consumed` samples.
    pub fn at(buffer_length: usize, total_consumed: u64) -> Self {
        Self {
            total_consumed,
            buffer_length,
        }
    }

    pub fn total_consumed(&self) -> u64 {
        self.total_consumed
    }

    /// Next unread position in the buffer.
    pub fn buffer_index(&self) -> usize {
        (self.total_consumed % self.buffer_length as u64) as usize
    }

    /// Unread samples given the hardware's cumulative count.
    pub fn available(&self, hardware_count: u64) -> u64 {
        hardware_count.saturating_sub(self.total_consumed)
    }

    /// More unread samples than the buffer holds: the oldest were overwritten.
    pub fn is_overrun(&self, hardware_count: u64) -> bool {
        self.available(hardware_count) > self.buffer_length as u64
    }

    /// Buffer ranges holding the next `count` unread samples.
    pub fn span(&self, count: usize) -> CopySpan {
        debug_assert!(count <= self.buffer_length);
        let start = self.buffer_index();
        let tail_room = self.buffer_length - start;
        if count <= tail_room {
            CopySpan {
                first: start..start + count,
                second: None,
            }
        } else {
            CopySpan {
                first: start..self.buffer_length,
                second: Some(0..count - tail_room),
            }
        }
    }

    pub fn advance(&mut self, count: usize) {
        self.total_consumed += count as u64;
    }
}

/// Up to two contiguous buffer ranges making up one extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySpan {
    pub first: Range<usize>,
    /// Head of the buffer, present when the span wraps.
    pub second: Option<Range<usize>>,
}

impl CopySpan {
    pub fn len(&self) -> usize {
        self.first.len() + self.second.as_ref().map_or(0, |r| r.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn wraps(&self) -> bool {
        self.second.is_some()
    }
}

/// A driver-owned buffer allocated for one scan.
///
/// Freed by the controller on every exit path; never outlives the scan.
#[derive(Debug)]
pub struct AcquisitionBuffer {
    id: BufferId,
    geometry: ScanGeometry,
}

impl AcquisitionBuffer {
    pub fn new(id: BufferId, geometry: ScanGeometry) -> Self {
        Self { id, geometry }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn geometry(&self) -> &ScanGeometry {
        &self.geometry
    }

    /// Copy `span` into `out` via `read(start, dest)`, tail part first.
    pub fn copy_span<F>(&self, span: &CopySpan, out: &mut [f64], mut read: F) -> Result<(), DriverError>
    where
        F: FnMut(BufferId, usize, &mut [f64]) -> Result<(), DriverError>,
    {
        debug_assert_eq!(out.len(), span.len());
        let (head, tail) = out.split_at_mut(span.first.len());
        read(self.id, span.first.start, head)?;
        if let Some(second) = &span.second {
            read(self.id, second.start, tail)?;
        }
        Ok(())
    }
}
