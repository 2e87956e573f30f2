use std::f64::consts::TAU;

/// Signal the simulated board writes into its scan buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Each sample is its own cumulative sample index. Makes dropped,
    /// repeated or reordered samples visible in the output.
    Ramp,
    /// Per-channel sine; channel `n` is phase-shifted by `n` eighths of a
    /// period.
    Sine { amplitude: f64, frequency_hz: f64 },
    Constant(f64),
}

impl Default for Waveform {
    fn default() -> Self {
        Self::Ramp
    }
}

impl Waveform {
    /// Value of the sample with cumulative index `sample` in a scan of
    /// `channel_count` channels starting at `low_channel`.
    pub fn sample(&self, sample: u64, channel_count: usize, low_channel: u32, rate_hz: u32) -> f64 {
        match *self {
            Self::Ramp => sample as f64,
            Self::Sine {
                amplitude,
                frequency_hz,
            } => {
                let cc = channel_count.max(1) as u64;
                let frame = sample / cc;
                let channel = low_channel as u64 + sample % cc;
                let t = frame as f64 / rate_hz.max(1) as f64;
                amplitude * (TAU * frequency_hz * t + TAU * channel as f64 / 8.0).sin()
            }
            Self::Constant(v) => v,
        }
    }
}
