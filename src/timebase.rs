//! Timebase reconstruction.
//!
//! The device sends no timestamps. Time is rebuilt from the frequency code and
//! channel count in each packet header, and from the packet's position in the
//! extended sequence.

use crate::errors::{DriverError, Result};
use crate::protocol::Frequency;

/// Time between two samples of the same channel, in seconds.
pub fn channel_period(freq_code: u8, n_channels: usize) -> Result<f64> {
    let hz = match Frequency::from_code(freq_code) {
        Some(Frequency::Off) | None => return Err(DriverError::InvalidFrequency(freq_code)),
        Some(f) => f.hz(),
    };
    let mut period = 1.0 / f64::from(hz);
    // Dual mode (several channels) or fast interleave (one channel at the top
    // rate): both ADCs feed the stream, doubling the aggregate rate.
    if n_channels > 1 || (n_channels == 1 && freq_code == Frequency::Max.code()) {
        period *= 0.5;
    }
    Ok(period * n_channels as f64)
}

/// Timing of one packet's samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketTiming {
    /// Seconds between samples of one channel.
    pub dt: f64,
    /// Seconds since the origin of the first sample in the packet.
    pub t0: f64,
    pub samples_per_channel: usize,
}

impl PacketTiming {
    /// `position` is the packet's extended sequence minus the origin.
    pub fn new(
        freq_code: u8,
        n_channels: usize,
        samples_per_channel: usize,
        position: i64,
    ) -> Result<Self> {
        let dt = channel_period(freq_code, n_channels)?;
        let packet_duration = samples_per_channel as f64 * dt;
        Ok(Self {
            dt,
            t0: packet_duration * position as f64,
            samples_per_channel,
        })
    }

    /// Sample times expressed in units of `time_scale` seconds.
    pub fn timestamps(&self, time_scale: f64) -> Vec<f64> {
        (0..self.samples_per_channel)
            .map(|k| (self.t0 + k as f64 * self.dt) / time_scale)
            .collect()
    }
}
