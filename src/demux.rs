//! Splitting interleaved samples into per-channel series.

use crate::errors::{DriverError, Result};
use crate::protocol::ChannelSet;

/// Number of complete sample rows in `n_values` values across `n_channels` channels.
pub fn samples_per_channel(n_values: usize, n_channels: usize) -> Result<usize> {
    if n_channels == 0 {
        return Err(DriverError::ChannelSetEmpty);
    }
    Ok(n_values / n_channels)
}

/// One series per active channel, in channel order. Values past the last
/// complete row are dropped.
pub fn demux<T: Copy>(flat: &[T], channels: &ChannelSet) -> Result<Vec<(u8, Vec<T>)>> {
    let n = channels.len();
    let spc = samples_per_channel(flat.len(), n)?;
    Ok(channels
        .iter()
        .enumerate()
        .map(|(i, ch)| (ch, (0..spc).map(|k| flat[k * n + i]).collect()))
        .collect())
}
