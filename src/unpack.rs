//! Sample payload unpacking.
//!
//! All depths are normalized onto the 12-bit range `0..=0xFFF` by shifting
//! narrower samples up, so a 2-bit `0b11` and a 12-bit `0xC00` read the same
//! before voltage scaling. Within a byte, samples are ordered MSB first.

use crate::errors::Result;
use crate::protocol::{BitDepth, MAX_LEVEL};

/// Unpack `payload` stored with bit-depth `code` into normalized values.
pub fn unpack_samples(payload: &[u8], code: u8) -> Result<Vec<u16>> {
    let depth = BitDepth::from_code(code)?;
    Ok(unpack(payload, depth))
}

pub fn unpack(payload: &[u8], depth: BitDepth) -> Vec<u16> {
    match depth {
        BitDepth::Digital => payload
            .iter()
            .flat_map(|&b| {
                let b = u16::from(b);
                [
                    (b & 0xC0) << 4,
                    (b & 0x30) << 6,
                    (b & 0x0C) << 8,
                    (b & 0x03) << 10,
                ]
            })
            .collect(),
        BitDepth::Lo => payload
            .iter()
            .flat_map(|&b| {
                let b = u16::from(b);
                [(b & 0xF0) << 4, (b & 0x0F) << 8]
            })
            .collect(),
        BitDepth::Mid => payload.iter().map(|&b| u16::from(b) << 4).collect(),
        // Two samples share the middle byte: its high nibble completes the
        // first sample, its low nibble completes the second.
        BitDepth::Hi => payload
            .chunks_exact(3)
            .flat_map(|t| {
                let (b1, b2, b3) = (u16::from(t[0]), u16::from(t[1]), u16::from(t[2]));
                [(b1 << 4) | (b2 >> 4), (b3 << 4) | (b2 & 0x0F)]
            })
            .collect(),
    }
}

/// Convert a normalized value to volts against reference `v_ref`.
#[inline]
pub fn to_voltage(value: u16, v_ref: f64) -> f64 {
    f64::from(value) * v_ref / f64::from(MAX_LEVEL)
}
