//! Wire-level constants and enumerated codes of the USB ADC device.
//!
//! Every bulk packet starts with a 4-byte little-endian header:
//!
//! | byte | content                                                  |
//! |------|----------------------------------------------------------|
//! | 0    | sequence: bit 7 = resync flag, bits 0-6 = wrapping counter |
//! | 1-2  | channel mask, bit `i` set when channel `i` is sampled     |
//! | 3    | mode: low nibble = bits per sample, high nibble = frequency code |
//!
//! followed by the packed sample payload (60 bytes on current firmware).

use std::fmt;
use std::str::FromStr;

use crate::errors::{DriverError, Result};

// ============================================================================
// Constants
// ============================================================================

pub const VENDOR_ID: u16 = 0x1A87;
pub const PRODUCT_ID: u16 = 0x5513;

/// Bulk IN endpoint carrying sample packets.
pub const SAMPLES_ENDPOINT: u8 = 0x81;

/// Vendor control request used for every register write.
pub const REQUEST_SETUP: u8 = 1;

pub const HEADER_SIZE: usize = 4;
pub const SAMPLE_SIZE: usize = 60;
pub const PACKET_SIZE: usize = HEADER_SIZE + SAMPLE_SIZE;

pub const TOTAL_CHANNELS: u8 = 10;
pub const SELECT_ALL_CHANNELS: u16 = (1 << TOTAL_CHANNELS) - 1;

/// Full-scale value of a normalized sample.
pub const MAX_LEVEL: u16 = 0xFFF;

const MODE_BITS: u8 = 0x0F;
const MODE_FREQUENCY: u8 = 0xF0;
const SEQUENCE_RESYNC: u8 = 0x80;
const SEQUENCE_COUNTER: u8 = 0x7F;

// ============================================================================
// Enumerated codes
// ============================================================================

/// Acquisition command written to the `cmd` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    Stop = 0,
    /// Capture one triggered block, then stop.
    #[default]
    Once = 1,
    /// Re-arm the trigger after every block.
    Continuous = 2,
}

impl Command {
    pub const ALL: [Command; 3] = [Command::Stop, Command::Once, Command::Continuous];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Stop => "stop",
            Command::Once => "once",
            Command::Continuous => "continuous",
        }
    }
}

/// Trigger condition written to the `trigger` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trigger {
    #[default]
    None = 0,
    Rising = 1,
    Falling = 2,
    Threshold = 3,
    /// Low pulse with a length between `trig_t_min` and `trig_t_max` samples.
    StrobeLo = 4,
    /// High pulse with a length between `trig_t_min` and `trig_t_max` samples.
    StrobeHi = 5,
}

impl Trigger {
    pub const ALL: [Trigger; 6] = [
        Trigger::None,
        Trigger::Rising,
        Trigger::Falling,
        Trigger::Threshold,
        Trigger::StrobeLo,
        Trigger::StrobeHi,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Trigger::None => "none",
            Trigger::Rising => "rising",
            Trigger::Falling => "falling",
            Trigger::Threshold => "threshold",
            Trigger::StrobeLo => "strobelo",
            Trigger::StrobeHi => "strobehi",
        }
    }
}

/// Per-ADC sampling frequency, as encoded in the high nibble of the mode byte.
///
/// With more than one active channel the two ADCs run in dual mode, and with a
/// single channel at [`Frequency::Max`] they run in fast interleave mode. In
/// both cases the aggregate rate is twice the nominal per-ADC frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Off = 0,
    Max = 1,
    Khz500 = 2,
    Khz200 = 3,
    Khz100 = 4,
    Khz50 = 5,
    Khz20 = 6,
    Khz10 = 7,
    Khz5 = 8,
    Khz2 = 9,
    Khz1 = 10,
}

impl Frequency {
    pub const ALL: [Frequency; 11] = [
        Frequency::Off,
        Frequency::Max,
        Frequency::Khz500,
        Frequency::Khz200,
        Frequency::Khz100,
        Frequency::Khz50,
        Frequency::Khz20,
        Frequency::Khz10,
        Frequency::Khz5,
        Frequency::Khz2,
        Frequency::Khz1,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Nominal per-ADC rate in Hz.
    pub fn hz(self) -> u32 {
        match self {
            Frequency::Off => 0,
            Frequency::Max => 857_143,
            Frequency::Khz500 => 500_000,
            Frequency::Khz200 => 200_000,
            Frequency::Khz100 => 100_000,
            Frequency::Khz50 => 50_000,
            Frequency::Khz20 => 20_000,
            Frequency::Khz10 => 10_000,
            Frequency::Khz5 => 5_000,
            Frequency::Khz2 => 2_000,
            Frequency::Khz1 => 1_000,
        }
    }

    /// Parse a rate in Hz into its code, returning an error on values the device does not offer.
    pub fn from_hz_checked(hz: u32) -> anyhow::Result<Self> {
        match Self::ALL.into_iter().find(|f| f.hz() == hz) {
            Some(f) => Ok(f),
            None => {
                let supported: Vec<String> =
                    Self::ALL.iter().map(|f| f.hz().to_string()).collect();
                anyhow::bail!(
                    "Invalid frequency {hz}. Supported: {}.",
                    supported.join(", ")
                )
            }
        }
    }
}

/// Sample resolution, as encoded in the low nibble of the mode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    /// 2 bits per sample, four samples per byte.
    Digital = 2,
    /// 4 bits per sample, two samples per byte.
    Lo = 4,
    /// 8 bits per sample.
    Mid = 8,
    /// 12 bits per sample, two samples per three bytes.
    Hi = 12,
}

impl BitDepth {
    pub const ALL: [BitDepth; 4] = [BitDepth::Digital, BitDepth::Lo, BitDepth::Mid, BitDepth::Hi];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|b| b.code() == code)
            .ok_or(DriverError::UnsupportedBitDepth(code))
    }
}

macro_rules! named_from_str {
    ($ty:ident, $what:literal) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                $ty::ALL
                    .into_iter()
                    .find(|v| v.name().eq_ignore_ascii_case(s))
                    .ok_or_else(|| {
                        let names: Vec<&str> = $ty::ALL.iter().map(|v| v.name()).collect();
                        format!("invalid {} '{}' (expected one of: {})", $what, s, names.join(", "))
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

named_from_str!(Command, "command");
named_from_str!(Trigger, "trigger");

// ============================================================================
// Channel set
// ============================================================================

/// Ascending list of active channel indices.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelSet(Vec<u8>);

impl ChannelSet {
    /// Channels whose bit is set in `mask`; bits above the channel count are ignored.
    pub fn from_mask(mask: u16) -> Self {
        Self((0..TOTAL_CHANNELS).filter(|i| mask & (1 << i) != 0).collect())
    }

    /// Build a set from arbitrary indices, dropping duplicates and out-of-range values.
    pub fn from_indices(indices: &[u8]) -> Self {
        let mut valid: Vec<u8> = indices
            .iter()
            .copied()
            .filter(|&ch| ch < TOTAL_CHANNELS)
            .collect();
        valid.sort_unstable();
        valid.dedup();
        Self(valid)
    }

    pub fn to_mask(&self) -> u16 {
        self.0.iter().fold(0u16, |mask, &ch| mask | (1 << ch))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }
}

/// Column label used for a channel in results and output tables.
pub fn channel_label(index: u8) -> String {
    format!("CH.{index}")
}

// ============================================================================
// Packet header
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub sequence: u8,
    pub channel_mask: u16,
    pub mode: u8,
}

impl PacketHeader {
    /// Split a raw packet into its header and payload.
    pub fn split(packet: &[u8]) -> Result<(PacketHeader, &[u8])> {
        if packet.len() < HEADER_SIZE {
            return Err(DriverError::PacketTooShort(packet.len()));
        }
        let header = PacketHeader {
            sequence: packet[0],
            channel_mask: u16::from_le_bytes([packet[1], packet[2]]),
            mode: packet[3],
        };
        Ok((header, &packet[HEADER_SIZE..]))
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let [lo, hi] = self.channel_mask.to_le_bytes();
        [self.sequence, lo, hi, self.mode]
    }

    /// Wrapping 7-bit packet counter.
    pub fn counter(&self) -> u8 {
        self.sequence & SEQUENCE_COUNTER
    }

    /// Set by the device on the first packet after it restarted counting.
    pub fn is_resync(&self) -> bool {
        self.sequence & SEQUENCE_RESYNC != 0
    }

    pub fn bit_depth_code(&self) -> u8 {
        self.mode & MODE_BITS
    }

    pub fn frequency_code(&self) -> u8 {
        (self.mode & MODE_FREQUENCY) >> 4
    }

    pub fn channels(&self) -> ChannelSet {
        ChannelSet::from_mask(self.channel_mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields_are_little_endian() {
        let packet = [0x85, 0x24, 0x01, 0x4C, 0xAA];
        let (header, payload) = PacketHeader::split(&packet).unwrap();
        assert_eq!(header.counter(), 5);
        assert!(header.is_resync());
        assert_eq!(header.channel_mask, 0x0124);
        assert_eq!(header.bit_depth_code(), 12);
        assert_eq!(header.frequency_code(), 4);
        assert_eq!(header.channels().as_slice(), &[2, 5, 8]);
        assert_eq!(payload, &[0xAA]);
        assert_eq!(header.to_bytes(), [0x85, 0x24, 0x01, 0x4C]);
    }

    #[test]
    fn short_packet_is_rejected() {
        let err = PacketHeader::split(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, DriverError::PacketTooShort(3)));
    }

    #[test]
    fn mask_ignores_bits_above_channel_count() {
        let set = ChannelSet::from_mask(0xFC01);
        assert_eq!(set.as_slice(), &[0]);
        assert_eq!(ChannelSet::from_indices(&[5, 2, 2, 11]).to_mask(), 0b100100);
    }

    #[test]
    fn frequency_table_round_trips_through_hz() {
        assert_eq!(Frequency::from_code(1).map(Frequency::hz), Some(857_143));
        assert_eq!(Frequency::from_code(10).map(Frequency::hz), Some(1_000));
        assert_eq!(Frequency::from_code(11), None);
        assert_eq!(Frequency::from_hz_checked(200_000).unwrap(), Frequency::Khz200);
        assert!(Frequency::from_hz_checked(123).is_err());
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("Continuous".parse::<Command>().unwrap(), Command::Continuous);
        assert_eq!("strobehi".parse::<Trigger>().unwrap(), Trigger::StrobeHi);
        assert_eq!(Trigger::from_code(3), Some(Trigger::Threshold));
        assert!("sometimes".parse::<Command>().is_err());
    }

    #[test]
    fn only_four_bit_depths_exist() {
        assert_eq!(BitDepth::from_code(8).unwrap(), BitDepth::Mid);
        assert!(matches!(
            BitDepth::from_code(6),
            Err(DriverError::UnsupportedBitDepth(6))
        ));
    }
}
