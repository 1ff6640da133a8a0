//! USB dual-ADC acquisition driver.
//!
//! This crate configures the ADC through vendor control requests and decodes
//! its stream of 64-byte bulk packets into calibrated, time-stamped,
//! per-channel sample series. Python bindings are available with the
//! `python` feature.
//!
//! # Timing and Synchronization
//!
//! The device sends no timestamps. Time is rebuilt on the host:
//!
//! 1. The 7-bit packet counter is extended into a monotonically increasing
//!    sequence; the packet carrying the resync flag defines the origin.
//! 2. Each packet header announces its frequency code, bit depth and channel
//!    mask, which fix the sample period and the number of samples per channel.
//! 3. Sample times are `position * packet_duration + k * dt`, so a lost packet
//!    leaves a gap in the time axis instead of shifting later samples.
//!
//! With several channels, or one channel at the top rate, the two ADCs are
//! interleaved and the effective sample period is half the nominal one.

pub mod acquisition;
pub mod demux;
pub mod errors;
pub mod logging;
pub mod output;
pub mod protocol;
pub mod registers;
pub mod sequence;
pub mod timebase;
pub mod transport;
pub mod unpack;

#[cfg(feature = "python")]
mod python;

pub use acquisition::{
    decode_packet, Acquisition, AcquisitionResult, AcquisitionSettings, Chunk, StreamStats,
};
pub use errors::*;
pub use protocol::{BitDepth, ChannelSet, Command, Frequency, PacketHeader, Trigger};
pub use registers::{Configurator, DeviceConfig, Register};
pub use sequence::{SequenceState, SequenceStep, SequenceTracker};
pub use transport::{ReplayTransport, Transport, UsbConnector, UsbTransport};
