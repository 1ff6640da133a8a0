//! Acquisition session: turns the packet stream into calibrated series.
//!
//! Each packet goes through the same pipeline:
//!
//! 1. header split (sequence, channel mask, mode)
//! 2. sequence tracking, which yields the packet's position since the origin
//!    and the number of packets lost before it
//! 3. payload unpacking at the bit depth announced in the mode byte
//! 4. timebase reconstruction and channel demultiplexing
//! 5. voltage and time scaling
//!
//! # Stream termination
//!
//! A read that fails or times out is end-of-stream, not an error: the device
//! simply stops sending once a capture completes. The one exception is the
//! wait for the first samples after a start command, which keeps polling
//! through timeouts until the trigger fires or
//! [`AcquisitionSettings::trigger_timeout`] runs out.
//! Format errors (short packet, unknown bit depth, no channels, no frequency)
//! indicate a firmware mismatch and are returned to the caller.
//!
//! Packet loss is counted and logged; decoding carries on at the right time
//! offset because positions come from the extended sequence.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::demux::{demux, samples_per_channel};
use crate::errors::{Result, TransportError};
use crate::protocol::{channel_label, Command, PacketHeader, PACKET_SIZE};
use crate::registers::{Configurator, DeviceConfig};
use crate::sequence::{SequenceStep, SequenceTracker};
use crate::timebase::PacketTiming;
use crate::transport::Transport;
use crate::unpack::{to_voltage, unpack_samples};

// ============================================================================
// Constants
// ============================================================================

/// Reference voltage of the ADC inputs.
pub const DEFAULT_V_REF: f64 = 3.3;

/// Time unit of emitted timestamps, in seconds.
pub const DEFAULT_TIME_SCALE: f64 = 0.001;

/// Voltage unit of emitted values, in volts.
pub const DEFAULT_V_SCALE: f64 = 1.0;

/// How long a read waits before the stream is considered finished.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1500);

// ============================================================================
// Data Types
// ============================================================================

/// Scaling and stop conditions of an acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionSettings {
    pub v_ref: f64,
    pub time_scale: f64,
    pub v_scale: f64,
    pub read_timeout: Duration,
    /// Stop after this many samples per channel. `None` reads until end-of-stream.
    pub max_samples: Option<usize>,
    /// How long to wait for the trigger. `None` waits indefinitely.
    pub trigger_timeout: Option<Duration>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            v_ref: DEFAULT_V_REF,
            time_scale: DEFAULT_TIME_SCALE,
            v_scale: DEFAULT_V_SCALE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_samples: None,
            trigger_timeout: None,
        }
    }
}

/// Decoded contents of one packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub header: PacketHeader,
    pub sequence: SequenceStep,
    /// Values unpacked from the payload, including any incomplete last row.
    pub values: usize,
    /// Sample times in units of `time_scale`.
    pub timestamps: Vec<f64>,
    /// `(channel index, values in units of v_scale)`, ascending by channel.
    pub channels: Vec<(u8, Vec<f64>)>,
}

impl Chunk {
    pub fn samples_per_channel(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Per-channel series accumulated over a session, all sharing one time axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionResult {
    pub timestamps: Vec<f64>,
    /// Keyed by channel label (`CH.<index>`).
    pub channels: BTreeMap<String, Vec<f64>>,
}

impl AcquisitionResult {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn channel(&self, label: &str) -> Option<&[f64]> {
        self.channels.get(label).map(Vec::as_slice)
    }

    /// Append a chunk. A channel that appears or disappears mid-stream is
    /// padded with NaN so that every series stays as long as the time axis.
    ///
    /// Returns the labels of channels that appeared or dropped out with this
    /// chunk; a channel that stays absent is only reported once.
    pub fn extend(&mut self, chunk: Chunk) -> Vec<String> {
        let mut changed = Vec::new();
        let before = self.timestamps.len();
        self.timestamps.extend(chunk.timestamps);
        let total = self.timestamps.len();

        for (index, values) in chunk.channels {
            let label = channel_label(index);
            let series = self.channels.entry(label).or_insert_with_key(|label| {
                if before > 0 {
                    warn!("{} appeared after {} sample(s), padding with NaN", label, before);
                    changed.push(label.clone());
                }
                vec![f64::NAN; before]
            });
            series.extend(values);
        }

        for (label, series) in self.channels.iter_mut() {
            if series.len() < total {
                // Decoded values are always finite, so a trailing NaN means
                // the channel was already missing from the previous packet.
                if series.last().is_some_and(|v| !v.is_nan()) {
                    warn!("{} dropped out after {} sample(s), padding with NaN", label, before);
                    changed.push(label.clone());
                }
                series.resize(total, f64::NAN);
            }
        }
        changed
    }

    pub fn truncate(&mut self, len: usize) {
        self.timestamps.truncate(len);
        for series in self.channels.values_mut() {
            series.truncate(len);
        }
    }
}

impl From<Chunk> for AcquisitionResult {
    fn from(chunk: Chunk) -> Self {
        let mut result = AcquisitionResult::default();
        result.extend(chunk);
        result
    }
}

/// Running totals over the packets of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub packets: u64,
    pub bytes: u64,
    pub samples: u64,
    /// Sample rows, i.e. samples per channel.
    pub periods: u64,
    pub lost: u64,
    /// Samples including an estimate for lost packets.
    pub all_samples: u64,
    pub all_periods: u64,
    /// Packets that could not be decoded while streaming.
    pub bad: u64,
}

impl StreamStats {
    pub fn record(&mut self, bytes: usize, chunk: &Chunk) {
        let weight = chunk.sequence.lost + 1;
        let samples = chunk.values as u64;
        let periods = chunk.samples_per_channel() as u64;
        self.packets += 1;
        self.bytes += bytes as u64;
        self.samples += samples;
        self.periods += periods;
        self.lost += chunk.sequence.lost;
        self.all_samples += samples * weight;
        self.all_periods += periods * weight;
    }

    /// Lost packets as a percentage of all packets the device sent.
    pub fn loss_percent(&self) -> f64 {
        let sent = self.packets + self.lost;
        if sent == 0 {
            return 0.0;
        }
        100.0 * self.lost as f64 / sent as f64
    }
}

/// Render `"<count> in <secs> sec  [ <rate> <prefix><unit>/s ]"`, switching to
/// k/M prefixes (powers of `base`) once the rate exceeds 1.5 of that prefix.
pub fn format_rate(count: u64, secs: f64, unit: &str, base: f64) -> String {
    let mut rate = if secs > 0.0 { count as f64 / secs } else { 0.0 };
    let prefix = if rate > 1.5 * base * base {
        rate /= base * base;
        "M"
    } else if rate > 1.5 * base {
        rate /= base;
        "k"
    } else {
        ""
    };
    format!("{count} in {secs:.3} sec  [ {rate:.3} {prefix}{unit}/s ]")
}

// ============================================================================
// Packet decoding
// ============================================================================

/// Decode one raw packet, advancing `tracker`.
pub fn decode_packet(
    tracker: &mut SequenceTracker,
    packet: &[u8],
    settings: &AcquisitionSettings,
) -> Result<Chunk> {
    let (header, payload) = PacketHeader::split(packet)?;
    let sequence = tracker.advance(header.sequence);

    let channels = header.channels();
    let flat = unpack_samples(payload, header.bit_depth_code())?;
    let spc = samples_per_channel(flat.len(), channels.len())?;

    let timing = PacketTiming::new(
        header.frequency_code(),
        channels.len(),
        spc,
        sequence.position(),
    )?;

    let volts: Vec<f64> = flat
        .iter()
        .map(|&v| to_voltage(v, settings.v_ref) / settings.v_scale)
        .collect();
    let series = demux(&volts, &channels)?;

    debug!(
        "packet seq={} pos={} lost={} channels={:?} bits={} freq={} samples/ch={}",
        sequence.extended,
        sequence.position(),
        sequence.lost,
        channels.as_slice(),
        header.bit_depth_code(),
        header.frequency_code(),
        spc
    );

    Ok(Chunk {
        header,
        sequence,
        values: flat.len(),
        timestamps: timing.timestamps(settings.time_scale),
        channels: series,
    })
}

// ============================================================================
// Acquisition
// ============================================================================

enum RawRead {
    Packet(Vec<u8>),
    /// The read timed out with nothing to deliver.
    Idle,
    Ended,
}

/// One acquisition session over a transport.
///
/// # Example (Rust)
/// ```ignore
/// let transport = UsbConnector::default().open()?;
/// let mut acq = Acquisition::new(transport, AcquisitionSettings::default());
/// let config = DeviceConfig {
///     channels: Some(ChannelSet::from_indices(&[0, 1])),
///     frequency: Some(Frequency::Khz100),
///     ..Default::default()
/// };
/// let result = acq.run(&config, Command::Once)?;
/// println!("{} samples, {} packets lost", result.len(), acq.stats().lost);
/// ```
pub struct Acquisition<T: Transport> {
    transport: T,
    tracker: SequenceTracker,
    settings: AcquisitionSettings,
    stats: StreamStats,
}

impl<T: Transport> Acquisition<T> {
    pub fn new(transport: T, settings: AcquisitionSettings) -> Self {
        Self {
            transport,
            tracker: SequenceTracker::new(),
            settings,
            stats: StreamStats::default(),
        }
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut AcquisitionSettings {
        &mut self.settings
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn tracker(&self) -> &SequenceTracker {
        &self.tracker
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    // ------------------------------------------------------------------------
    // Device Commands
    // ------------------------------------------------------------------------

    /// Write a single register field by name.
    pub fn set(&mut self, name: &str, value: i64) -> Result<()> {
        Configurator::new(&mut self.transport).set(name, value)
    }

    pub fn command(&mut self, command: Command) -> Result<()> {
        debug!("command: {}", command);
        Configurator::new(&mut self.transport).command(command)
    }

    /// Stop the device and write every field set in `config`.
    pub fn configure(&mut self, config: &DeviceConfig) -> Result<()> {
        Configurator::new(&mut self.transport).apply(config)
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    fn poll_raw(&mut self) -> RawRead {
        match self
            .transport
            .read_packet(PACKET_SIZE, self.settings.read_timeout)
        {
            Ok(packet) if packet.is_empty() => {
                debug!("end of stream: empty read");
                RawRead::Ended
            }
            Ok(packet) => RawRead::Packet(packet),
            Err(TransportError::Timeout) => RawRead::Idle,
            Err(e) => {
                debug!("end of stream: {}", e);
                RawRead::Ended
            }
        }
    }

    fn read_raw(&mut self) -> Option<Vec<u8>> {
        match self.poll_raw() {
            RawRead::Packet(packet) => Some(packet),
            RawRead::Idle => {
                debug!("end of stream: read timed out");
                None
            }
            RawRead::Ended => None,
        }
    }

    fn decode(&mut self, packet: &[u8]) -> Result<Chunk> {
        let chunk = decode_packet(&mut self.tracker, packet, &self.settings)?;
        self.stats.record(packet.len(), &chunk);
        Ok(chunk)
    }

    /// Read and decode the next packet. `None` means end-of-stream.
    pub fn read_chunk(&mut self) -> Result<Option<Chunk>> {
        match self.read_raw() {
            Some(packet) => self.decode(&packet).map(Some),
            None => Ok(None),
        }
    }

    /// Discard buffered packets until the stream runs dry. Returns how many
    /// were dropped. Packets are not decoded, so stale data in an older format
    /// cannot fail the drain.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0usize;
        while self.read_raw().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("drained {} stale packet(s)", dropped);
        }
        dropped
    }

    /// Skip packets without samples until the first one that has some.
    ///
    /// Read timeouts do not end the wait: the device is silent until the
    /// trigger fires. Polling stops once `trigger_timeout` has elapsed, or
    /// when the transport reports anything other than a timeout.
    pub fn wait_for_data(&mut self) -> Result<Option<Chunk>> {
        let started = Instant::now();
        loop {
            match self.poll_raw() {
                RawRead::Packet(packet) => {
                    let chunk = self.decode(&packet)?;
                    if !chunk.is_empty() {
                        return Ok(Some(chunk));
                    }
                }
                RawRead::Idle => {
                    if let Some(limit) = self.settings.trigger_timeout {
                        if started.elapsed() >= limit {
                            info!("no trigger within {:.3} s", limit.as_secs_f64());
                            return Ok(None);
                        }
                    }
                    debug!("still waiting for trigger");
                }
                RawRead::Ended => return Ok(None),
            }
        }
    }

    /// Read and decode for `duration`, or until the stream ends, keeping only
    /// the statistics. Packets that fail to decode are counted in
    /// [`StreamStats::bad`] and do not stop the run. Returns the time spent.
    pub fn stream_for(&mut self, duration: Duration) -> Duration {
        let started = Instant::now();
        while started.elapsed() <= duration {
            let Some(packet) = self.read_raw() else {
                break;
            };
            if let Err(e) = self.decode(&packet) {
                debug!("bad packet: {}", e);
                self.stats.bad += 1;
            }
        }
        started.elapsed()
    }

    /// Accumulate chunks, starting with `first`, until `max_samples` is reached
    /// or the stream ends.
    pub fn collect(&mut self, first: Option<Chunk>) -> Result<AcquisitionResult> {
        let mut result = first.map(AcquisitionResult::from).unwrap_or_default();
        let max = self.settings.max_samples;

        while max.map_or(true, |m| result.len() < m) {
            match self.read_chunk()? {
                Some(chunk) => {
                    result.extend(chunk);
                    debug!("{} sample(s) read", result.len());
                }
                None => break,
            }
        }

        if let Some(m) = max {
            result.truncate(m);
        }
        Ok(result)
    }

    /// Full session: configure, flush stale packets, start, wait for the
    /// first samples and collect.
    pub fn run(&mut self, config: &DeviceConfig, command: Command) -> Result<AcquisitionResult> {
        self.configure(config)?;

        info!("clearing buffer ...");
        self.drain();
        self.tracker.reset();
        self.stats = StreamStats::default();

        self.command(command)?;

        info!("waiting for trigger ...");
        let Some(first) = self.wait_for_data()? else {
            info!("no data received before timeout");
            return Ok(AcquisitionResult::default());
        };

        let result = self.collect(Some(first))?;
        info!(
            "acquired {} sample(s) on {} channel(s), {} packet(s), {} lost",
            result.len(),
            result.channels.len(),
            self.stats.packets,
            self.stats.lost
        );
        Ok(result)
    }
}
