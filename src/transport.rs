use std::collections::VecDeque;
use std::io::BufRead;
use std::time::Duration;

use log::{debug, info};
use nusb::transfer::{Control, ControlType, Recipient, RequestBuffer};
use nusb::Interface;
use tokio::runtime::{Builder, Runtime};

use crate::errors::TransportError;
use crate::protocol::{Command, PRODUCT_ID, REQUEST_SETUP, SAMPLES_ENDPOINT, VENDOR_ID};
use crate::registers::CMD;

const DEFAULT_CONTROL_TIMEOUT_MS: u64 = 1000;

/// The two operations the decoder needs from a device.
pub trait Transport {
    /// Set configuration byte `value` at register offset `index`.
    fn write_register(&mut self, value: u8, index: u16) -> Result<(), TransportError>;

    /// Read the next packet, up to `max_len` bytes, waiting at most `timeout`.
    fn read_packet(&mut self, max_len: usize, timeout: Duration)
        -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_register(&mut self, value: u8, index: u16) -> Result<(), TransportError> {
        (**self).write_register(value, index)
    }

    fn read_packet(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        (**self).read_packet(max_len, timeout)
    }
}

// ============================================================================
// USB
// ============================================================================

/// Finds the ADC on the bus and claims its interface.
///
/// Only the first matching device is used. Nothing is retried: a missing or
/// busy device is reported to the caller.
#[derive(Debug, Clone)]
pub struct UsbConnector {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    pub control_timeout: Duration,
}

impl Default for UsbConnector {
    fn default() -> Self {
        Self {
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            interface: 0,
            control_timeout: Duration::from_millis(DEFAULT_CONTROL_TIMEOUT_MS),
        }
    }
}

impl UsbConnector {
    pub fn open(&self) -> Result<UsbTransport, TransportError> {
        let device_info = nusb::list_devices()?
            .find(|d| d.vendor_id() == self.vendor_id && d.product_id() == self.product_id)
            .ok_or(TransportError::NotFound {
                vid: self.vendor_id,
                pid: self.product_id,
            })?;

        info!(
            "found device {:04x}:{:04x} on bus {} addr {}",
            self.vendor_id,
            self.product_id,
            device_info.bus_number(),
            device_info.device_address()
        );

        let device = device_info.open()?;
        // Detaches the kernel driver first if one is bound.
        let interface = device.detach_and_claim_interface(self.interface)?;
        debug!("claimed interface {}", self.interface);

        // Bulk transfers are futures; a private current-thread runtime lets
        // reads be bounded by a timer while the API stays blocking.
        let runtime = Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(TransportError::Runtime)?;

        Ok(UsbTransport {
            interface,
            runtime,
            control_timeout: self.control_timeout,
        })
    }
}

/// Claimed USB interface of the ADC.
pub struct UsbTransport {
    interface: Interface,
    runtime: Runtime,
    control_timeout: Duration,
}

impl Transport for UsbTransport {
    fn write_register(&mut self, value: u8, index: u16) -> Result<(), TransportError> {
        let control = Control {
            control_type: ControlType::Vendor,
            recipient: Recipient::Device,
            request: REQUEST_SETUP,
            value: u16::from(value),
            index,
        };
        self.interface
            .control_out_blocking(control, &[], self.control_timeout)?;
        Ok(())
    }

    fn read_packet(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let transfer = self
            .interface
            .bulk_in(SAMPLES_ENDPOINT, RequestBuffer::new(max_len));
        // Dropping the pending transfer on timeout cancels it.
        let completion = self
            .runtime
            .block_on(tokio::time::timeout(timeout, transfer))
            .map_err(|_| TransportError::Timeout)?;
        Ok(completion.into_result()?)
    }
}

// ============================================================================
// Replay
// ============================================================================

/// Serves recorded packets and records register writes.
///
/// Recorded packets only flow while the device is started: a `stop` written
/// to the command register holds them back until the next start command.
/// Packets given to [`ReplayTransport::with_buffered`] stand for data already
/// waiting on the host and are served first, whatever the device state.
///
/// When nothing can be served, reads fail with [`TransportError::Exhausted`],
/// which acquisition treats like a timeout.
#[derive(Debug, Clone, Default)]
pub struct ReplayTransport {
    buffered: VecDeque<Vec<u8>>,
    packets: VecDeque<Vec<u8>>,
    writes: Vec<(u8, u16)>,
    stopped: bool,
}

impl ReplayTransport {
    pub fn new<I>(packets: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        Self {
            packets: packets.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Queue stale packets ahead of the recording.
    pub fn with_buffered<I>(mut self, packets: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        self.buffered.extend(packets);
        self
    }

    /// Load a hex dump with one packet per line. Blank lines and lines
    /// starting with `#` are skipped; whitespace inside a line is ignored.
    pub fn from_hex_lines<R: BufRead>(reader: R) -> Result<Self, TransportError> {
        let mut packets = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| TransportError::Replay(e.to_string()))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let digits: String = trimmed.split_whitespace().collect();
            let packet = hex::decode(&digits)
                .map_err(|e| TransportError::Replay(format!("line {}: {}", lineno + 1, e)))?;
            packets.push(packet);
        }
        debug!("loaded {} recorded packet(s)", packets.len());
        Ok(Self::new(packets))
    }

    pub fn push(&mut self, packet: Vec<u8>) {
        self.packets.push_back(packet);
    }

    /// Packets not served yet, buffered ones included.
    pub fn remaining(&self) -> usize {
        self.buffered.len() + self.packets.len()
    }

    /// Register writes seen so far, as `(value, index)`.
    pub fn writes(&self) -> &[(u8, u16)] {
        &self.writes
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl Transport for ReplayTransport {
    fn write_register(&mut self, value: u8, index: u16) -> Result<(), TransportError> {
        if index == CMD.offset {
            self.stopped = value == Command::Stop.code();
        }
        self.writes.push((value, index));
        Ok(())
    }

    fn read_packet(
        &mut self,
        max_len: usize,
        _timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let next = match self.buffered.pop_front() {
            Some(packet) => Some(packet),
            None if self.stopped => None,
            None => self.packets.pop_front(),
        };
        let mut packet = next.ok_or(TransportError::Exhausted)?;
        packet.truncate(max_len);
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_serves_packets_in_order_then_runs_dry() {
        let mut replay = ReplayTransport::new(vec![vec![1, 2, 3], vec![4]]);
        let timeout = Duration::from_millis(1);
        assert_eq!(replay.read_packet(2, timeout).unwrap(), vec![1, 2]);
        assert_eq!(replay.read_packet(64, timeout).unwrap(), vec![4]);
        assert!(matches!(
            replay.read_packet(64, timeout),
            Err(TransportError::Exhausted)
        ));
    }

    #[test]
    fn hex_dump_skips_comments_and_spacing() {
        let dump = "# captured at 100 kHz\n01 01 00 48 ab\n\n0201004812\n";
        let replay = ReplayTransport::from_hex_lines(dump.as_bytes()).unwrap();
        assert_eq!(replay.remaining(), 2);
        assert_eq!(replay.packets[0], vec![0x01, 0x01, 0x00, 0x48, 0xAB]);
    }

    #[test]
    fn bad_hex_reports_line() {
        let err = ReplayTransport::from_hex_lines("00\nzz\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn stop_holds_back_recording_but_not_buffered_packets() {
        let mut replay =
            ReplayTransport::new(vec![vec![0x10]]).with_buffered(vec![vec![0x01], vec![0x02]]);
        let timeout = Duration::ZERO;
        replay.write_register(0, CMD.offset).unwrap();
        assert!(replay.is_stopped());
        assert_eq!(replay.read_packet(64, timeout).unwrap(), vec![0x01]);
        assert_eq!(replay.read_packet(64, timeout).unwrap(), vec![0x02]);
        assert!(matches!(
            replay.read_packet(64, timeout),
            Err(TransportError::Exhausted)
        ));
        assert_eq!(replay.remaining(), 1);

        // Writes to other registers leave the state alone.
        replay.write_register(0, CMD.offset + 1).unwrap();
        assert!(replay.is_stopped());

        replay.write_register(Command::Once.code(), CMD.offset).unwrap();
        assert_eq!(replay.read_packet(64, timeout).unwrap(), vec![0x10]);
    }

    #[test]
    fn boxed_transport_forwards() {
        let mut boxed: Box<dyn Transport> = Box::new(ReplayTransport::default());
        boxed.write_register(7, 1).unwrap();
        assert!(boxed.read_packet(64, Duration::ZERO).is_err());
    }
}
