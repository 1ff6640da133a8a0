use std::time::Duration;

use usbadc::output::write_table;
use usbadc::registers::{BITS, CHANNELS, CMD, FREQUENCY, TRIGGER, TRIG_LEVEL};
use usbadc::{
    Acquisition, AcquisitionSettings, BitDepth, ChannelSet, Command, DeviceConfig, Frequency,
    PacketHeader, ReplayTransport, Transport, TransportError, Trigger,
};

fn packet(seq: u8, mask: u16, mode: u8, payload: &[u8]) -> Vec<u8> {
    let mut p = PacketHeader {
        sequence: seq,
        channel_mask: mask,
        mode,
    }
    .to_bytes()
    .to_vec();
    p.extend_from_slice(payload);
    p
}

/// 8-bit, 100 kHz, channel 0 only: 60 samples per packet, 10 us apart.
fn mono_packet(seq: u8, fill: u8) -> Vec<u8> {
    packet(seq, 0b1, 0x48, &[fill; 60])
}

fn raw_settings() -> AcquisitionSettings {
    AcquisitionSettings {
        v_ref: 4095.0,
        ..Default::default()
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn run_configures_then_collects_until_stream_ends() {
    let replay = ReplayTransport::new(vec![
        mono_packet(0x80, 0x10),
        mono_packet(0x01, 0x20),
        mono_packet(0x03, 0x30),
    ]);
    let mut acq = Acquisition::new(replay, raw_settings());

    let config = DeviceConfig {
        channels: Some(ChannelSet::from_indices(&[0])),
        bits: Some(BitDepth::Mid),
        frequency: Some(Frequency::Khz100),
        trigger: Some(Trigger::Rising),
        trig_level: Some(0x800),
        ..Default::default()
    };
    let result = acq.run(&config, Command::Once).unwrap();

    let writes = acq.transport_mut().writes().to_vec();
    assert_eq!(
        writes,
        vec![
            (0, CMD.offset),
            (0x00, TRIG_LEVEL.offset),
            (0x08, TRIG_LEVEL.offset + 1),
            (Trigger::Rising.code(), TRIGGER.offset),
            (Frequency::Khz100.code(), FREQUENCY.offset),
            (8, BITS.offset),
            (0x01, CHANNELS.offset),
            (0x00, CHANNELS.offset + 1),
            (Command::Once.code(), CMD.offset),
        ]
    );

    assert_eq!(result.len(), 180);
    let ch0 = result.channel("CH.0").unwrap();
    assert_eq!(ch0[0], 256.0);
    assert_eq!(ch0[60], 512.0);
    assert_eq!(ch0[179], 768.0);

    // Milliseconds. The resync packet is position 1, and the gap before
    // counter 3 pushes the last packet to position 4.
    assert!(close(result.timestamps[0], 0.6));
    assert!(close(result.timestamps[1], 0.61));
    assert!(close(result.timestamps[60], 1.2));
    assert!(close(result.timestamps[120], 2.4));

    let stats = acq.stats();
    assert_eq!(stats.packets, 3);
    assert_eq!(stats.lost, 1);
}

#[test]
fn stale_packets_are_dropped_without_decoding() {
    // Bit depth 6 cannot be decoded; the drain must not care.
    let replay = ReplayTransport::new(vec![mono_packet(0x85, 0x01)])
        .with_buffered(vec![packet(0x42, 0b1, 0x46, &[0xFF; 60]), vec![0; 64]]);
    let mut acq = Acquisition::new(replay, raw_settings());

    let result = acq.run(&DeviceConfig::default(), Command::Once).unwrap();

    assert_eq!(result.len(), 60);
    // The tracker starts over after the drain.
    assert!(close(result.timestamps[0], 0.6));
    assert_eq!(acq.stats().packets, 1);
}

#[test]
fn max_samples_stops_reading_and_truncates() {
    let replay = ReplayTransport::new(vec![
        mono_packet(0x80, 1),
        mono_packet(0x01, 2),
        mono_packet(0x02, 3),
    ]);
    let settings = AcquisitionSettings {
        max_samples: Some(100),
        ..raw_settings()
    };
    let mut acq = Acquisition::new(replay, settings);

    let result = acq.run(&DeviceConfig::default(), Command::Continuous).unwrap();

    assert_eq!(result.len(), 100);
    assert_eq!(result.timestamps.len(), 100);
    assert_eq!(result.channel("CH.0").unwrap().len(), 100);
    assert_eq!(acq.transport_mut().remaining(), 1);
}

#[test]
fn packets_without_samples_are_skipped_while_waiting() {
    let replay = ReplayTransport::new(vec![
        packet(0x80, 0b1, 0x48, &[]),
        packet(0x01, 0b1, 0x48, &[]),
        mono_packet(0x02, 0x0F),
    ]);
    let mut acq = Acquisition::new(replay, raw_settings());

    let result = acq.run(&DeviceConfig::default(), Command::Once).unwrap();

    assert_eq!(result.len(), 60);
    assert_eq!(result.channel("CH.0").unwrap()[0], 240.0);
    // Third packet after the origin.
    assert!(close(result.timestamps[0], 1.8));
}

/// A recording whose trigger fires some reads after the start command.
struct LateTrigger {
    replay: ReplayTransport,
    idle_reads: usize,
    pending: usize,
}

impl LateTrigger {
    fn new(replay: ReplayTransport, idle_reads: usize) -> Self {
        Self {
            replay,
            idle_reads,
            pending: 0,
        }
    }
}

impl Transport for LateTrigger {
    fn write_register(&mut self, value: u8, index: u16) -> Result<(), TransportError> {
        if index == CMD.offset && value != Command::Stop.code() {
            self.pending = self.idle_reads;
        }
        self.replay.write_register(value, index)
    }

    fn read_packet(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if self.pending > 0 {
            self.pending -= 1;
            return Err(TransportError::Timeout);
        }
        self.replay.read_packet(max_len, timeout)
    }
}

#[test]
fn run_keeps_waiting_for_a_late_trigger() {
    let replay = ReplayTransport::new(vec![mono_packet(0x80, 0x10), mono_packet(0x01, 0x20)]);
    let mut acq = Acquisition::new(LateTrigger::new(replay, 2), raw_settings());

    let result = acq.run(&DeviceConfig::default(), Command::Once).unwrap();

    assert_eq!(result.len(), 120);
    assert_eq!(result.channel("CH.0").unwrap()[60], 512.0);
    assert_eq!(acq.stats().packets, 2);
}

#[test]
fn trigger_timeout_bounds_the_wait() {
    let replay = ReplayTransport::new(vec![mono_packet(0x80, 0x10)]);
    let settings = AcquisitionSettings {
        trigger_timeout: Some(Duration::ZERO),
        ..raw_settings()
    };
    let mut acq = Acquisition::new(LateTrigger::new(replay, 1), settings);

    let result = acq.run(&DeviceConfig::default(), Command::Once).unwrap();

    assert!(result.is_empty());
    assert_eq!(acq.transport_mut().replay.remaining(), 1);
}

#[test]
fn no_data_before_timeout_gives_empty_result() {
    let mut acq = Acquisition::new(ReplayTransport::default(), raw_settings());

    let result = acq.run(&DeviceConfig::default(), Command::Once).unwrap();

    assert!(result.is_empty());
    assert!(result.channels.is_empty());
    assert_eq!(
        acq.transport_mut().writes(),
        &[(0, CMD.offset), (Command::Once.code(), CMD.offset)]
    );
}

#[test]
fn recorded_dump_becomes_a_table() {
    // Channels 0 and 3 at 12 bits: 40 values, 20 rows per packet.
    let mut payload = Vec::new();
    for _ in 0..20 {
        payload.extend_from_slice(&[0xFF, 0xF0, 0x00]);
    }
    let dump = format!(
        "# two channels, 12 bit, 1 kHz\n{}\n{}\n",
        hex::encode(packet(0x80, 0b1001, 0xAC, &payload)),
        hex::encode(packet(0x01, 0b1001, 0xAC, &payload)),
    );
    let replay = ReplayTransport::from_hex_lines(dump.as_bytes()).unwrap();
    let mut acq = Acquisition::new(replay, AcquisitionSettings::default());

    let result = acq.run(&DeviceConfig::default(), Command::Once).unwrap();
    assert_eq!(result.len(), 40);
    assert_eq!(result.channel("CH.0").unwrap()[0], 3.3);
    assert_eq!(result.channel("CH.3").unwrap()[0], 0.0);

    let mut buf = Vec::new();
    write_table(&mut buf, &result, 0.001, 1.0).unwrap();
    let text = String::from_utf8(buf).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 41);
    assert_eq!(lines[0], "T [0.001 s]\tCH.0 [1.000 V]\tCH.3 [1.000 V]");
    assert!(lines[1].ends_with("\t3.3\t0.0"));
}
