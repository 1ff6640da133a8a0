//! Device register map and the configuration encoder.
//!
//! Configuration lives in a small register file on the device. Each field is
//! written one byte at a time with a vendor control request, least significant
//! byte first. There is no acknowledgement beyond the control transfer itself.

use log::debug;

use crate::errors::{DriverError, Result};
use crate::protocol::{BitDepth, ChannelSet, Command, Frequency, Trigger};
use crate::transport::Transport;

/// A named field of the register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub name: &'static str,
    pub offset: u16,
    pub width: usize,
}

const fn reg(name: &'static str, offset: u16, width: usize) -> Register {
    Register {
        name,
        offset,
        width,
    }
}

pub const CMD: Register = reg("cmd", 1, 1);
pub const CHANNELS: Register = reg("channels", 2, 2);
pub const BITS: Register = reg("bits", 4, 1);
pub const FREQUENCY: Register = reg("frequency", 5, 1);
pub const OFFSET: Register = reg("offset", 6, 2);
pub const GAIN: Register = reg("gain", 8, 1);
pub const SAMPLES: Register = reg("samples", 9, 1);
pub const TRIGGER: Register = reg("trigger", 10, 1);
pub const TRIG_CHANNEL: Register = reg("trig_channel", 11, 1);
pub const TRIG_LEVEL: Register = reg("trig_level", 12, 2);
pub const TRIG_OFFSET: Register = reg("trig_offset", 14, 4);
pub const TRIG_T_MIN: Register = reg("trig_t_min", 18, 4);
pub const TRIG_T_MAX: Register = reg("trig_t_max", 22, 4);
pub const USE_CHANNELS: Register = reg("use_channels", 26, 2);

pub const REGISTERS: [Register; 14] = [
    CMD,
    CHANNELS,
    BITS,
    FREQUENCY,
    OFFSET,
    GAIN,
    SAMPLES,
    TRIGGER,
    TRIG_CHANNEL,
    TRIG_LEVEL,
    TRIG_OFFSET,
    TRIG_T_MIN,
    TRIG_T_MAX,
    USE_CHANNELS,
];

impl Register {
    pub fn lookup(name: &str) -> Option<Register> {
        REGISTERS.into_iter().find(|r| r.name == name)
    }

    /// The `(value, index)` pairs that write `value` into this field.
    ///
    /// Bytes beyond the field width are dropped, so negative values end up in
    /// two's complement, as the firmware expects for `trig_offset`.
    pub fn encode(self, value: i64) -> impl Iterator<Item = (u8, u16)> {
        let bytes = value.to_le_bytes();
        (0..self.width).map(move |i| (bytes[i], self.offset + i as u16))
    }
}

/// Writes configuration fields through a [`Transport`].
pub struct Configurator<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
}

impl<'a, T: Transport + ?Sized> Configurator<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }

    /// Write `value` into the field called `name`.
    pub fn set(&mut self, name: &str, value: i64) -> Result<()> {
        let register =
            Register::lookup(name).ok_or_else(|| DriverError::UnknownField(name.to_string()))?;
        self.write(register, value)
    }

    pub fn write(&mut self, register: Register, value: i64) -> Result<()> {
        debug!("set {}={} (offset={})", register.name, value, register.offset);
        for (byte, index) in register.encode(value) {
            self.transport.write_register(byte, index)?;
        }
        Ok(())
    }

    pub fn command(&mut self, command: Command) -> Result<()> {
        self.write(CMD, command.code().into())
    }

    /// Stop acquisition, then write every field set in `config`.
    ///
    /// Trigger parameters go first and the channel selection last, so the
    /// device only sees a complete configuration once the channels change.
    pub fn apply(&mut self, config: &DeviceConfig) -> Result<()> {
        self.command(Command::Stop)?;

        let fields: [(Register, Option<i64>); 11] = [
            (TRIG_T_MAX, config.trig_t_max.map(i64::from)),
            (TRIG_T_MIN, config.trig_t_min.map(i64::from)),
            (TRIG_LEVEL, config.trig_level.map(i64::from)),
            (TRIG_CHANNEL, config.trig_channel.map(i64::from)),
            (TRIG_OFFSET, config.trig_offset.map(i64::from)),
            (TRIGGER, config.trigger.map(|t| t.code().into())),
            (SAMPLES, config.samples.map(i64::from)),
            (GAIN, config.gain.map(i64::from)),
            (OFFSET, config.offset.map(i64::from)),
            (FREQUENCY, config.frequency.map(|f| f.code().into())),
            (BITS, config.bits.map(|b| b.code().into())),
        ];
        for (register, value) in fields {
            if let Some(value) = value {
                self.write(register, value)?;
            }
        }
        if let Some(channels) = &config.channels {
            self.write(CHANNELS, channels.to_mask().into())?;
        }
        Ok(())
    }
}

/// Typed device configuration. Fields left as `None` keep the device's current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceConfig {
    pub channels: Option<ChannelSet>,
    pub bits: Option<BitDepth>,
    pub frequency: Option<Frequency>,
    /// Zero level for samples.
    pub offset: Option<u16>,
    /// Digital gain as a power of two.
    pub gain: Option<u8>,
    /// Samples captured after a trigger, as `1024 * 2^samples`.
    pub samples: Option<u8>,
    pub trigger: Option<Trigger>,
    pub trig_channel: Option<u8>,
    pub trig_level: Option<u16>,
    /// Samples per channel before (< 0) or after (> 0) the trigger event.
    pub trig_offset: Option<i32>,
    pub trig_t_min: Option<u32>,
    pub trig_t_max: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ReplayTransport;

    #[test]
    fn table_matches_register_file_layout() {
        assert_eq!(Register::lookup("trig_offset"), Some(reg("trig_offset", 14, 4)));
        assert_eq!(Register::lookup("use_channels").map(|r| r.offset), Some(26));
        assert_eq!(Register::lookup("nope"), None);
        let mut end = 1;
        for r in REGISTERS {
            assert_eq!(r.offset, end, "gap before {}", r.name);
            end = r.offset + r.width as u16;
        }
    }

    #[test]
    fn multi_byte_fields_are_written_lsb_first() {
        let mut transport = ReplayTransport::default();
        Configurator::new(&mut transport)
            .set("trig_t_min", 0x0102_0304)
            .unwrap();
        assert_eq!(
            transport.writes(),
            &[(0x04, 18), (0x03, 19), (0x02, 20), (0x01, 21)]
        );
    }

    #[test]
    fn negative_offset_is_twos_complement() {
        let writes: Vec<_> = TRIG_OFFSET.encode(-2).collect();
        assert_eq!(writes, vec![(0xFE, 14), (0xFF, 15), (0xFF, 16), (0xFF, 17)]);
    }

    #[test]
    fn unknown_field_writes_nothing() {
        let mut transport = ReplayTransport::default();
        let err = Configurator::new(&mut transport)
            .set("volume", 11)
            .unwrap_err();
        assert!(matches!(err, DriverError::UnknownField(name) if name == "volume"));
        assert!(transport.writes().is_empty());
    }

    #[test]
    fn apply_stops_first_and_selects_channels_last() {
        let mut transport = ReplayTransport::default();
        let config = DeviceConfig {
            channels: Some(ChannelSet::from_indices(&[0, 9])),
            bits: Some(BitDepth::Hi),
            frequency: Some(Frequency::Khz100),
            trigger: Some(Trigger::Rising),
            ..Default::default()
        };
        Configurator::new(&mut transport).apply(&config).unwrap();
        assert_eq!(
            transport.writes(),
            &[(0, 1), (1, 10), (4, 5), (12, 4), (0x01, 2), (0x02, 3)]
        );
    }
}
