use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown register field: {0}")]
    UnknownField(String),
    #[error("unsupported bit depth code: {0}")]
    UnsupportedBitDepth(u8),
    #[error("invalid frequency code for timing: {0}")]
    InvalidFrequency(u8),
    #[error("packet has no active channel")]
    ChannelSetEmpty,
    #[error("packet too short: {0} byte(s), header needs 4")]
    PacketTooShort(usize),
    #[error("output error: {0}")]
    Output(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device {vid:04x}:{pid:04x} not found")]
    NotFound { vid: u16, pid: u16 },
    #[error("usb error: {0}")]
    Usb(#[from] nusb::Error),
    #[error("transfer failed: {0}")]
    Transfer(#[from] nusb::transfer::TransferError),
    #[error("timed out")]
    Timeout,
    #[error("runtime init failed: {0}")]
    Runtime(io::Error),
    #[error("no more recorded packets")]
    Exhausted,
    #[error("replay error: {0}")]
    Replay(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;
