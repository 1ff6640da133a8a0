use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use usbadc::acquisition::format_rate;
use usbadc::logging::init_rust_logging;
use usbadc::output::write_table;
use usbadc::protocol::TOTAL_CHANNELS;
use usbadc::{
    Acquisition, AcquisitionSettings, BitDepth, ChannelSet, Command, DeviceConfig, Frequency,
    ReplayTransport, Transport, Trigger, UsbConnector,
};

#[derive(Parser, Debug)]
#[command(name = "usbadc", about = "Configure the USB ADC and read samples")]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Decode a recorded hex dump (one packet per line) instead of opening the device
    #[arg(long, global = true)]
    replay: Option<PathBuf>,
    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Configure, wait for the trigger and write the samples as a table
    Capture(CaptureArgs),
    /// Stream continuously and report throughput and packet loss
    Monitor(MonitorArgs),
}

#[derive(Args, Debug)]
struct CaptureArgs {
    /// Acquisition mode
    #[arg(short, long, default_value = "once")]
    mode: Command,
    #[command(flatten)]
    device: DeviceArgs,
    /// Seconds to wait for a packet before the stream is considered finished
    #[arg(long, default_value_t = 1.5)]
    timeout: f64,
    /// Reference voltage
    #[arg(long, default_value_t = 3.3)]
    v_ref: f64,
    /// Unit of time in seconds
    #[arg(long, default_value_t = 0.001)]
    time_scale: f64,
    /// Unit of voltage in volts
    #[arg(long, default_value_t = 1.0)]
    v_scale: f64,
    /// Seconds to wait for the trigger after starting (default: wait indefinitely)
    #[arg(long)]
    trigger_timeout: Option<f64>,
    /// Maximum number of samples per channel (default: until timeout)
    #[arg(long)]
    max_samples: Option<usize>,
    /// Output file for tabular data (default: stdout)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DeviceArgs {
    /// Channel numbers to capture
    #[arg(short, long, num_args = 1.., value_parser = clap::value_parser!(u8).range(0..TOTAL_CHANNELS as i64))]
    channels: Option<Vec<u8>>,
    /// Bits per sample (2, 4, 8 or 12)
    #[arg(short, long, value_parser = parse_bits)]
    bits: Option<BitDepth>,
    /// Frequency of each of the two ADCs in Hz; the sample rate per channel
    /// is 2 * frequency / channels
    #[arg(short, long, value_parser = parse_frequency)]
    frequency: Option<Frequency>,
    /// Zero level for samples
    #[arg(short, long)]
    offset: Option<u16>,
    /// Digital gain, as a power of two
    #[arg(short, long)]
    gain: Option<u8>,
    /// Samples captured after the trigger, as 1024 * 2^samples
    #[arg(short, long)]
    samples: Option<u8>,
    /// Trigger event to wait for
    #[arg(short, long)]
    trigger: Option<Trigger>,
    /// Channel watched by the trigger
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..TOTAL_CHANNELS as i64))]
    trig_channel: Option<u8>,
    /// Trigger level
    #[arg(long)]
    trig_level: Option<u16>,
    /// Samples per channel before (<0) or after (>0) the trigger event to start capture
    #[arg(long, allow_hyphen_values = true)]
    trig_offset: Option<i32>,
    /// Minimum strobe length in samples
    #[arg(long)]
    trig_t_min: Option<u32>,
    /// Maximum strobe length in samples
    #[arg(long)]
    trig_t_max: Option<u32>,
}

impl From<&DeviceArgs> for DeviceConfig {
    fn from(a: &DeviceArgs) -> Self {
        DeviceConfig {
            channels: a.channels.as_deref().map(ChannelSet::from_indices),
            bits: a.bits,
            frequency: a.frequency,
            offset: a.offset,
            gain: a.gain,
            samples: a.samples,
            trigger: a.trigger,
            trig_channel: a.trig_channel,
            trig_level: a.trig_level,
            trig_offset: a.trig_offset,
            trig_t_min: a.trig_t_min,
            trig_t_max: a.trig_t_max,
        }
    }
}

#[derive(Args, Debug)]
struct MonitorArgs {
    /// How long to stream, in seconds
    #[arg(long, default_value_t = 10.0)]
    seconds: f64,
    /// Frequency of each ADC in Hz
    #[arg(short, long, default_value = "857143", value_parser = parse_frequency)]
    frequency: Frequency,
    /// Bits per sample
    #[arg(short, long, default_value = "8", value_parser = parse_bits)]
    bits: BitDepth,
    /// Channel numbers to stream
    #[arg(short, long, num_args = 1.., default_value = "0", value_parser = clap::value_parser!(u8).range(0..TOTAL_CHANNELS as i64))]
    channels: Vec<u8>,
}

fn parse_bits(s: &str) -> Result<BitDepth, String> {
    let code: u8 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    BitDepth::from_code(code).map_err(|e| e.to_string())
}

fn parse_frequency(s: &str) -> Result<Frequency, String> {
    let hz: u32 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    Frequency::from_hz_checked(hz).map_err(|e| e.to_string())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_rust_logging(cli.verbose);

    let transport = open_transport(cli.replay.as_ref())?;
    match &cli.command {
        Mode::Capture(args) => capture(transport, args),
        Mode::Monitor(args) => monitor(transport, args),
    }
}

fn open_transport(replay: Option<&PathBuf>) -> Result<Box<dyn Transport>> {
    match replay {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open replay file {}", path.display()))?;
            let replay = ReplayTransport::from_hex_lines(BufReader::new(file))
                .with_context(|| format!("Failed to parse replay file {}", path.display()))?;
            info!("replaying {} packet(s) from {}", replay.remaining(), path.display());
            Ok(Box::new(replay))
        }
        None => {
            let usb = UsbConnector::default()
                .open()
                .context("Failed to open USB ADC")?;
            Ok(Box::new(usb))
        }
    }
}

fn capture(transport: Box<dyn Transport>, args: &CaptureArgs) -> Result<()> {
    let settings = AcquisitionSettings {
        v_ref: args.v_ref,
        time_scale: args.time_scale,
        v_scale: args.v_scale,
        read_timeout: Duration::from_secs_f64(args.timeout.max(0.0)),
        max_samples: args.max_samples,
        trigger_timeout: args
            .trigger_timeout
            .map(|secs| Duration::from_secs_f64(secs.max(0.0))),
    };
    let mut acq = Acquisition::new(transport, settings);

    let config = DeviceConfig::from(&args.device);
    let result = acq
        .run(&config, args.mode)
        .context("Acquisition failed")?;

    let stats = acq.stats();
    info!(
        "{} sample(s) per channel, {} packet(s), {} lost ({:.2}%)",
        result.len(),
        stats.packets,
        stats.lost,
        stats.loss_percent()
    );

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_table(file, &result, args.time_scale, args.v_scale)?;
        }
        None => write_table(io::stdout().lock(), &result, args.time_scale, args.v_scale)?,
    }
    Ok(())
}

fn monitor(transport: Box<dyn Transport>, args: &MonitorArgs) -> Result<()> {
    let mut acq = Acquisition::new(transport, AcquisitionSettings::default());

    let channels = ChannelSet::from_indices(&args.channels);
    acq.command(Command::Stop)?;
    acq.drain();
    acq.set("trigger", Trigger::None.code().into())?;
    acq.set("samples", 5)?;
    acq.set("channels", channels.to_mask().into())?;
    acq.set("bits", args.bits.code().into())?;
    acq.set("frequency", args.frequency.code().into())?;
    acq.command(Command::Continuous)?;

    println!(
        "Streaming {} Hz, {} bit(s), channels {:?} for {:.1} s...",
        args.frequency.hz(),
        args.bits.code(),
        channels.as_slice(),
        args.seconds
    );

    let elapsed = acq
        .stream_for(Duration::from_secs_f64(args.seconds.max(0.0)))
        .as_secs_f64();
    if elapsed < args.seconds {
        println!("Stream ended early.");
    }

    acq.command(Command::Stop)?;

    let s = acq.stats();
    println!("Packets: {}", format_rate(s.packets, elapsed, "p", 1000.0));
    println!("Bytes: {}", format_rate(s.bytes, elapsed, "b", 1024.0));
    println!("Bits: {}", format_rate(s.bytes * 8, elapsed, "bit", 1024.0));
    println!("Samples: {}", format_rate(s.samples, elapsed, "S", 1000.0));
    println!("Periods: {}", format_rate(s.periods, elapsed, "p", 1000.0));
    println!("Lost: {}", format_rate(s.lost, elapsed, "pkt", 1000.0));
    println!("All samples: {}", format_rate(s.all_samples, elapsed, "S", 1000.0));
    println!("All periods: {}", format_rate(s.all_periods, elapsed, "p", 1000.0));
    if s.bad > 0 {
        println!("Bad packets: {}", s.bad);
    }
    println!("TOTAL LOSS: {:.2}%", s.loss_percent());
    Ok(())
}
