//! portpilot-logger
//!
//! Logs telemetry from PortPilot USB power meters to stdout and, optionally,
//! a CSV file. Devices may be plugged and unplugged while it runs.

use anyhow::{Context as _, Result};
use clap::Parser;
use common::setup_logging;
use logger::config::LoggerConfig;
use logger::output::{OutputWriter, RecordSink};
use logger::transport::usb::UsbTransport;
use logger::{Context, EventLoop};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "portpilot-logger")]
#[command(
    author,
    version,
    about = "PortPilot logger - Log USB power meter telemetry"
)]
#[command(long_about = "
Logs voltage, current, power and energy readings from PortPilot USB power
meters. Devices are picked up and released as they are plugged in and out.

EXAMPLES:
    # Log every report from every attached PortPilot
    portpilot-logger

    # CSV on stdout, averaged over 1 second windows
    portpilot-logger -c -i 1000

    # Log 100 reports from one device into a file, then exit
    portpilot-logger -d PP000123 -r 100 -f ~/portpilot.csv

    # List attached devices
    portpilot-logger --list-devices

CONFIGURATION:
    The logger looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/portpilot-logger/logger.toml
    3. /etc/portpilot-logger/logger.toml
    4. Built-in defaults

    Command line flags override values from the configuration file.
")]
struct Args {
    /// Stop each device after N reports (or N windows with -i)
    #[arg(short = 'r', long = "packets", value_name = "N")]
    packets: Option<u32>,

    /// Average reports over windows of MS milliseconds
    #[arg(short = 'i', long = "interval", value_name = "MS")]
    interval: Option<u64>,

    /// Only log the device with this serial number
    #[arg(short = 'd', long = "device", value_name = "SERIAL")]
    device: Option<String>,

    /// Log the raw bytes of every transfer
    #[arg(short, long)]
    verbose: bool,

    /// Print CSV rows on stdout
    #[arg(short, long)]
    csv: bool,

    /// Also write CSV rows to this file
    #[arg(short, long, value_name = "PATH")]
    file: Option<String>,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List attached PortPilot devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Args {
    /// Override configuration values with the flags that were given
    fn apply(&self, config: &mut LoggerConfig) {
        if let Some(packets) = self.packets {
            config.device.packet_target = Some(packets);
        }
        if let Some(interval) = self.interval {
            config.output.interval_ms = Some(interval);
        }
        if let Some(serial) = &self.device {
            config.device.serial = Some(serial.clone());
        }
        if let Some(file) = &self.file {
            config.output.file = Some(file.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        config.logging.verbose |= self.verbose;
        config.output.csv |= self.csv;
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = LoggerConfig::default();
        let path = LoggerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        LoggerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        LoggerConfig::load_or_default()
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.logging.level).context("Failed to setup logging")?;

    info!("PortPilot logger v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", config.logging.level);

    if args.list_devices {
        return list_devices_mode();
    }

    run(config)
}

/// List attached PortPilots and exit
fn list_devices_mode() -> Result<()> {
    let devices = UsbTransport::list_devices().context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No PortPilot devices found.");
    } else {
        println!("Found {} PortPilot device(s):\n", devices.len());
        for device in devices {
            println!(
                "  {}  serial: {}",
                device.path,
                device.serial.as_deref().unwrap_or("unknown")
            );
        }
    }

    Ok(())
}

/// Log until every device reaches its target or Ctrl-C is pressed
fn run(config: LoggerConfig) -> Result<()> {
    let stdout = io::stdout();
    let sink: Box<dyn RecordSink> = match config.output_file() {
        Some(path) => Box::new(
            OutputWriter::with_file(stdout, config.output.csv, &path)
                .with_context(|| format!("Failed to open output file: {}", path.display()))?,
        ),
        None => Box::new(OutputWriter::new(stdout, config.output.csv)),
    };

    let transport = UsbTransport::new().context("Failed to initialize USB")?;
    let ctx = Context::new(config.options(), sink);
    let mut event_loop = EventLoop::new(transport, ctx, config.timer_settings());

    let stop = event_loop.stop_flag();
    ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;

    if let Some(serial) = &config.device.serial {
        info!("Waiting for device {}", serial);
    } else {
        info!("Waiting for PortPilot devices");
    }

    let summary = event_loop.run();
    match summary.reason {
        Some(reason) => info!(
            "Stopped ({:?}), {} of {} cancellation(s) observed{}",
            reason,
            summary.cancels_observed,
            summary.cancels_required,
            if summary.forced { ", forced" } else { "" }
        ),
        None => info!("Stopped"),
    }

    Ok(())
}
