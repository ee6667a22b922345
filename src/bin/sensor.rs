//! TinyTelemetry sensor CLI
//!
//! Simulate a device sending readings to a collector.
//!
//! # Usage
//!
//! ```bash
//! # One frame per second with all three sensors
//! tt-sensor --device-id 1001
//!
//! # Batch 10 readings per frame, temperature only, for five minutes
//! tt-sensor --device-id 7 --batch-size 10 --sensor-types temperature --duration 300
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::{PossibleValuesParser, TypedValueParser};
use clap::Parser;
use tinytelemetry::config::{parse_sensor_types, ProducerConfig, DEFAULT_PORT};
use tinytelemetry::producer::SensorProducer;
use tinytelemetry::signal::install_ctrlc_handler;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "tt-sensor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "TinyTelemetry sensor - send simulated readings to a collector")]
#[command(long_about = None)]
struct Cli {
    /// Device identifier (1-65535)
    #[arg(short, long)]
    device_id: u32,

    /// Collector host
    #[arg(long, default_value = "localhost")]
    server_host: String,

    /// Collector UDP port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    server_port: u16,

    /// Seconds between readings
    #[arg(short, long, default_value_t = 1, value_parser = PossibleValuesParser::new(["1", "5", "30"]).map(|s| s.parse::<u64>().unwrap_or(1)))]
    interval: u64,

    /// Session length in seconds
    #[arg(long, default_value_t = 60)]
    duration: u64,

    /// Readings per frame (1-37)
    #[arg(short, long, default_value_t = 1)]
    batch_size: usize,

    /// Comma-separated sensors: temperature, humidity, voltage
    #[arg(short, long, default_value = "temperature,humidity,voltage")]
    sensor_types: String,

    /// Verbose mode (log every frame)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("tinytelemetry=debug,tt_sensor=debug")
    } else {
        EnvFilter::new("tinytelemetry=info,tt_sensor=info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let config = build_config(&cli)?;
    let mut producer = SensorProducer::new(config).context("Failed to start sensor")?;
    let stop = install_ctrlc_handler().context("Failed to install Ctrl+C handler")?;

    let sent = producer.run(&stop).context("Sensor error")?;
    tracing::info!(packets = sent, "Sensor shutdown complete");

    Ok(())
}

fn build_config(cli: &Cli) -> Result<ProducerConfig> {
    let device_id = ProducerConfig::device_id_from(cli.device_id)?;

    let mut config = ProducerConfig::new(device_id);
    config.server_host = cli.server_host.clone();
    config.server_port = cli.server_port;
    config.interval_secs = cli.interval;
    config.duration = Duration::from_secs(cli.duration);
    config.batch_size = cli.batch_size;
    config.sensor_types = parse_sensor_types(&cli.sensor_types)?;

    config.validate().context("Invalid sensor configuration")?;
    Ok(config)
}
