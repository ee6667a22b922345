//! TinyTelemetry collector CLI
//!
//! Receive telemetry frames over UDP and append one CSV row per frame.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port, log to output/telemetry.csv
//! tt-collector
//!
//! # Custom port and log file, larger reorder buffer
//! tt-collector --port 6000 --log-file /tmp/run1.csv --reorder-window 32
//!
//! # Bounded duplicate tracking and periodic metrics
//! tt-collector --dedup-window 1024 --metrics-interval 10
//! ```

use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tinytelemetry::collector::{bind, Collector, CollectorMetrics, CollectorSummary};
use tinytelemetry::config::{CollectorConfig, DEFAULT_PORT};
use tinytelemetry::dedup::DedupMode;
use tinytelemetry::error::CollectorError;
use tinytelemetry::reorder::DEFAULT_REORDER_WINDOW;
use tinytelemetry::signal::{install_ctrlc_handler, StopHandle};
use tinytelemetry::sink::{CsvLogSink, LogSink};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "tt-collector")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "TinyTelemetry collector - receive, deduplicate and log sensor frames")]
#[command(long_about = None)]
struct Cli {
    /// UDP port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// CSV log file
    #[arg(short, long, default_value = "output/telemetry.csv")]
    log_file: PathBuf,

    /// Frames held per device in the reorder buffer
    #[arg(long, default_value_t = DEFAULT_REORDER_WINDOW)]
    reorder_window: usize,

    /// Seconds between reorder buffer sweeps
    #[arg(long, default_value_t = 2.0)]
    reorder_timeout: f64,

    /// Track only the last N sequence numbers per device (max 1024)
    #[arg(long)]
    dedup_window: Option<u32>,

    /// Log operational metrics every N seconds
    #[arg(long)]
    metrics_interval: Option<u64>,

    /// Verbose mode (log every frame)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("tinytelemetry=debug,tt_collector=debug")
    } else {
        EnvFilter::new("tinytelemetry=info,tt_collector=info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let config = build_config(&cli)?;

    tracing::info!(
        addr = %config.bind_addr(),
        log = %config.log_path.display(),
        reorder_window = config.reorder_window,
        reorder_timeout = ?config.reorder_timeout,
        dedup = ?config.dedup,
        "Starting TinyTelemetry collector"
    );

    let socket = bind(&config).context("Failed to bind collector socket")?;
    let mut collector = Collector::open(config).context("Failed to open telemetry log")?;
    let stop = install_ctrlc_handler().context("Failed to install Ctrl+C handler")?;

    let reporter = cli
        .metrics_interval
        .filter(|secs| *secs > 0)
        .map(|secs| spawn_metrics_reporter(collector.metrics.clone(), stop.clone(), secs));

    let result = collector.run(&socket, &stop);
    stop.stop();
    if let Some(handle) = reporter {
        let _ = handle.join();
    }
    drop(socket);

    let summary = shutdown(collector, result, CsvLogSink::close)?;
    tracing::info!(records = summary.records, "Collector shutdown complete");

    Ok(())
}

/// Print the summary and close the sink, then report the first failure.
/// Called whether or not the receive loop failed.
fn shutdown<S: LogSink>(
    collector: Collector<S>,
    run: Result<(), CollectorError>,
    close: impl FnOnce(S) -> io::Result<()>,
) -> Result<CollectorSummary> {
    let summary = collector.summary();
    println!("{}", summary);

    let closed = match collector.finish() {
        Ok((_, sink)) => close(sink).context("Failed to close telemetry log"),
        Err(e) => Err(e).context("Failed to flush telemetry log"),
    };

    run.context("Collector error")?;
    closed?;
    Ok(summary)
}

fn build_config(cli: &Cli) -> Result<CollectorConfig> {
    if !cli.reorder_timeout.is_finite() || cli.reorder_timeout <= 0.0 {
        bail!("reorder timeout must be a positive number of seconds");
    }

    let dedup = match cli.dedup_window {
        Some(n) => DedupMode::Window(n),
        None => DedupMode::Unbounded,
    };

    let config = CollectorConfig::default()
        .listen(cli.host.clone(), cli.port)
        .log_path(cli.log_file.clone())
        .reorder_window(cli.reorder_window)
        .reorder_timeout(Duration::from_secs_f64(cli.reorder_timeout))
        .dedup(dedup);

    config.validate().context("Invalid collector configuration")?;
    Ok(config)
}

/// Log exported metrics every `secs` seconds until `stop` is set.
fn spawn_metrics_reporter(
    metrics: CollectorMetrics,
    stop: StopHandle,
    secs: u64,
) -> thread::JoinHandle<()> {
    let tick = Duration::from_millis(100);
    let every = Duration::from_secs(secs);

    thread::spawn(move || {
        let mut waited = Duration::ZERO;
        while !stop.is_stopped() {
            thread::sleep(tick);
            waited += tick;
            if waited >= every {
                waited = Duration::ZERO;
                for line in metrics.export_metrics().lines() {
                    tracing::info!("{}", line);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::SystemTime;
    use tinytelemetry::packet::Frame;
    use tinytelemetry::sink::MemorySink;

    #[test]
    fn test_default_args() {
        let cli = Cli::parse_from(["tt-collector"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.reorder_window, 10);
        assert_eq!(config.reorder_timeout, Duration::from_secs(2));
        assert_eq!(config.dedup, DedupMode::Unbounded);
    }

    #[test]
    fn test_rejects_bad_timeout() {
        let cli = Cli::parse_from(["tt-collector", "--reorder-timeout", "0"]);
        assert!(build_config(&cli).is_err());
    }

    fn collector_with_traffic() -> Collector<MemorySink> {
        let mut collector =
            Collector::new(CollectorConfig::default(), MemorySink::default()).unwrap();
        let bytes = Frame::heartbeat(1001, 0, 0).encode().unwrap();
        collector
            .handle_datagram(&bytes, SystemTime::now(), None)
            .unwrap();
        collector
    }

    #[test]
    fn test_shutdown_closes_sink_after_run_error() {
        let closed = Cell::new(0);
        let run = Err(CollectorError::Socket(io::Error::new(
            io::ErrorKind::Other,
            "socket gone",
        )));

        let result = shutdown(collector_with_traffic(), run, |sink| {
            closed.set(sink.records.len());
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(closed.get(), 1);
    }

    #[test]
    fn test_shutdown_returns_summary() {
        let summary = shutdown(collector_with_traffic(), Ok(()), |_| Ok(())).unwrap();
        assert_eq!(summary.devices.len(), 1);
        assert_eq!(summary.devices[0].total_packets, 1);
    }

    #[test]
    fn test_dedup_window_bounds() {
        let cli = Cli::parse_from(["tt-collector", "--dedup-window", "64"]);
        assert_eq!(build_config(&cli).unwrap().dedup, DedupMode::Window(64));

        let cli = Cli::parse_from(["tt-collector", "--dedup-window", "5000"]);
        assert!(build_config(&cli).is_err());
    }
}
