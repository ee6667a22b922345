//! Collector and producer configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::dedup::{DedupMode, MAX_DEDUP_WINDOW};
use crate::error::ConfigError;
use crate::packet::{SensorType, MAX_READINGS};
use crate::reorder::DEFAULT_REORDER_WINDOW;

/// Default UDP port for the collector.
pub const DEFAULT_PORT: u16 = 5000;
/// Reporting intervals a producer may use, in seconds.
pub const ALLOWED_INTERVALS: [u64; 3] = [1, 5, 30];

/// Collector settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    /// Address to bind
    pub bind_host: String,
    /// UDP port to listen on
    pub port: u16,
    /// CSV log destination
    pub log_path: PathBuf,
    /// Frames staged per device before eviction
    pub reorder_window: usize,
    /// Time between reorder buffer sweeps
    pub reorder_timeout: Duration,
    /// Duplicate filter mode for new sessions
    pub dedup: DedupMode,
    /// How often a blocked receive wakes to check for shutdown
    pub stop_poll: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            log_path: PathBuf::from("output/telemetry.csv"),
            reorder_window: DEFAULT_REORDER_WINDOW,
            reorder_timeout: Duration::from_secs(2),
            dedup: DedupMode::Unbounded,
            stop_poll: Duration::from_millis(250),
        }
    }
}

impl CollectorConfig {
    /// Set the bind address and port.
    pub fn listen(mut self, host: impl Into<String>, port: u16) -> Self {
        self.bind_host = host.into();
        self.port = port;
        self
    }

    /// Set the log path.
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    /// Set the reorder window.
    pub fn reorder_window(mut self, window: usize) -> Self {
        self.reorder_window = window;
        self
    }

    /// Set the sweep interval.
    pub fn reorder_timeout(mut self, timeout: Duration) -> Self {
        self.reorder_timeout = timeout;
        self
    }

    /// Set the duplicate filter mode.
    pub fn dedup(mut self, mode: DedupMode) -> Self {
        self.dedup = mode;
        self
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    /// Check settings before use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reorder_window == 0 {
            return Err(ConfigError::ReorderWindow);
        }
        if let DedupMode::Window(n) = self.dedup {
            if n == 0 || n > MAX_DEDUP_WINDOW {
                return Err(ConfigError::DedupWindow(n));
            }
        }
        Ok(())
    }
}

/// Sensor producer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerConfig {
    /// Device identifier, 1..=65535
    pub device_id: u16,
    /// Collector host name or address
    pub server_host: String,
    /// Collector UDP port
    pub server_port: u16,
    /// Seconds between readings; one of 1, 5, 30
    pub interval_secs: u64,
    /// Session length
    pub duration: Duration,
    /// Readings per frame, 1..=37
    pub batch_size: usize,
    /// Sensors sampled each interval
    pub sensor_types: Vec<SensorType>,
    /// Pacing loop granularity
    pub poll: Duration,
}

impl ProducerConfig {
    /// Settings for `device_id` with every other value at its default.
    pub fn new(device_id: u16) -> Self {
        Self {
            device_id,
            server_host: "localhost".to_string(),
            server_port: DEFAULT_PORT,
            interval_secs: 1,
            duration: Duration::from_secs(60),
            batch_size: 1,
            sensor_types: SensorType::ALL.to_vec(),
            poll: Duration::from_millis(100),
        }
    }

    /// Convert a command-line device id, rejecting values outside 1..=65535.
    pub fn device_id_from(raw: u32) -> Result<u16, ConfigError> {
        match u16::try_from(raw) {
            Ok(id) if id > 0 => Ok(id),
            _ => Err(ConfigError::DeviceId(raw)),
        }
    }

    /// `host:port` of the collector.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Reporting interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Check settings before use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id == 0 {
            return Err(ConfigError::DeviceId(0));
        }
        if !ALLOWED_INTERVALS.contains(&self.interval_secs) {
            return Err(ConfigError::Interval(self.interval_secs));
        }
        if !(1..=MAX_READINGS).contains(&self.batch_size) {
            return Err(ConfigError::BatchSize(self.batch_size));
        }
        if self.sensor_types.is_empty() {
            return Err(ConfigError::NoSensorTypes);
        }
        Ok(())
    }
}

/// Parse a comma-separated sensor list such as `temperature,voltage`.
pub fn parse_sensor_types(list: &str) -> Result<Vec<SensorType>, ConfigError> {
    let types = list
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<SensorType>, _>>()?;

    if types.is_empty() {
        return Err(ConfigError::NoSensorTypes);
    }
    Ok(types)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_defaults() {
        let config = CollectorConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.reorder_window, 10);
        assert_eq!(config.reorder_timeout, Duration::from_secs(2));
        assert_eq!(config.bind_addr(), "0.0.0.0:5000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn collector_rejects_bad_windows() {
        let config = CollectorConfig::default().reorder_window(0);
        assert_eq!(config.validate(), Err(ConfigError::ReorderWindow));

        let config = CollectorConfig::default().dedup(DedupMode::Window(4096));
        assert_eq!(config.validate(), Err(ConfigError::DedupWindow(4096)));
    }

    #[test]
    fn producer_validation() {
        let mut config = ProducerConfig::new(1001);
        assert!(config.validate().is_ok());

        config.interval_secs = 2;
        assert_eq!(config.validate(), Err(ConfigError::Interval(2)));
        config.interval_secs = 30;

        config.batch_size = 38;
        assert_eq!(config.validate(), Err(ConfigError::BatchSize(38)));
        config.batch_size = 37;
        assert!(config.validate().is_ok());

        config.sensor_types.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoSensorTypes));
    }

    #[test]
    fn device_id_range() {
        assert_eq!(ProducerConfig::device_id_from(1), Ok(1));
        assert_eq!(ProducerConfig::device_id_from(65535), Ok(65535));
        assert_eq!(ProducerConfig::device_id_from(0), Err(ConfigError::DeviceId(0)));
        assert_eq!(
            ProducerConfig::device_id_from(65536),
            Err(ConfigError::DeviceId(65536))
        );
    }

    #[test]
    fn sensor_list_parsing() {
        assert_eq!(
            parse_sensor_types("temperature, Voltage"),
            Ok(vec![SensorType::Temperature, SensorType::Voltage])
        );
        assert_eq!(
            parse_sensor_types("temperature,pressure"),
            Err(ConfigError::SensorType("pressure".to_string()))
        );
        assert_eq!(parse_sensor_types(""), Err(ConfigError::NoSensorTypes));
    }
}
