//! Simulated sensor that paces DATA frames to a collector.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::{
    config::ProducerConfig,
    error::{ConfigError, ProducerError},
    packet::{Frame, Reading, SensorType},
    signal::StopHandle,
};

/// Value range simulated for a sensor type.
pub fn value_range(sensor_type: SensorType) -> Option<(f32, f32)> {
    match sensor_type {
        SensorType::Temperature => Some((15.0, 30.0)),
        SensorType::Humidity => Some((30.0, 80.0)),
        SensorType::Voltage => Some((3.0, 5.0)),
        SensorType::Unknown(_) => None,
    }
}

/// Draw one reading for `sensor_type`. Unknown types have no range.
pub fn generate_reading<R: Rng>(rng: &mut R, sensor_type: SensorType) -> Option<Reading> {
    let (lo, hi) = value_range(sensor_type)?;
    Some(Reading::new(sensor_type, rng.gen_range(lo..=hi)))
}

/// Accumulates readings into fixed-size batches.
#[derive(Debug, Clone)]
pub struct Batcher {
    batch_size: usize,
    pending: Vec<Reading>,
}

impl Batcher {
    /// Create a batcher emitting `batch_size` readings per batch.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            pending: Vec::with_capacity(batch_size),
        }
    }

    /// Add readings and return every full batch now available.
    ///
    /// Each batch holds exactly `batch_size` readings; the remainder stays
    /// pending for the next call.
    pub fn push(&mut self, readings: impl IntoIterator<Item = Reading>) -> Vec<Vec<Reading>> {
        self.pending.extend(readings);

        let mut batches = Vec::new();
        while self.pending.len() >= self.batch_size {
            let rest = self.pending.split_off(self.batch_size);
            batches.push(std::mem::replace(&mut self.pending, rest));
        }
        batches
    }

    /// Take whatever is pending, if anything.
    pub fn flush(&mut self) -> Option<Vec<Reading>> {
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    /// Readings waiting for a full batch.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// A simulated device sending DATA frames over UDP.
///
/// Sequence numbers start at 0 and increase by one per frame sent.
pub struct SensorProducer {
    config: ProducerConfig,
    socket: UdpSocket,
    server: SocketAddr,
    sequence_number: u32,
    batcher: Batcher,
    rng: StdRng,
}

impl SensorProducer {
    /// Validate `config`, resolve the collector and open a socket.
    pub fn new(config: ProducerConfig) -> Result<Self, ProducerError> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Like [`SensorProducer::new`] with a deterministic reading generator.
    pub fn with_seed(config: ProducerConfig, seed: u64) -> Result<Self, ProducerError> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: ProducerConfig, rng: StdRng) -> Result<Self, ProducerError> {
        config.validate()?;
        if let Some(unknown) = config
            .sensor_types
            .iter()
            .find(|t| value_range(**t).is_none())
        {
            let name = format!("unknown({})", unknown.to_byte());
            return Err(ConfigError::SensorType(name).into());
        }

        let addr = config.server_addr();
        let server = addr
            .to_socket_addrs()?
            .next()
            .ok_or(ProducerError::Resolve(addr))?;

        let local = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)?;

        Ok(Self {
            batcher: Batcher::new(config.batch_size),
            config,
            socket,
            server,
            sequence_number: 0,
            rng,
        })
    }

    /// Frames sent so far.
    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    /// Resolved collector address.
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// One reading per configured sensor type.
    pub fn generate_readings(&mut self) -> Vec<Reading> {
        let rng = &mut self.rng;
        self.config
            .sensor_types
            .iter()
            .filter_map(|t| generate_reading(rng, *t))
            .collect()
    }

    /// Encode and send one DATA frame. Returns the datagram length.
    ///
    /// Encoding errors are returned before anything is sent, and the sequence
    /// number is left unchanged.
    pub fn send_data(&mut self, readings: Vec<Reading>) -> Result<usize, ProducerError> {
        let count = readings.len();
        let frame = Frame::data(
            self.config.device_id,
            self.sequence_number,
            unix_seconds(),
            readings,
        );
        let bytes = frame.encode()?;
        self.socket.send_to(&bytes, self.server)?;

        debug!(
            seq = self.sequence_number,
            timestamp = frame.timestamp,
            readings = count,
            bytes = bytes.len(),
            "sent DATA"
        );

        self.sequence_number = self.sequence_number.wrapping_add(1);
        Ok(bytes.len())
    }

    /// Handle one interval tick: send immediately without batching, otherwise
    /// send every full batch.
    pub fn tick(&mut self) -> Result<(), ProducerError> {
        let readings = self.generate_readings();

        if self.config.batch_size == 1 {
            self.send_data(readings)?;
            return Ok(());
        }

        for batch in self.batcher.push(readings) {
            self.send_data(batch)?;
        }
        Ok(())
    }

    /// Send any partially filled batch.
    pub fn flush_batch(&mut self) -> Result<(), ProducerError> {
        if let Some(rest) = self.batcher.flush() {
            self.send_data(rest)?;
        }
        Ok(())
    }

    /// Run for the configured duration or until `stop` is set. Returns the
    /// number of frames sent.
    ///
    /// The loop polls at `config.poll`, so sends may trail the ideal interval
    /// boundary by up to one poll period.
    pub fn run(&mut self, stop: &StopHandle) -> Result<u32, ProducerError> {
        info!(
            device_id = self.config.device_id,
            server = %self.server,
            interval = self.config.interval_secs,
            duration = ?self.config.duration,
            batch = self.config.batch_size,
            sensors = ?self.config.sensor_types.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "starting sensor"
        );

        let start = Instant::now();
        let mut next_send = start;

        while !stop.is_stopped() {
            let now = Instant::now();
            if now.duration_since(start) >= self.config.duration {
                info!(duration = ?self.config.duration, "duration reached");
                break;
            }

            if now >= next_send {
                self.tick()?;
                next_send += self.config.interval();
            }

            std::thread::sleep(self.config.poll);
        }

        self.flush_batch()?;

        info!(packets = self.sequence_number, "sensor stopped");
        Ok(self.sequence_number)
    }
}

fn unix_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
