//! Collector pipeline: receive, validate, track per-device sequences and log.
//!
//! Every datagram runs through the same steps: decode and validate the frame,
//! route it to the device's session, flag duplicates and gaps, stage fresh
//! frames in the reorder buffer and append one record to the log sink. Reorder
//! buffers are swept on a fixed wall-clock interval.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::{
    config::CollectorConfig,
    cputime::{process_cpu_time, CpuMeter},
    error::CollectorError,
    packet::{Frame, MAX_FRAME_LEN},
    reorder::ReorderEntry,
    session::DeviceSession,
    signal::StopHandle,
    sink::{CsvLogSink, LogRecord, LogSink},
};

/// Operational counters for the collector.
///
/// Cloning shares the same counters, so a monitoring thread can read them
/// while the receive loop updates them.
#[derive(Clone, Debug, Default)]
pub struct CollectorMetrics {
    /// Datagrams read from the socket
    pub datagrams_received: Arc<Mutex<u64>>,
    /// Datagrams dropped before reaching a session, by reason
    pub datagrams_dropped: Arc<Mutex<BTreeMap<&'static str, u64>>>,
    /// Rows appended to the log
    pub records_written: Arc<Mutex<u64>>,
    /// Frames flagged as duplicates
    pub duplicates_total: Arc<Mutex<u64>>,
    /// Sequence numbers reported missing
    pub gap_sequences_total: Arc<Mutex<u64>>,
    /// Entries pushed out of full reorder buffers
    pub reorder_evictions_total: Arc<Mutex<u64>>,
    /// Reorder sweeps performed
    pub sweeps_total: Arc<Mutex<u64>>,
    /// Devices with a session
    pub sessions_active: Arc<Mutex<usize>>,
}

impl CollectorMetrics {
    /// Total datagrams dropped, all reasons.
    pub fn dropped_total(&self) -> u64 {
        self.datagrams_dropped.lock().values().sum()
    }

    /// Export metrics as one `name {labels} value` line each.
    pub fn export_metrics(&self) -> String {
        let mut out = format!(
            "tinytelemetry_datagrams_received_total {{}} {}\n\
             tinytelemetry_records_written_total {{}} {}\n\
             tinytelemetry_duplicates_total {{}} {}\n\
             tinytelemetry_gap_sequences_total {{}} {}\n\
             tinytelemetry_reorder_evictions_total {{}} {}\n\
             tinytelemetry_sweeps_total {{}} {}\n\
             tinytelemetry_sessions_active {{}} {}\n",
            self.datagrams_received.lock(),
            self.records_written.lock(),
            self.duplicates_total.lock(),
            self.gap_sequences_total.lock(),
            self.reorder_evictions_total.lock(),
            self.sweeps_total.lock(),
            self.sessions_active.lock(),
        );
        for (reason, count) in self.datagrams_dropped.lock().iter() {
            out.push_str(&format!(
                "tinytelemetry_datagrams_dropped_total {{reason=\"{}\"}} {}\n",
                reason, count
            ));
        }
        out
    }

    fn record_drop(&self, reason: &'static str) {
        *self.datagrams_dropped.lock().entry(reason).or_insert(0) += 1;
    }
}

/// Final counters for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    /// Device identifier
    pub device_id: u16,
    /// Frames received, duplicates included
    pub total_packets: u64,
    /// Duplicate frames
    pub duplicate_count: u64,
    /// Missing sequence numbers
    pub gap_count: u64,
    /// Last fresh sequence number, -1 if none
    pub last_seq: i64,
}

/// Shutdown report.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorSummary {
    /// Per-device counters, ordered by device id
    pub devices: Vec<DeviceSummary>,
    /// Records processed
    pub records: u64,
    /// CPU time spent processing records
    pub cpu_total: Duration,
    /// Average CPU milliseconds per record
    pub cpu_ms_per_record: f64,
}

impl fmt::Display for CollectorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "SUMMARY STATISTICS")?;
        writeln!(f, "{}", "=".repeat(60))?;
        for d in &self.devices {
            writeln!(f)?;
            writeln!(f, "Device {}:", d.device_id)?;
            writeln!(f, "  Total packets: {}", d.total_packets)?;
            writeln!(f, "  Duplicates: {}", d.duplicate_count)?;
            writeln!(f, "  Gaps detected: {} missing packets", d.gap_count)?;
            writeln!(f, "  Last sequence: {}", d.last_seq)?;
        }
        writeln!(f)?;
        writeln!(f, "Performance:")?;
        writeln!(f, "  Total packets processed: {}", self.records)?;
        writeln!(f, "  Total CPU time: {:.6}s", self.cpu_total.as_secs_f64())?;
        write!(f, "  CPU ms per packet: {:.3}ms", self.cpu_ms_per_record)
    }
}

/// Receiver of timestamp-ordered reorder buffer contents at each sweep.
pub type SweepHook = Box<dyn FnMut(u16, Vec<ReorderEntry>) + Send>;

/// Stateful collector pipeline.
///
/// Owns every device session and the log sink. Single-threaded: drive it with
/// [`Collector::run`] on a bound socket, or feed datagrams directly through
/// [`Collector::handle_datagram`].
///
/// # Example
/// ```ignore
/// let config = CollectorConfig::default();
/// let socket = bind(&config)?;
/// let mut collector = Collector::open(config)?;
/// collector.run(&socket, &StopHandle::new())?;
/// ```
pub struct Collector<S: LogSink> {
    config: CollectorConfig,
    sessions: HashMap<u16, DeviceSession>,
    sink: S,
    /// Real-time operational metrics
    pub metrics: CollectorMetrics,
    cpu: CpuMeter,
    last_sweep: Instant,
    on_sweep: Option<SweepHook>,
}

impl Collector<CsvLogSink> {
    /// Create a collector writing to the CSV log named in `config`.
    pub fn open(config: CollectorConfig) -> Result<Self, CollectorError> {
        config.validate()?;
        let sink = CsvLogSink::create(&config.log_path).map_err(|source| {
            CollectorError::OpenLog {
                path: config.log_path.clone(),
                source,
            }
        })?;
        info!(path = %config.log_path.display(), "logging to csv");
        Self::new(config, sink)
    }
}

impl<S: LogSink> Collector<S> {
    /// Create a collector writing to `sink`.
    pub fn new(config: CollectorConfig, sink: S) -> Result<Self, CollectorError> {
        config.validate()?;
        Ok(Self {
            config,
            sessions: HashMap::new(),
            sink,
            metrics: CollectorMetrics::default(),
            cpu: CpuMeter::default(),
            last_sweep: Instant::now(),
            on_sweep: None,
        })
    }

    /// Hand reorder buffer contents to `hook` at each sweep instead of
    /// discarding them.
    pub fn with_sweep_hook(mut self, hook: SweepHook) -> Self {
        self.on_sweep = Some(hook);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Session for `device_id`, if one exists.
    pub fn session(&self, device_id: u16) -> Option<&DeviceSession> {
        self.sessions.get(&device_id)
    }

    /// Number of known devices.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// The log sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn get_or_create_session(&mut self, device_id: u16) -> &mut DeviceSession {
        match self.sessions.entry(device_id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                info!(device_id, "new device session");
                *self.metrics.sessions_active.lock() += 1;
                e.insert(DeviceSession::new(
                    device_id,
                    self.config.reorder_window,
                    self.config.dedup,
                ))
            }
        }
    }

    /// Process one datagram received at `arrival_time`.
    ///
    /// Returns the record written to the log, or `None` if the datagram was
    /// dropped as malformed. Only a failing log sink is an error.
    pub fn handle_datagram(
        &mut self,
        buf: &[u8],
        arrival_time: SystemTime,
        peer: Option<SocketAddr>,
    ) -> Result<Option<LogRecord>, CollectorError> {
        *self.metrics.datagrams_received.lock() += 1;

        let frame = match Frame::decode(buf) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(peer = ?peer, len = buf.len(), error = %e, "dropping datagram");
                self.metrics.record_drop(e.label());
                return Ok(None);
            }
        };

        let cpu_start = process_cpu_time();

        let observation = self
            .get_or_create_session(frame.device_id)
            .observe(&frame, arrival_time);
        let verdict = observation.verdict;

        if verdict.duplicate {
            *self.metrics.duplicates_total.lock() += 1;
        }
        if verdict.gap() {
            *self.metrics.gap_sequences_total.lock() += u64::from(verdict.gap_size);
        }
        if let Some(evicted) = observation.evicted {
            *self.metrics.reorder_evictions_total.lock() += 1;
            trace!(
                device_id = frame.device_id,
                seq = evicted.sequence_number,
                timestamp = evicted.timestamp,
                "reorder buffer full, evicted earliest timestamp"
            );
        }

        let record = LogRecord {
            device_id: frame.device_id,
            seq: frame.sequence_number,
            timestamp: frame.timestamp,
            arrival_time,
            msg_type: frame.msg_type(),
            duplicate: verdict.duplicate,
            gap: verdict.gap(),
            gap_size: verdict.gap_size,
            reading_count: frame.reading_count(),
        };

        self.sink.write(&record).map_err(CollectorError::Sink)?;
        *self.metrics.records_written.lock() += 1;

        debug!(
            device_id = record.device_id,
            seq = record.seq,
            msg_type = %record.msg_type,
            duplicate = record.duplicate,
            gap_size = record.gap_size,
            readings = record.reading_count,
            "frame logged"
        );

        self.cpu.record(process_cpu_time().saturating_sub(cpu_start));

        Ok(Some(record))
    }

    /// Sweep reorder buffers if the reorder timeout elapsed since the last
    /// sweep. Returns whether a sweep ran.
    pub fn maybe_sweep(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_sweep) < self.config.reorder_timeout {
            return false;
        }
        self.sweep();
        self.last_sweep = now;
        true
    }

    /// Flush every session's reorder buffer. Returns the number of entries
    /// released. The log is not affected.
    pub fn sweep(&mut self) -> usize {
        let mut released = 0;
        for (device_id, session) in self.sessions.iter_mut() {
            let ordered = session.flush_reorder_buffer();
            if ordered.is_empty() {
                continue;
            }
            released += ordered.len();
            if let Some(hook) = self.on_sweep.as_mut() {
                hook(*device_id, ordered);
            }
        }
        *self.metrics.sweeps_total.lock() += 1;
        trace!(released, "reorder sweep");
        released
    }

    /// Per-device counters and CPU cost so far.
    pub fn summary(&self) -> CollectorSummary {
        let mut devices: Vec<DeviceSummary> = self
            .sessions
            .values()
            .map(|s| DeviceSummary {
                device_id: s.device_id,
                total_packets: s.total_packets,
                duplicate_count: s.duplicate_count,
                gap_count: s.gap_count,
                last_seq: s.last_seq_or_none(),
            })
            .collect();
        devices.sort_by_key(|d| d.device_id);

        CollectorSummary {
            devices,
            records: self.cpu.records(),
            cpu_total: self.cpu.total(),
            cpu_ms_per_record: self.cpu.ms_per_record(),
        }
    }

    /// Flush the sink and hand it back together with the final summary.
    pub fn finish(mut self) -> Result<(CollectorSummary, S), CollectorError> {
        self.sink.flush().map_err(CollectorError::Sink)?;
        let summary = self.summary();
        Ok((summary, self.sink))
    }

    /// Receive loop. Blocks until `stop` is set or the socket fails.
    ///
    /// The socket's read timeout (see [`bind`]) bounds how long a stop request
    /// waits; a timeout is not an error. Each wakeup also sweeps reorder
    /// buffers and flushes the sink when their intervals are due.
    pub fn run(&mut self, socket: &UdpSocket, stop: &StopHandle) -> Result<(), CollectorError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        info!(addr = ?socket.local_addr().ok(), "collector running");

        while !stop.is_stopped() {
            match socket.recv_from(&mut buf) {
                Ok((len, peer)) => {
                    let arrival_time = SystemTime::now();
                    self.handle_datagram(&buf[..len], arrival_time, Some(peer))?;
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) => {}
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    warn!(error = %e, "ignoring connection reset on udp socket");
                }
                Err(e) => return Err(CollectorError::Socket(e)),
            }

            let now = Instant::now();
            self.maybe_sweep(now);
            self.sink.flush_if_due(now).map_err(CollectorError::Sink)?;
        }

        info!("collector stopping");
        Ok(())
    }
}

/// Bind the collector socket described by `config`.
pub fn bind(config: &CollectorConfig) -> Result<UdpSocket, CollectorError> {
    let addr = config.bind_addr();
    let bind_err = |source| CollectorError::Bind {
        addr: addr.clone(),
        source,
    };

    let socket = UdpSocket::bind(&addr).map_err(bind_err)?;
    socket
        .set_read_timeout(Some(config.stop_poll))
        .map_err(bind_err)?;
    info!(addr = %addr, "collector socket bound");
    Ok(socket)
}
