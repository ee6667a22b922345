//! Append-only record log written by the collector.
//!
//! One CSV row per structurally valid frame, in arrival order:
//!
//! ```text
//! device_id,seq,timestamp,arrival_time,msg_type,duplicate_flag,gap_flag,gap_size,reading_count
//! 1001,3,1700000003,1700000003.512044,DATA,False,True,1,3
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::RecordParseError;
use crate::packet::MessageType;

/// Header row of the persisted log.
pub const CSV_HEADER: &str =
    "device_id,seq,timestamp,arrival_time,msg_type,duplicate_flag,gap_flag,gap_size,reading_count";

/// One persisted row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Originating device
    pub device_id: u16,
    /// Frame sequence number
    pub seq: u32,
    /// Sender timestamp, unix seconds
    pub timestamp: u32,
    /// Collector receive time, microsecond precision
    pub arrival_time: SystemTime,
    /// DATA or HEARTBEAT
    pub msg_type: MessageType,
    /// Sequence number had been seen before
    pub duplicate: bool,
    /// Sequence numbers were skipped before this frame
    pub gap: bool,
    /// How many were skipped
    pub gap_size: u32,
    /// Readings carried by the frame
    pub reading_count: usize,
}

impl LogRecord {
    /// Format as a CSV row, without line terminator.
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{}",
            self.device_id,
            self.seq,
            self.timestamp,
            format_arrival(self.arrival_time),
            self.msg_type.as_str(),
            format_flag(self.duplicate),
            format_flag(self.gap),
            self.gap_size,
            self.reading_count,
        )
    }

    /// Parse a CSV row produced by [`LogRecord::to_csv_row`].
    pub fn from_csv_row(row: &str) -> Result<Self, RecordParseError> {
        let err = |reason| RecordParseError {
            row: row.to_string(),
            reason,
        };

        let fields: Vec<&str> = row.trim_end().split(',').collect();
        let [device_id, seq, timestamp, arrival, msg_type, duplicate, gap, gap_size, reading_count] =
            fields.as_slice()
        else {
            return Err(err("expected 9 columns"));
        };

        Ok(Self {
            device_id: device_id.parse().map_err(|_| err("device_id"))?,
            seq: seq.parse().map_err(|_| err("seq"))?,
            timestamp: timestamp.parse().map_err(|_| err("timestamp"))?,
            arrival_time: parse_arrival(arrival).ok_or_else(|| err("arrival_time"))?,
            msg_type: match *msg_type {
                "DATA" => MessageType::Data,
                "HEARTBEAT" => MessageType::Heartbeat,
                _ => return Err(err("msg_type")),
            },
            duplicate: parse_flag(duplicate).ok_or_else(|| err("duplicate_flag"))?,
            gap: parse_flag(gap).ok_or_else(|| err("gap_flag"))?,
            gap_size: gap_size.parse().map_err(|_| err("gap_size"))?,
            reading_count: reading_count.parse().map_err(|_| err("reading_count"))?,
        })
    }
}

fn format_flag(flag: bool) -> &'static str {
    if flag {
        "True"
    } else {
        "False"
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s {
        "True" | "true" => Some(true),
        "False" | "false" => Some(false),
        _ => None,
    }
}

/// Unix seconds with six decimals.
fn format_arrival(t: SystemTime) -> String {
    let since = t.duration_since(UNIX_EPOCH).unwrap_or_default();
    format!("{}.{:06}", since.as_secs(), since.subsec_micros())
}

fn parse_arrival(s: &str) -> Option<SystemTime> {
    let (secs, frac) = s.split_once('.').unwrap_or((s, "0"));
    let secs: u64 = secs.parse().ok()?;
    if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let micros: u32 = format!("{frac:0<6}").parse().ok()?;
    Some(UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_micros(u64::from(micros)))
}

/// Destination for log records.
pub trait LogSink {
    /// Append one record.
    fn write(&mut self, record: &LogRecord) -> io::Result<()>;

    /// Push buffered records to storage.
    fn flush(&mut self) -> io::Result<()>;

    /// Flush if buffered records have waited past the sink's time limit.
    /// Returns whether a flush happened.
    fn flush_if_due(&mut self, _now: Instant) -> io::Result<bool> {
        Ok(false)
    }
}

/// When buffered rows are pushed to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Flush after this many rows
    pub max_records: usize,
    /// Flush when this much time passed since the last flush
    pub max_interval: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_records: 10,
            max_interval: Duration::from_secs(1),
        }
    }
}

/// CSV file sink. Truncates the file and writes the header row on open.
pub struct CsvLogSink {
    path: PathBuf,
    writer: BufWriter<File>,
    policy: FlushPolicy,
    pending: usize,
    last_flush: Instant,
    written: u64,
}

impl CsvLogSink {
    /// Create (or truncate) the log at `path` with the default flush policy.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::with_policy(path, FlushPolicy::default())
    }

    /// Create (or truncate) the log at `path`.
    pub fn with_policy(path: impl AsRef<Path>, policy: FlushPolicy) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", CSV_HEADER)?;
        writer.flush()?;

        Ok(Self {
            path,
            writer,
            policy,
            pending: 0,
            last_flush: Instant::now(),
            written: 0,
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written since open.
    pub fn records_written(&self) -> u64 {
        self.written
    }

    /// Flush and sync, consuming the sink.
    pub fn close(mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}

impl LogSink for CsvLogSink {
    fn write(&mut self, record: &LogRecord) -> io::Result<()> {
        writeln!(self.writer, "{}", record.to_csv_row())?;
        self.written += 1;
        self.pending += 1;

        if self.pending >= self.policy.max_records
            || self.last_flush.elapsed() >= self.policy.max_interval
        {
            self.flush()?;
        }
        Ok(())
    }

    fn flush_if_due(&mut self, now: Instant) -> io::Result<bool> {
        if self.pending == 0
            || now.saturating_duration_since(self.last_flush) < self.policy.max_interval
        {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.pending = 0;
        self.last_flush = Instant::now();
        Ok(())
    }
}

/// In-memory sink, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Records in write order
    pub records: Vec<LogRecord>,
}

impl LogSink for MemorySink {
    fn write(&mut self, record: &LogRecord) -> io::Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: LogSink + ?Sized> LogSink for Box<S> {
    fn write(&mut self, record: &LogRecord) -> io::Result<()> {
        (**self).write(record)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn flush_if_due(&mut self, now: Instant) -> io::Result<bool> {
        (**self).flush_if_due(now)
    }
}

/// Read a persisted log back into records. The header row is skipped.
pub fn read_log(path: impl AsRef<Path>) -> io::Result<Vec<LogRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.is_empty() || line == CSV_HEADER {
            continue;
        }
        let record = LogRecord::from_csv_row(&line)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        records.push(record);
    }

    Ok(records)
}
