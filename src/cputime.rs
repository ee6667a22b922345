//! Process CPU clock used for per-record cost accounting.

use std::time::Duration;

/// CPU time consumed by this process so far.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn process_cpu_time() -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_PROCESS_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return Duration::ZERO;
    }
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

/// CPU time consumed by this process so far. Not available on this platform.
#[cfg(not(unix))]
pub fn process_cpu_time() -> Duration {
    Duration::ZERO
}

/// Accumulates CPU time spent on processed records.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuMeter {
    total: Duration,
    records: u64,
}

impl CpuMeter {
    /// Add one record that took `spent` CPU time.
    pub fn record(&mut self, spent: Duration) {
        self.total += spent;
        self.records += 1;
    }

    /// Total CPU time recorded.
    pub fn total(&self) -> Duration {
        self.total
    }

    /// Records measured.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Average CPU milliseconds per record, 0 when nothing was measured.
    pub fn ms_per_record(&self) -> f64 {
        if self.records == 0 {
            return 0.0;
        }
        self.total.as_secs_f64() * 1000.0 / self.records as f64
    }
}
