//! Per-device sequence tracking.

use std::time::SystemTime;

use crate::dedup::{DedupMode, DuplicateFilter};
use crate::packet::Frame;
use crate::reorder::{ReorderBuffer, ReorderEntry};

/// Session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No frame processed yet
    Unseen,
    /// At least one frame processed; final state
    Active,
}

/// Outcome of sequence checks for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SequenceVerdict {
    /// Sequence number was already seen
    pub duplicate: bool,
    /// Sequence numbers skipped since the previous fresh frame
    pub gap_size: u32,
}

impl SequenceVerdict {
    /// Whether any sequence numbers were skipped.
    pub fn gap(&self) -> bool {
        self.gap_size > 0
    }
}

/// Result of feeding one frame through a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Duplicate and gap flags
    pub verdict: SequenceVerdict,
    /// Entry pushed out of the reorder buffer, if it overflowed
    pub evicted: Option<ReorderEntry>,
}

/// Collector-side state for one device.
///
/// Mutated only by the collector loop; lives for the process lifetime.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    /// Device this session tracks
    pub device_id: u16,
    /// Lifecycle state
    pub state: SessionState,
    /// Timestamp of the last fresh frame
    pub last_timestamp: u32,
    /// Frames received, duplicates included
    pub total_packets: u64,
    /// Frames whose sequence number had been seen
    pub duplicate_count: u64,
    /// Sequence numbers skipped, summed over all gaps
    pub gap_count: u64,
    last_seq: Option<u32>,
    seen: DuplicateFilter,
    reorder: ReorderBuffer,
}

impl DeviceSession {
    /// Create an empty session.
    pub fn new(device_id: u16, reorder_window: usize, dedup: DedupMode) -> Self {
        Self {
            device_id,
            state: SessionState::Unseen,
            last_timestamp: 0,
            total_packets: 0,
            duplicate_count: 0,
            gap_count: 0,
            last_seq: None,
            seen: DuplicateFilter::new(dedup),
            reorder: ReorderBuffer::new(reorder_window),
        }
    }

    /// Last fresh sequence number, if any.
    pub fn last_seq(&self) -> Option<u32> {
        self.last_seq
    }

    /// Last fresh sequence number, or -1 when none has been seen.
    pub fn last_seq_or_none(&self) -> i64 {
        self.last_seq.map_or(-1, i64::from)
    }

    /// Staged frames.
    pub fn reorder_buffer(&self) -> &ReorderBuffer {
        &self.reorder
    }

    /// Number of sequence numbers held by the duplicate filter.
    pub fn tracked_sequences(&self) -> usize {
        self.seen.len()
    }

    /// Record `seq` as seen. Returns `true` and bumps the duplicate counter if
    /// it had been seen before.
    pub fn check_duplicate(&mut self, seq: u32) -> bool {
        if self.seen.insert(seq) {
            return false;
        }
        self.duplicate_count += 1;
        true
    }

    /// Compute the gap before `seq` and move the cursor to it.
    ///
    /// The cursor moves even when `seq` is below the expected value, so a late
    /// frame rewinds it and no gap is recorded for that frame.
    pub fn detect_gap(&mut self, seq: u32) -> u32 {
        let mut gap = 0;

        if let Some(last) = self.last_seq {
            let expected = u64::from(last) + 1;
            if u64::from(seq) > expected {
                gap = (u64::from(seq) - expected) as u32;
                self.gap_count += u64::from(gap);
            }
        }

        self.last_seq = Some(seq);
        gap
    }

    /// Run one frame through duplicate detection, gap detection and staging.
    pub fn observe(&mut self, frame: &Frame, arrival_time: SystemTime) -> Observation {
        self.state = SessionState::Active;
        self.total_packets += 1;

        let seq = frame.sequence_number;
        if self.check_duplicate(seq) {
            return Observation {
                verdict: SequenceVerdict {
                    duplicate: true,
                    gap_size: 0,
                },
                evicted: None,
            };
        }

        let gap_size = self.detect_gap(seq);
        self.last_timestamp = frame.timestamp;
        let evicted = self.reorder.push(ReorderEntry::new(frame.clone(), arrival_time));

        Observation {
            verdict: SequenceVerdict {
                duplicate: false,
                gap_size,
            },
            evicted,
        }
    }

    /// Drain the reorder buffer in timestamp order.
    pub fn flush_reorder_buffer(&mut self) -> Vec<ReorderEntry> {
        self.reorder.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Reading, SensorType};

    fn session() -> DeviceSession {
        DeviceSession::new(1001, 10, DedupMode::Unbounded)
    }

    fn frame(seq: u32) -> Frame {
        Frame::data(1001, seq, 1_000u32.wrapping_add(seq), vec![Reading::new(SensorType::Voltage, 3.3)])
    }

    fn observe(session: &mut DeviceSession, seq: u32) -> SequenceVerdict {
        session.observe(&frame(seq), SystemTime::now()).verdict
    }

    #[test]
    fn starts_unseen() {
        let mut s = session();
        assert_eq!(s.state, SessionState::Unseen);
        assert_eq!(s.last_seq_or_none(), -1);

        observe(&mut s, 0);
        assert_eq!(s.state, SessionState::Active);
    }

    #[test]
    fn in_order_stream_has_no_gaps() {
        let mut s = session();
        for seq in 0..50 {
            let verdict = observe(&mut s, seq);
            assert!(!verdict.duplicate);
            assert_eq!(verdict.gap_size, 0);
        }
        assert_eq!(s.gap_count, 0);
        assert_eq!(s.last_seq(), Some(49));
    }

    #[test]
    fn first_frame_never_gaps() {
        let mut s = session();
        assert_eq!(observe(&mut s, 500).gap_size, 0);
    }

    #[test]
    fn gap_counts_missing_sequences() {
        let mut s = session();
        for seq in 0..=5 {
            observe(&mut s, seq);
        }

        let verdict = observe(&mut s, 8);
        assert_eq!(verdict.gap_size, 2);
        assert!(verdict.gap());
        assert_eq!(s.gap_count, 2);
        assert_eq!(s.last_seq(), Some(8));
    }

    #[test]
    fn duplicate_leaves_state_untouched() {
        let mut s = session();
        observe(&mut s, 0);
        observe(&mut s, 2);
        let staged = s.reorder_buffer().len();

        let verdict = observe(&mut s, 0);
        assert!(verdict.duplicate);
        assert_eq!(verdict.gap_size, 0);
        assert_eq!(s.duplicate_count, 1);
        assert_eq!(s.gap_count, 1);
        assert_eq!(s.last_seq(), Some(2));
        assert_eq!(s.reorder_buffer().len(), staged);
        assert_eq!(s.total_packets, 3);
    }

    #[test]
    fn late_frame_rewinds_cursor() {
        let mut s = session();
        observe(&mut s, 0);
        observe(&mut s, 5);
        assert_eq!(s.gap_count, 4);

        let verdict = observe(&mut s, 3);
        assert_eq!(verdict.gap_size, 0);
        assert_eq!(s.last_seq(), Some(3));

        // 4 and 5 count as missing again after the rewind
        observe(&mut s, 6);
        assert_eq!(s.gap_count, 6);
    }

    #[test]
    fn cursor_at_u32_max_does_not_overflow() {
        let mut s = session();
        observe(&mut s, u32::MAX);
        assert_eq!(s.last_seq(), Some(u32::MAX));

        let verdict = observe(&mut s, 0);
        assert_eq!(verdict.gap_size, 0);
        assert_eq!(s.last_seq(), Some(0));

        assert_eq!(observe(&mut s, 5).gap_size, 4);
        assert_eq!(s.gap_count, 4);
    }

    #[test]
    fn bounded_mode_detects_recent_duplicates() {
        let mut s = DeviceSession::new(7, 10, DedupMode::Window(64));
        for seq in 0..10 {
            observe(&mut s, seq);
        }
        assert!(observe(&mut s, 4).duplicate);
        assert_eq!(s.duplicate_count, 1);
    }

    #[test]
    fn flush_empties_buffer() {
        let mut s = session();
        for seq in [2, 0, 1] {
            observe(&mut s, seq);
        }
        let seqs: Vec<u32> = s
            .flush_reorder_buffer()
            .iter()
            .map(|e| e.sequence_number)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(s.reorder_buffer().is_empty());
    }
}
