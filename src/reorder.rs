//! Bounded staging of frames ordered by their embedded timestamp.

use std::time::SystemTime;

use crate::packet::Frame;

/// Default number of frames staged per device.
pub const DEFAULT_REORDER_WINDOW: usize = 10;

/// A frame held in the reorder buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReorderEntry {
    /// Sequence number of the frame
    pub sequence_number: u32,
    /// Sender timestamp used for ordering
    pub timestamp: u32,
    /// The decoded frame
    pub frame: Frame,
    /// When the collector received it
    pub arrival_time: SystemTime,
}

impl ReorderEntry {
    /// Stage `frame` received at `arrival_time`.
    pub fn new(frame: Frame, arrival_time: SystemTime) -> Self {
        Self {
            sequence_number: frame.sequence_number,
            timestamp: frame.timestamp,
            frame,
            arrival_time,
        }
    }
}

/// Per-device staging area.
///
/// Holds at most `window` entries. On overflow the entry with the smallest
/// sender timestamp is evicted, not the oldest arrival. A flush yields every
/// entry in timestamp order and empties the buffer. Entries with equal
/// timestamps keep their arrival order.
#[derive(Debug, Clone)]
pub struct ReorderBuffer {
    /// Maximum entries before eviction
    window: usize,
    /// Staged entries, arrival order until the next sort
    entries: Vec<ReorderEntry>,
}

impl ReorderBuffer {
    /// Create a buffer holding at most `window` entries.
    pub fn new(window: usize) -> Self {
        Self {
            window,
            entries: Vec::with_capacity(window + 1),
        }
    }

    /// Stage an entry. Returns the evicted entry if the window overflowed.
    pub fn push(&mut self, entry: ReorderEntry) -> Option<ReorderEntry> {
        self.entries.push(entry);

        if self.entries.len() > self.window {
            self.entries.sort_by_key(|e| e.timestamp);
            return Some(self.entries.remove(0));
        }

        None
    }

    /// Drain every staged entry in ascending timestamp order.
    pub fn flush(&mut self) -> Vec<ReorderEntry> {
        self.entries.sort_by_key(|e| e.timestamp);
        std::mem::take(&mut self.entries)
    }

    /// Number of staged entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capacity before eviction.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Staged entries in their current order.
    pub fn entries(&self) -> &[ReorderEntry] {
        &self.entries
    }
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_REORDER_WINDOW)
    }
}
