//! Duplicate detection for per-device sequence numbers.

use std::collections::HashSet;

/// Largest bounded window a session may use.
pub const MAX_DEDUP_WINDOW: u32 = 1024;

/// How a session remembers which sequence numbers it has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupMode {
    /// Remember every sequence number for the session lifetime.
    #[default]
    Unbounded,
    /// Remember only the last `n` sequence numbers below the highest seen.
    Window(u32),
}

/// Sliding bitmap over the most recent sequence numbers.
///
/// Anchored at the highest sequence seen so far. Slots are indexed by
/// `seq % slots` with a power-of-two slot count, so indexing stays consistent
/// across the u32 wraparound. Forward jumps larger than 2^31 are treated as
/// backward arrivals, which is how a wrapped counter looks in unsigned
/// arithmetic.
#[derive(Debug, Clone)]
pub struct SequenceWindow {
    /// Highest sequence number seen so far
    max_seq: Option<u32>,
    /// Number of sequences tracked below and including `max_seq`
    window: u32,
    /// Slot bitmap, `slots` bits long
    bits: Vec<u64>,
    slots: u32,
}

impl SequenceWindow {
    /// Create a window tracking `window` sequence numbers (clamped to 1..=1024).
    pub fn new(window: u32) -> Self {
        let window = window.clamp(1, MAX_DEDUP_WINDOW);
        let slots = window.next_power_of_two().max(64);
        Self {
            max_seq: None,
            window,
            bits: vec![0; (slots / 64) as usize],
            slots,
        }
    }

    /// Window size in sequence numbers.
    pub fn window(&self) -> u32 {
        self.window
    }

    /// Record `seq`. Returns `true` if it had not been seen.
    ///
    /// Sequences that fell out of the window are reported as seen, since they
    /// can no longer be told apart from replays.
    pub fn insert(&mut self, seq: u32) -> bool {
        let Some(max) = self.max_seq else {
            self.max_seq = Some(seq);
            self.set(seq);
            return true;
        };

        let forward = seq.wrapping_sub(max);
        if forward == 0 {
            return false;
        }

        if forward < (1 << 31) {
            if forward >= self.slots {
                self.bits.iter_mut().for_each(|w| *w = 0);
            } else {
                for step in 1..=forward {
                    self.clear(max.wrapping_add(step));
                }
            }
            self.max_seq = Some(seq);
            self.set(seq);
            return true;
        }

        let backward = max.wrapping_sub(seq);
        if backward >= self.window {
            return false;
        }

        if self.is_set(seq) {
            return false;
        }

        self.set(seq);
        true
    }

    /// Number of sequences currently marked as seen.
    pub fn len(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.max_seq.is_none()
    }

    fn slot(&self, seq: u32) -> (usize, u64) {
        let idx = seq & (self.slots - 1);
        ((idx / 64) as usize, 1u64 << (idx % 64))
    }

    fn set(&mut self, seq: u32) {
        let (word, bit) = self.slot(seq);
        self.bits[word] |= bit;
    }

    fn clear(&mut self, seq: u32) {
        let (word, bit) = self.slot(seq);
        self.bits[word] &= !bit;
    }

    fn is_set(&self, seq: u32) -> bool {
        let (word, bit) = self.slot(seq);
        self.bits[word] & bit != 0
    }
}

/// Per-session set of seen sequence numbers.
#[derive(Debug, Clone)]
pub enum DuplicateFilter {
    /// Every sequence ever seen.
    Unbounded(HashSet<u32>),
    /// Bounded sliding window.
    Window(SequenceWindow),
}

impl DuplicateFilter {
    /// Create a filter for the given mode.
    pub fn new(mode: DedupMode) -> Self {
        match mode {
            DedupMode::Unbounded => Self::Unbounded(HashSet::new()),
            DedupMode::Window(n) => Self::Window(SequenceWindow::new(n)),
        }
    }

    /// Record `seq`. Returns `true` if it is new, `false` for a duplicate.
    pub fn insert(&mut self, seq: u32) -> bool {
        match self {
            Self::Unbounded(seen) => seen.insert(seq),
            Self::Window(window) => window.insert(seq),
        }
    }

    /// Number of sequence numbers currently held.
    pub fn len(&self) -> usize {
        match self {
            Self::Unbounded(seen) => seen.len(),
            Self::Window(window) => window.len(),
        }
    }

    /// Whether no sequence number is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
