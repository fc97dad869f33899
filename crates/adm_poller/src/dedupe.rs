//! Two-layer de-duplication of re-delivered lines.

use std::collections::{HashSet, VecDeque};

/// Lines remembered verbatim for back-to-back repeats.
pub const RECENT_CAPACITY: usize = 200;

/// Fingerprints remembered across cycles.
pub const FINGERPRINT_CAPACITY: usize = 4000;

/// First eight bytes of the BLAKE3 hash of `line` with trailing whitespace
/// removed.
pub fn fingerprint(line: &str) -> u64 {
    let hash = blake3::hash(line.trim_end().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

/// Bounded memory of accepted lines.
///
/// Both layers only ever grow by appending and shrink by FIFO eviction.
#[derive(Debug, Clone)]
pub struct LineWindow {
    recent: VecDeque<String>,
    recent_capacity: usize,
    seen: HashSet<u64>,
    order: VecDeque<u64>,
    fingerprint_capacity: usize,
}

impl Default for LineWindow {
    fn default() -> Self {
        Self::with_capacity(RECENT_CAPACITY, FINGERPRINT_CAPACITY)
    }
}

impl LineWindow {
    pub fn with_capacity(recent_capacity: usize, fingerprint_capacity: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(recent_capacity),
            recent_capacity: recent_capacity.max(1),
            seen: HashSet::with_capacity(fingerprint_capacity),
            order: VecDeque::with_capacity(fingerprint_capacity),
            fingerprint_capacity: fingerprint_capacity.max(1),
        }
    }

    /// Returns `true` if `line` is new, recording it.
    ///
    /// Lines empty after stripping `\r`/`\n` are rejected and not recorded.
    pub fn accept(&mut self, line: &str) -> bool {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return false;
        }

        let fp = fingerprint(line);
        if self.seen.contains(&fp) {
            return false;
        }
        if self.recent.iter().any(|seen| seen == line) {
            return false;
        }

        self.seen.insert(fp);
        self.order.push_back(fp);
        while self.order.len() > self.fingerprint_capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }

        self.recent.push_back(line.to_string());
        while self.recent.len() > self.recent_capacity {
            self.recent.pop_front();
        }
        true
    }

    /// Number of fingerprints held.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
