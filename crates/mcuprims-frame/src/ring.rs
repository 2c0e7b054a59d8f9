use std::collections::VecDeque;

use crate::hex::hex_pairs;

/// Default number of commands kept in the debug ring.
pub const DEFAULT_RING_LEN: usize = 32;

/// Default number of message bytes kept per ring entry.
pub const DEFAULT_ENTRY_BYTES: usize = 256;

/// One outbound command as captured before it hit the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingEntry {
    /// Command identifier.
    pub cmd: u32,
    /// Full message size, even when `message` was capped.
    pub size: usize,
    /// Leading message bytes, at most the ring's per-entry cap.
    pub message: Vec<u8>,
}

impl RingEntry {
    /// One dump line: command, size and the captured bytes in hex.
    pub fn render(&self) -> String {
        format!(
            "cmd: {:08x}  size: {}  msg (hex, LE): {}",
            self.cmd,
            self.size,
            hex_pairs(&self.message)
        )
    }
}

/// Fixed-capacity log of the most recent commands sent to the controller.
///
/// Once full, each new record silently evicts the oldest one. The ring does
/// no locking of its own; the command path owns it behind its lock.
#[derive(Debug, Clone)]
pub struct DebugRing {
    entries: VecDeque<RingEntry>,
    capacity: usize,
    entry_bytes: usize,
}

impl DebugRing {
    /// Create a ring keeping `capacity` entries of up to `entry_bytes` each.
    pub fn new(capacity: usize, entry_bytes: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            entry_bytes,
        }
    }

    /// Record a command about to be sent.
    pub fn record(&mut self, cmd: u32, bytes: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        let kept = bytes.len().min(self.entry_bytes);
        self.entries.push_back(RingEntry {
            cmd,
            size: bytes.len(),
            message: bytes[..kept].to_vec(),
        });
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &RingEntry> {
        self.entries.iter()
    }

    /// Render every entry, oldest first, one line each.
    pub fn dump(&self) -> Vec<String> {
        self.entries.iter().map(RingEntry::render).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for DebugRing {
    fn default() -> Self {
        Self::new(DEFAULT_RING_LEN, DEFAULT_ENTRY_BYTES)
    }
}
