use std::fmt;

use bytes::Bytes;
use tracing::trace;

use crate::error::{FrameError, Result};

/// Bytes reserved in front of and behind every message payload.
///
/// Declared once by the bus layer that owns the wire framing and never
/// changed while messages are in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameMargins {
    /// Front margin, consumed by [`McuMsg::push_front`].
    pub headroom: usize,
    /// Back margin, consumed by [`McuMsg::put`] past the payload.
    pub tailroom: usize,
}

impl FrameMargins {
    /// No margins at all.
    pub const NONE: Self = Self::new(0, 0);

    pub const fn new(headroom: usize, tailroom: usize) -> Self {
        Self { headroom, tailroom }
    }
}

/// An owned MCU message buffer.
///
/// ```text
/// ┌────────────┬──────────────────┬────────────┐
/// │ headroom   │ data             │ tailroom   │
/// └────────────┴──────────────────┴────────────┘
/// 0            head               tail         capacity
/// ```
///
/// The whole region starts zeroed so nothing from a previous allocation can
/// leak onto the bus through the margins.
pub struct McuMsg {
    region: Vec<u8>,
    head: usize,
    tail: usize,
}

impl McuMsg {
    /// Allocate a message with room for `max(len, data.len())` payload bytes
    /// plus the margins, and copy `data` in after the front margin.
    pub fn alloc(margins: FrameMargins, data: &[u8], len: usize) -> Result<Self> {
        let len = len.max(data.len());
        let size = margins
            .headroom
            .checked_add(len)
            .and_then(|n| n.checked_add(margins.tailroom))
            .ok_or(FrameError::OutOfMemory { size: usize::MAX })?;

        let mut region = Vec::new();
        region
            .try_reserve_exact(size)
            .map_err(|_| FrameError::OutOfMemory { size })?;
        region.resize(size, 0);

        let mut msg = Self {
            region,
            head: margins.headroom,
            tail: margins.headroom,
        };
        if !data.is_empty() {
            msg.put(data)?;
        }

        trace!(size, payload = data.len(), "allocated mcu message");
        Ok(msg)
    }

    /// Allocate a margin-less message holding exactly `data`.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Self::alloc(FrameMargins::NONE, data, 0)
    }

    /// The current payload.
    pub fn data(&self) -> &[u8] {
        &self.region[self.head..self.tail]
    }

    /// The current payload, mutably.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.region[self.head..self.tail]
    }

    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Total size of the allocated region, margins included.
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Unused bytes in front of the payload.
    pub fn headroom(&self) -> usize {
        self.head
    }

    /// Unused bytes behind the payload.
    pub fn tailroom(&self) -> usize {
        self.region.len() - self.tail
    }

    /// Append `bytes` behind the payload.
    pub fn put(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.tailroom() {
            return Err(FrameError::NoTailroom {
                needed: bytes.len(),
                available: self.tailroom(),
            });
        }
        let end = self.tail + bytes.len();
        self.region[self.tail..end].copy_from_slice(bytes);
        self.tail = end;
        Ok(())
    }

    /// Prepend `bytes` in front of the payload, consuming headroom.
    pub fn push_front(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.head {
            return Err(FrameError::NoHeadroom {
                needed: bytes.len(),
                available: self.head,
            });
        }
        let start = self.head - bytes.len();
        self.region[start..self.head].copy_from_slice(bytes);
        self.head = start;
        Ok(())
    }

    /// Strip `n` bytes from the front of the payload and return them.
    pub fn pull_front(&mut self, n: usize) -> Result<&[u8]> {
        if n > self.len() {
            return Err(FrameError::Truncated {
                needed: n,
                len: self.len(),
            });
        }
        let start = self.head;
        self.head += n;
        Ok(&self.region[start..self.head])
    }

    /// Shorten the payload to `len` bytes. No-op when already shorter.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.tail = self.head + len;
        }
    }

    /// Consume the message and return the payload as immutable bytes.
    pub fn freeze(self) -> Bytes {
        let (head, tail) = (self.head, self.tail);
        Bytes::from(self.region).slice(head..tail)
    }
}

impl AsRef<[u8]> for McuMsg {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl fmt::Debug for McuMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McuMsg")
            .field("len", &self.len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .finish()
    }
}
