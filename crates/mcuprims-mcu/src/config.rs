use std::time::Duration;

use mcuprims_frame::{DEFAULT_ENTRY_BYTES, DEFAULT_RING_LEN};

/// Per-controller settings for the command path.
///
/// Framing margins and the retry budget belong to the bus and come from
/// [`McuOps`](mcuprims_transport::McuOps) instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McuConfig {
    /// Time to wait for a matching reply, per attempt.
    pub timeout: Duration,
    /// Commands kept in the debug ring.
    pub debug_ring_len: usize,
    /// Message bytes kept per debug ring entry.
    pub debug_entry_bytes: usize,
    /// Byte scanned for in outbound messages. 0 disables scanning.
    pub poison: u8,
    /// Consecutive poison bytes that trigger a report.
    pub poison_min_run: usize,
    /// Shortest sleep before resending while the controller resets.
    pub retry_backoff_min: Duration,
    /// Longest sleep before resending while the controller resets.
    pub retry_backoff_max: Duration,
    /// The bus can hang hard during a reset (e.g. SDIO); fail fast then.
    pub hard_hang_media: bool,
}

impl Default for McuConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            debug_ring_len: DEFAULT_RING_LEN,
            debug_entry_bytes: DEFAULT_ENTRY_BYTES,
            poison: 0,
            poison_min_run: 1,
            retry_backoff_min: Duration::from_millis(200),
            retry_backoff_max: Duration::from_millis(500),
            hard_hang_media: false,
        }
    }
}
