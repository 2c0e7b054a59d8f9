use std::sync::atomic::{AtomicBool, Ordering};

/// Device flags shared between the command path and the rest of the driver.
///
/// The reset worker and the bus driver write these; the command path only
/// reads them. The reset flag is written through
/// [`ResponseInbox::set_reset`](crate::ResponseInbox::set_reset) so that a
/// blocked waiter wakes up.
#[derive(Debug, Default)]
pub struct McuState {
    reset: AtomicBool,
    bus_hung: AtomicBool,
}

impl McuState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a controller reset is in progress.
    pub fn is_reset(&self) -> bool {
        self.reset.load(Ordering::Acquire)
    }

    /// Whether the bus reported a hard hang.
    pub fn is_bus_hung(&self) -> bool {
        self.bus_hung.load(Ordering::Acquire)
    }

    pub fn set_bus_hung(&self, hung: bool) {
        self.bus_hung.store(hung, Ordering::Release);
    }

    pub(crate) fn store_reset(&self, reset: bool) {
        self.reset.store(reset, Ordering::Release);
    }
}
