use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use mcuprims_frame::McuMsg;
use mcuprims_transport::ResponseSink;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::state::McuState;

/// FIFO of replies delivered by the bus receive path.
///
/// Pushes may come from any thread; the command path is the only consumer.
/// The queue has its own lock, independent of the command path's.
pub struct ResponseInbox {
    queue: Mutex<VecDeque<McuMsg>>,
    cond: Condvar,
    state: Arc<McuState>,
}

impl ResponseInbox {
    pub fn new(state: Arc<McuState>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            state,
        }
    }

    /// Device flags this inbox observes.
    pub fn state(&self) -> &Arc<McuState> {
        &self.state
    }

    /// Queue a reply and wake the waiter.
    pub fn push(&self, msg: McuMsg) {
        let mut queue = self.queue.lock();
        queue.push_back(msg);
        trace!(queued = queue.len(), "mcu reply queued");
        drop(queue);
        self.cond.notify_one();
    }

    /// Take the oldest reply, waiting until one arrives, a reset starts or
    /// `deadline` passes.
    ///
    /// Returns `None` right away once `deadline` is in the past, so repeated
    /// calls against one deadline share a single time budget.
    pub fn pop_until(&self, deadline: Instant) -> Option<McuMsg> {
        let mut queue = self.queue.lock();
        if Instant::now() >= deadline {
            return None;
        }

        while queue.is_empty() && !self.state.is_reset() {
            if self.cond.wait_until(&mut queue, deadline).timed_out() {
                break;
            }
        }
        queue.pop_front()
    }

    /// Take the oldest reply without waiting.
    pub fn try_pop(&self) -> Option<McuMsg> {
        self.queue.lock().pop_front()
    }

    /// Enter or leave controller reset.
    ///
    /// Entering wakes any waiter. Leaving drops replies queued before the
    /// controller restarted.
    pub fn set_reset(&self, reset: bool) {
        let mut queue = self.queue.lock();
        self.state.store_reset(reset);
        if !reset && !queue.is_empty() {
            debug!(dropped = queue.len(), "dropping replies from before reset");
            queue.clear();
        }
        drop(queue);
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Drop every queued reply, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

impl ResponseSink for ResponseInbox {
    fn deliver(&self, msg: McuMsg) {
        self.push(msg);
    }
}
