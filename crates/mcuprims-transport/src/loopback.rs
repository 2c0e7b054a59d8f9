use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mcuprims_frame::{FrameMargins, McuMsg};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::{McuCmd, McuOps, Response, ResponseSink, Seq};

/// Command header: cmd (4, LE) + len (2, LE) + seq (1) + flags (1).
pub const TXD_LEN: usize = 8;

/// Reply header: seq (1) + status (1) + len (2, LE).
pub const RXD_LEN: usize = 4;

/// Commands carrying this bit are fire-and-forget; the controller never
/// answers them.
pub const CMD_FLAG_NO_REPLY: McuCmd = 1 << 31;

const TXD_FLAG_WAIT_RESP: u8 = 0x01;
const MAX_SEQ: Seq = 0x0f;

/// Fault injected into the next command the loopback controller receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Swallow the command; no reply.
    Drop,
    /// Deliver a reply for a different sequence number first.
    Stale,
    /// Refuse the command with a transient error.
    Busy,
    /// Reply with a non-zero status.
    Reject(u8),
    /// Reply from another thread after a delay.
    Delay(Duration),
}

impl FromStr for Fault {
    type Err = String;

    /// Parses `drop`, `stale`, `busy`, `reject[:STATUS]` and `delay:MS`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (s, None),
        };
        match (name, arg) {
            ("drop", None) => Ok(Self::Drop),
            ("stale", None) => Ok(Self::Stale),
            ("busy", None) => Ok(Self::Busy),
            ("reject", None) => Ok(Self::Reject(1)),
            ("reject", Some(status)) => match status.parse::<u8>() {
                Ok(0) | Err(_) => Err(format!("invalid reject status: {status}")),
                Ok(status) => Ok(Self::Reject(status)),
            },
            ("delay", Some(ms)) => ms
                .parse::<u64>()
                .map(|ms| Self::Delay(Duration::from_millis(ms)))
                .map_err(|_| format!("invalid delay: {ms}")),
            _ => Err(format!("unknown fault: {s}")),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drop => write!(f, "drop"),
            Self::Stale => write!(f, "stale"),
            Self::Busy => write!(f, "busy"),
            Self::Reject(status) => write!(f, "reject:{status}"),
            Self::Delay(delay) => write!(f, "delay:{}", delay.as_millis()),
        }
    }
}

/// Configuration for the loopback controller.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Margins requested from the command path.
    pub margins: FrameMargins,
    /// Resends allowed per command.
    pub max_retry: u32,
    /// Time spent inside `send_msg`, to widen race windows in tests.
    pub send_latency: Duration,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            margins: FrameMargins::new(TXD_LEN, 4),
            max_retry: 3,
            send_latency: Duration::ZERO,
        }
    }
}

/// A command as it was put on the loopback wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub cmd: McuCmd,
    pub seq: Seq,
    /// Payload length, header excluded.
    pub len: usize,
}

#[derive(Default)]
struct Shared {
    faults: Mutex<VecDeque<Fault>>,
    sent: Mutex<Vec<SentFrame>>,
    drains: AtomicUsize,
    in_send: AtomicUsize,
    peak_in_send: AtomicUsize,
}

/// Handle for scripting and observing a [`LoopbackMcu`] after it has been
/// handed to the command path.
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<Shared>,
}

impl LoopbackHandle {
    /// Queue a fault for a future command, in order.
    pub fn inject(&self, fault: Fault) {
        self.shared.faults.lock().push_back(fault);
    }

    /// Every frame sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.shared.sent.lock().clone()
    }

    /// Number of `tx_cleanup` calls observed.
    pub fn drains(&self) -> usize {
        self.shared.drains.load(Ordering::SeqCst)
    }

    /// Highest number of threads seen inside `send_msg` at once.
    pub fn peak_concurrency(&self) -> usize {
        self.shared.peak_in_send.load(Ordering::SeqCst)
    }

    /// Faults still queued.
    pub fn pending_faults(&self) -> usize {
        self.shared.faults.lock().len()
    }
}

impl fmt::Debug for LoopbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackHandle")
            .field("sent", &self.shared.sent.lock().len())
            .field("drains", &self.drains())
            .field("pending_faults", &self.pending_faults())
            .finish()
    }
}

/// In-process controller that echoes every command back as its reply.
///
/// Replies go to the [`ResponseSink`] given at construction, the same way a
/// real bus receive path would deliver them.
pub struct LoopbackMcu {
    sink: Arc<dyn ResponseSink>,
    config: LoopbackConfig,
    seq: Seq,
    shared: Arc<Shared>,
}

impl LoopbackMcu {
    /// Create a loopback controller delivering replies to `sink`.
    pub fn new(sink: Arc<dyn ResponseSink>, config: LoopbackConfig) -> (Self, LoopbackHandle) {
        let shared = Arc::new(Shared::default());
        let handle = LoopbackHandle {
            shared: shared.clone(),
        };
        let ops = Self {
            sink,
            config,
            seq: 0,
            shared,
        };
        (ops, handle)
    }

    fn next_seq(&mut self) -> Seq {
        self.seq = (self.seq % MAX_SEQ) + 1;
        self.seq
    }

    fn reply(seq: Seq, status: u8, payload: &[u8]) -> Result<McuMsg> {
        let len = u16::try_from(payload.len())
            .map_err(|_| TransportError::Malformed(format!("reply too long: {}", payload.len())))?;
        let mut msg = McuMsg::alloc(FrameMargins::NONE, &[], RXD_LEN + payload.len())?;
        msg.put(&[seq, status])?;
        msg.put(&len.to_le_bytes())?;
        msg.put(payload)?;
        Ok(msg)
    }

    fn deliver_after(&self, delay: Duration, msg: McuMsg) {
        let sink = self.sink.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            sink.deliver(msg);
        });
    }
}

impl McuOps for LoopbackMcu {
    fn margins(&self) -> FrameMargins {
        self.config.margins
    }

    fn max_retry(&self) -> u32 {
        self.config.max_retry
    }

    fn prepare_msg(&mut self, _msg: &mut McuMsg, cmd: McuCmd) -> Result<Seq> {
        let seq = self.next_seq();
        trace!(cmd = format_args!("{cmd:08x}"), seq, "prepared command");
        Ok(seq)
    }

    fn send_msg(&mut self, mut msg: McuMsg, cmd: McuCmd, seq: Seq) -> Result<()> {
        let in_send = self.shared.in_send.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak_in_send.fetch_max(in_send, Ordering::SeqCst);
        if !self.config.send_latency.is_zero() {
            thread::sleep(self.config.send_latency);
        }
        let result = self.transmit(&mut msg, cmd, seq);
        self.shared.in_send.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn parse_response(&mut self, cmd: McuCmd, msg: Option<McuMsg>, seq: Seq) -> Result<Response> {
        let Some(mut msg) = msg else {
            return Ok(Response::TimedOut);
        };

        if msg.len() < RXD_LEN {
            return Err(TransportError::Malformed(format!(
                "reply shorter than header ({} bytes)",
                msg.len()
            )));
        }
        let (rx_seq, status, len) = {
            let rxd = msg.data();
            (rxd[0], rxd[1], u16::from_le_bytes([rxd[2], rxd[3]]) as usize)
        };

        if rx_seq != seq {
            debug!(
                cmd = format_args!("{cmd:08x}"),
                expected = seq,
                got = rx_seq,
                "dropping reply for another command"
            );
            return Ok(Response::Mismatched);
        }
        if status != 0 {
            return Err(TransportError::Rejected { cmd, status });
        }
        msg.pull_front(RXD_LEN)?;
        if len > msg.len() {
            return Err(TransportError::Malformed(format!(
                "reply claims {len} bytes, carries {}",
                msg.len()
            )));
        }

        msg.truncate(len);
        Ok(Response::Matched(msg))
    }

    fn tx_cleanup(&mut self, is_final: bool) {
        self.shared.drains.fetch_add(1, Ordering::SeqCst);
        trace!(is_final, "tx cleanup");
    }
}

impl LoopbackMcu {
    fn transmit(&mut self, msg: &mut McuMsg, cmd: McuCmd, seq: Seq) -> Result<()> {
        let fault = self.shared.faults.lock().pop_front();
        if fault == Some(Fault::Busy) {
            debug!(cmd = format_args!("{cmd:08x}"), seq, "loopback busy");
            return Err(TransportError::Retry("controller busy".to_string()));
        }

        let payload = msg.data().to_vec();
        let len = u16::try_from(payload.len()).map_err(|_| {
            TransportError::Malformed(format!("command too long: {}", payload.len()))
        })?;
        let wants_reply = cmd & CMD_FLAG_NO_REPLY == 0;
        let flags = if wants_reply { TXD_FLAG_WAIT_RESP } else { 0 };

        let mut txd = [0u8; TXD_LEN];
        txd[0..4].copy_from_slice(&cmd.to_le_bytes());
        txd[4..6].copy_from_slice(&len.to_le_bytes());
        txd[6] = seq;
        txd[7] = flags;
        msg.push_front(&txd)?;

        self.shared.sent.lock().push(SentFrame {
            cmd,
            seq,
            len: payload.len(),
        });
        debug!(cmd = format_args!("{cmd:08x}"), seq, len = payload.len(), ?fault, "loopback tx");

        if !wants_reply {
            return Ok(());
        }

        match fault {
            Some(Fault::Drop) => {}
            Some(Fault::Stale) => {
                let stale_seq = (seq % MAX_SEQ) + 1;
                self.sink.deliver(Self::reply(stale_seq, 0, &[])?);
                self.sink.deliver(Self::reply(seq, 0, &payload)?);
            }
            Some(Fault::Reject(status)) => {
                self.sink.deliver(Self::reply(seq, status, &[])?);
            }
            Some(Fault::Delay(delay)) => {
                self.deliver_after(delay, Self::reply(seq, 0, &payload)?);
            }
            Some(Fault::Busy) | None => {
                self.sink.deliver(Self::reply(seq, 0, &payload)?);
            }
        }
        Ok(())
    }
}
