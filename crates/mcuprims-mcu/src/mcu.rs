use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mcuprims_frame::{scan, DebugRing, FrameMargins, McuMsg};
use mcuprims_transport::{McuCmd, McuOps, Response};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::config::McuConfig;
use crate::error::{McuError, Result};
use crate::inbox::ResponseInbox;
use crate::state::McuState;

/// Longest single reply wait once a configured timeout overflows `Instant`.
const MAX_REPLY_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Command path to one controller.
///
/// All sends go through one lock held from prepare to the final parse, so at
/// most one command is outstanding on the bus no matter how many threads
/// call in. Replies come in through the shared [`ResponseInbox`].
pub struct Mcu<O> {
    ops: Mutex<O>,
    debug: Mutex<DebugRing>,
    inbox: Arc<ResponseInbox>,
    margins: FrameMargins,
    max_retry: u32,
    config: McuConfig,
}

impl<O: McuOps> Mcu<O> {
    /// Create the command path over `ops`, reading replies from `inbox`.
    ///
    /// The bus receive path must deliver into the same inbox.
    pub fn new(ops: O, inbox: Arc<ResponseInbox>, config: McuConfig) -> Self {
        let margins = ops.margins();
        let max_retry = ops.max_retry();
        let debug = DebugRing::new(config.debug_ring_len, config.debug_entry_bytes);
        Self {
            ops: Mutex::new(ops),
            debug: Mutex::new(debug),
            inbox,
            margins,
            max_retry,
            config,
        }
    }

    /// Allocate a message with this bus's margins.
    pub fn msg_alloc(&self, data: &[u8], len: usize) -> Result<McuMsg> {
        Ok(McuMsg::alloc(self.margins, data, len)?)
    }

    /// Send a command, optionally waiting for its reply, and drop the reply.
    pub fn send_msg(&self, cmd: McuCmd, data: &[u8], wait_resp: bool) -> Result<()> {
        let msg = self.msg_alloc(data, 0)?;
        self.send(msg, cmd, wait_resp, false).map(|_| ())
    }

    /// Send a command and hand back the matched reply.
    ///
    /// Returns `Ok(None)` when `wait_resp` is false.
    pub fn send_and_get_msg(
        &self,
        cmd: McuCmd,
        data: &[u8],
        wait_resp: bool,
    ) -> Result<Option<McuMsg>> {
        let msg = self.msg_alloc(data, 0)?;
        self.send(msg, cmd, wait_resp, true)
    }

    /// Like [`send_and_get_msg`](Self::send_and_get_msg) for a message built
    /// with [`msg_alloc`](Self::msg_alloc).
    pub fn send_buf_and_get_msg(
        &self,
        msg: McuMsg,
        cmd: McuCmd,
        wait_resp: bool,
    ) -> Result<Option<McuMsg>> {
        self.send(msg, cmd, wait_resp, true)
    }

    fn send(
        &self,
        mut msg: McuMsg,
        cmd: McuCmd,
        wait_resp: bool,
        keep_resp: bool,
    ) -> Result<Option<McuMsg>> {
        let state = self.inbox.state();
        if self.config.hard_hang_media && state.is_reset() && state.is_bus_hung() {
            warn!(cmd = format_args!("{cmd:08x}"), "bus hung during reset, not sending");
            return Err(McuError::Io);
        }

        let mut ops = self.ops.lock();
        let seq = ops.prepare_msg(&mut msg, cmd)?;
        let mut last_err = McuError::TimedOut {
            cmd,
            seq,
            attempts: 0,
        };

        for attempt in 0..=self.max_retry {
            // Fresh copy per attempt; the send hook writes its header into it.
            let tx = McuMsg::alloc(self.margins, msg.data(), 0)?;

            if wait_resp && attempt > 0 {
                if state.is_reset() {
                    thread::sleep(self.backoff());
                }
                error!(cmd = format_args!("{cmd:08x}"), seq, attempt, "retry message");
            }

            if self.config.poison != 0
                && scan(tx.data(), self.config.poison, self.config.poison_min_run).is_some()
            {
                self.log_debug_buf();
            }
            self.debug.lock().record(cmd, tx.data());

            match ops.send_msg(tx, cmd, seq) {
                Ok(()) => {}
                Err(err) if err.is_retryable() => {
                    warn!(
                        cmd = format_args!("{cmd:08x}"),
                        seq,
                        attempt,
                        error = %err,
                        "send deferred"
                    );
                    last_err = err.into();
                    continue;
                }
                Err(err) => return Err(err.into()),
            }

            if !wait_resp {
                return Ok(None);
            }

            // One deadline per attempt; mismatched replies do not extend it.
            let deadline = self.reply_deadline();
            loop {
                let rx = self.inbox.pop_until(deadline);
                match ops.parse_response(cmd, rx, seq)? {
                    Response::Matched(resp) => {
                        debug!(
                            cmd = format_args!("{cmd:08x}"),
                            seq,
                            attempt,
                            len = resp.len(),
                            "mcu reply matched"
                        );
                        return Ok(keep_resp.then_some(resp));
                    }
                    Response::Mismatched => continue,
                    Response::TimedOut => break,
                }
            }

            last_err = McuError::TimedOut {
                cmd,
                seq,
                attempts: attempt + 1,
            };
        }

        error!(cmd = format_args!("{cmd:08x}"), seq, error = %last_err, "mcu command failed");
        self.log_debug_buf();
        Err(last_err)
    }

    fn reply_deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.config.timeout)
            .or_else(|| now.checked_add(MAX_REPLY_WAIT))
            .unwrap_or(now)
    }

    fn backoff(&self) -> Duration {
        let micros = |d: Duration| u64::try_from(d.as_micros()).unwrap_or(u64::MAX);
        let min = micros(self.config.retry_backoff_min);
        let max = micros(self.config.retry_backoff_max).max(min);
        Duration::from_micros(rand::thread_rng().gen_range(min..=max))
    }

    /// Upload `data` in chunks of at most `max_len` bytes without waiting for
    /// replies, reclaiming transmit descriptors after each chunk.
    pub fn send_firmware(&self, cmd: McuCmd, data: &[u8], max_len: usize) -> Result<()> {
        if max_len == 0 {
            return Err(McuError::InvalidChunkSize);
        }

        for (index, chunk) in data.chunks(max_len).enumerate() {
            self.send_msg(cmd, chunk, false)?;
            debug!(
                cmd = format_args!("{cmd:08x}"),
                index,
                len = chunk.len(),
                "firmware chunk sent"
            );
            self.ops.lock().tx_cleanup(false);
        }
        Ok(())
    }

    /// Render the debug ring, oldest command first, and log it.
    pub fn dump_debug_buf(&self) -> Vec<String> {
        let ring = self.debug.lock();
        log_ring(&ring);
        ring.dump()
    }

    fn log_debug_buf(&self) {
        log_ring(&self.debug.lock());
    }

    /// Snapshot of the debug ring.
    pub fn debug_ring(&self) -> DebugRing {
        self.debug.lock().clone()
    }
}

fn log_ring(ring: &DebugRing) {
    debug!("dumping last {} messages sent to firmware", ring.len());
    for entry in ring.iter() {
        debug!("{}", entry.render());
    }
}

impl<O> Mcu<O> {
    /// Bus receive path entry point for replies.
    pub fn rx_event(&self, msg: McuMsg) {
        self.inbox.push(msg);
    }

    /// Wait for the next reply until `deadline`, bypassing correlation.
    pub fn get_response(&self, deadline: Instant) -> Option<McuMsg> {
        self.inbox.pop_until(deadline)
    }

    /// Enter or leave controller reset. See [`ResponseInbox::set_reset`].
    pub fn set_reset(&self, reset: bool) {
        self.inbox.set_reset(reset);
    }

    pub fn set_bus_hung(&self, hung: bool) {
        self.inbox.state().set_bus_hung(hung);
    }

    pub fn state(&self) -> &Arc<McuState> {
        self.inbox.state()
    }

    pub fn inbox(&self) -> &Arc<ResponseInbox> {
        &self.inbox
    }

    pub fn config(&self) -> &McuConfig {
        &self.config
    }

    pub fn margins(&self) -> FrameMargins {
        self.margins
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use mcuprims_transport::{
        Fault, LoopbackConfig, LoopbackHandle, LoopbackMcu, Seq, TransportError,
        CMD_FLAG_NO_REPLY,
    };

    use super::*;

    #[derive(Default)]
    struct Counters {
        prepares: AtomicUsize,
        sends: AtomicUsize,
        parses: AtomicUsize,
        drains: AtomicUsize,
        sent_lens: Mutex<Vec<usize>>,
    }

    #[derive(Clone, Copy)]
    enum ParseMode {
        /// Reply byte 0 is the sequence number.
        BySeq,
        AlwaysTimeout,
    }

    struct ScriptedOps {
        seq: Seq,
        max_retry: u32,
        parse: ParseMode,
        prepare_error: Option<TransportError>,
        send_errors: VecDeque<TransportError>,
        counters: Arc<Counters>,
    }

    impl ScriptedOps {
        fn new(seq: Seq, max_retry: u32, parse: ParseMode) -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            let ops = Self {
                seq,
                max_retry,
                parse,
                prepare_error: None,
                send_errors: VecDeque::new(),
                counters: counters.clone(),
            };
            (ops, counters)
        }
    }

    impl McuOps for ScriptedOps {
        fn margins(&self) -> FrameMargins {
            FrameMargins::new(4, 0)
        }

        fn max_retry(&self) -> u32 {
            self.max_retry
        }

        fn prepare_msg(
            &mut self,
            _msg: &mut McuMsg,
            _cmd: McuCmd,
        ) -> mcuprims_transport::Result<Seq> {
            self.counters.prepares.fetch_add(1, Ordering::SeqCst);
            match self.prepare_error.take() {
                Some(err) => Err(err),
                None => Ok(self.seq),
            }
        }

        fn send_msg(
            &mut self,
            msg: McuMsg,
            _cmd: McuCmd,
            _seq: Seq,
        ) -> mcuprims_transport::Result<()> {
            self.counters.sends.fetch_add(1, Ordering::SeqCst);
            self.counters.sent_lens.lock().push(msg.len());
            match self.send_errors.pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn parse_response(
            &mut self,
            _cmd: McuCmd,
            msg: Option<McuMsg>,
            seq: Seq,
        ) -> mcuprims_transport::Result<Response> {
            self.counters.parses.fetch_add(1, Ordering::SeqCst);
            match (self.parse, msg) {
                (ParseMode::AlwaysTimeout, _) | (ParseMode::BySeq, None) => Ok(Response::TimedOut),
                (ParseMode::BySeq, Some(msg)) if msg.data().first() == Some(&seq) => {
                    Ok(Response::Matched(msg))
                }
                (ParseMode::BySeq, Some(_)) => Ok(Response::Mismatched),
            }
        }

        fn tx_cleanup(&mut self, _is_final: bool) {
            self.counters.drains.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_config() -> McuConfig {
        McuConfig {
            timeout: Duration::from_millis(50),
            retry_backoff_min: Duration::from_millis(1),
            retry_backoff_max: Duration::from_millis(2),
            ..McuConfig::default()
        }
    }

    fn new_inbox() -> Arc<ResponseInbox> {
        Arc::new(ResponseInbox::new(Arc::new(McuState::new())))
    }

    fn scripted(ops: ScriptedOps, config: McuConfig) -> Mcu<ScriptedOps> {
        Mcu::new(ops, new_inbox(), config)
    }

    fn loopback(config: McuConfig, lb: LoopbackConfig) -> (Mcu<LoopbackMcu>, LoopbackHandle) {
        let inbox = new_inbox();
        let (ops, handle) = LoopbackMcu::new(inbox.clone(), lb);
        (Mcu::new(ops, inbox, config), handle)
    }

    fn reply(seq: Seq) -> McuMsg {
        McuMsg::from_slice(&[seq]).unwrap()
    }

    #[test]
    fn echo_reply_is_returned_to_caller() {
        let (mcu, handle) = loopback(fast_config(), LoopbackConfig::default());
        let resp = mcu
            .send_and_get_msg(0x42, b"ping", true)
            .unwrap()
            .expect("reply requested");
        assert_eq!(resp.data(), b"ping");
        assert_eq!(handle.sent().len(), 1);
        assert!(mcu.inbox().is_empty());
    }

    #[test]
    fn send_msg_drops_matched_reply() {
        let (mcu, _handle) = loopback(fast_config(), LoopbackConfig::default());
        mcu.send_msg(0x42, b"ping", true).unwrap();
        assert!(mcu.inbox().is_empty());
    }

    #[test]
    fn no_wait_returns_after_send() {
        let (mcu, handle) = loopback(fast_config(), LoopbackConfig::default());
        let resp = mcu.send_and_get_msg(0x42, b"ping", false).unwrap();
        assert!(resp.is_none());
        assert_eq!(handle.sent().len(), 1);
        // The reply was never consumed.
        assert_eq!(mcu.inbox().len(), 1);
    }

    #[test]
    fn mismatched_reply_is_dropped_and_wait_continues() {
        let (ops, counters) = ScriptedOps::new(5, 0, ParseMode::BySeq);
        let mcu = scripted(ops, McuConfig::default());
        mcu.rx_event(reply(7));
        mcu.rx_event(reply(5));

        let start = Instant::now();
        let resp = mcu.send_and_get_msg(1, b"x", true).unwrap().unwrap();
        assert_eq!(resp.data(), &[5]);
        assert_eq!(counters.parses.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(mcu.inbox().is_empty());
    }

    #[test]
    fn first_matching_reply_wins_and_later_foreign_reply_is_discarded() {
        let (ops, counters) = ScriptedOps::new(5, 0, ParseMode::BySeq);
        let mcu = scripted(ops, McuConfig::default());
        for seq in [5, 7, 5] {
            mcu.rx_event(reply(seq));
        }

        mcu.send_msg(1, b"a", true).unwrap();
        assert_eq!(counters.parses.load(Ordering::SeqCst), 1);
        assert_eq!(mcu.inbox().len(), 2);

        mcu.send_msg(2, b"b", true).unwrap();
        assert_eq!(counters.parses.load(Ordering::SeqCst), 3);
        assert!(mcu.inbox().is_empty());
    }

    #[test]
    fn mismatch_flood_cannot_extend_deadline() {
        let (ops, _counters) = ScriptedOps::new(5, 0, ParseMode::BySeq);
        let config = McuConfig {
            timeout: Duration::from_millis(150),
            ..McuConfig::default()
        };
        let mcu = Arc::new(scripted(ops, config));
        let stop = Arc::new(AtomicBool::new(false));

        let flooder = {
            let mcu = mcu.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    mcu.rx_event(reply(7));
                    thread::sleep(Duration::from_millis(5));
                }
            })
        };

        let start = Instant::now();
        let err = mcu.send_msg(1, b"x", true).unwrap_err();
        let elapsed = start.elapsed();
        stop.store(true, Ordering::SeqCst);
        flooder.join().unwrap();

        assert!(matches!(err, McuError::TimedOut { attempts: 1, .. }));
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn timeouts_consume_every_retry() {
        let (ops, counters) = ScriptedOps::new(3, 2, ParseMode::AlwaysTimeout);
        let mcu = scripted(ops, fast_config());

        let err = mcu.send_msg(0x10, b"x", true).unwrap_err();
        assert!(matches!(
            err,
            McuError::TimedOut {
                cmd: 0x10,
                seq: 3,
                attempts: 3
            }
        ));
        assert!(err.is_timeout());
        assert_eq!(counters.sends.load(Ordering::SeqCst), 3);
        assert_eq!(counters.prepares.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retryable_send_errors_consume_retries() {
        let (mcu, handle) = loopback(fast_config(), LoopbackConfig::default());
        handle.inject(Fault::Busy);
        handle.inject(Fault::Busy);

        let resp = mcu.send_and_get_msg(7, b"ok", true).unwrap().unwrap();
        assert_eq!(resp.data(), b"ok");
        assert_eq!(handle.pending_faults(), 0);
        assert_eq!(mcu.debug_ring().len(), 3);
    }

    #[test]
    fn exhausted_retryable_errors_surface_last_error() {
        let (mcu, handle) = loopback(fast_config(), LoopbackConfig::default());
        for _ in 0..=mcu.max_retry() {
            handle.inject(Fault::Busy);
        }

        let err = mcu.send_msg(7, b"x", true).unwrap_err();
        assert!(matches!(err, McuError::Transport(TransportError::Retry(_))));
        assert!(handle.sent().is_empty());
    }

    #[test]
    fn fatal_send_error_aborts_without_retry() {
        let (mut ops, counters) = ScriptedOps::new(1, 3, ParseMode::BySeq);
        ops.send_errors.push_back(TransportError::Shutdown);
        let mcu = scripted(ops, fast_config());

        let err = mcu.send_msg(1, b"x", true).unwrap_err();
        assert!(matches!(err, McuError::Transport(TransportError::Shutdown)));
        assert_eq!(counters.sends.load(Ordering::SeqCst), 1);
        assert_eq!(counters.parses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fatal_parse_error_aborts_without_retry() {
        let (mcu, handle) = loopback(fast_config(), LoopbackConfig::default());
        handle.inject(Fault::Reject(2));

        let err = mcu.send_msg(0x20, b"x", true).unwrap_err();
        assert!(matches!(
            err,
            McuError::Transport(TransportError::Rejected {
                cmd: 0x20,
                status: 2
            })
        ));
        assert_eq!(handle.sent().len(), 1);
        // Recorded before the send, so the rejected command is in the ring.
        assert_eq!(mcu.debug_ring().len(), 1);
    }

    #[test]
    fn prepare_error_propagates_before_sending() {
        let (mut ops, counters) = ScriptedOps::new(1, 3, ParseMode::BySeq);
        ops.prepare_error = Some(TransportError::Malformed("bad cmd".to_string()));
        let mcu = scripted(ops, fast_config());

        let err = mcu.send_msg(1, b"x", true).unwrap_err();
        assert!(matches!(err, McuError::Transport(TransportError::Malformed(_))));
        assert_eq!(counters.sends.load(Ordering::SeqCst), 0);

        // The lock is released; the next command goes through.
        mcu.rx_event(reply(1));
        mcu.send_msg(1, b"x", true).unwrap();
    }

    #[test]
    fn late_reply_is_matched_by_the_resend() {
        let (mcu, handle) = loopback(fast_config(), LoopbackConfig::default());
        handle.inject(Fault::Delay(Duration::from_millis(120)));

        let resp = mcu.send_and_get_msg(9, b"late", true).unwrap().unwrap();
        assert_eq!(resp.data(), b"late");
        let sent = handle.sent();
        assert!(sent.len() >= 2);
        assert!(sent.iter().all(|frame| frame.seq == sent[0].seq));
    }

    #[test]
    fn hung_bus_during_reset_fails_fast() {
        let config = McuConfig {
            hard_hang_media: true,
            ..fast_config()
        };
        let (mcu, handle) = loopback(config, LoopbackConfig::default());
        mcu.set_reset(true);
        mcu.set_bus_hung(true);

        assert!(matches!(mcu.send_msg(1, b"x", true), Err(McuError::Io)));
        assert!(handle.sent().is_empty());

        mcu.set_bus_hung(false);
        mcu.send_msg(1, b"x", true).unwrap();
    }

    #[test]
    fn hung_flag_ignored_without_hard_hang_media() {
        let (mcu, _handle) = loopback(fast_config(), LoopbackConfig::default());
        mcu.set_reset(true);
        mcu.set_bus_hung(true);
        mcu.send_msg(1, b"x", true).unwrap();
    }

    #[test]
    fn reset_cuts_waits_short() {
        let config = McuConfig {
            timeout: Duration::from_secs(5),
            ..fast_config()
        };
        let (mcu, handle) = loopback(config, LoopbackConfig::default());
        handle.inject(Fault::Drop);
        handle.inject(Fault::Drop);
        mcu.set_reset(true);

        let start = Instant::now();
        mcu.send_msg(3, b"x", true).unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(handle.sent().len(), 3);
    }

    fn slow_backoff_config() -> McuConfig {
        McuConfig {
            timeout: Duration::from_millis(20),
            retry_backoff_min: Duration::from_millis(200),
            retry_backoff_max: Duration::from_millis(300),
            ..McuConfig::default()
        }
    }

    #[test]
    fn retries_back_off_only_during_reset() {
        let (mcu, handle) = loopback(slow_backoff_config(), LoopbackConfig::default());
        handle.inject(Fault::Drop);
        handle.inject(Fault::Drop);

        let start = Instant::now();
        mcu.send_msg(3, b"x", true).unwrap();
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(handle.sent().len(), 3);

        let (mcu, handle) = loopback(slow_backoff_config(), LoopbackConfig::default());
        handle.inject(Fault::Drop);
        handle.inject(Fault::Drop);
        mcu.set_reset(true);

        let start = Instant::now();
        mcu.send_msg(3, b"x", true).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(400));
        assert_eq!(handle.sent().len(), 3);
    }

    #[test]
    fn no_wait_retries_skip_backoff() {
        let (mcu, handle) = loopback(slow_backoff_config(), LoopbackConfig::default());
        handle.inject(Fault::Busy);
        handle.inject(Fault::Busy);
        mcu.set_reset(true);

        let start = Instant::now();
        mcu.send_msg(3, b"x", false).unwrap();
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(handle.sent().len(), 1);
        assert_eq!(mcu.debug_ring().len(), 3);
    }

    #[test]
    fn huge_timeout_does_not_overflow_deadline() {
        let config = McuConfig {
            timeout: Duration::from_secs(u64::MAX),
            ..fast_config()
        };
        let (mcu, handle) = loopback(config, LoopbackConfig::default());
        let resp = mcu.send_and_get_msg(1, b"x", true).unwrap().unwrap();
        assert_eq!(resp.data(), b"x");
        assert_eq!(handle.sent().len(), 1);
    }

    #[test]
    fn huge_backoff_window_is_clamped() {
        let config = McuConfig {
            retry_backoff_min: Duration::MAX,
            retry_backoff_max: Duration::MAX,
            ..fast_config()
        };
        let (mcu, _handle) = loopback(config, LoopbackConfig::default());
        assert_eq!(mcu.backoff(), Duration::from_micros(u64::MAX));
    }

    #[test]
    fn poisoned_payload_is_still_sent() {
        let config = McuConfig {
            poison: 0xAA,
            poison_min_run: 2,
            ..fast_config()
        };
        let (mcu, handle) = loopback(config, LoopbackConfig::default());
        let resp = mcu.send_and_get_msg(1, &[0xAA; 8], true).unwrap().unwrap();
        assert_eq!(resp.data(), &[0xAA; 8]);
        assert_eq!(handle.sent().len(), 1);
    }

    #[test]
    fn debug_ring_keeps_recent_payloads() {
        let config = McuConfig {
            debug_ring_len: 4,
            ..fast_config()
        };
        let (mcu, _handle) = loopback(config, LoopbackConfig::default());
        for cmd in 1..=6u32 {
            mcu.send_msg(cmd, &[cmd as u8, 0xFF], true).unwrap();
        }

        let lines = mcu.dump_debug_buf();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "cmd: 00000003  size: 2  msg (hex, LE): 03 ff");
        assert_eq!(lines[3], "cmd: 00000006  size: 2  msg (hex, LE): 06 ff");
    }

    #[test]
    fn concurrent_callers_are_serialized() {
        let lb = LoopbackConfig {
            send_latency: Duration::from_micros(200),
            ..LoopbackConfig::default()
        };
        let (mcu, handle) = loopback(fast_config(), lb);
        let mcu = Arc::new(mcu);

        let workers: Vec<_> = (0..8u8)
            .map(|worker| {
                let mcu = mcu.clone();
                thread::spawn(move || {
                    for i in 0..20u8 {
                        let payload = [worker, i];
                        let resp = mcu.send_and_get_msg(0x100, &payload, true).unwrap().unwrap();
                        assert_eq!(resp.data(), &payload);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(handle.peak_concurrency(), 1);
        assert_eq!(handle.sent().len(), 160);
    }

    #[test]
    fn firmware_is_split_into_chunks_with_drains() {
        let (ops, counters) = ScriptedOps::new(1, 0, ParseMode::BySeq);
        let mcu = scripted(ops, fast_config());

        mcu.send_firmware(0x8000_00EE, &[0x5A; 10_000], 4096).unwrap();

        assert_eq!(*counters.sent_lens.lock(), vec![4096, 4096, 1808]);
        assert_eq!(counters.drains.load(Ordering::SeqCst), 3);
        assert_eq!(counters.parses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn firmware_over_loopback_leaves_no_replies() {
        let (mcu, handle) = loopback(fast_config(), LoopbackConfig::default());
        mcu.send_firmware(CMD_FLAG_NO_REPLY | 0xEE, &[1u8; 9000], 4096)
            .unwrap();

        let lens: Vec<usize> = handle.sent().iter().map(|frame| frame.len).collect();
        assert_eq!(lens, vec![4096, 4096, 808]);
        assert_eq!(handle.drains(), 3);
        assert!(mcu.inbox().is_empty());
    }

    #[test]
    fn firmware_stops_at_first_failed_chunk() {
        let (mut ops, counters) = ScriptedOps::new(1, 0, ParseMode::BySeq);
        ops.send_errors.push_back(TransportError::Shutdown);
        let mcu = scripted(ops, fast_config());

        let err = mcu.send_firmware(1, &[0u8; 100], 10).unwrap_err();
        assert!(matches!(err, McuError::Transport(TransportError::Shutdown)));
        assert_eq!(counters.sends.load(Ordering::SeqCst), 1);
        assert_eq!(counters.drains.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn firmware_edge_cases() {
        let (ops, counters) = ScriptedOps::new(1, 0, ParseMode::BySeq);
        let mcu = scripted(ops, fast_config());

        assert!(matches!(
            mcu.send_firmware(1, &[0u8; 4], 0),
            Err(McuError::InvalidChunkSize)
        ));
        mcu.send_firmware(1, &[], 4096).unwrap();
        assert_eq!(counters.sends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn msg_alloc_uses_bus_margins() {
        let (mcu, _handle) = loopback(fast_config(), LoopbackConfig::default());
        let msg = mcu.msg_alloc(b"abc", 16).unwrap();
        assert_eq!(msg.headroom(), mcu.margins().headroom);
        assert_eq!(
            msg.capacity(),
            mcu.margins().headroom + 16 + mcu.margins().tailroom
        );

        let resp = mcu.send_buf_and_get_msg(msg, 1, true).unwrap().unwrap();
        assert_eq!(resp.data(), b"abc");
    }
}
