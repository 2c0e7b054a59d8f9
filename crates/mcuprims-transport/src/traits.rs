use std::sync::Arc;

use mcuprims_frame::{FrameMargins, McuMsg};

use crate::error::Result;

/// Command identifier as understood by the controller.
pub type McuCmd = u32;

/// Correlation sequence number tying a reply to its command.
pub type Seq = u8;

/// Outcome of matching one delivered reply against the outstanding command.
#[derive(Debug)]
pub enum Response {
    /// The reply belongs to the outstanding command.
    Matched(McuMsg),
    /// The reply belongs to something else and was dropped; keep waiting.
    Mismatched,
    /// Nothing arrived before the deadline.
    TimedOut,
}

/// Hooks the bus layer provides to the command path.
///
/// The command path owns the implementation behind its exclusive lock, so
/// hooks take `&mut self` and never run concurrently with each other. Hooks
/// must not call back into the command path.
pub trait McuOps: Send {
    /// Front/back margins every message needs for wire framing.
    fn margins(&self) -> FrameMargins;

    /// How many times a command is resent after a timeout or transient error.
    fn max_retry(&self) -> u32;

    /// Prepare a command once per send and assign its sequence number.
    fn prepare_msg(&mut self, msg: &mut McuMsg, cmd: McuCmd) -> Result<Seq>;

    /// Put one message on the wire.
    ///
    /// [`TransportError::Retry`](crate::TransportError::Retry) asks for a
    /// resend; any other error aborts the command.
    fn send_msg(&mut self, msg: McuMsg, cmd: McuCmd, seq: Seq) -> Result<()>;

    /// Match a delivered reply (`None` on timeout or reset) against `seq`.
    fn parse_response(&mut self, cmd: McuCmd, msg: Option<McuMsg>, seq: Seq) -> Result<Response>;

    /// Reclaim completed transmit descriptors after a bulk chunk.
    fn tx_cleanup(&mut self, is_final: bool) {
        let _ = is_final;
    }
}

impl<O: McuOps + ?Sized> McuOps for Box<O> {
    fn margins(&self) -> FrameMargins {
        (**self).margins()
    }

    fn max_retry(&self) -> u32 {
        (**self).max_retry()
    }

    fn prepare_msg(&mut self, msg: &mut McuMsg, cmd: McuCmd) -> Result<Seq> {
        (**self).prepare_msg(msg, cmd)
    }

    fn send_msg(&mut self, msg: McuMsg, cmd: McuCmd, seq: Seq) -> Result<()> {
        (**self).send_msg(msg, cmd, seq)
    }

    fn parse_response(&mut self, cmd: McuCmd, msg: Option<McuMsg>, seq: Seq) -> Result<Response> {
        (**self).parse_response(cmd, msg, seq)
    }

    fn tx_cleanup(&mut self, is_final: bool) {
        (**self).tx_cleanup(is_final)
    }
}

/// Receiver for replies coming off the bus.
///
/// Called from the bus receive path at any time, on any thread.
pub trait ResponseSink: Send + Sync {
    fn deliver(&self, msg: McuMsg);
}

impl<S: ResponseSink + ?Sized> ResponseSink for Arc<S> {
    fn deliver(&self, msg: McuMsg) {
        (**self).deliver(msg)
    }
}
