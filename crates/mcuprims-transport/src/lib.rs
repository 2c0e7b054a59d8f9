//! Bus-side contract for MCU command transport.
//!
//! The command path in `mcuprims-mcu` knows nothing about the bus. It drives
//! an [`McuOps`] implementation supplied by the bus layer:
//! - `prepare_msg` assigns the correlation sequence number
//! - `send_msg` puts one message on the wire
//! - `parse_response` matches a delivered reply against that sequence number
//!
//! Replies arrive asynchronously through a [`ResponseSink`].
//! [`LoopbackMcu`] is an in-process controller implementing both sides.

pub mod error;
pub mod loopback;
pub mod traits;

pub use error::{Result, TransportError};
pub use loopback::{
    Fault, LoopbackConfig, LoopbackHandle, LoopbackMcu, SentFrame, CMD_FLAG_NO_REPLY, RXD_LEN,
    TXD_LEN,
};
pub use traits::{McuCmd, McuOps, Response, ResponseSink, Seq};
