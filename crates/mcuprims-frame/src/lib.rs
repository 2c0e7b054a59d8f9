//! Message buffers and diagnostics for host-to-MCU command traffic.
//!
//! This is the lowest layer of mcuprims. Every command sent to the controller
//! lives in an [`McuMsg`]:
//! - A zeroed front margin (headroom) for the bus header
//! - The payload
//! - A zeroed back margin (tailroom) for padding or trailers
//!
//! The margins come from whoever owns the wire framing, see [`FrameMargins`].
//! [`DebugRing`] and [`scan`] are the post-mortem tools layered on top.

pub mod buffer;
pub mod error;
pub mod hex;
pub mod poison;
pub mod ring;

pub use buffer::{FrameMargins, McuMsg};
pub use error::{FrameError, Result};
pub use hex::{hex_pairs, hex_words};
pub use poison::{scan, PoisonReport};
pub use ring::{DebugRing, RingEntry, DEFAULT_ENTRY_BYTES, DEFAULT_RING_LEN};
