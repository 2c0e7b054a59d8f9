//! Serialized, retrying command transport to firmware-controlled MCUs.
//!
//! mcuprims carries commands from a host driver to the controller of a
//! wireless adapter: one command in flight at a time, replies matched by
//! sequence number, timeouts retried, recent traffic kept for post-mortems.
//!
//! # Crate Structure
//!
//! - [`frame`]: Message buffers with framing margins, debug ring, poison scanner
//! - [`transport`]: Bus hook contract and the loopback controller
//! - [`mcu`]: The command path: inbox, retry state machine, firmware upload

use std::sync::Arc;

/// Re-export frame types.
pub mod frame {
    pub use mcuprims_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use mcuprims_transport::*;
}

/// Re-export command path types.
pub mod mcu {
    pub use mcuprims_mcu::*;
}

use mcuprims_mcu::{Mcu, McuConfig, McuState, ResponseInbox};
use mcuprims_transport::{LoopbackConfig, LoopbackHandle, LoopbackMcu};

/// Wire a command path to a fresh in-process loopback controller.
pub fn open_loopback(
    config: McuConfig,
    loopback: LoopbackConfig,
) -> (Mcu<LoopbackMcu>, LoopbackHandle) {
    let inbox = Arc::new(ResponseInbox::new(Arc::new(McuState::new())));
    let (ops, handle) = LoopbackMcu::new(inbox.clone(), loopback);
    (Mcu::new(ops, inbox, config), handle)
}
