//! Serialized command path to a firmware-controlled MCU.
//!
//! This is the "one command at a time" layer. [`Mcu`] takes a payload, sends
//! it through the bus hooks, waits for the reply carrying the same sequence
//! number and retries on timeouts, while any number of threads call into it.
//! Replies reach it through the [`ResponseInbox`], fed from the bus receive
//! path.

pub mod config;
pub mod error;
pub mod inbox;
pub mod mcu;
pub mod state;

pub use config::McuConfig;
pub use error::{McuError, Result};
pub use inbox::ResponseInbox;
pub use mcu::Mcu;
pub use state::McuState;
