//! Send a few commands to the in-process loopback controller.
//!
//! Run with:
//!   cargo run --example loopback-send
//!
//! The first command is refused once as busy, the second loses its reply
//! and is resent, the third gets a stale reply first, which is dropped.

use std::time::Duration;

use mcuprims::mcu::McuConfig;
use mcuprims::open_loopback;
use mcuprims::transport::{Fault, LoopbackConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = McuConfig {
        timeout: Duration::from_millis(200),
        ..McuConfig::default()
    };
    let (mcu, handle) = open_loopback(config, LoopbackConfig::default());

    let commands = [
        (0x01u32, "first", Fault::Busy),
        (0x02, "second", Fault::Drop),
        (0x03, "third", Fault::Stale),
    ];
    for (cmd, payload, fault) in commands {
        // Faults are consumed one per transmit attempt.
        handle.inject(fault);
        let reply = mcu.send_and_get_msg(cmd, payload.as_bytes(), true)?;
        let len = reply.map(|msg| msg.len()).unwrap_or_default();
        eprintln!("cmd {cmd:08x}: {len} byte reply");
    }

    for frame in handle.sent() {
        eprintln!("sent cmd={:08x} seq={} len={}", frame.cmd, frame.seq, frame.len);
    }
    for line in mcu.dump_debug_buf() {
        eprintln!("{line}");
    }
    Ok(())
}
