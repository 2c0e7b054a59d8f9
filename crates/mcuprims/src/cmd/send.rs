use std::fs;

use serde::Serialize;

use crate::cmd::{open_link, SendArgs};
use crate::exit::{io_error, mcu_error, CliResult, SUCCESS};
use crate::output::{cmd_hex, payload_preview, print_dump, print_report, OutputFormat};

#[derive(Serialize)]
struct SendOutput {
    schema_id: &'static str,
    cmd: String,
    request_size: usize,
    waited: bool,
    reply_size: Option<usize>,
    reply: Option<String>,
    ring_entries: usize,
}

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let (mcu, handle) = open_link(&args.link)?;
    let wait = !args.no_wait;

    let reply = mcu
        .send_and_get_msg(args.cmd, &payload, wait)
        .map_err(|err| mcu_error("send failed", err));

    if args.link.dump {
        print_dump(&mcu.dump_debug_buf(), format);
    }
    let reply = reply?.map(|msg| msg.freeze());

    let output = SendOutput {
        schema_id: "https://schemas.3leaps.dev/mcuprims/cli/v1/send-result.schema.json",
        cmd: cmd_hex(args.cmd),
        request_size: payload.len(),
        waited: wait,
        reply_size: reply.as_ref().map(|bytes| bytes.len()),
        reply: reply.as_ref().map(|bytes| payload_preview(bytes)),
        ring_entries: mcu.debug_ring().len(),
    };
    let rows = [
        ("cmd", output.cmd.clone()),
        ("request_size", output.request_size.to_string()),
        ("waited", output.waited.to_string()),
        (
            "reply_size",
            output
                .reply_size
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        ("reply", output.reply.clone().unwrap_or_else(|| "-".to_string())),
        ("ring_entries", output.ring_entries.to_string()),
        ("frames_on_wire", handle.sent().len().to_string()),
    ];
    let raw = reply.as_deref().unwrap_or_default();
    print_report(&output, &rows, raw, format);

    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}
