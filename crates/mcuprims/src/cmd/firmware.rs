use std::fs;
use std::time::Instant;

use serde::Serialize;

use crate::cmd::{open_link, FirmwareArgs};
use crate::exit::{io_error, mcu_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{cmd_hex, print_dump, print_report, OutputFormat};

#[derive(Serialize)]
struct FirmwareOutput {
    schema_id: &'static str,
    cmd: String,
    image_size: usize,
    chunk_size: usize,
    chunks: usize,
    drains: usize,
    elapsed_ms: f64,
}

pub fn run(args: FirmwareArgs, format: OutputFormat) -> CliResult<i32> {
    let image = load_image(&args)?;
    let (mcu, handle) = open_link(&args.link)?;

    let start = Instant::now();
    let result = mcu
        .send_firmware(args.cmd, &image, args.chunk)
        .map_err(|err| mcu_error("firmware upload failed", err));
    let elapsed = start.elapsed();

    if args.link.dump {
        print_dump(&mcu.dump_debug_buf(), format);
    }
    result?;

    let output = FirmwareOutput {
        schema_id: "https://schemas.3leaps.dev/mcuprims/cli/v1/firmware-result.schema.json",
        cmd: cmd_hex(args.cmd),
        image_size: image.len(),
        chunk_size: args.chunk,
        chunks: handle.sent().len(),
        drains: handle.drains(),
        elapsed_ms: (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
    };
    let rows = [
        ("cmd", output.cmd.clone()),
        ("image_size", output.image_size.to_string()),
        ("chunk_size", output.chunk_size.to_string()),
        ("chunks", output.chunks.to_string()),
        ("drains", output.drains.to_string()),
        ("elapsed_ms", output.elapsed_ms.to_string()),
    ];
    print_report(&output, &rows, &[], format);

    Ok(SUCCESS)
}

fn load_image(args: &FirmwareArgs) -> CliResult<Vec<u8>> {
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    match args.size {
        Some(size) => Ok((0..size).map(|i| (i % 251) as u8).collect()),
        None => Err(CliError::new(USAGE, "either --file or --size is required")),
    }
}
