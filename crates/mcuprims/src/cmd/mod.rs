use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use mcuprims_mcu::{Mcu, McuConfig};
use mcuprims_transport::{Fault, LoopbackConfig, LoopbackHandle, LoopbackMcu};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod firmware;
pub mod send;
pub mod stress;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one command to the loopback controller.
    Send(SendArgs),
    /// Upload a firmware image to the loopback controller in chunks.
    Firmware(FirmwareArgs),
    /// Hammer the loopback controller from several threads.
    Stress(StressArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Firmware(args) => firmware::run(args, format),
        Command::Stress(args) => stress::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Command path and loopback controller settings shared by all commands.
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Reply timeout per attempt (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub timeout: String,
    /// Resends allowed after a timeout or busy controller.
    #[arg(long, default_value = "3")]
    pub max_retry: u32,
    /// Poison byte to scan outbound messages for (hex, 0 disables).
    #[arg(long, default_value = "0", value_parser = parse_poison)]
    pub poison: u8,
    /// Faults to inject, in order: drop, stale, busy, reject[:STATUS], delay:MS.
    #[arg(long, value_delimiter = ',')]
    pub fault: Vec<Fault>,
    /// Print the debug ring after the run.
    #[arg(long)]
    pub dump: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Command identifier (hex, 0x prefix optional).
    #[arg(long, value_parser = parse_cmd)]
    pub cmd: u32,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Do not wait for the reply.
    #[arg(long)]
    pub no_wait: bool,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct FirmwareArgs {
    /// Firmware image to upload.
    #[arg(long, conflicts_with = "size", required_unless_present = "size")]
    pub file: Option<PathBuf>,
    /// Upload a generated image of this many bytes instead of a file.
    #[arg(long)]
    pub size: Option<usize>,
    /// Largest chunk sent per command.
    #[arg(long, default_value = "4096")]
    pub chunk: usize,
    /// Command identifier used for every chunk (hex).
    #[arg(long, default_value = "0x800000ee", value_parser = parse_cmd)]
    pub cmd: u32,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct StressArgs {
    /// Concurrent sending threads.
    #[arg(long, default_value = "4")]
    pub threads: usize,
    /// Commands sent per thread.
    #[arg(long, default_value = "100")]
    pub count: usize,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Build a command path over a loopback controller with `link` applied.
pub fn open_link(link: &LinkArgs) -> CliResult<(Mcu<LoopbackMcu>, LoopbackHandle)> {
    let config = McuConfig {
        timeout: parse_duration(&link.timeout)?,
        poison: link.poison,
        ..McuConfig::default()
    };
    let loopback = LoopbackConfig {
        max_retry: link.max_retry,
        ..LoopbackConfig::default()
    };

    let (mcu, handle) = mcuprims::open_loopback(config, loopback);
    for fault in &link.fault {
        handle.inject(*fault);
    }
    Ok((mcu, handle))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

fn parse_cmd(input: &str) -> Result<u32, String> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    u32::from_str_radix(digits, 16).map_err(|_| format!("invalid command id: {input}"))
}

fn parse_poison(input: &str) -> Result<u8, String> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    u8::from_str_radix(digits, 16).map_err(|_| format!("invalid poison byte: {input}"))
}
