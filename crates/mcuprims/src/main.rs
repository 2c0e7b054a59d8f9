mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "mcuprims", version, about = "MCU command transport CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use mcuprims_transport::Fault;

    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "mcuprims", "send", "--cmd", "0x42", "--data", "hello", "--fault", "busy,drop",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send command");
        };
        assert_eq!(args.cmd, 0x42);
        assert_eq!(args.data.as_deref(), Some("hello"));
        assert_eq!(args.link.fault, vec![Fault::Busy, Fault::Drop]);
        assert_eq!(args.link.max_retry, 3);
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "mcuprims", "send", "--cmd", "1", "--file", "/tmp/payload.bin", "--data", "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn firmware_needs_file_or_size() {
        let err = Cli::try_parse_from(["mcuprims", "firmware"])
            .expect_err("missing image source should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let cli = Cli::try_parse_from(["mcuprims", "firmware", "--size", "10000"])
            .expect("synthetic image should parse");
        let Command::Firmware(args) = cli.command else {
            panic!("expected firmware command");
        };
        assert_eq!(args.chunk, 4096);
        assert_eq!(args.cmd, 0x8000_00ee);
    }

    #[test]
    fn parses_stress_with_global_flags() {
        let cli = Cli::try_parse_from([
            "mcuprims", "stress", "--threads", "8", "--format", "json", "--timeout", "500ms",
        ])
        .expect("stress args should parse");

        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        let Command::Stress(args) = cli.command else {
            panic!("expected stress command");
        };
        assert_eq!(args.threads, 8);
        assert_eq!(args.link.timeout, "500ms");
    }
}
