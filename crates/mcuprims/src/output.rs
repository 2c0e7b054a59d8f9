use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A command result: serialized as-is for JSON, shown as `rows` otherwise.
///
/// `raw` is what `--format raw` writes to stdout (e.g. a reply payload).
pub fn print_report<T: Serialize>(
    report: &T,
    rows: &[(&str, String)],
    raw: &[u8],
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (field, value) in rows {
                table.add_row(vec![field.to_string(), value.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line: Vec<String> = rows
                .iter()
                .map(|(field, value)| format!("{field}={value}"))
                .collect();
            println!("{}", line.join(" "));
        }
        OutputFormat::Raw => print_raw(raw),
    }
}

/// Debug ring lines, one per command, oldest first.
pub fn print_dump(lines: &[String], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "schema_id": "https://schemas.3leaps.dev/mcuprims/cli/v1/debug-ring.schema.json",
                    "entries": lines,
                })
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "DEBUG RING"]);
            for (index, line) in lines.iter().enumerate() {
                table.add_row(vec![index.to_string(), line.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for line in lines {
                println!("{line}");
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

pub fn cmd_hex(cmd: u32) -> String {
    format!("{cmd:#010x}")
}
