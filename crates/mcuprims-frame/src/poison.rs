//! Poison-byte scanner for outbound messages.
//!
//! A debug instrument: when a configured byte shows up too many times in a
//! row, the message is reported (with a stack trace and a word-grouped hex
//! dump) so the corruption can be chased later. It never blocks a send.

use std::backtrace::Backtrace;
use std::fmt;

use tracing::warn;

use crate::hex::hex_words;

/// What the scanner found in a suspicious message.
#[derive(Debug, Clone)]
pub struct PoisonReport {
    /// The poison byte.
    pub byte: u8,
    /// Run length when the report fired.
    pub run: usize,
    /// Offset of the first byte of the run.
    pub start: usize,
    /// Offset of the byte that completed the run.
    pub end: usize,
    /// Stack of the caller that produced the message.
    pub backtrace: String,
    /// Full message in 4-byte hex words.
    pub words: Vec<String>,
}

impl fmt::Display for PoisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "found potentially poisoned buffer ({:02x}, {} in a row at {}..={})",
            self.byte, self.run, self.start, self.end
        )?;
        for word in &self.words {
            writeln!(f, "{word}")?;
        }
        Ok(())
    }
}

/// Scan `data` for `min_run` consecutive `target` bytes.
///
/// Reports the first run that reaches `min_run` and stops. A `min_run` of 0
/// is treated as 1.
pub fn scan(data: &[u8], target: u8, min_run: usize) -> Option<PoisonReport> {
    let min_run = min_run.max(1);
    let mut in_a_row = 0usize;

    for (i, byte) in data.iter().enumerate() {
        if *byte == target {
            in_a_row += 1;
        } else {
            in_a_row = 0;
        }

        if in_a_row >= min_run {
            let report = PoisonReport {
                byte: target,
                run: in_a_row,
                start: i + 1 - in_a_row,
                end: i,
                backtrace: Backtrace::force_capture().to_string(),
                words: hex_words(data),
            };
            warn!(
                byte = format_args!("{:02x}", report.byte),
                run = report.run,
                start = report.start,
                end = report.end,
                len = data.len(),
                "found potentially poisoned buffer"
            );
            warn!(backtrace = %report.backtrace, dump = ?report.words, "poisoned buffer detail");
            return Some(report);
        }
    }

    None
}
