//! Hex rendering shared by the debug ring and the poison scanner.

use std::fmt::Write;

/// Render bytes as lowercase hex pairs separated by single spaces.
pub fn hex_pairs(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Render bytes as 4-byte words, one string per word.
///
/// A trailing partial word (1, 2 or 3 bytes) gets its own group.
pub fn hex_words(bytes: &[u8]) -> Vec<String> {
    bytes.chunks(4).map(hex_pairs).collect()
}
