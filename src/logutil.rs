//! Helpers that keep raw gate traffic readable in single-line logs.
//!
//! Lines coming off the serial link may carry stray control bytes (a lone CR,
//! a half-written escape from the concentrator's boot banner). Everything that
//! ends up in a log record goes through [`escape_log`] first.

use std::fmt::Write;

/// Longest preview written to a log record.
const MAX_PREVIEW: usize = 160;

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
/// - any other control character => `\xNN`
///
/// Input longer than the preview limit is cut with an ellipsis.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Lowercase hex of at most `max` leading bytes, for logging binary payloads.
pub fn hex_preview(data: &[u8], max: usize) -> String {
    let mut out = String::with_capacity(data.len().min(max) * 2 + 3);
    for b in data.iter().take(max) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    if data.len() > max {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_control_characters() {
        let esc = escape_log("J1122\r\n\x07");
        assert_eq!(esc, "J1122\\r\\n\\x07");
    }

    #[test]
    fn truncates_long_lines() {
        let long = "A".repeat(MAX_PREVIEW + 20);
        let esc = escape_log(&long);
        assert!(esc.ends_with('…'));
        assert_eq!(esc.chars().count(), MAX_PREVIEW + 1);
    }

    #[test]
    fn hex_preview_marks_truncation() {
        assert_eq!(hex_preview(&[0x02, 0x00], 8), "0200");
        assert_eq!(hex_preview(&[1, 2, 3, 4], 2), "0102...");
    }
}
