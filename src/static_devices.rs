//! Statically provisioned devices.
//!
//! Devices that never go through an over-the-air join are listed in a plain
//! text file and pushed to the gate at startup (`K`, then one `A` line per
//! record). One record per line:
//!
//! ```text
//! # eui64            appid64          address  nonce    chan
//! 0011223344556677   70b3d57ed0000001 26011b2c 00000001 03
//! ```
//!
//! `#` starts a comment. Lines too short to hold a record are ignored;
//! longer lines that fail to parse are logged and skipped.

use std::fmt;
use std::path::{Path, PathBuf};

use log::warn;
use thiserror::Error;

/// Fixed field widths, in hex digits.
const FIELDS: [(&str, usize); 5] = [
    ("eui", 16),
    ("app id", 16),
    ("address", 8),
    ("nonce", 8),
    ("channel", 2),
];

/// Shortest line that can hold a full record (fields plus single separators).
pub const MIN_RECORD_LEN: usize = 16 + 16 + 8 + 8 + 2 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticDevice {
    pub eui: u64,
    pub app_id: u64,
    pub address: u32,
    pub nonce: u32,
    pub channel: u8,
}

impl fmt::Display for StaticDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x} app={:016x} addr={:08x} nonce={:08x} ch={}",
            self.eui, self.app_id, self.address, self.nonce, self.channel
        )
    }
}

#[derive(Debug, Error)]
pub enum StaticDeviceError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),
    #[error("{field}: expected {width} hex digits, got '{value}'")]
    Field {
        field: &'static str,
        width: usize,
        value: String,
    },
}

/// A line that looked like a record but did not parse.
#[derive(Debug)]
pub struct Rejected {
    pub line_no: usize,
    pub error: StaticDeviceError,
}

/// Parse one line. `Ok(None)` for blank, comment-only or too-short lines.
pub fn parse_line(line: &str) -> Result<Option<StaticDevice>, StaticDeviceError> {
    let content = match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
    .trim();
    if content.len() < MIN_RECORD_LEN {
        return Ok(None);
    }

    let words: Vec<&str> = content.split_whitespace().collect();
    if words.len() != FIELDS.len() {
        return Err(StaticDeviceError::FieldCount(words.len()));
    }
    let mut values = [0u64; 5];
    for (slot, (word, (field, width))) in values.iter_mut().zip(words.iter().zip(FIELDS)) {
        *slot = hex_field(field, width, word)?;
    }
    Ok(Some(StaticDevice {
        eui: values[0],
        app_id: values[1],
        address: values[2] as u32,
        nonce: values[3] as u32,
        channel: values[4] as u8,
    }))
}

fn hex_field(field: &'static str, width: usize, word: &str) -> Result<u64, StaticDeviceError> {
    let bad = || StaticDeviceError::Field {
        field,
        width,
        value: word.to_string(),
    };
    if word.len() != width || !word.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(bad());
    }
    u64::from_str_radix(word, 16).map_err(|_| bad())
}

/// Parse a whole file body, keeping the rejected lines for reporting.
pub fn parse_str(text: &str) -> (Vec<StaticDevice>, Vec<Rejected>) {
    let mut devices = Vec::new();
    let mut rejected = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(dev)) => devices.push(dev),
            Ok(None) => {}
            Err(error) => rejected.push(Rejected {
                line_no: idx + 1,
                error,
            }),
        }
    }
    (devices, rejected)
}

/// Load the static devices file; malformed lines are logged and skipped.
pub fn load(path: &Path) -> Result<Vec<StaticDevice>, StaticDeviceError> {
    let text = std::fs::read_to_string(path).map_err(|source| StaticDeviceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let (devices, rejected) = parse_str(&text);
    for r in &rejected {
        warn!("{}:{}: skipping static device: {}", path.display(), r.line_no, r.error);
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const GOOD: &str = "0011223344556677 70b3d57ed0000001 26011b2c 00000001 03";

    #[test]
    fn parses_a_record() {
        let dev = parse_line(GOOD).unwrap().unwrap();
        assert_eq!(
            dev,
            StaticDevice {
                eui: 0x0011223344556677,
                app_id: 0x70b3d57ed0000001,
                address: 0x26011b2c,
                nonce: 1,
                channel: 3,
            }
        );
    }

    #[test]
    fn ignores_comments_and_short_lines() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("# just a comment").unwrap().is_none());
        assert!(parse_line("0011 2233").unwrap().is_none());
        let with_comment = format!("{GOOD}   # lab node");
        assert!(parse_line(&with_comment).unwrap().is_some());
    }

    #[test]
    fn rejects_malformed_records() {
        let wide = "00112233445566778 70b3d57ed0000001 26011b2c 00000001 3";
        assert!(matches!(
            parse_line(wide),
            Err(StaticDeviceError::Field { field: "eui", .. })
        ));
        let bad_hex = "00112233445566zz 70b3d57ed0000001 26011b2c 00000001 03";
        assert!(matches!(parse_line(bad_hex), Err(StaticDeviceError::Field { .. })));
        let extra = format!("{GOOD} ff");
        assert!(matches!(parse_line(&extra), Err(StaticDeviceError::FieldCount(6))));
    }

    #[test]
    fn loads_file_skipping_bad_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# static nodes").unwrap();
        writeln!(file, "{GOOD}").unwrap();
        writeln!(file, "0011223344556677 70b3d57ed0000001 26011b2c 0000000x 03").unwrap();
        writeln!(file, "8899aabbccddeeff 70b3d57ed0000002 26011b2d 00000002 05").unwrap();

        let devices = load(file.path()).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].eui, 0x8899aabbccddeeff);

        let (_, rejected) = parse_str(&std::fs::read_to_string(file.path()).unwrap());
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].line_no, 3);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load(Path::new("/nonexistent/static.txt")).unwrap_err();
        assert!(matches!(err, StaticDeviceError::Io { .. }));
    }
}
