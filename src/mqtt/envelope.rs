//! JSON envelope published for every device event.
//!
//! ```json
//! {"data":{"btn":2,"state":"pressed"},
//!  "status":{"devEUI":"1122334455667788","rssi":-42,"temperature":5,"battery":2200,"date":"..."}}
//! ```
//!
//! Decoders hand over plain strings; [`JsonValue::classify`] decides how each
//! one is written. A string that is a complete JSON number goes out bare, one
//! that starts with `{` or `[` is copied verbatim (not validated), anything
//! else is quoted and escaped.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::device::DeviceId;
use crate::gate::StatusByte;
use crate::modules::ValuePairs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonValue {
    Number(String),
    Text(String),
    Raw(String),
}

impl JsonValue {
    pub fn classify(value: &str) -> Self {
        if value.starts_with('{') || value.starts_with('[') {
            JsonValue::Raw(value.to_string())
        } else if is_json_number(value) {
            JsonValue::Number(value.to_string())
        } else {
            JsonValue::Text(value.to_string())
        }
    }

    fn write_to(&self, out: &mut String) {
        match self {
            JsonValue::Number(s) | JsonValue::Raw(s) => out.push_str(s),
            JsonValue::Text(s) => out.push_str(&quote(s)),
        }
    }
}

fn quote(s: &str) -> String {
    // Serializing a str cannot fail.
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// JSON number grammar: `-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?`.
pub fn is_json_number(s: &str) -> bool {
    let b = s.as_bytes();
    let mut i = 0;
    let digits = |i: &mut usize| {
        let start = *i;
        while *i < b.len() && b[*i].is_ascii_digit() {
            *i += 1;
        }
        *i - start
    };

    if b.get(i) == Some(&b'-') {
        i += 1;
    }
    match b.get(i) {
        Some(b'0') => i += 1,
        Some(c) if c.is_ascii_digit() => {
            digits(&mut i);
        }
        _ => return false,
    }
    if b.get(i) == Some(&b'.') {
        i += 1;
        if digits(&mut i) == 0 {
            return false;
        }
    }
    if matches!(b.get(i), Some(b'e') | Some(b'E')) {
        i += 1;
        if matches!(b.get(i), Some(b'+') | Some(b'-')) {
            i += 1;
        }
        if digits(&mut i) == 0 {
            return false;
        }
    }
    i == b.len()
}

/// Link quality attached to individual-data publications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioStatus {
    pub rssi: i16,
    pub status: StatusByte,
}

#[derive(Debug, Clone)]
pub struct Envelope<'a> {
    pub device: DeviceId,
    pub data: &'a ValuePairs,
    pub radio: Option<RadioStatus>,
}

impl<'a> Envelope<'a> {
    pub fn new(device: DeviceId, data: &'a ValuePairs) -> Self {
        Self {
            device,
            data,
            radio: None,
        }
    }

    pub fn with_radio(mut self, rssi: i16, status: StatusByte) -> Self {
        self.radio = Some(RadioStatus { rssi, status });
        self
    }

    pub fn render(&self) -> String {
        self.render_at(Utc::now())
    }

    pub fn render_at(&self, date: DateTime<Utc>) -> String {
        let mut out = String::with_capacity(128);
        out.push_str("{\"data\":{");
        for (i, (name, value)) in self.data.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&quote(name));
            out.push(':');
            JsonValue::classify(value).write_to(&mut out);
        }
        out.push_str("},\"status\":{\"devEUI\":\"");
        out.push_str(&self.device.to_string());
        out.push('"');
        if let Some(radio) = self.radio {
            out.push_str(&format!(
                ",\"rssi\":{},\"temperature\":{},\"battery\":{}",
                radio.rssi,
                radio.status.temperature(),
                radio.status.battery_mv()
            ));
        }
        out.push_str(",\"date\":");
        out.push_str(&quote(&date.to_rfc3339_opts(SecondsFormat::Secs, true)));
        out.push_str("}}");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn number_grammar() {
        for ok in ["0", "-0", "12", "-3.25", "1e5", "2.5E-3", "10"] {
            assert!(is_json_number(ok), "{ok}");
        }
        for bad in ["", "-", "007", "01", "1.", ".5", "1e", "0x10", "12 ", "+1", "NaN", "1.2.3"] {
            assert!(!is_json_number(bad), "{bad}");
        }
    }

    #[test]
    fn classification() {
        assert_eq!(JsonValue::classify("42"), JsonValue::Number("42".into()));
        assert_eq!(JsonValue::classify("007"), JsonValue::Text("007".into()));
        assert_eq!(JsonValue::classify("[1,2]"), JsonValue::Raw("[1,2]".into()));
        // Not validated.
        assert_eq!(JsonValue::classify("{oops"), JsonValue::Raw("{oops".into()));
    }

    #[test]
    fn renders_data_publication() {
        let mut data = ValuePairs::new();
        data.add("btn", 2).unwrap();
        data.add("state", "pressed").unwrap();
        data.add("note", "say \"hi\"").unwrap();
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let json = Envelope::new(DeviceId(0x1122334455667788), &data)
            .with_radio(-42, StatusByte(0x25))
            .render_at(date);
        assert_eq!(
            json,
            "{\"data\":{\"btn\":2,\"state\":\"pressed\",\"note\":\"say \\\"hi\\\"\"},\
             \"status\":{\"devEUI\":\"1122334455667788\",\"rssi\":-42,\"temperature\":5,\
             \"battery\":2200,\"date\":\"2024-05-01T12:00:00Z\"}}"
        );
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["status"]["rssi"], -42);
    }

    #[test]
    fn event_publication_has_no_radio_fields() {
        let mut data = ValuePairs::new();
        data.add("joined", 0).unwrap();
        let json = Envelope::new(DeviceId(1), &data).render();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["data"]["joined"], 0);
        assert_eq!(parsed["status"]["devEUI"], "0000000000000001");
        assert!(parsed["status"].get("rssi").is_none());
        assert!(parsed["status"]["date"].is_string());
    }
}
