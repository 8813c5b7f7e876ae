//! Line codec for the gate's ASCII/hex serial protocol.
//!
//! Every line starts with a one-character tag followed by fixed-width hex
//! fields. Outbound lines are CR-terminated (the terminator is added by the
//! link, not here); inbound lines are LF-terminated and arrive here already
//! split and stripped.
//!
//! Multi-byte numeric fields are written most-significant byte first and are
//! normalized into native integers while decoding.
//!
//! | tag | direction | layout                                             |
//! |-----|-----------|----------------------------------------------------|
//! | `!` | in        | pong                                               |
//! | `L` | in        | `id(16) appid(16) last_seen(4) class(4)`           |
//! | `I` | in        | `id(16) rssi(4) status(2) payload(2n, n >= 1)`     |
//! | `J` | in        | `id(16) class(decimal)`                            |
//! | `K` | in        | `id(16)`                                           |
//! | `A` | in        | `id(16)`                                           |
//! | `R` | in        | `id(16)`                                           |
//! | `P` | out       | ping                                               |
//! | `L` | out       | request device list                                |
//! | `I` | out       | `id(16) payload(2n)`                               |
//! | `?` | out       | `id(16) count(2)`                                  |
//! | `V` | out       | `id(16)` invite                                    |
//! | `B` | out       | `payload(2n)` broadcast                            |
//! | `A` | out       | `eui(16) appid(16) addr(8) nonce(8) channel(2)`    |
//! | `K` | out       | clear static device table                          |
//! | `F` | out       | flush                                              |

use std::fmt::Write;

use thiserror::Error;

use crate::device::{DeviceClass, DeviceId};
use crate::static_devices::StaticDevice;

const ID_DIGITS: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty line")]
    Empty,
    #[error("unknown reply tag '{0}'")]
    UnknownTag(char),
    #[error("line is not ASCII")]
    NotAscii,
    #[error("{field}: expected {expected} hex digits, got {found}")]
    Width {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{field}: invalid hex '{value}'")]
    BadHex { field: &'static str, value: String },
    #[error("{field}: invalid decimal '{value}'")]
    BadDecimal { field: &'static str, value: String },
    #[error("unknown device class {0}")]
    UnknownClass(u16),
    #[error("{0} trailing characters after last field")]
    Trailing(usize),
    #[error("individual reply carries no module payload")]
    EmptyPayload,
    #[error("odd-length hex payload ({0} digits)")]
    OddPayload(usize),
}

/// Decode a hex string into bytes, two digits per byte.
pub fn decode_hex(field: &'static str, s: &str) -> Result<Vec<u8>, FrameError> {
    if s.len() % 2 != 0 {
        return Err(FrameError::OddPayload(s.len()));
    }
    let bad = || FrameError::BadHex {
        field,
        value: s.to_string(),
    };
    s.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16).ok_or_else(bad)?;
            let lo = (pair[1] as char).to_digit(16).ok_or_else(bad)?;
            Ok((hi * 16 + lo) as u8)
        })
        .collect()
}

/// Lowercase hex encoding of a byte slice.
pub fn encode_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Cursor over the fixed-width fields following the tag.
struct Fields<'a> {
    rest: &'a str,
}

impl<'a> Fields<'a> {
    fn new(rest: &'a str) -> Self {
        Self { rest }
    }

    fn take(&mut self, field: &'static str, width: usize) -> Result<&'a str, FrameError> {
        if self.rest.len() < width {
            return Err(FrameError::Width {
                field,
                expected: width,
                found: self.rest.len(),
            });
        }
        let (head, tail) = self.rest.split_at(width);
        self.rest = tail;
        Ok(head)
    }

    /// Big-endian unsigned value of `width` hex digits (width <= 16, even).
    fn take_uint(&mut self, field: &'static str, width: usize) -> Result<u64, FrameError> {
        let raw = self.take(field, width)?;
        let bytes = decode_hex(field, raw)?;
        let mut buf = [0u8; 8];
        buf[8 - bytes.len()..].copy_from_slice(&bytes);
        Ok(u64::from_be_bytes(buf))
    }

    fn take_id(&mut self) -> Result<DeviceId, FrameError> {
        self.take_uint("device id", ID_DIGITS).map(DeviceId)
    }

    fn remainder(&mut self) -> &'a str {
        std::mem::take(&mut self.rest)
    }

    fn finish(self) -> Result<(), FrameError> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(FrameError::Trailing(self.rest.len()))
        }
    }
}

fn class_from_code(code: u16) -> Result<DeviceClass, FrameError> {
    DeviceClass::from_code(code).ok_or(FrameError::UnknownClass(code))
}

/// Per-frame status byte attached to individual replies.
///
/// Low nibble: temperature in 5 degree steps starting at -20 C.
/// High nibble: battery in 100 mV steps starting at 2000 mV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusByte(pub u8);

impl StatusByte {
    pub fn temperature(self) -> i16 {
        (self.0 & 0x0F) as i16 * 5 - 20
    }

    pub fn battery_mv(self) -> u16 {
        2000 + ((self.0 >> 4) & 0x0F) as u16 * 100
    }
}

/// A decoded inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Pong,
    ListEntry {
        id: DeviceId,
        app_id: u64,
        last_seen: u16,
        class: DeviceClass,
    },
    /// Application data from one device. `payload[0]` is the module id.
    Data {
        id: DeviceId,
        rssi: i16,
        status: StatusByte,
        payload: Vec<u8>,
    },
    Joined {
        id: DeviceId,
        class: DeviceClass,
    },
    Kicked {
        id: DeviceId,
    },
    Ack {
        id: DeviceId,
    },
    PendingRequest {
        id: DeviceId,
    },
}

impl Reply {
    pub fn parse(line: &str) -> Result<Reply, FrameError> {
        if !line.is_ascii() {
            return Err(FrameError::NotAscii);
        }
        let mut chars = line.chars();
        let tag = chars.next().ok_or(FrameError::Empty)?;
        let mut fields = Fields::new(chars.as_str());

        let reply = match tag {
            '!' => Reply::Pong,
            'L' => {
                let id = fields.take_id()?;
                let app_id = fields.take_uint("app id", 16)?;
                let last_seen = fields.take_uint("last seen", 4)? as u16;
                let class = class_from_code(fields.take_uint("class", 4)? as u16)?;
                Reply::ListEntry {
                    id,
                    app_id,
                    last_seen,
                    class,
                }
            }
            'I' => {
                let id = fields.take_id()?;
                let rssi = fields.take_uint("rssi", 4)? as u16 as i16;
                let status = StatusByte(fields.take_uint("status", 2)? as u8);
                let raw = fields.remainder();
                if raw.is_empty() {
                    return Err(FrameError::EmptyPayload);
                }
                let payload = decode_hex("payload", raw)?;
                Reply::Data {
                    id,
                    rssi,
                    status,
                    payload,
                }
            }
            'J' => {
                let id = fields.take_id()?;
                let raw = fields.remainder();
                let code: u16 = raw.parse().map_err(|_| FrameError::BadDecimal {
                    field: "class",
                    value: raw.to_string(),
                })?;
                Reply::Joined {
                    id,
                    class: class_from_code(code)?,
                }
            }
            'K' => Reply::Kicked {
                id: fields.take_id()?,
            },
            'A' => Reply::Ack {
                id: fields.take_id()?,
            },
            'R' => Reply::PendingRequest {
                id: fields.take_id()?,
            },
            other => return Err(FrameError::UnknownTag(other)),
        };
        fields.finish()?;
        Ok(reply)
    }
}

/// An outbound line, before the CR terminator is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    ListDevices,
    /// Payload to one device; `payload[0]` is the module id.
    Individual { id: DeviceId, payload: Vec<u8> },
    AnnouncePending { id: DeviceId, count: u8 },
    Invite { id: DeviceId },
    Broadcast { payload: Vec<u8> },
    Provision(StaticDevice),
    ClearStatic,
    Flush,
}

impl Command {
    pub fn encode(&self) -> String {
        match self {
            Command::Ping => "P".to_string(),
            Command::ListDevices => "L".to_string(),
            Command::Individual { id, payload } => format!("I{}{}", id, encode_hex(payload)),
            Command::AnnouncePending { id, count } => format!("?{}{:02x}", id, count),
            Command::Invite { id } => format!("V{}", id),
            Command::Broadcast { payload } => format!("B{}", encode_hex(payload)),
            Command::Provision(dev) => format!(
                "A{:016x}{:016x}{:08x}{:08x}{:02x}",
                dev.eui, dev.app_id, dev.address, dev.nonce, dev.channel
            ),
            Command::ClearStatic => "K".to_string(),
            Command::Flush => "F".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "1122334455667788";

    #[test]
    fn parses_individual_data() {
        let line = format!("I{ID}ffd625020200");
        let reply = Reply::parse(&line).unwrap();
        assert_eq!(
            reply,
            Reply::Data {
                id: DeviceId(0x1122334455667788),
                rssi: -42,
                status: StatusByte(0x25),
                payload: vec![0x02, 0x02, 0x00],
            }
        );
    }

    #[test]
    fn status_byte_fields() {
        let s = StatusByte(0x25);
        assert_eq!(s.temperature(), 5);
        assert_eq!(s.battery_mv(), 2200);
        assert_eq!(StatusByte(0x00).temperature(), -20);
    }

    #[test]
    fn parses_list_entry() {
        let line = format!("L{ID}00000000000000aa00100002");
        match Reply::parse(&line).unwrap() {
            Reply::ListEntry {
                id,
                app_id,
                last_seen,
                class,
            } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(app_id, 0xaa);
                assert_eq!(last_seen, 16);
                assert_eq!(class, DeviceClass::C);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_join_with_decimal_class() {
        let reply = Reply::parse(&format!("J{ID}2")).unwrap();
        assert_eq!(
            reply,
            Reply::Joined {
                id: DeviceId(0x1122334455667788),
                class: DeviceClass::C
            }
        );
        assert!(matches!(
            Reply::parse(&format!("J{ID}x")),
            Err(FrameError::BadDecimal { .. })
        ));
        assert_eq!(
            Reply::parse(&format!("J{ID}7")),
            Err(FrameError::UnknownClass(7))
        );
    }

    #[test]
    fn short_tags_require_exact_width() {
        assert!(matches!(Reply::parse(&format!("A{ID}")), Ok(Reply::Ack { .. })));
        assert!(matches!(
            Reply::parse("A11223344"),
            Err(FrameError::Width { expected: 16, .. })
        ));
        assert_eq!(
            Reply::parse(&format!("K{ID}00")),
            Err(FrameError::Trailing(2))
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(Reply::parse(""), Err(FrameError::Empty));
        assert_eq!(Reply::parse("Zabc"), Err(FrameError::UnknownTag('Z')));
        assert!(matches!(
            Reply::parse("R11223344556677gg"),
            Err(FrameError::BadHex { .. })
        ));
        assert_eq!(
            Reply::parse(&format!("I{ID}ffd625")),
            Err(FrameError::EmptyPayload)
        );
        assert_eq!(
            Reply::parse(&format!("I{ID}ffd625020")),
            Err(FrameError::OddPayload(3))
        );
        assert_eq!(Reply::parse("I\u{e9}"), Err(FrameError::NotAscii));
    }

    #[test]
    fn encodes_commands() {
        let id = DeviceId(0x1122334455667788);
        assert_eq!(Command::Ping.encode(), "P");
        assert_eq!(
            Command::Individual {
                id,
                payload: vec![0x01, 0x02, 0x03]
            }
            .encode(),
            "I1122334455667788010203"
        );
        assert_eq!(
            Command::AnnouncePending { id, count: 3 }.encode(),
            "?112233445566778803"
        );
        assert_eq!(Command::Invite { id }.encode(), "V1122334455667788");
        assert_eq!(
            Command::Broadcast {
                payload: vec![0x01, 0xff]
            }
            .encode(),
            "B01ff"
        );
        let dev = StaticDevice {
            eui: 0x1122334455667788,
            app_id: 0xa,
            address: 0xdeadbeef,
            nonce: 1,
            channel: 3,
        };
        assert_eq!(
            Command::Provision(dev).encode(),
            "A1122334455667788000000000000000adeadbeef0000000103"
        );
    }
}
