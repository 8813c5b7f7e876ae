//! General purpose I/O board.
//!
//! Request body is `[op, pin]` with op `0` get, `1` drive low, `2` drive
//! high, `3` toggle. Replies are `[result, pin, level]`; a bare `[result]`
//! acknowledges a command without reporting state.

use super::{parse_arg, require, CodecError, ModuleCodec, ValuePairs};

pub const MODULE_ID: u8 = 1;
pub const MAX_PIN: u8 = 63;

const OP_GET: u8 = 0x00;
const OP_LOW: u8 = 0x01;
const OP_HIGH: u8 = 0x02;
const OP_TOGGLE: u8 = 0x03;

pub struct Gpio;

impl Gpio {
    fn pin(arg: Option<&str>) -> Result<u8, CodecError> {
        let pin: u8 = parse_arg(arg, "pin")?;
        if pin > MAX_PIN {
            return Err(CodecError::InvalidArgument {
                arg: "pin",
                reason: format!("{pin} exceeds {MAX_PIN}"),
            });
        }
        Ok(pin)
    }
}

impl ModuleCodec for Gpio {
    fn id(&self) -> u8 {
        MODULE_ID
    }

    fn name(&self) -> &'static str {
        "gpio"
    }

    fn decode(&self, payload: &[u8]) -> Result<ValuePairs, CodecError> {
        require(payload, 1)?;
        let mut out = ValuePairs::new();
        match payload[0] {
            0 => {
                out.add("result", "ok")?;
                if payload.len() >= 3 {
                    out.add("pin", payload[1])?;
                    out.add("value", u8::from(payload[2] != 0))?;
                }
            }
            1 => out.add("result", "error")?,
            _ => return Err(CodecError::Malformed("unknown gpio result code")),
        }
        Ok(out)
    }

    fn encode(&self, command: &str) -> Result<Vec<u8>, CodecError> {
        let mut words = command.split_whitespace();
        match words.next() {
            Some("get") => Ok(vec![OP_GET, Self::pin(words.next())?]),
            Some("toggle") => Ok(vec![OP_TOGGLE, Self::pin(words.next())?]),
            Some("set") => {
                let pin = Self::pin(words.next())?;
                let op = match words.next() {
                    Some("0") | Some("low") => OP_LOW,
                    Some("1") | Some("high") => OP_HIGH,
                    other => {
                        return Err(CodecError::InvalidArgument {
                            arg: "value",
                            reason: format!("expected 0 or 1, got {:?}", other.unwrap_or("")),
                        })
                    }
                };
                Ok(vec![op, pin])
            }
            _ => Err(CodecError::UnknownCommand(command.trim().to_string())),
        }
    }
}
