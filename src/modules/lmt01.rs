//! LMT01 temperature probe: signed big-endian tenths of a degree.

use super::{encode_poll_command, require, tenths, CodecError, ModuleCodec, ValuePairs};

pub const MODULE_ID: u8 = 4;

pub struct Lmt01;

impl ModuleCodec for Lmt01 {
    fn id(&self) -> u8 {
        MODULE_ID
    }

    fn name(&self) -> &'static str {
        "lmt01"
    }

    fn decode(&self, payload: &[u8]) -> Result<ValuePairs, CodecError> {
        require(payload, 2)?;
        let raw = i16::from_be_bytes([payload[0], payload[1]]);
        let mut out = ValuePairs::new();
        out.add("temperature", tenths(raw))?;
        Ok(out)
    }

    fn encode(&self, command: &str) -> Result<Vec<u8>, CodecError> {
        encode_poll_command(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_signed_tenths() {
        assert_eq!(Lmt01.decode(&[0x00, 0xEB]).unwrap().get("temperature"), Some("23.5"));
        assert_eq!(Lmt01.decode(&[0xFF, 0x9C]).unwrap().get("temperature"), Some("-10.0"));
        assert!(Lmt01.decode(&[0x00]).is_err());
    }

    #[test]
    fn accepts_poll_commands() {
        assert_eq!(Lmt01.encode("period 5").unwrap(), vec![0x01, 0x05]);
    }
}
