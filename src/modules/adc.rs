//! Multi-channel ADC. Each channel is a big-endian `u16` in millivolts.
//!
//! The readings are published as a JSON array under `adc`, which the envelope
//! renderer passes through verbatim.

use super::{require, CodecError, ModuleCodec, ValuePairs};

pub const MODULE_ID: u8 = 8;

pub struct Adc;

impl ModuleCodec for Adc {
    fn id(&self) -> u8 {
        MODULE_ID
    }

    fn name(&self) -> &'static str {
        "adc"
    }

    fn decode(&self, payload: &[u8]) -> Result<ValuePairs, CodecError> {
        require(payload, 2)?;
        if payload.len() % 2 != 0 {
            return Err(CodecError::Malformed("odd adc payload length"));
        }
        let readings: Vec<String> = payload
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]).to_string())
            .collect();
        let mut out = ValuePairs::new();
        out.add("channels", readings.len())?;
        out.add("adc", format!("[{}]", readings.join(",")))?;
        Ok(out)
    }

    fn encode(&self, command: &str) -> Result<Vec<u8>, CodecError> {
        match command.trim() {
            "get" => Ok(vec![0x00]),
            other => Err(CodecError::UnknownCommand(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_channel_list() {
        let v = Adc.decode(&[0x04, 0xB0, 0x0C, 0xE4]).unwrap();
        assert_eq!(v.get("channels"), Some("2"));
        assert_eq!(v.get("adc"), Some("[1200,3300]"));
        assert!(Adc.decode(&[0x04, 0xB0, 0x0C]).is_err());
        assert!(Adc.decode(&[]).is_err());
    }

    #[test]
    fn only_get_is_accepted() {
        assert_eq!(Adc.encode("get").unwrap(), vec![0x00]);
        assert!(Adc.encode("period 3").is_err());
    }
}
