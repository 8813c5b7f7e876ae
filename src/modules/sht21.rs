//! SHT21 temperature and humidity sensor.
//!
//! Payload: `i16` big-endian temperature in tenths of a degree followed by
//! relative humidity in whole percent.

use super::{encode_poll_command, require, tenths, CodecError, ModuleCodec, ValuePairs};

pub const MODULE_ID: u8 = 6;

pub struct Sht21;

impl ModuleCodec for Sht21 {
    fn id(&self) -> u8 {
        MODULE_ID
    }

    fn name(&self) -> &'static str {
        "sht21"
    }

    fn decode(&self, payload: &[u8]) -> Result<ValuePairs, CodecError> {
        require(payload, 3)?;
        let temp = i16::from_be_bytes([payload[0], payload[1]]);
        let humidity = payload[2];
        if humidity > 100 {
            return Err(CodecError::Malformed("humidity above 100%"));
        }
        let mut out = ValuePairs::new();
        out.add("temperature", tenths(temp))?;
        out.add("humidity", humidity)?;
        Ok(out)
    }

    fn encode(&self, command: &str) -> Result<Vec<u8>, CodecError> {
        encode_poll_command(command)
    }
}
