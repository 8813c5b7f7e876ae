//! Passive infrared motion detector.

use super::{require, CodecError, ModuleCodec, ValuePairs};

pub const MODULE_ID: u8 = 7;

pub struct Pir;

impl ModuleCodec for Pir {
    fn id(&self) -> u8 {
        MODULE_ID
    }

    fn name(&self) -> &'static str {
        "pir"
    }

    fn decode(&self, payload: &[u8]) -> Result<ValuePairs, CodecError> {
        require(payload, 1)?;
        let mut out = ValuePairs::new();
        out.add("motion", if payload[0] != 0 { "detected" } else { "clear" })?;
        Ok(out)
    }

    fn encode(&self, _command: &str) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::ReadOnly(self.name()))
    }
}
