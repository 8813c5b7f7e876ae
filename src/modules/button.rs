//! Four-button keypad. Reports `[button, state]`, state `0` meaning pressed.

use super::{require, CodecError, ModuleCodec, ValuePairs};

pub const MODULE_ID: u8 = 2;

pub struct FourButton;

impl ModuleCodec for FourButton {
    fn id(&self) -> u8 {
        MODULE_ID
    }

    fn name(&self) -> &'static str {
        "4btn"
    }

    fn decode(&self, payload: &[u8]) -> Result<ValuePairs, CodecError> {
        require(payload, 2)?;
        let mut out = ValuePairs::new();
        out.add("btn", payload[0])?;
        out.add("state", if payload[1] == 0 { "pressed" } else { "released" })?;
        Ok(out)
    }

    fn encode(&self, _command: &str) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::ReadOnly(self.name()))
    }
}
