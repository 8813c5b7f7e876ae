//! # Module Codecs
//!
//! Each sensor/actuator board ("module") has a small integer id and its own
//! binary wire format. A [`ModuleCodec`] turns that format into ordered
//! name/value pairs for publishing, and turns a short text command received
//! over MQTT into the bytes the module expects.
//!
//! Codecs are pure and stateless. They are registered once at startup in a
//! [`CodecRegistry`], which the reply processor consults by id and the
//! command router by name.
//!
//! ## Built-in modules
//!
//! | id | name    | decode                        | commands                          |
//! |----|---------|-------------------------------|-----------------------------------|
//! | 1  | `gpio`  | pin state / result            | `get <pin>`, `set <pin> <0\|1>`, `toggle <pin>` |
//! | 2  | `4btn`  | button number and state       | none                              |
//! | 4  | `lmt01` | temperature                   | `get`, `period <min>`             |
//! | 6  | `sht21` | temperature, humidity         | `get`, `period <min>`             |
//! | 7  | `pir`   | motion flag                   | none                              |
//! | 8  | `adc`   | per-channel millivolts        | `get`                             |

use std::str::FromStr;

use thiserror::Error;

pub mod adc;
pub mod button;
pub mod gpio;
pub mod lmt01;
pub mod pir;
pub mod sht21;
pub mod values;

pub use values::{ValuePairs, MAX_VALUE_PAIRS};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload too short: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("malformed payload: {0}")]
    Malformed(&'static str),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("invalid argument for {arg}: {reason}")]
    InvalidArgument { arg: &'static str, reason: String },
    #[error("module {0} accepts no commands")]
    ReadOnly(&'static str),
    #[error("too many values (limit {0})")]
    TooManyValues(usize),
    #[error("unknown module id {0}")]
    UnknownModuleId(u8),
    #[error("unknown module '{0}'")]
    UnknownModuleName(String),
    #[error("module id {0} registered twice")]
    Duplicate(u8),
}

/// Text <-> binary translator for one module type.
pub trait ModuleCodec: Send + Sync {
    fn id(&self) -> u8;

    /// Topic segment the module publishes under and receives commands on.
    fn name(&self) -> &'static str;

    /// Decode a module payload (module id byte already stripped).
    fn decode(&self, payload: &[u8]) -> Result<ValuePairs, CodecError>;

    /// Encode a text command into the module body (without the module id byte).
    fn encode(&self, command: &str) -> Result<Vec<u8>, CodecError>;
}

/// Require at least `needed` bytes of payload.
pub(crate) fn require(payload: &[u8], needed: usize) -> Result<(), CodecError> {
    if payload.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            got: payload.len(),
        });
    }
    Ok(())
}

/// Parse a required command argument.
pub(crate) fn parse_arg<T: FromStr>(
    arg: Option<&str>,
    name: &'static str,
) -> Result<T, CodecError> {
    let raw = arg.ok_or_else(|| CodecError::InvalidArgument {
        arg: name,
        reason: "missing".to_string(),
    })?;
    raw.parse().map_err(|_| CodecError::InvalidArgument {
        arg: name,
        reason: format!("cannot parse '{raw}'"),
    })
}

/// Fixed-point tenths rendered with one decimal, e.g. `-5` -> `-0.5`.
pub(crate) fn tenths(value: i16) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    format!("{}{}.{}", sign, abs / 10, abs % 10)
}

/// Shared command set of the periodic sensors: `get` and `period <minutes>`.
pub(crate) fn encode_poll_command(command: &str) -> Result<Vec<u8>, CodecError> {
    let mut words = command.split_whitespace();
    match words.next() {
        Some("get") => Ok(vec![0x00]),
        Some("period") => {
            let minutes: u8 = parse_arg(words.next(), "period")?;
            Ok(vec![0x01, minutes])
        }
        _ => Err(CodecError::UnknownCommand(command.trim().to_string())),
    }
}

/// Static table of module codecs, looked up by id or by name.
#[derive(Default)]
pub struct CodecRegistry {
    modules: Vec<Box<dyn ModuleCodec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every module shipped with the gateway.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        let builtin: Vec<Box<dyn ModuleCodec>> = vec![
            Box::new(gpio::Gpio),
            Box::new(button::FourButton),
            Box::new(lmt01::Lmt01),
            Box::new(sht21::Sht21),
            Box::new(pir::Pir),
            Box::new(adc::Adc),
        ];
        for module in builtin {
            // Built-in ids are distinct.
            let _ = reg.register(module);
        }
        reg
    }

    pub fn register(&mut self, module: Box<dyn ModuleCodec>) -> Result<(), CodecError> {
        if self.by_id(module.id()).is_some() {
            return Err(CodecError::Duplicate(module.id()));
        }
        self.modules.push(module);
        Ok(())
    }

    pub fn by_id(&self, id: u8) -> Option<&dyn ModuleCodec> {
        self.modules.iter().find(|m| m.id() == id).map(|m| m.as_ref())
    }

    pub fn by_name(&self, name: &str) -> Option<&dyn ModuleCodec> {
        self.modules
            .iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
            .map(|m| m.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modules.iter().map(|m| m.name())
    }

    /// Decode an application payload whose first byte is the module id.
    /// Returns the module name alongside the decoded values.
    pub fn decode(&self, payload: &[u8]) -> Result<(&'static str, ValuePairs), CodecError> {
        let (&module_id, body) = payload.split_first().ok_or(CodecError::Truncated {
            needed: 1,
            got: 0,
        })?;
        let module = self
            .by_id(module_id)
            .ok_or(CodecError::UnknownModuleId(module_id))?;
        Ok((module.name(), module.decode(body)?))
    }

    /// Encode a text command for the named module; the result starts with
    /// the module id and is ready to be sent to a device.
    pub fn encode(&self, name: &str, command: &str) -> Result<Vec<u8>, CodecError> {
        let module = self
            .by_name(name)
            .ok_or_else(|| CodecError::UnknownModuleName(name.to_string()))?;
        let body = module.encode(command)?;
        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(module.id());
        out.extend_from_slice(&body);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup_by_id_and_name() {
        let reg = CodecRegistry::with_builtin();
        assert_eq!(reg.by_id(2).map(|m| m.name()), Some("4btn"));
        assert_eq!(reg.by_name("GPIO").map(|m| m.id()), Some(1));
        assert!(reg.by_id(200).is_none());
        assert_eq!(reg.names().count(), 6);
    }

    #[test]
    fn decode_dispatches_on_first_byte() {
        let reg = CodecRegistry::with_builtin();
        let (name, pairs) = reg.decode(&[0x02, 0x02, 0x00]).unwrap();
        assert_eq!(name, "4btn");
        assert_eq!(pairs.get("state"), Some("pressed"));
        assert_eq!(reg.decode(&[]).unwrap_err(), CodecError::Truncated { needed: 1, got: 0 });
        assert_eq!(reg.decode(&[0x63]).unwrap_err(), CodecError::UnknownModuleId(0x63));
    }

    #[test]
    fn encode_prepends_module_id() {
        let reg = CodecRegistry::with_builtin();
        assert_eq!(reg.encode("gpio", "set 3 1").unwrap(), vec![0x01, 0x02, 0x03]);
        assert_eq!(
            reg.encode("nope", "get").unwrap_err(),
            CodecError::UnknownModuleName("nope".to_string())
        );
        assert_eq!(reg.encode("pir", "get").unwrap_err(), CodecError::ReadOnly("pir"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = CodecRegistry::with_builtin();
        assert_eq!(reg.register(Box::new(gpio::Gpio)), Err(CodecError::Duplicate(1)));
    }

    #[test]
    fn tenths_formatting() {
        assert_eq!(tenths(235), "23.5");
        assert_eq!(tenths(-5), "-0.5");
        assert_eq!(tenths(0), "0.0");
        assert_eq!(tenths(i16::MIN), "-3276.8");
    }

    #[test]
    fn poll_commands() {
        assert_eq!(encode_poll_command("get").unwrap(), vec![0x00]);
        assert_eq!(encode_poll_command("period 15").unwrap(), vec![0x01, 15]);
        assert!(matches!(
            encode_poll_command("period x"),
            Err(CodecError::InvalidArgument { arg: "period", .. })
        ));
        assert!(matches!(
            encode_poll_command("reboot"),
            Err(CodecError::UnknownCommand(_))
        ));
    }
}
