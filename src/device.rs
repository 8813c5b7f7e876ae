//! Identity and class of an end device as seen by the gate.

use std::fmt;
use std::str::FromStr;

/// 64-bit device identifier (the device EUI).
///
/// Displayed as 16 lowercase hex digits, which is also how it appears in MQTT
/// topics and on the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = std::num::ParseIntError;

    /// Accepts 1 to 16 hex digits, either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(DeviceId)
    }
}

/// Duty-cycle behaviour of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// On-demand: only receives right after it transmits.
    A,
    /// Reserved. Stored and reported, never scheduled differently.
    B,
    /// Always listening: can be invited proactively.
    C,
}

impl DeviceClass {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(DeviceClass::A),
            1 => Some(DeviceClass::B),
            2 => Some(DeviceClass::C),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            DeviceClass::A => 0,
            DeviceClass::B => 1,
            DeviceClass::C => 2,
        }
    }

    pub fn is_on_demand(self) -> bool {
        self == DeviceClass::A
    }

    pub fn is_always_listening(self) -> bool {
        self == DeviceClass::C
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceClass::A => "A",
            DeviceClass::B => "B",
            DeviceClass::C => "C",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_round_trips_through_display() {
        let id: DeviceId = "1122334455667788".parse().unwrap();
        assert_eq!(id, DeviceId(0x1122_3344_5566_7788));
        assert_eq!(id.to_string(), "1122334455667788");
        assert_eq!(DeviceId(0xab).to_string(), "00000000000000ab");
    }

    #[test]
    fn device_id_rejects_garbage() {
        assert!("zz".parse::<DeviceId>().is_err());
        assert!("11223344556677889".parse::<DeviceId>().is_err());
    }

    #[test]
    fn class_codes() {
        assert_eq!(DeviceClass::from_code(0), Some(DeviceClass::A));
        assert_eq!(DeviceClass::from_code(2), Some(DeviceClass::C));
        assert_eq!(DeviceClass::from_code(3), None);
        assert_eq!(DeviceClass::C.code(), 2);
    }
}
