//! OBD-II PID Definitions and Value Decoding
//!
//! Every parameter the client can request is described by a [`PidDescriptor`]:
//! its name, request mode, optional PID byte and the rule that turns the
//! reply payload into a [`Value`]. Fixed-width rules declare their own byte
//! count, so the decoder never needs to know about individual PIDs.

use crate::dtc;
use crate::error::ObdError;
use crate::mode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Payload widths a fixed-width rule may declare
pub const ALLOWED_BYTE_COUNTS: [usize; 4] = [1, 2, 4, 8];

/// A decoded parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Scalar measurement in the parameter's native unit
    Number(f64),
    /// Enumerated state rendered as text
    Text(String),
    /// PIDs advertised as supported by a `pidsupp` bitmap
    SupportedPids(Vec<u8>),
    /// Malfunction indicator lamp and stored code count (PID 01)
    MonitorStatus { mil: bool, dtc_count: u8 },
}

impl Value {
    /// Numeric value, if this is a scalar measurement
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }
}

/// How the payload of a reply to this descriptor is turned into a value
#[derive(Clone, Copy)]
pub enum DecodeRule {
    /// Exactly `bytes` payload bytes follow the mode and PID bytes
    Fixed {
        bytes: usize,
        convert: fn(&[u8]) -> Value,
    },
    /// Packed two-byte trouble codes fill the rest of the reply
    TroubleCodes,
    /// Administrative request; the reply is only a status
    Request,
}

impl fmt::Debug for DecodeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeRule::Fixed { bytes, .. } => f.debug_struct("Fixed").field("bytes", bytes).finish(),
            DecodeRule::TroubleCodes => f.write_str("TroubleCodes"),
            DecodeRule::Request => f.write_str("Request"),
        }
    }
}

/// One entry of the PID registry
#[derive(Debug, Clone, Copy)]
pub struct PidDescriptor {
    /// Human readable name, unique within a registry
    pub name: &'static str,
    /// Request mode (0x01 current data, 0x03 trouble codes, ...)
    pub mode: u8,
    /// Parameter ID, absent for whole-mode requests
    pub pid: Option<u8>,
    /// Payload decode rule
    pub rule: DecodeRule,
}

impl PidDescriptor {
    const fn fixed(name: &'static str, pid: u8, bytes: usize, convert: fn(&[u8]) -> Value) -> Self {
        Self {
            name,
            mode: mode::CURRENT_DATA,
            pid: Some(pid),
            rule: DecodeRule::Fixed { bytes, convert },
        }
    }

    /// Request text sent to the adapter, e.g. `010C` or `03`
    pub fn request_payload(&self) -> String {
        match self.pid {
            Some(pid) => format!("{:02X}{:02X}", self.mode, pid),
            None => format!("{:02X}", self.mode),
        }
    }

    /// Number of payload bytes a fixed-width rule consumes
    pub fn expected_byte_count(&self) -> Option<usize> {
        match self.rule {
            DecodeRule::Fixed { bytes, .. } => Some(bytes),
            _ => None,
        }
    }
}

/// Lookup table of known parameters
#[derive(Debug, Clone)]
pub struct PidRegistry {
    entries: Vec<PidDescriptor>,
}

impl PidRegistry {
    /// Build a registry from caller supplied descriptors.
    ///
    /// Names must be unique and fixed-width rules must declare one of
    /// [`ALLOWED_BYTE_COUNTS`].
    pub fn new(entries: Vec<PidDescriptor>) -> Result<Self, ObdError> {
        let mut names = HashSet::new();
        for entry in &entries {
            if !names.insert(entry.name) {
                return Err(ObdError::InvalidRegistry(format!(
                    "duplicate name '{}'",
                    entry.name
                )));
            }
            if let Some(bytes) = entry.expected_byte_count() {
                if !ALLOWED_BYTE_COUNTS.contains(&bytes) {
                    return Err(ObdError::InvalidRegistry(format!(
                        "'{}' declares {} payload bytes",
                        entry.name, bytes
                    )));
                }
            }
        }
        Ok(Self { entries })
    }

    /// The standard SAE J1979 parameter set
    pub fn standard() -> Self {
        Self {
            entries: STANDARD_PIDS.to_vec(),
        }
    }

    pub fn by_name(&self, name: &str) -> Option<&PidDescriptor> {
        self.entries.iter().find(|d| d.name == name)
    }

    pub fn by_code(&self, mode: u8, pid: u8) -> Option<&PidDescriptor> {
        self.entries
            .iter()
            .find(|d| d.mode == mode && d.pid == Some(pid))
    }

    /// Descriptor answering trouble code replies, if registered
    pub fn trouble_codes(&self) -> Option<&PidDescriptor> {
        self.entries
            .iter()
            .find(|d| matches!(d.rule, DecodeRule::TroubleCodes))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PidDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PidRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

// Formulas follow SAE J1979; A, B, ... are the payload bytes in order.

fn word(b: &[u8]) -> f64 {
    b[0] as f64 * 256.0 + b[1] as f64
}

fn raw(b: &[u8]) -> Value {
    Value::Number(b[0] as f64)
}

fn raw_word(b: &[u8]) -> Value {
    Value::Number(word(b))
}

fn percent(b: &[u8]) -> Value {
    Value::Number(b[0] as f64 * 100.0 / 255.0)
}

fn temperature(b: &[u8]) -> Value {
    Value::Number(b[0] as f64 - 40.0)
}

fn fuel_trim(b: &[u8]) -> Value {
    Value::Number((b[0] as f64 - 128.0) * 100.0 / 128.0)
}

fn rpm(b: &[u8]) -> Value {
    Value::Number(word(b) / 4.0)
}

fn maf(b: &[u8]) -> Value {
    Value::Number(word(b) / 100.0)
}

fn timing_advance(b: &[u8]) -> Value {
    Value::Number(b[0] as f64 / 2.0 - 64.0)
}

fn fuel_pressure(b: &[u8]) -> Value {
    Value::Number(b[0] as f64 * 3.0)
}

fn o2_voltage(b: &[u8]) -> Value {
    Value::Number(b[0] as f64 / 200.0)
}

fn rail_pressure_relative(b: &[u8]) -> Value {
    Value::Number(word(b) * 0.079)
}

fn rail_pressure_direct(b: &[u8]) -> Value {
    Value::Number(word(b) * 10.0)
}

fn evap_pressure(b: &[u8]) -> Value {
    Value::Number(i16::from_be_bytes([b[0], b[1]]) as f64 / 4.0)
}

fn catalyst_temperature(b: &[u8]) -> Value {
    Value::Number(word(b) / 10.0 - 40.0)
}

fn module_voltage(b: &[u8]) -> Value {
    Value::Number(word(b) / 1000.0)
}

fn absolute_load(b: &[u8]) -> Value {
    Value::Number(word(b) * 100.0 / 255.0)
}

fn equivalence_ratio(b: &[u8]) -> Value {
    Value::Number(word(b) / 32768.0)
}

fn fuel_rate(b: &[u8]) -> Value {
    Value::Number(word(b) / 20.0)
}

fn supported_pids(base: u8, b: &[u8]) -> Value {
    let bits = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
    let pids = (0..32u8)
        .filter(|i| bits & (0x8000_0000 >> i) != 0)
        .map(|i| base + i + 1)
        .collect();
    Value::SupportedPids(pids)
}

fn supported_00(b: &[u8]) -> Value {
    supported_pids(0x00, b)
}

fn supported_20(b: &[u8]) -> Value {
    supported_pids(0x20, b)
}

fn supported_40(b: &[u8]) -> Value {
    supported_pids(0x40, b)
}

fn monitor_status(b: &[u8]) -> Value {
    Value::MonitorStatus {
        mil: b[0] & 0x80 != 0,
        dtc_count: b[0] & 0x7F,
    }
}

fn freeze_frame_code(b: &[u8]) -> Value {
    Value::Text(dtc::decode_code(b[0], b[1]).unwrap_or_default())
}

fn fuel_system_status(b: &[u8]) -> Value {
    let text = match b[0] {
        0x01 => "Open loop due to insufficient engine temperature",
        0x02 => "Closed loop, using oxygen sensor feedback to determine fuel mix",
        0x04 => "Open loop due to engine load or fuel cut due to deceleration",
        0x08 => "Open loop due to system failure",
        0x10 => "Closed loop, feedback system fault",
        _ => "Unknown",
    };
    Value::Text(text.to_string())
}

fn secondary_air_status(b: &[u8]) -> Value {
    let text = match b[0] {
        0x01 => "Upstream",
        0x02 => "Downstream of catalytic converter",
        0x04 => "From the outside atmosphere or off",
        0x08 => "Pump commanded on for diagnostics",
        _ => "Unknown",
    };
    Value::Text(text.to_string())
}

const OBD_STANDARDS: [&str; 14] = [
    "Unknown",
    "OBD-II as defined by the CARB",
    "OBD as defined by the EPA",
    "OBD and OBD-II",
    "OBD-I",
    "Not OBD compliant",
    "EOBD (Europe)",
    "EOBD and OBD-II",
    "EOBD and OBD",
    "EOBD, OBD and OBD-II",
    "JOBD (Japan)",
    "JOBD and OBD-II",
    "JOBD and EOBD",
    "JOBD, EOBD, and OBD-II",
];

fn obd_standard(b: &[u8]) -> Value {
    let text = OBD_STANDARDS
        .get(b[0] as usize)
        .copied()
        .unwrap_or(OBD_STANDARDS[0]);
    Value::Text(text.to_string())
}

const FUEL_TYPES: [&str; 9] = [
    "Not available",
    "Gasoline",
    "Methanol",
    "Ethanol",
    "Diesel",
    "LPG",
    "CNG",
    "Propane",
    "Electric",
];

fn fuel_type(b: &[u8]) -> Value {
    let text = FUEL_TYPES.get(b[0] as usize).copied().unwrap_or("Unknown");
    Value::Text(text.to_string())
}

static STANDARD_PIDS: &[PidDescriptor] = &[
    PidDescriptor::fixed("pidsupp0", 0x00, 4, supported_00),
    PidDescriptor::fixed("dtc_cnt", 0x01, 4, monitor_status),
    PidDescriptor::fixed("dtcfrzf", 0x02, 2, freeze_frame_code),
    PidDescriptor::fixed("fuelsys", 0x03, 2, fuel_system_status),
    PidDescriptor::fixed("load_pct", 0x04, 1, percent),
    PidDescriptor::fixed("temp", 0x05, 1, temperature),
    PidDescriptor::fixed("shrtft13", 0x06, 1, fuel_trim),
    PidDescriptor::fixed("longft13", 0x07, 1, fuel_trim),
    PidDescriptor::fixed("shrtft24", 0x08, 1, fuel_trim),
    PidDescriptor::fixed("longft24", 0x09, 1, fuel_trim),
    PidDescriptor::fixed("frp", 0x0A, 1, fuel_pressure),
    PidDescriptor::fixed("map", 0x0B, 1, raw),
    PidDescriptor::fixed("rpm", 0x0C, 2, rpm),
    PidDescriptor::fixed("vss", 0x0D, 1, raw),
    PidDescriptor::fixed("sparkadv", 0x0E, 1, timing_advance),
    PidDescriptor::fixed("iat", 0x0F, 1, temperature),
    PidDescriptor::fixed("maf", 0x10, 2, maf),
    PidDescriptor::fixed("throttlepos", 0x11, 1, percent),
    PidDescriptor::fixed("air_stat", 0x12, 1, secondary_air_status),
    PidDescriptor::fixed("o2s11", 0x14, 2, o2_voltage),
    PidDescriptor::fixed("o2s12", 0x15, 2, o2_voltage),
    PidDescriptor::fixed("o2s13", 0x16, 2, o2_voltage),
    PidDescriptor::fixed("o2s14", 0x17, 2, o2_voltage),
    PidDescriptor::fixed("o2s21", 0x18, 2, o2_voltage),
    PidDescriptor::fixed("o2s22", 0x19, 2, o2_voltage),
    PidDescriptor::fixed("o2s23", 0x1A, 2, o2_voltage),
    PidDescriptor::fixed("o2s24", 0x1B, 2, o2_voltage),
    PidDescriptor::fixed("obdsup", 0x1C, 1, obd_standard),
    PidDescriptor::fixed("runtm", 0x1F, 2, raw_word),
    PidDescriptor::fixed("pidsupp2", 0x20, 4, supported_20),
    PidDescriptor::fixed("mil_dist", 0x21, 2, raw_word),
    PidDescriptor::fixed("frpm", 0x22, 2, rail_pressure_relative),
    PidDescriptor::fixed("frpd", 0x23, 2, rail_pressure_direct),
    PidDescriptor::fixed("egr_pct", 0x2C, 1, percent),
    PidDescriptor::fixed("egr_err", 0x2D, 1, fuel_trim),
    PidDescriptor::fixed("evap_pct", 0x2E, 1, percent),
    PidDescriptor::fixed("fli", 0x2F, 1, percent),
    PidDescriptor::fixed("warm_ups", 0x30, 1, raw),
    PidDescriptor::fixed("clr_dist", 0x31, 2, raw_word),
    PidDescriptor::fixed("evap_vp", 0x32, 2, evap_pressure),
    PidDescriptor::fixed("baro", 0x33, 1, raw),
    PidDescriptor::fixed("catemp11", 0x3C, 2, catalyst_temperature),
    PidDescriptor::fixed("catemp21", 0x3D, 2, catalyst_temperature),
    PidDescriptor::fixed("catemp12", 0x3E, 2, catalyst_temperature),
    PidDescriptor::fixed("catemp22", 0x3F, 2, catalyst_temperature),
    PidDescriptor::fixed("pidsupp4", 0x40, 4, supported_40),
    PidDescriptor::fixed("vpwr", 0x42, 2, module_voltage),
    PidDescriptor::fixed("load_abs", 0x43, 2, absolute_load),
    PidDescriptor::fixed("lambda", 0x44, 2, equivalence_ratio),
    PidDescriptor::fixed("tp_r", 0x45, 1, percent),
    PidDescriptor::fixed("aat", 0x46, 1, temperature),
    PidDescriptor::fixed("tp_b", 0x47, 1, percent),
    PidDescriptor::fixed("tp_c", 0x48, 1, percent),
    PidDescriptor::fixed("app_d", 0x49, 1, percent),
    PidDescriptor::fixed("app_e", 0x4A, 1, percent),
    PidDescriptor::fixed("app_f", 0x4B, 1, percent),
    PidDescriptor::fixed("tac_pct", 0x4C, 1, percent),
    PidDescriptor::fixed("mil_time", 0x4D, 2, raw_word),
    PidDescriptor::fixed("clr_time", 0x4E, 2, raw_word),
    PidDescriptor::fixed("fuel_type", 0x51, 1, fuel_type),
    PidDescriptor::fixed("alch_pct", 0x52, 1, percent),
    PidDescriptor::fixed("eot", 0x5C, 1, temperature),
    PidDescriptor::fixed("fuel_rate", 0x5E, 2, fuel_rate),
    PidDescriptor {
        name: "requestdtc",
        mode: mode::READ_DTC,
        pid: None,
        rule: DecodeRule::TroubleCodes,
    },
    PidDescriptor {
        name: "cleardtc",
        mode: mode::CLEAR_DTC,
        pid: None,
        rule: DecodeRule::Request,
    },
];
