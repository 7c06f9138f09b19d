//! Diagnostic Trouble Codes
//!
//! Mode 03 replies pack stored trouble codes two bytes per code. This module
//! unpacks them into their `P0100` style strings and keeps the description
//! table used to decide which codes are reported.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A recognized trouble code with its description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroubleCode {
    pub code: String,
    pub description: String,
}

/// The set of recognized codes carried by one trouble code reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtcReport {
    pub errors: Vec<TroubleCode>,
}

/// Decode two raw bytes into a trouble code string (e.g. "P0300").
///
/// `00 00` is padding and yields `None`.
pub fn decode_code(b1: u8, b2: u8) -> Option<String> {
    if b1 == 0x00 && b2 == 0x00 {
        return None;
    }

    let category = match b1 >> 6 {
        0 => 'P',
        1 => 'C',
        2 => 'B',
        _ => 'U',
    };
    let digit1 = (b1 >> 4) & 0x03;
    let digit2 = b1 & 0x0F;
    let digit3 = b2 >> 4;
    let digit4 = b2 & 0x0F;

    Some(format!("{category}{digit1}{digit2:X}{digit3:X}{digit4:X}"))
}

/// Unpack every code in a mode 03 payload, skipping padding.
///
/// A trailing odd byte cannot hold a code and is ignored.
pub fn decode_codes(payload: &[u8]) -> Vec<String> {
    payload
        .chunks_exact(2)
        .filter_map(|pair| decode_code(pair[0], pair[1]))
        .collect()
}

/// Trouble code descriptions
#[derive(Debug, Clone)]
pub struct DtcTable {
    entries: HashMap<String, String>,
}

impl DtcTable {
    /// Build a table from `(code, description)` pairs
    pub fn new<I, C, D>(entries: I) -> Self
    where
        I: IntoIterator<Item = (C, D)>,
        C: Into<String>,
        D: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(code, description)| (code.into(), description.into()))
                .collect(),
        }
    }

    /// Generic SAE powertrain and network codes
    pub fn standard() -> Self {
        Self::new(STANDARD_DTCS.iter().copied())
    }

    pub fn describe(&self, code: &str) -> Option<&str> {
        self.entries.get(code).map(String::as_str)
    }

    /// Keep only the codes the table knows, in reply order
    pub fn report(&self, codes: &[String]) -> DtcReport {
        let errors = codes
            .iter()
            .filter_map(|code| {
                self.describe(code).map(|description| TroubleCode {
                    code: code.clone(),
                    description: description.to_string(),
                })
            })
            .collect();
        DtcReport { errors }
    }

    /// Add or replace a description
    pub fn insert(&mut self, code: impl Into<String>, description: impl Into<String>) {
        self.entries.insert(code.into(), description.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DtcTable {
    fn default() -> Self {
        Self::standard()
    }
}

static STANDARD_DTCS: &[(&str, &str)] = &[
    ("P0100", "Mass or Volume Air Flow Circuit Malfunction"),
    ("P0101", "Mass or Volume Air Flow Circuit Range/Performance Problem"),
    ("P0102", "Mass or Volume Air Flow Circuit Low Input"),
    ("P0103", "Mass or Volume Air Flow Circuit High Input"),
    ("P0105", "Manifold Absolute Pressure/Barometric Pressure Circuit Malfunction"),
    ("P0106", "Manifold Absolute Pressure/Barometric Pressure Circuit Range/Performance Problem"),
    ("P0107", "Manifold Absolute Pressure/Barometric Pressure Circuit Low Input"),
    ("P0108", "Manifold Absolute Pressure/Barometric Pressure Circuit High Input"),
    ("P0110", "Intake Air Temperature Circuit Malfunction"),
    ("P0112", "Intake Air Temperature Circuit Low Input"),
    ("P0113", "Intake Air Temperature Circuit High Input"),
    ("P0115", "Engine Coolant Temperature Circuit Malfunction"),
    ("P0116", "Engine Coolant Temperature Circuit Range/Performance Problem"),
    ("P0117", "Engine Coolant Temperature Circuit Low Input"),
    ("P0118", "Engine Coolant Temperature Circuit High Input"),
    ("P0120", "Throttle Position Sensor/Switch A Circuit Malfunction"),
    ("P0121", "Throttle Position Sensor/Switch A Circuit Range/Performance Problem"),
    ("P0122", "Throttle Position Sensor/Switch A Circuit Low Input"),
    ("P0123", "Throttle Position Sensor/Switch A Circuit High Input"),
    ("P0125", "Insufficient Coolant Temperature for Closed Loop Fuel Control"),
    ("P0128", "Coolant Thermostat (Coolant Temperature Below Thermostat Regulating Temperature)"),
    ("P0130", "O2 Sensor Circuit Malfunction (Bank 1 Sensor 1)"),
    ("P0131", "O2 Sensor Circuit Low Voltage (Bank 1 Sensor 1)"),
    ("P0132", "O2 Sensor Circuit High Voltage (Bank 1 Sensor 1)"),
    ("P0133", "O2 Sensor Circuit Slow Response (Bank 1 Sensor 1)"),
    ("P0134", "O2 Sensor Circuit No Activity Detected (Bank 1 Sensor 1)"),
    ("P0135", "O2 Sensor Heater Circuit Malfunction (Bank 1 Sensor 1)"),
    ("P0136", "O2 Sensor Circuit Malfunction (Bank 1 Sensor 2)"),
    ("P0141", "O2 Sensor Heater Circuit Malfunction (Bank 1 Sensor 2)"),
    ("P0171", "System too Lean (Bank 1)"),
    ("P0172", "System too Rich (Bank 1)"),
    ("P0174", "System too Lean (Bank 2)"),
    ("P0175", "System too Rich (Bank 2)"),
    ("P0200", "Injector Circuit Malfunction"),
    ("P0201", "Injector Circuit Malfunction - Cylinder 1"),
    ("P0202", "Injector Circuit Malfunction - Cylinder 2"),
    ("P0203", "Injector Circuit Malfunction - Cylinder 3"),
    ("P0204", "Injector Circuit Malfunction - Cylinder 4"),
    ("P0217", "Engine Overtemp Condition"),
    ("P0230", "Fuel Pump Primary Circuit Malfunction"),
    ("P0300", "Random/Multiple Cylinder Misfire Detected"),
    ("P0301", "Cylinder 1 Misfire Detected"),
    ("P0302", "Cylinder 2 Misfire Detected"),
    ("P0303", "Cylinder 3 Misfire Detected"),
    ("P0304", "Cylinder 4 Misfire Detected"),
    ("P0305", "Cylinder 5 Misfire Detected"),
    ("P0306", "Cylinder 6 Misfire Detected"),
    ("P0325", "Knock Sensor 1 Circuit Malfunction (Bank 1 or Single Sensor)"),
    ("P0335", "Crankshaft Position Sensor A Circuit Malfunction"),
    ("P0340", "Camshaft Position Sensor Circuit Malfunction"),
    ("P0400", "Exhaust Gas Recirculation Flow Malfunction"),
    ("P0401", "Exhaust Gas Recirculation Flow Insufficient Detected"),
    ("P0402", "Exhaust Gas Recirculation Flow Excessive Detected"),
    ("P0420", "Catalyst System Efficiency Below Threshold (Bank 1)"),
    ("P0430", "Catalyst System Efficiency Below Threshold (Bank 2)"),
    ("P0440", "Evaporative Emission Control System Malfunction"),
    ("P0441", "Evaporative Emission Control System Incorrect Purge Flow"),
    ("P0442", "Evaporative Emission Control System Leak Detected (small leak)"),
    ("P0446", "Evaporative Emission Control System Vent Control Circuit Malfunction"),
    ("P0455", "Evaporative Emission Control System Leak Detected (gross leak)"),
    ("P0500", "Vehicle Speed Sensor Malfunction"),
    ("P0505", "Idle Control System Malfunction"),
    ("P0506", "Idle Control System RPM Lower Than Expected"),
    ("P0507", "Idle Control System RPM Higher Than Expected"),
    ("P0562", "System Voltage Low"),
    ("P0563", "System Voltage High"),
    ("P0600", "Serial Communication Link Malfunction"),
    ("P0700", "Transmission Control System Malfunction"),
    ("P0705", "Transmission Range Sensor Circuit Malfunction (PRNDL Input)"),
    ("P0715", "Input/Turbine Speed Sensor Circuit Malfunction"),
    ("P0720", "Output Speed Sensor Circuit Malfunction"),
    ("P0740", "Torque Converter Clutch Circuit Malfunction"),
    ("U0001", "High Speed CAN Communication Bus"),
    ("U0100", "Lost Communication With ECM/PCM A"),
    ("U0101", "Lost Communication With TCM"),
    ("U0121", "Lost Communication With Anti-Lock Brake System (ABS) Control Module"),
    ("U0140", "Lost Communication With Body Control Module"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_powertrain_code() {
        assert_eq!(decode_code(0x01, 0x00).as_deref(), Some("P0100"));
        assert_eq!(decode_code(0x03, 0x00).as_deref(), Some("P0300"));
        assert_eq!(decode_code(0x01, 0x71).as_deref(), Some("P0171"));
    }

    #[test]
    fn test_decode_other_categories() {
        assert_eq!(decode_code(0x40, 0x35).as_deref(), Some("C0035"));
        assert_eq!(decode_code(0x80, 0x01).as_deref(), Some("B0001"));
        assert_eq!(decode_code(0xC1, 0x00).as_deref(), Some("U0100"));
        assert_eq!(decode_code(0x9F, 0xFF).as_deref(), Some("B1FFF"));
    }

    #[test]
    fn test_padding_is_not_a_code() {
        assert_eq!(decode_code(0x00, 0x00), None);
        assert_eq!(
            decode_codes(&[0x01, 0x00, 0x00, 0x00, 0x04, 0x20, 0x07]),
            vec!["P0100".to_string(), "P0420".to_string()]
        );
    }

    #[test]
    fn test_report_filters_unknown_codes() {
        let table = DtcTable::new([("P0100", "Mass air flow sensor circuit")]);
        let report = table.report(&["P0100".to_string(), "P9999".to_string()]);
        assert_eq!(
            report.errors,
            vec![TroubleCode {
                code: "P0100".into(),
                description: "Mass air flow sensor circuit".into(),
            }]
        );

        assert!(table.report(&["P9999".to_string()]).errors.is_empty());
    }

    #[test]
    fn test_standard_table() {
        let table = DtcTable::standard();
        assert!(table.len() > 50);
        assert_eq!(
            table.describe("P0300"),
            Some("Random/Multiple Cylinder Misfire Detected")
        );
    }
}
