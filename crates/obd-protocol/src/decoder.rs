//! Reply Decoding
//!
//! Turns one logical reply line into a typed [`Reply`].

use crate::dtc::{self, DtcReport, DtcTable};
use crate::mode;
use crate::pid::{DecodeRule, PidRegistry, Value};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Adapter status lines that carry no payload
pub const PASSTHROUGH_STATUSES: [&str; 9] = [
    "NO DATA",
    "OK",
    "?",
    "UNABLE TO CONNECT",
    "SEARCHING...",
    "STOPPED",
    "CAN ERROR",
    "BUS ERROR",
    "BUFFER FULL",
];

/// A decoded current-data reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedReply {
    /// Registry name of the parameter
    pub name: String,
    /// Response mode as sent by the adapter, e.g. "41"
    pub mode: String,
    /// Echoed PID, e.g. "0C"
    pub pid: Option<String>,
    /// Decoded value
    pub value: Value,
    /// Timestamp when the reply was decoded (Unix ms)
    pub timestamp_ms: u64,
}

/// Outcome of decoding one reply line
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A known parameter with its value
    Telemetry(DecodedReply),
    /// At least one recognized trouble code
    Diagnostic(DtcReport),
    /// Adapter status passed through verbatim
    Status(String),
    /// Nothing worth surfacing: unknown PID, malformed hex, no known codes
    Unrecognized,
}

/// Decodes reply lines against a PID registry and DTC table
#[derive(Debug, Clone, Default)]
pub struct ReplyDecoder {
    registry: PidRegistry,
    dtcs: DtcTable,
}

impl ReplyDecoder {
    pub fn new(registry: PidRegistry, dtcs: DtcTable) -> Self {
        Self { registry, dtcs }
    }

    pub fn registry(&self) -> &PidRegistry {
        &self.registry
    }

    pub fn dtcs(&self) -> &DtcTable {
        &self.dtcs
    }

    pub fn decode(&self, line: &str) -> Reply {
        if PASSTHROUGH_STATUSES.contains(&line) {
            return Reply::Status(line.to_string());
        }

        let Some(bytes) = parse_hex(line) else {
            trace!("Not a hex reply: {}", line);
            return Reply::Unrecognized;
        };

        match bytes.first() {
            Some(&b) if b == mode::response(mode::CURRENT_DATA) => self.decode_current_data(&bytes),
            Some(&b) if b == mode::response(mode::READ_DTC) => self.decode_trouble_codes(&bytes),
            _ => Reply::Unrecognized,
        }
    }

    fn decode_current_data(&self, bytes: &[u8]) -> Reply {
        let Some(&pid) = bytes.get(1) else {
            return Reply::Unrecognized;
        };
        let Some(descriptor) = self.registry.by_code(mode::CURRENT_DATA, pid) else {
            trace!("Unknown PID {:02X}", pid);
            return Reply::Unrecognized;
        };
        let DecodeRule::Fixed { bytes: width, convert } = descriptor.rule else {
            return Reply::Unrecognized;
        };
        let Some(payload) = bytes.get(2..2 + width) else {
            trace!(
                "PID {:02X} reply too short: need {} bytes, got {}",
                pid,
                width,
                bytes.len() - 2
            );
            return Reply::Unrecognized;
        };

        Reply::Telemetry(DecodedReply {
            name: descriptor.name.to_string(),
            mode: format!("{:02X}", bytes[0]),
            pid: Some(format!("{:02X}", pid)),
            value: convert(payload),
            timestamp_ms: now_ms(),
        })
    }

    fn decode_trouble_codes(&self, bytes: &[u8]) -> Reply {
        if self.registry.trouble_codes().is_none() {
            return Reply::Unrecognized;
        }

        let codes = dtc::decode_codes(&bytes[1..]);
        let report = self.dtcs.report(&codes);
        if report.errors.is_empty() {
            trace!("No recognized trouble codes in {:?}", codes);
            return Reply::Unrecognized;
        }
        Reply::Diagnostic(report)
    }
}

/// Split a reply into bytes, ignoring spaces
fn parse_hex(line: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = line.bytes().filter(|b| *b != b' ').collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks_exact(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(text, 16).ok()
        })
        .collect()
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
