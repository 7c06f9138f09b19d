//! OBD-II Protocol Implementation
//!
//! This crate provides the protocol engine for ELM327-compatible OBD-II
//! adapters: reply framing, PID and trouble code decoding, the outgoing
//! command queue, poll scheduling and the connection controller that ties
//! them together over any byte-stream [`Transport`].

mod client;
mod config;
mod decoder;
mod dtc;
mod error;
mod framing;
mod pid;
mod poller;
mod protocol;
mod queue;
mod transport;

pub use client::{ConnectionState, ObdClient, ObdEvent};
pub use config::ClientConfig;
pub use decoder::{DecodedReply, Reply, ReplyDecoder, PASSTHROUGH_STATUSES};
pub use dtc::{decode_code, decode_codes, DtcReport, DtcTable, TroubleCode};
pub use error::ObdError;
pub use framing::{Exchange, FrameAssembler, LINE_TERMINATOR, PROMPT};
pub use pid::{DecodeRule, PidDescriptor, PidRegistry, Value, ALLOWED_BYTE_COUNTS};
pub use poller::{PollScheduler, Poller, DEFAULT_QUEUE_THRESHOLD};
pub use protocol::{init_sequence, ObdProtocol};
pub use queue::{Command, CommandQueue};
pub use transport::{open_serial, MockTransport, Transport};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Freeze frame data
    pub const FREEZE_FRAME: u8 = 0x02;
    /// Diagnostic trouble codes
    pub const READ_DTC: u8 = 0x03;
    /// Clear trouble codes
    pub const CLEAR_DTC: u8 = 0x04;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;

    /// Positive responses echo the request mode plus 0x40
    pub const fn response(mode: u8) -> u8 {
        mode + 0x40
    }
}
