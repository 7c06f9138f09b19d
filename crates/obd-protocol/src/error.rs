//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur while driving an OBD-II adapter
#[derive(Debug, Error)]
pub enum ObdError {
    /// Serial port or stream error
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Command issued while the adapter link is not up
    #[error("OBD adapter is not connected")]
    NotConnected,

    /// Transport rejected a write while the link was believed to be up
    #[error("Write to adapter failed: {0}")]
    WriteFailed(String),

    /// Name not present in the PID registry
    #[error("Unknown PID name: {0}")]
    UnknownPid(String),

    /// Command queue refused a new command
    #[error("Command queue overflow ({0} commands pending)")]
    QueueOverflow(usize),

    /// PID registry built from inconsistent descriptors
    #[error("Invalid PID registry: {0}")]
    InvalidRegistry(String),

    /// The session task is gone
    #[error("OBD session closed")]
    SessionClosed,
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}
