//! Byte-stream transport seen by the client.
//!
//! The client only opens, writes and closes. Readiness, inbound bytes and
//! closure are reported back by whoever owns the device through
//! [`ObdClient::handle_ready`](crate::ObdClient::handle_ready),
//! [`ObdClient::handle_data`](crate::ObdClient::handle_data) and
//! [`ObdClient::handle_closed`](crate::ObdClient::handle_closed).
//! Bytes must arrive in the order they were written; chunking is arbitrary.

use crate::error::ObdError;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::info;

pub trait Transport {
    fn open(&mut self) -> Result<(), ObdError>;

    fn write(&mut self, bytes: &[u8]) -> Result<(), ObdError>;

    fn close(&mut self);
}

/// Open an ELM327 serial port for async use
pub fn open_serial(device: &str, baud_rate: u32) -> Result<SerialStream, ObdError> {
    info!("Opening serial port {} at {} baud", device, baud_rate);
    let port = tokio_serial::new(device, baud_rate).open_native_async()?;
    Ok(port)
}

/// In-memory transport recording every write
#[derive(Debug, Default)]
pub struct MockTransport {
    pub open: bool,
    pub written: Vec<String>,
    /// Make the next writes fail
    pub fail_writes: bool,
    pub fail_open: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the recorded writes, oldest first
    pub fn take_written(&mut self) -> Vec<String> {
        std::mem::take(&mut self.written)
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), ObdError> {
        if self.fail_open {
            return Err(ObdError::SerialError("mock port unavailable".into()));
        }
        self.open = true;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), ObdError> {
        if self.fail_writes || !self.open {
            return Err(ObdError::WriteFailed("mock port rejected write".into()));
        }
        self.written.push(String::from_utf8_lossy(bytes).into_owned());
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}
