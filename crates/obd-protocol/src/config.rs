//! Client configuration

use crate::poller::DEFAULT_QUEUE_THRESHOLD;
use crate::protocol::{self, ObdProtocol};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for one adapter connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Target round trip for a single command (milliseconds)
    pub command_budget_ms: u64,
    /// Queue depth at which poll ticks are skipped
    pub poll_queue_threshold: usize,
    /// Hard cap on pending commands; unbounded when unset
    pub queue_capacity: Option<usize>,
    /// ELM327 adaptive timing mode (ATAT)
    pub adaptive_timing: u8,
    /// ELM327 response timeout in 4 ms units (ATST)
    pub adapter_timeout: u8,
    /// Protocol to request from the adapter
    pub protocol: ObdProtocol,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_budget_ms: 50,
            poll_queue_threshold: DEFAULT_QUEUE_THRESHOLD,
            queue_capacity: None,
            adaptive_timing: 2,
            adapter_timeout: 0x0A,
            protocol: ObdProtocol::Auto,
        }
    }
}

impl ClientConfig {
    pub fn command_budget(&self) -> Duration {
        Duration::from_millis(self.command_budget_ms)
    }

    pub fn init_sequence(&self) -> Vec<String> {
        protocol::init_sequence(self.adaptive_timing, self.adapter_timeout, self.protocol)
    }
}
