//! Periodic PID Polling

use crate::error::ObdError;
use crate::pid::PidRegistry;
use crate::queue::{Command, CommandQueue};
use std::time::Duration;
use tracing::{debug, warn};

/// Queue depth at which poll ticks stop adding commands
pub const DEFAULT_QUEUE_THRESHOLD: usize = 100;

/// A parameter scheduled for periodic re-request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poller {
    pub name: String,
    /// Request text resolved when the poller was added
    pub payload: String,
}

/// The set of active pollers and the backlog guard applied on each tick
#[derive(Debug)]
pub struct PollScheduler {
    active: Vec<Poller>,
    queue_threshold: usize,
}

impl PollScheduler {
    pub fn new(queue_threshold: usize) -> Self {
        Self {
            active: Vec::new(),
            queue_threshold,
        }
    }

    /// Start polling `name`. Adding an already active name is a no-op.
    pub fn add(&mut self, registry: &PidRegistry, name: &str) -> Result<(), ObdError> {
        let descriptor = registry
            .by_name(name)
            .ok_or_else(|| ObdError::UnknownPid(name.to_string()))?;

        if self.active.iter().any(|p| p.name == name) {
            debug!("Poller {} already active", name);
            return Ok(());
        }

        self.active.push(Poller {
            name: name.to_string(),
            payload: descriptor.request_payload(),
        });
        debug!("Poller added: {} ({} active)", name, self.active.len());
        Ok(())
    }

    /// Stop polling `name`; returns whether it was active
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.active.len();
        self.active.retain(|p| p.name != name);
        before != self.active.len()
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }

    /// Enqueue one request per active poller, unless the backlog is already
    /// at the threshold. Returns how many commands were added.
    pub fn tick(&self, queue: &mut CommandQueue) -> usize {
        if queue.len() >= self.queue_threshold {
            debug!(
                "Poll tick skipped: {} commands pending (threshold {})",
                queue.len(),
                self.queue_threshold
            );
            return 0;
        }

        let mut added = 0;
        for poller in &self.active {
            match queue.enqueue(Command::new(poller.payload.as_str(), 1, false)) {
                Ok(()) => added += 1,
                Err(e) => {
                    warn!("Poll tick stopped early: {}", e);
                    break;
                }
            }
        }
        added
    }

    /// Time to drain one full poll round: two command budgets per poller,
    /// never shorter than a single budget.
    pub fn default_interval(&self, command_budget: Duration) -> Duration {
        let pollers = u32::try_from(self.active.len()).unwrap_or(u32::MAX);
        let round = command_budget.saturating_mul(2).saturating_mul(pollers);
        round.max(command_budget)
    }

    pub fn active(&self) -> impl Iterator<Item = &str> {
        self.active.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_THRESHOLD)
    }
}
