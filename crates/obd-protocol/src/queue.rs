//! Outgoing Command Queue

use crate::error::ObdError;
use std::collections::VecDeque;

/// A request waiting to be written to the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Request text, e.g. "010C" or "ATE0"
    pub payload: String,
    /// Reply count hint appended to the request when nonzero
    pub expected_replies: u32,
    /// Jumps ahead of normal commands
    pub priority: bool,
}

impl Command {
    pub fn new(payload: impl Into<String>, expected_replies: u32, priority: bool) -> Self {
        Self {
            payload: payload.into(),
            expected_replies,
            priority,
        }
    }

    /// Text written to the adapter, without the line terminator.
    ///
    /// ELM327 adapters stop listening after `n` replies when a request ends
    /// with a reply count, e.g. "010C1".
    pub fn wire_text(&self) -> String {
        if self.expected_replies == 0 {
            self.payload.clone()
        } else {
            format!("{}{}", self.payload, self.expected_replies)
        }
    }
}

/// Priority-aware FIFO of pending commands.
///
/// Priority commands are served before normal ones and in the order they
/// were enqueued among themselves.
#[derive(Debug, Default)]
pub struct CommandQueue {
    items: VecDeque<Command>,
    /// Number of priority commands at the head of `items`
    priority_len: usize,
    capacity: Option<usize>,
}

impl CommandQueue {
    /// Unbounded queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue that rejects commands once `capacity` are pending
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            priority_len: 0,
            capacity: Some(capacity),
        }
    }

    pub fn enqueue(&mut self, command: Command) -> Result<(), ObdError> {
        if let Some(capacity) = self.capacity {
            if self.items.len() >= capacity {
                return Err(ObdError::QueueOverflow(self.items.len()));
            }
        }

        if command.priority {
            self.items.insert(self.priority_len, command);
            self.priority_len += 1;
        } else {
            self.items.push_back(command);
        }
        Ok(())
    }

    pub fn dequeue_next(&mut self) -> Option<Command> {
        let command = self.items.pop_front()?;
        self.priority_len = self.priority_len.saturating_sub(1);
        Some(command)
    }

    pub fn has_pending(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every pending command
    pub fn clear(&mut self) {
        self.items.clear();
        self.priority_len = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.items.iter()
    }
}
