//! Async handle to a running session

use obd_protocol::ObdError;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Requests forwarded from handles to the session loop
#[derive(Debug)]
pub(crate) enum Request {
    RequestValue {
        name: String,
        expected_replies: u32,
        priority: bool,
        reply: oneshot::Sender<Result<(), ObdError>>,
    },
    Write {
        payload: String,
        expected_replies: u32,
        priority: bool,
        reply: oneshot::Sender<Result<(), ObdError>>,
    },
    AddPoller {
        name: String,
        reply: oneshot::Sender<Result<(), ObdError>>,
    },
    RemovePoller {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    RemoveAllPollers,
    StartPolling {
        interval: Option<Duration>,
        reply: oneshot::Sender<Duration>,
    },
    StopPolling,
    Disconnect,
}

/// Cloneable handle for issuing commands to a session
#[derive(Debug, Clone)]
pub struct ObdHandle {
    tx: mpsc::Sender<Request>,
}

impl ObdHandle {
    pub(crate) fn new(tx: mpsc::Sender<Request>) -> Self {
        Self { tx }
    }

    /// Request a registry parameter once
    pub async fn request_value_by_name(
        &self,
        name: &str,
        expected_replies: u32,
        priority: bool,
    ) -> Result<(), ObdError> {
        self.call(|reply| Request::RequestValue {
            name: name.to_string(),
            expected_replies,
            priority,
            reply,
        })
        .await?
    }

    /// Queue a raw adapter command, e.g. "ATRV"
    pub async fn write(
        &self,
        payload: &str,
        expected_replies: u32,
        priority: bool,
    ) -> Result<(), ObdError> {
        self.call(|reply| Request::Write {
            payload: payload.to_string(),
            expected_replies,
            priority,
            reply,
        })
        .await?
    }

    pub async fn add_poller(&self, name: &str) -> Result<(), ObdError> {
        self.call(|reply| Request::AddPoller {
            name: name.to_string(),
            reply,
        })
        .await?
    }

    pub async fn remove_poller(&self, name: &str) -> Result<bool, ObdError> {
        self.call(|reply| Request::RemovePoller {
            name: name.to_string(),
            reply,
        })
        .await
    }

    pub async fn remove_all_pollers(&self) -> Result<(), ObdError> {
        self.send(Request::RemoveAllPollers).await
    }

    /// Start the poll timer; returns the cadence in effect
    pub async fn start_polling(&self, interval: Option<Duration>) -> Result<Duration, ObdError> {
        self.call(|reply| Request::StartPolling { interval, reply })
            .await
    }

    pub async fn stop_polling(&self) -> Result<(), ObdError> {
        self.send(Request::StopPolling).await
    }

    /// Stop polling, drop queued commands and close the stream
    pub async fn disconnect(&self) -> Result<(), ObdError> {
        self.send(Request::Disconnect).await
    }

    async fn send(&self, request: Request) -> Result<(), ObdError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| ObdError::SessionClosed)
    }

    async fn call<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Request,
    ) -> Result<R, ObdError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| ObdError::SessionClosed)
    }
}
