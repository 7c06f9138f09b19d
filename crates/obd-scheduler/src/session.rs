//! Session Event Loop
//!
//! One tokio task owns the byte stream, the poll timer and the request
//! channel, and feeds each event to the [`ObdClient`] in turn. Writes the
//! client makes are buffered and flushed to the stream after every step,
//! so the client itself never awaits.

use crate::handle::{ObdHandle, Request};
use obd_protocol::{open_serial, ClientConfig, ObdClient, ObdError, ObdEvent, Transport};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Bytes requested per stream read
const READ_BUFFER_SIZE: usize = 256;

/// Capacity of the request and event channels
const CHANNEL_CAPACITY: usize = 64;

/// Shortest poll period the timer accepts
const MIN_POLL_PERIOD: Duration = Duration::from_millis(1);

/// Longest poll period the timer accepts
const MAX_POLL_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Transport side of a session: buffers writes until the loop flushes them
#[derive(Debug, Default)]
pub struct StreamSink {
    open: bool,
    pending: Vec<Vec<u8>>,
}

impl StreamSink {
    fn take_pending(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.pending)
    }
}

impl Transport for StreamSink {
    fn open(&mut self) -> Result<(), ObdError> {
        self.open = true;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), ObdError> {
        if !self.open {
            return Err(ObdError::WriteFailed("stream is closed".into()));
        }
        self.pending.push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.pending.clear();
    }
}

/// Running connection returned by [`connect`]
pub struct Connection {
    /// Command handle, cloneable
    pub handle: ObdHandle,
    /// Decoded events in arrival order
    pub events: mpsc::Receiver<ObdEvent>,
    /// Session task; resolves once the link is down
    pub task: JoinHandle<Result<(), ObdError>>,
}

/// Start a session over an already open byte stream
pub fn connect<S>(stream: S, config: ClientConfig) -> Connection
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let session = Session::new(stream, config, request_rx, event_tx);
    let task = tokio::spawn(session.run());

    Connection {
        handle: ObdHandle::new(request_tx),
        events: event_rx,
        task,
    }
}

/// Open a serial adapter and start a session on it
pub fn connect_serial(
    device: &str,
    baud_rate: u32,
    config: ClientConfig,
) -> Result<Connection, ObdError> {
    let port = open_serial(device, baud_rate)?;
    Ok(connect(port, config))
}

struct Session<S> {
    client: ObdClient<StreamSink>,
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    requests: mpsc::Receiver<Request>,
    events: mpsc::Sender<ObdEvent>,
    poll_timer: Option<Interval>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn new(
        stream: S,
        config: ClientConfig,
        requests: mpsc::Receiver<Request>,
        events: mpsc::Sender<ObdEvent>,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            client: ObdClient::new(StreamSink::default(), config),
            reader,
            writer,
            requests,
            events,
            poll_timer: None,
        }
    }

    async fn run(mut self) -> Result<(), ObdError> {
        self.client.connect()?;
        // An opened stream is usable right away
        self.client.handle_ready();
        self.flush().await;

        let mut buf = [0u8; READ_BUFFER_SIZE];
        while self.client.is_connected() {
            tokio::select! {
                read = self.reader.read(&mut buf) => match read {
                    Ok(0) => self.client.handle_closed(Some("end of stream".into())),
                    Ok(n) => self.client.handle_data(&buf[..n]),
                    Err(e) => self.client.handle_closed(Some(e.to_string())),
                },
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => {
                        debug!("All handles dropped, closing session");
                        self.client.disconnect();
                    }
                },
                _ = next_tick(&mut self.poll_timer) => self.client.tick(),
            }
            self.flush().await;
        }

        if let Err(e) = self.writer.shutdown().await {
            debug!("Stream shutdown failed: {}", e);
        }
        info!("OBD session ended");
        Ok(())
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::RequestValue {
                name,
                expected_replies,
                priority,
                reply,
            } => {
                let result = self
                    .client
                    .request_value_by_name(&name, expected_replies, priority);
                let _ = reply.send(result);
            }
            Request::Write {
                payload,
                expected_replies,
                priority,
                reply,
            } => {
                let result = self.client.write(&payload, expected_replies, priority);
                let _ = reply.send(result);
            }
            Request::AddPoller { name, reply } => {
                let _ = reply.send(self.client.add_poller(&name));
            }
            Request::RemovePoller { name, reply } => {
                let _ = reply.send(self.client.remove_poller(&name));
            }
            Request::RemoveAllPollers => self.client.remove_all_pollers(),
            Request::StartPolling { interval, reply } => {
                let period = self.client.start_polling(interval);
                let _ = reply.send(period);
            }
            Request::StopPolling => self.client.stop_polling(),
            Request::Disconnect => self.client.disconnect(),
        }
    }

    /// Write what the client queued, re-arm the poll timer, forward events
    async fn flush(&mut self) {
        for bytes in self.client.transport_mut().take_pending() {
            let written = match self.writer.write_all(&bytes).await {
                Ok(()) => self.writer.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                self.client.handle_write_failure(e.into());
            }
        }

        self.sync_poll_timer();

        // Never wait on the consumer; a slow reader loses events instead
        for event in self.client.drain_events() {
            match self.events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    warn!("Event channel full, dropping {:?}", event);
                }
                Err(TrySendError::Closed(_)) => trace!("Event receiver dropped"),
            }
        }
    }

    fn sync_poll_timer(&mut self) {
        match self.client.poll_interval() {
            Some(period) => {
                let period = period.clamp(MIN_POLL_PERIOD, MAX_POLL_PERIOD);
                if self.poll_timer.as_ref().map(Interval::period) != Some(period) {
                    let mut timer = interval_at(Instant::now() + period, period);
                    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.poll_timer = Some(timer);
                }
            }
            None => {
                if self.poll_timer.take().is_some() {
                    debug!("Poll timer stopped");
                }
            }
        }
    }
}

/// Next poll tick, or never when polling is off
async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
