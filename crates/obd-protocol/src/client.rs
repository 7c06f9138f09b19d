//! OBD-II Client for ELM327 Adapters
//!
//! [`ObdClient`] is the connection controller. It is a plain state machine
//! driven from a single event loop: the owner of the transport calls
//! `handle_ready`, `handle_data` and `handle_closed`, a poll timer calls
//! `tick`, and callers enqueue requests. Nothing here blocks.
//!
//! The adapter answers strictly one request at a time and replies carry no
//! request identifier, so a reply is paired with the in-flight command
//! purely by arrival order. Keeping at most one command in flight is what
//! makes that pairing correct.

use crate::config::ClientConfig;
use crate::decoder::{DecodedReply, Reply, ReplyDecoder};
use crate::dtc::DtcReport;
use crate::error::ObdError;
use crate::framing::{Exchange, FrameAssembler, LINE_TERMINATOR};
use crate::poller::PollScheduler;
use crate::queue::{Command, CommandQueue};
use crate::transport::Transport;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Link state of the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Initializing,
    Connected,
}

/// Events produced for the surrounding application
#[derive(Debug, Clone, PartialEq)]
pub enum ObdEvent {
    /// Adapter initialized; pollers can be registered
    Connected,
    /// A decoded parameter value
    Telemetry(DecodedReply),
    /// Stored trouble codes known to the DTC table
    TroubleCodes(DtcReport),
    /// A write failed; pollers were stopped
    LinkError(String),
    /// Link is down, either closed by the transport or by `disconnect`
    Disconnected { cause: Option<String> },
}

/// Connection controller for one adapter
pub struct ObdClient<T: Transport> {
    transport: T,
    config: ClientConfig,
    state: ConnectionState,
    queue: CommandQueue,
    pollers: PollScheduler,
    assembler: FrameAssembler,
    decoder: ReplyDecoder,
    awaiting_reply: bool,
    poll_interval: Option<Duration>,
    events: Vec<ObdEvent>,
}

impl<T: Transport> ObdClient<T> {
    /// Create a client with the standard PID and DTC tables
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self::with_decoder(transport, config, ReplyDecoder::default())
    }

    pub fn with_decoder(transport: T, config: ClientConfig, decoder: ReplyDecoder) -> Self {
        let queue = match config.queue_capacity {
            Some(capacity) => CommandQueue::with_capacity(capacity),
            None => CommandQueue::new(),
        };
        let pollers = PollScheduler::new(config.poll_queue_threshold);

        Self {
            transport,
            config,
            state: ConnectionState::Disconnected,
            queue,
            pollers,
            assembler: FrameAssembler::new(),
            decoder,
            awaiting_reply: false,
            poll_interval: None,
            events: Vec::new(),
        }
    }

    /// Open the transport. The link comes up on [`handle_ready`](Self::handle_ready).
    pub fn connect(&mut self) -> Result<(), ObdError> {
        info!("Opening OBD transport");
        self.transport.open()
    }

    /// Transport reports ready: queue adapter setup and start draining
    pub fn handle_ready(&mut self) {
        info!("Transport ready, initializing adapter");
        self.state = ConnectionState::Initializing;
        self.assembler.reset();

        for payload in self.config.init_sequence() {
            self.push(Command::new(payload, 0, false));
        }

        self.state = ConnectionState::Connected;
        self.events.push(ObdEvent::Connected);
        self.process_queue();
    }

    /// Inbound bytes from the transport
    pub fn handle_data(&mut self, bytes: &[u8]) {
        if self.state == ConnectionState::Disconnected {
            debug!("Dropping {} bytes received while disconnected", bytes.len());
            return;
        }

        for exchange in self.assembler.ingest(bytes) {
            self.handle_exchange(exchange);
        }
    }

    /// Transport closed or failed
    pub fn handle_closed(&mut self, cause: Option<String>) {
        match &cause {
            Some(cause) => warn!("OBD transport closed: {}", cause),
            None => info!("OBD transport closed"),
        }
        self.reset();
        self.events.push(ObdEvent::Disconnected { cause });
    }

    /// A write the transport accepted earlier failed later on
    pub fn handle_write_failure(&mut self, err: ObdError) {
        error!("Error while writing: {}", err);
        warn!("OBD pollers deactivated, connection is probably lost");
        self.pollers.clear();
        self.awaiting_reply = false;
        self.events.push(ObdEvent::LinkError(err.to_string()));
    }

    /// Stop polling, drop pending commands and close the transport
    pub fn disconnect(&mut self) {
        info!("Disconnecting OBD client");
        self.reset();
        self.transport.close();
        self.events.push(ObdEvent::Disconnected { cause: None });
    }

    /// Queue a raw request. Rejected unless the link is up.
    pub fn write(
        &mut self,
        payload: &str,
        expected_replies: u32,
        priority: bool,
    ) -> Result<(), ObdError> {
        if self.state != ConnectionState::Connected {
            warn!("OBD adapter is not connected, dropping {}", payload);
            return Err(ObdError::NotConnected);
        }

        let command = Command::new(payload, expected_replies, priority);
        debug!("queue {}", command.wire_text());
        self.queue.enqueue(command)?;
        self.process_queue();
        Ok(())
    }

    /// Queue the request for a registry parameter by name
    pub fn request_value_by_name(
        &mut self,
        name: &str,
        expected_replies: u32,
        priority: bool,
    ) -> Result<(), ObdError> {
        let payload = self
            .decoder
            .registry()
            .by_name(name)
            .ok_or_else(|| ObdError::UnknownPid(name.to_string()))?
            .request_payload();
        self.write(&payload, expected_replies, priority)
    }

    pub fn add_poller(&mut self, name: &str) -> Result<(), ObdError> {
        self.pollers.add(self.decoder.registry(), name)
    }

    pub fn remove_poller(&mut self, name: &str) -> bool {
        self.pollers.remove(name)
    }

    pub fn remove_all_pollers(&mut self) {
        self.pollers.clear();
    }

    /// Enable polling and return the cadence the timer should use.
    ///
    /// Without an explicit interval the cadence is long enough to drain one
    /// full round of pollers.
    pub fn start_polling(&mut self, interval: Option<Duration>) -> Duration {
        let interval = interval.unwrap_or_else(|| {
            self.pollers
                .default_interval(self.config.command_budget())
        });
        info!(
            "Polling {} PIDs every {:?}",
            self.pollers.len(),
            interval
        );
        self.poll_interval = Some(interval);
        interval
    }

    pub fn stop_polling(&mut self) {
        if self.poll_interval.take().is_some() {
            info!("Polling stopped");
        }
    }

    /// One poll timer period elapsed
    pub fn tick(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let added = self.pollers.tick(&mut self.queue);
        if added > 0 {
            debug!("poll tick queued {} commands", added);
            self.process_queue();
        }
    }

    /// Take the events produced since the last call
    pub fn drain_events(&mut self) -> Vec<ObdEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval
    }

    pub fn active_pollers(&self) -> impl Iterator<Item = &str> {
        self.pollers.active()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn handle_exchange(&mut self, exchange: Exchange) {
        for line in &exchange.lines {
            debug!("in    {}", line);
            match self.decoder.decode(line) {
                Reply::Telemetry(decoded) => self.events.push(ObdEvent::Telemetry(decoded)),
                Reply::Diagnostic(report) => self.events.push(ObdEvent::TroubleCodes(report)),
                Reply::Status(status) => debug!("status {}", status),
                Reply::Unrecognized => {}
            }
        }

        // One exchange answers at most one command
        if self.awaiting_reply {
            self.awaiting_reply = false;
            self.process_queue();
        }
    }

    fn process_queue(&mut self) {
        if self.awaiting_reply {
            debug!("drain deferred: awaiting reply");
            return;
        }
        if self.state != ConnectionState::Connected {
            return;
        }
        let Some(command) = self.queue.dequeue_next() else {
            return;
        };

        let wire = command.wire_text();
        debug!("out   {}", wire);
        self.awaiting_reply = true;

        let mut bytes = wire.into_bytes();
        bytes.push(LINE_TERMINATOR);
        if let Err(e) = self.transport.write(&bytes) {
            self.handle_write_failure(e);
        }
    }

    /// Only used internally for setup commands, which bypass the link check
    fn push(&mut self, command: Command) {
        debug!("queue {}", command.wire_text());
        if let Err(e) = self.queue.enqueue(command) {
            warn!("Setup command dropped: {}", e);
        }
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.poll_interval = None;
        self.queue.clear();
        self.pollers.clear();
        self.assembler.reset();
        self.awaiting_reply = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtc::DtcTable;
    use crate::pid::{PidRegistry, Value};
    use crate::transport::MockTransport;

    const INIT: [&str; 7] = [
        "ATE0\r", "ATL0\r", "ATS0\r", "ATH0\r", "ATAT2\r", "ATST0A\r", "ATSP0\r",
    ];

    fn client() -> ObdClient<MockTransport> {
        ObdClient::new(MockTransport::new(), ClientConfig::default())
    }

    /// Client past the init sequence with nothing in flight
    fn connected_client() -> ObdClient<MockTransport> {
        let mut client = client();
        client.connect().unwrap();
        client.handle_ready();
        for _ in INIT {
            client.handle_data(b"OK\r\r>");
        }
        client.transport_mut().take_written();
        client.drain_events();
        assert!(!client.is_awaiting_reply());
        client
    }

    #[test]
    fn test_initial_state() {
        let client = client();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_awaiting_reply());
    }

    #[test]
    fn test_ready_runs_init_sequence_one_at_a_time() {
        let mut client = client();
        client.connect().unwrap();
        client.handle_ready();

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.drain_events(), vec![ObdEvent::Connected]);
        assert_eq!(client.transport_mut().take_written(), vec!["ATE0\r"]);

        let mut sent = vec!["ATE0\r".to_string()];
        for _ in 1..INIT.len() {
            client.handle_data(b"OK\r\r>");
            sent.extend(client.transport_mut().take_written());
        }
        assert_eq!(sent, INIT);
    }

    #[test]
    fn test_connect_failure_leaves_state() {
        let mut transport = MockTransport::new();
        transport.fail_open = true;
        let mut client = ObdClient::new(transport, ClientConfig::default());
        assert!(matches!(client.connect(), Err(ObdError::SerialError(_))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_request_decodes_reply() {
        let mut client = connected_client();
        client.request_value_by_name("rpm", 0, false).unwrap();
        assert_eq!(client.transport_mut().take_written(), vec!["010C\r"]);

        client.handle_data(b"410C1AF8\r\r>");
        let events = client.drain_events();
        assert_eq!(events.len(), 1);
        let ObdEvent::Telemetry(reply) = &events[0] else {
            panic!("expected telemetry, got {events:?}");
        };
        assert_eq!(reply.name, "rpm");
        assert_eq!(reply.value, Value::Number(1726.0));
        assert!(!client.is_awaiting_reply());
    }

    #[test]
    fn test_only_one_command_in_flight() {
        let mut client = connected_client();
        client.request_value_by_name("rpm", 1, false).unwrap();
        client.request_value_by_name("vss", 1, false).unwrap();
        client.request_value_by_name("temp", 1, false).unwrap();

        assert_eq!(client.transport_mut().take_written(), vec!["010C1\r"]);
        assert_eq!(client.queue_len(), 2);

        client.handle_data(b"410C1AF8\r\r>");
        assert_eq!(client.transport_mut().take_written(), vec!["010D1\r"]);
        client.handle_data(b"410D32\r\r>");
        assert_eq!(client.transport_mut().take_written(), vec!["01051\r"]);
        client.handle_data(b"41057B\r\r>");
        assert!(client.transport_mut().take_written().is_empty());
        assert!(!client.is_awaiting_reply());
    }

    #[test]
    fn test_partial_reply_keeps_command_in_flight() {
        let mut client = connected_client();
        client.request_value_by_name("rpm", 0, false).unwrap();
        client.request_value_by_name("vss", 0, false).unwrap();
        client.transport_mut().take_written();

        client.handle_data(b"410C1A");
        assert!(client.is_awaiting_reply());
        assert!(client.transport_mut().take_written().is_empty());

        client.handle_data(b"F8\r\r>");
        assert_eq!(client.transport_mut().take_written(), vec!["010D\r"]);
    }

    #[test]
    fn test_multi_line_exchange_releases_once() {
        let mut client = connected_client();
        client.request_value_by_name("rpm", 0, false).unwrap();
        client.request_value_by_name("vss", 0, false).unwrap();
        client.request_value_by_name("temp", 0, false).unwrap();
        client.transport_mut().take_written();

        client.handle_data(b"SEARCHING...\r410C1AF8\r\r>");
        assert_eq!(client.transport_mut().take_written(), vec!["010D\r"]);
        assert_eq!(client.queue_len(), 1);
    }

    #[test]
    fn test_priority_request_jumps_the_queue() {
        let mut client = connected_client();
        client.request_value_by_name("rpm", 0, false).unwrap();
        client.request_value_by_name("vss", 0, false).unwrap();
        client.request_value_by_name("requestdtc", 0, true).unwrap();
        client.request_value_by_name("cleardtc", 0, true).unwrap();

        let mut sent = client.transport_mut().take_written();
        for _ in 0..3 {
            client.handle_data(b"NO DATA\r\r>");
            sent.extend(client.transport_mut().take_written());
        }
        assert_eq!(sent, vec!["010C\r", "03\r", "04\r", "010D\r"]);
    }

    #[test]
    fn test_trouble_code_event_only_for_known_codes() {
        let decoder = ReplyDecoder::new(
            PidRegistry::standard(),
            DtcTable::new([("P0100", "Mass air flow sensor circuit")]),
        );
        let mut client = ObdClient::with_decoder(MockTransport::new(), ClientConfig::default(), decoder);
        client.connect().unwrap();
        client.handle_ready();
        client.drain_events();

        client.handle_data(b"43010009990000\r\r>");
        let events = client.drain_events();
        assert_eq!(events.len(), 1);
        let ObdEvent::TroubleCodes(report) = &events[0] else {
            panic!("expected trouble codes, got {events:?}");
        };
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, "P0100");

        client.handle_data(b"43099900000000\r\r>");
        assert!(client.drain_events().is_empty());
    }

    #[test]
    fn test_status_and_unknown_replies_emit_nothing() {
        let mut client = connected_client();
        client.handle_data(b"NO DATA\r\r>41EE00\r\r>");
        assert!(client.drain_events().is_empty());
    }

    #[test]
    fn test_write_rejected_when_not_connected() {
        let mut client = client();
        assert!(matches!(
            client.request_value_by_name("rpm", 0, false),
            Err(ObdError::NotConnected)
        ));
        assert_eq!(client.queue_len(), 0);
        assert!(client.transport().written.is_empty());
    }

    #[test]
    fn test_unknown_name_rejected() {
        let mut client = connected_client();
        assert!(matches!(
            client.request_value_by_name("flux", 0, false),
            Err(ObdError::UnknownPid(_))
        ));
        assert!(matches!(client.add_poller("flux"), Err(ObdError::UnknownPid(_))));
    }

    #[test]
    fn test_write_failure_clears_pollers() {
        let mut client = connected_client();
        client.add_poller("rpm").unwrap();
        client.add_poller("vss").unwrap();
        client.transport_mut().fail_writes = true;

        client.request_value_by_name("temp", 0, false).unwrap();
        assert_eq!(client.active_pollers().count(), 0);
        assert!(!client.is_awaiting_reply());
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(matches!(
            client.drain_events().as_slice(),
            [ObdEvent::LinkError(_)]
        ));

        client.handle_closed(Some("port vanished".into()));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(
            client.drain_events(),
            vec![ObdEvent::Disconnected {
                cause: Some("port vanished".into())
            }]
        );
    }

    #[test]
    fn test_tick_polls_active_pids() {
        let mut client = connected_client();
        client.add_poller("rpm").unwrap();
        client.add_poller("vss").unwrap();
        client.start_polling(None);

        client.tick();
        assert_eq!(client.transport_mut().take_written(), vec!["010C1\r"]);
        assert_eq!(client.queue_len(), 1);

        client.handle_data(b"410C1AF8\r\r>");
        assert_eq!(client.transport_mut().take_written(), vec!["010D1\r"]);
    }

    #[test]
    fn test_start_polling_default_interval() {
        let mut client = connected_client();
        client.add_poller("rpm").unwrap();
        client.add_poller("vss").unwrap();
        assert_eq!(client.start_polling(None), Duration::from_millis(200));
        assert_eq!(
            client.start_polling(Some(Duration::from_millis(10))),
            Duration::from_millis(10)
        );
        client.stop_polling();
        assert_eq!(client.poll_interval(), None);
    }

    #[test]
    fn test_disconnect_then_tick_is_silent() {
        let mut client = connected_client();
        client.add_poller("rpm").unwrap();
        client.start_polling(None);
        client.request_value_by_name("vss", 0, false).unwrap();
        client.request_value_by_name("temp", 0, false).unwrap();
        client.transport_mut().take_written();

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.queue_len(), 0);
        assert_eq!(client.poll_interval(), None);
        assert_eq!(client.active_pollers().count(), 0);
        assert!(!client.transport().open);

        client.tick();
        assert!(client.transport().written.is_empty());
        assert_eq!(client.queue_len(), 0);

        // The reply to the command already on the wire is ignored
        client.handle_data(b"410D32\r\r>");
        assert_eq!(
            client.drain_events(),
            vec![ObdEvent::Disconnected { cause: None }]
        );
    }

    #[test]
    fn test_reconnect_after_close() {
        let mut client = connected_client();
        client.handle_data(b"410C");
        client.handle_closed(None);
        client.drain_events();

        client.connect().unwrap();
        client.handle_ready();
        assert_eq!(client.transport_mut().take_written(), vec!["ATE0\r"]);
        client.handle_data(b"OK\r\r>");
        assert_eq!(client.transport_mut().take_written(), vec!["ATL0\r"]);
    }
}
