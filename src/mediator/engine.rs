//! The connection mediator.
//!
//! # Responsibilities
//! - Own the `ConnectionState` of every live connection
//! - Drive the upgrade: assemble, select version, handshake, route, negotiate
//! - Forward decoded messages to the owning handler
//! - Fan out close and error events through the configured policy
//!
//! # Design Decisions
//! - Synchronous: every event is handled to completion on the calling task;
//!   the only suspension points are the transport reads and writes
//!   performed by the driver in `net::server`
//! - Per-connection state sits behind its own mutex, cloned out of the
//!   `DashMap` so no shard lock is held across handler callbacks
//! - State transitions and decoding happen under that mutex; handler
//!   callbacks run after it is released, so a handler may query the
//!   mediator about its own connection
//! - A panicking callback closes its connection and never unwinds into the
//!   transport task
//! - Failures never touch other connections or the shared directories
//!
//! # Data Flow
//! ```text
//! data(conn, bytes)
//!     [locked]   Connecting  → assembler → Complete → versions.select
//!                            → codec.handshake → directory.locate
//!                            → negotiator → 101 → registry.insert
//!                Established → codec.decode → Delivery
//!     [unlocked] Delivery → on_open → on_message* → on_error fan-out
//!
//! close(conn) → registry.remove → policy targets → on_close
//! error(conn) → policy targets → on_error
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;

use crate::app::Handler;
use crate::http::response::{BAD_REQUEST, PAYLOAD_TOO_LARGE, X_POWERED_BY};
use crate::http::{Assembly, HandshakeResponse, ParsedRequest, DEFAULT_MAX_REQUEST_BYTES};
use crate::mediator::error::MediatorError;
use crate::mediator::fanout::FanoutPolicy;
use crate::mediator::registry::{ConnectionRegistry, Upgraded};
use crate::mediator::state::{ConnectionState, Phase};
use crate::net::{Connection, ConnectionError, ConnectionId, WsConnection};
use crate::observability::metrics;
use crate::protocol::{
    close_code, CloseFrame, Decoded, FrameError, HandshakeError, Message, VersionCodec,
    VersionRegistry,
};
use crate::routing::{ApplicationDirectory, SubProtocolNegotiator};

/// Tunables for the mediator.
#[derive(Debug, Clone)]
pub struct MediatorSettings {
    /// Header buffer limit for the upgrade request.
    pub max_request_bytes: usize,
    /// Value of the server identification header.
    pub server_name: String,
    /// Scope of close and error fan-out.
    pub fanout: FanoutPolicy,
}

impl Default for MediatorSettings {
    fn default() -> Self {
        Self {
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            server_name: concat!("websocket-mediator/", env!("CARGO_PKG_VERSION")).to_string(),
            fanout: FanoutPolicy::default(),
        }
    }
}

type SharedState = Arc<Mutex<ConnectionState>>;

/// Handler work produced under the state lock, run once it is released.
struct Delivery {
    conn: WsConnection,
    handler: Arc<dyn Handler>,
    open: bool,
    messages: Vec<Message>,
    failure: Option<FrameError>,
}

impl Delivery {
    fn new(conn: WsConnection, handler: Arc<dyn Handler>) -> Self {
        Self {
            conn,
            handler,
            open: false,
            messages: Vec::new(),
            failure: None,
        }
    }
}

pub struct ConnectionMediator {
    directory: Arc<ApplicationDirectory>,
    versions: Arc<VersionRegistry>,
    negotiator: SubProtocolNegotiator,
    registry: ConnectionRegistry,
    states: DashMap<ConnectionId, SharedState>,
    settings: MediatorSettings,
}

impl ConnectionMediator {
    pub fn new(
        directory: Arc<ApplicationDirectory>,
        versions: Arc<VersionRegistry>,
        settings: MediatorSettings,
    ) -> Self {
        Self {
            directory,
            versions,
            negotiator: SubProtocolNegotiator::new(),
            registry: ConnectionRegistry::new(),
            states: DashMap::new(),
            settings,
        }
    }

    pub fn directory(&self) -> &ApplicationDirectory {
        &self.directory
    }

    pub fn versions(&self) -> &VersionRegistry {
        &self.versions
    }

    /// Established connections.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &MediatorSettings {
        &self.settings
    }

    /// Current phase, or `None` once the transport close was processed.
    pub fn phase(&self, id: ConnectionId) -> Option<Phase> {
        self.state(id).map(|state| lock(&state).phase())
    }

    /// Number of connections with state, established or not.
    pub fn live_connections(&self) -> usize {
        self.states.len()
    }

    /// Transport accepted a connection.
    pub fn open(&self, conn: &Connection) {
        let state = Arc::new(Mutex::new(ConnectionState::new(self.settings.max_request_bytes)));
        self.states.insert(conn.id(), state);
        metrics::record_connection_accepted();
        tracing::debug!(
            connection_id = %conn.id(),
            peer_addr = ?conn.peer_addr(),
            "Connection opened"
        );
    }

    /// Bytes arrived, in order.
    ///
    /// `Err` describes why the connection left the happy path; only
    /// `IncompleteHandshake` leaves it open.
    pub fn data(&self, conn: &Connection, bytes: &[u8]) -> Result<(), MediatorError> {
        let Some(shared) = self.state(conn.id()) else {
            tracing::trace!(connection_id = %conn.id(), len = bytes.len(), "Bytes for unknown connection");
            return Ok(());
        };
        let delivery = {
            let mut state = lock(&shared);
            match state.phase() {
                Phase::Connecting => self.handshake_bytes(conn, &mut state, bytes)?,
                Phase::Established => self.frame_bytes(&mut state, bytes),
                Phase::Handshaking | Phase::Closed => None,
            }
        };
        match delivery {
            Some(delivery) => self.deliver(delivery),
            None => Ok(()),
        }
    }

    /// Transport closed. Safe to call more than once.
    pub fn close(&self, conn: &Connection) {
        if let Some((_, state)) = self.states.remove(&conn.id()) {
            lock(&state).close();
        }
        let Some(upgraded) = self.registry.remove(conn.id()) else {
            tracing::debug!(connection_id = %conn.id(), "Connection closed before establishment");
            return;
        };
        metrics::record_deregistered();
        tracing::debug!(
            connection_id = %conn.id(),
            application = %upgraded.connection.request().application_name(),
            "Connection closed"
        );
        for handler in self.settings.fanout.targets(&self.directory, &upgraded.handler) {
            self.invoke(&upgraded.connection, "on_close", || handler.on_close(&upgraded.connection));
        }
    }

    /// Transport failed.
    pub fn error(&self, conn: &Connection, cause: &ConnectionError) {
        let established = self
            .state(conn.id())
            .is_some_and(|state| lock(&state).phase() == Phase::Established);
        match self.registry.get(conn.id()) {
            Some(upgraded) if established => {
                tracing::warn!(connection_id = %conn.id(), error = %cause, "Transport error");
                self.fan_out_error(&upgraded.connection, &upgraded.handler, cause);
            }
            _ => {
                tracing::debug!(connection_id = %conn.id(), error = %cause, "Transport error before establishment");
                conn.close();
            }
        }
    }

    /// Server is stopping: say goodbye to established peers and close.
    pub fn going_away(&self, conn: &Connection) {
        if let Some(upgraded) = self.registry.get(conn.id()) {
            let farewell = CloseFrame::new(close_code::GOING_AWAY, "server shutting down");
            let _ = upgraded.connection.send(&Message::Close(Some(farewell)));
        }
        conn.close();
    }

    fn state(&self, id: ConnectionId) -> Option<SharedState> {
        self.states.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn handshake_bytes(
        &self,
        conn: &Connection,
        state: &mut ConnectionState,
        bytes: &[u8],
    ) -> Result<Option<Delivery>, MediatorError> {
        let request = match state.assembler.feed(bytes) {
            Assembly::Incomplete => return Ok(None),
            Assembly::Complete(request) => request,
            Assembly::Overflow => {
                let err = MediatorError::BufferOverflow {
                    limit: self.settings.max_request_bytes,
                };
                self.reject(conn, state, PAYLOAD_TOO_LARGE, &err);
                return Err(err);
            }
            Assembly::Invalid => {
                let err = MediatorError::MalformedRequest;
                self.reject(conn, state, BAD_REQUEST, &err);
                return Err(err);
            }
        };

        let Some(codec) = self.versions.select(&request) else {
            let err = MediatorError::UnsupportedVersion(request.header("sec-websocket-version").map(str::to_string));
            self.reject(conn, state, BAD_REQUEST, &err);
            return Err(err);
        };

        let attempt = codec.handshake(&request);
        tracing::debug!(
            connection_id = %conn.id(),
            version = codec.id(),
            target = request.target(),
            "Handshaking"
        );
        state.begin_handshake(request, Arc::clone(&codec));

        let mut response = match attempt {
            Ok(response) => response,
            Err(HandshakeError::Incomplete(reason)) => {
                state.abandon_handshake();
                tracing::debug!(connection_id = %conn.id(), reason, "Incomplete handshake, waiting for more bytes");
                metrics::record_handshake(MediatorError::IncompleteHandshake(reason).outcome());
                return Err(MediatorError::IncompleteHandshake(reason));
            }
        };
        response.set_header(X_POWERED_BY, &self.settings.server_name);

        if !response.is_switching_protocols() {
            let err = MediatorError::HandshakeRejected {
                status: response.status(),
            };
            response.set_header("Sec-WebSocket-Version", self.versions.supported_versions());
            self.send_response(conn, &response);
            self.terminate(conn, state, &err);
            return Err(err);
        }

        let Some(request) = state.take_request() else {
            return Ok(None);
        };
        self.upgrade(conn, state, request, codec, response).map(Some)
    }

    fn upgrade(
        &self,
        conn: &Connection,
        state: &mut ConnectionState,
        request: ParsedRequest,
        codec: Arc<dyn VersionCodec>,
        mut response: HandshakeResponse,
    ) -> Result<Delivery, MediatorError> {
        let route = match self.directory.locate(request.host(), request.path()) {
            Ok(route) => route,
            Err(route_err) => {
                let err = MediatorError::from(route_err);
                // The upgrade itself is valid, so it completes before the close.
                self.send_response(conn, &response);
                let close = Message::Close(Some(CloseFrame::new(close_code::POLICY_VIOLATION, err.outcome())));
                let _ = conn.send_raw(codec.encode(&close));
                self.terminate(conn, state, &err);
                return Err(err);
            }
        };

        let resolution = route.resolution;
        let agreed = self.negotiator.negotiate(
            &self.directory,
            resolution.application.name(),
            &resolution.handler_path,
            &request.requested_sub_protocols(),
        );
        if !agreed.is_empty() {
            response.set_header("Sec-WebSocket-Protocol", agreed.join(","));
        }
        self.send_response(conn, &response);

        let early = state.assembler.finish();
        let routed = request.into_routed(
            resolution.application.name(),
            resolution.context_path,
            resolution.handler_path,
        );
        let upgraded = WsConnection::new(conn.clone(), Arc::clone(&codec), Arc::new(routed));
        state.establish(Arc::clone(&route.handler), upgraded.clone());
        let inserted = self.registry.insert(Upgraded {
            connection: upgraded.clone(),
            handler: Arc::clone(&route.handler),
            sub_protocols: agreed,
        });
        if inserted {
            metrics::record_established();
        }
        metrics::record_handshake("established");
        tracing::info!(
            connection_id = %conn.id(),
            application = %upgraded.request().application_name(),
            handler_path = %upgraded.request().handler_path(),
            version = upgraded.version(),
            "Connection established"
        );

        let mut delivery = Delivery::new(upgraded, route.handler);
        delivery.open = true;
        if !early.is_empty() {
            decode_into(codec.as_ref(), state, &early, &mut delivery);
        }
        Ok(delivery)
    }

    fn frame_bytes(&self, state: &mut ConnectionState, bytes: &[u8]) -> Option<Delivery> {
        let (Some(codec), Some(handler), Some(conn)) = (
            state.version().cloned(),
            state.handler().cloned(),
            state.upgraded().cloned(),
        ) else {
            return None;
        };
        let mut delivery = Delivery::new(conn, handler);
        decode_into(codec.as_ref(), state, bytes, &mut delivery);
        Some(delivery)
    }

    /// Run the callbacks gathered for one delivery, in order.
    fn deliver(&self, delivery: Delivery) -> Result<(), MediatorError> {
        let Delivery {
            conn,
            handler,
            open,
            messages,
            failure,
        } = delivery;

        if open && !self.invoke(&conn, "on_open", || handler.on_open(&conn)) {
            return Err(MediatorError::HandlerPanicked { callback: "on_open" });
        }
        for message in messages {
            if conn.is_closing() {
                return Ok(());
            }
            if !self.dispatch(&conn, &handler, message) {
                return Err(MediatorError::HandlerPanicked { callback: "on_message" });
            }
        }
        match failure {
            Some(frame_err) if !conn.is_closing() => {
                self.frame_failure(&conn, &handler, &frame_err);
                Err(MediatorError::FrameDecode(frame_err))
            }
            _ => Ok(()),
        }
    }

    /// Returns false if the handler panicked.
    fn dispatch(&self, conn: &WsConnection, handler: &Arc<dyn Handler>, message: Message) -> bool {
        match message {
            Message::Text(_) | Message::Binary(_) => {
                tracing::trace!(connection_id = %conn.id(), "Message received");
                metrics::record_message_received();
                return self.invoke(conn, "on_message", || handler.on_message(conn, message));
            }
            Message::Ping(payload) => {
                let _ = conn.send(&Message::Pong(payload));
            }
            Message::Pong(_) => {}
            Message::Close(frame) => {
                tracing::debug!(connection_id = %conn.id(), code = ?frame.as_ref().map(|f| f.code), "Peer closed");
                let reply = frame.map(|f| CloseFrame::new(f.code, ""));
                let _ = conn.send(&Message::Close(reply));
                conn.close();
            }
        }
        true
    }

    fn frame_failure(&self, conn: &WsConnection, owner: &Arc<dyn Handler>, frame_err: &FrameError) {
        tracing::warn!(connection_id = %conn.id(), error = %frame_err, "Frame decode failed");
        metrics::record_frame_error();
        self.fan_out_error(conn, owner, &ConnectionError::Frame(frame_err.clone()));

        let code = match frame_err {
            FrameError::InvalidUtf8 => close_code::INVALID_PAYLOAD,
            FrameError::FrameTooLarge { .. } | FrameError::MessageTooLarge { .. } => close_code::MESSAGE_TOO_BIG,
            _ => close_code::PROTOCOL_ERROR,
        };
        let _ = conn.send(&Message::Close(Some(CloseFrame::new(code, ""))));
        conn.close();
    }

    fn fan_out_error(&self, conn: &WsConnection, owner: &Arc<dyn Handler>, cause: &ConnectionError) {
        for handler in self.settings.fanout.targets(&self.directory, owner) {
            self.invoke(conn, "on_error", || handler.on_error(conn, cause));
        }
    }

    /// Run one handler callback. A panic is contained here: it is logged,
    /// the connection is closed and `false` is returned.
    fn invoke(&self, conn: &WsConnection, callback: &'static str, call: impl FnOnce()) -> bool {
        if panic::catch_unwind(AssertUnwindSafe(call)).is_ok() {
            return true;
        }
        tracing::error!(connection_id = %conn.id(), callback, "Handler panicked, closing connection");
        metrics::record_handler_panic(callback);
        conn.close();
        false
    }

    /// Send a pre-upgrade failure response and close.
    fn reject(&self, conn: &Connection, state: &mut ConnectionState, status: u16, err: &MediatorError) {
        let response = HandshakeResponse::rejection(
            status,
            &self.versions.supported_versions(),
            &self.settings.server_name,
        );
        self.send_response(conn, &response);
        self.terminate(conn, state, err);
    }

    fn terminate(&self, conn: &Connection, state: &mut ConnectionState, err: &MediatorError) {
        tracing::warn!(connection_id = %conn.id(), outcome = err.outcome(), error = %err, "Handshake failed");
        metrics::record_handshake(err.outcome());
        conn.close();
        state.close();
    }

    fn send_response(&self, conn: &Connection, response: &HandshakeResponse) {
        if let Err(e) = conn.send_raw(response.to_bytes()) {
            tracing::debug!(connection_id = %conn.id(), error = %e, "Response dropped");
        }
    }
}

impl std::fmt::Debug for ConnectionMediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMediator")
            .field("applications", &self.directory.len())
            .field("versions", &self.versions.ids())
            .field("live", &self.states.len())
            .field("established", &self.registry.len())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Decode everything buffered into `delivery`, stopping after a close frame
/// or at the first decode error. A decode error closes the state.
fn decode_into(codec: &dyn VersionCodec, state: &mut ConnectionState, bytes: &[u8], delivery: &mut Delivery) {
    let mut input = bytes;
    loop {
        match codec.decode(input, &mut state.decode) {
            Ok(Decoded::Incomplete) => return,
            Ok(Decoded::Message(message)) => {
                let peer_closed = matches!(message, Message::Close(_));
                delivery.messages.push(message);
                if peer_closed {
                    return;
                }
            }
            Err(frame_err) => {
                state.close();
                delivery.failure = Some(frame_err);
                return;
            }
        }
        input = &[];
    }
}

fn lock(state: &Mutex<ConnectionState>) -> MutexGuard<'_, ConnectionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Application, EchoHandler};
    use crate::net::Outbound;
    use crate::protocol::frame::{encode_client_frame, Opcode};
    use crate::protocol::{FrameLimits, HybiCodec, Utf8Validator};
    use tokio::sync::mpsc::UnboundedReceiver;

    const HANDSHAKE: &str = "GET /echo/ HTTP/1.1\r\nHost: h\r\nUpgrade: websocket\r\n\
        Connection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    fn mediator() -> ConnectionMediator {
        let mut directory = ApplicationDirectory::new();
        directory
            .register(Application::builder("echo").handler("/", EchoHandler::default()).build().unwrap())
            .unwrap();
        let validator = Arc::new(Utf8Validator::default());
        let mut versions = VersionRegistry::new(Arc::clone(&validator));
        versions.enable(Arc::new(HybiCodec::rfc6455(validator, FrameLimits::default())));
        ConnectionMediator::new(Arc::new(directory), Arc::new(versions), MediatorSettings::default())
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(Outbound::Data(bytes)) = rx.try_recv() {
            out.extend_from_slice(&bytes);
        }
        out
    }

    #[test]
    fn handshake_and_echo_with_early_frame() {
        let mediator = mediator();
        let (conn, mut rx) = Connection::new(None);
        mediator.open(&conn);

        let mut wire = HANDSHAKE.as_bytes().to_vec();
        wire.extend_from_slice(&encode_client_frame(true, Opcode::Text, b"early", [9, 8, 7, 6]));
        mediator.data(&conn, &wire).unwrap();

        assert_eq!(mediator.phase(conn.id()), Some(Phase::Established));
        let out = drain(&mut rx);
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 101"));
        assert!(text.contains("X-Powered-By: websocket-mediator/"));
        assert!(out.ends_with(&[0x81, 5, b'e', b'a', b'r', b'l', b'y']));
    }

    #[test]
    fn ping_is_answered_and_close_is_echoed() {
        let mediator = mediator();
        let (conn, mut rx) = Connection::new(None);
        mediator.open(&conn);
        mediator.data(&conn, HANDSHAKE.as_bytes()).unwrap();
        drain(&mut rx);

        mediator.data(&conn, &encode_client_frame(true, Opcode::Ping, b"p", [1, 1, 1, 1])).unwrap();
        assert_eq!(drain(&mut rx), vec![0x8A, 1, b'p']);

        mediator.data(&conn, &encode_client_frame(true, Opcode::Close, &[0x03, 0xE8], [1, 1, 1, 1])).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Outbound::Data(bytes::Bytes::from_static(&[0x88, 2, 0x03, 0xE8])));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);

        mediator.close(&conn);
        assert!(mediator.registry().is_empty());
        assert_eq!(mediator.phase(conn.id()), None);
    }

    #[test]
    fn malformed_request_is_bad_request() {
        let mediator = mediator();
        let (conn, mut rx) = Connection::new(None);
        mediator.open(&conn);
        let err = mediator.data(&conn, b"NOT HTTP AT ALL\r\n\r\n").unwrap_err();
        assert_eq!(err, MediatorError::MalformedRequest);
        assert!(String::from_utf8_lossy(&drain(&mut rx)).starts_with("HTTP/1.1 400"));
        assert!(conn.is_closing());
        assert_eq!(mediator.phase(conn.id()), Some(Phase::Closed));
    }

    #[test]
    fn transport_error_before_establishment_closes_quietly() {
        let mediator = mediator();
        let (conn, mut rx) = Connection::new(None);
        mediator.open(&conn);
        let cause = ConnectionError::Transport(std::io::Error::other("reset"));
        mediator.error(&conn, &cause);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        mediator.close(&conn);
        assert_eq!(mediator.live_connections(), 0);
    }
}
