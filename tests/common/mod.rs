//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use websocket_mediator::app::{Application, ApplicationBuilder, Handler};
use websocket_mediator::lifecycle::Shutdown;
use websocket_mediator::mediator::{ConnectionMediator, FanoutPolicy, MediatorSettings};
use websocket_mediator::net::{ConnectionError, ConnectionId, Listener, WsConnection};
use websocket_mediator::protocol::{Message, VersionRegistry};
use websocket_mediator::routing::ApplicationDirectory;
use websocket_mediator::WebSocketServer;

pub const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub const ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

/// What a handler observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open(ConnectionId),
    Message(ConnectionId, Message),
    Close(ConnectionId),
    Error(ConnectionId),
}

/// Handler that records every callback.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    events: Arc<Mutex<Vec<Event>>>,
    sub_protocols: Vec<String>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sub_protocols(protocols: &[&str]) -> Self {
        Self {
            sub_protocols: protocols.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| matches(e)).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Handler for RecordingHandler {
    fn on_open(&self, conn: &WsConnection) {
        self.push(Event::Open(conn.id()));
    }

    fn on_message(&self, conn: &WsConnection, message: Message) {
        self.push(Event::Message(conn.id(), message));
    }

    fn on_close(&self, conn: &WsConnection) {
        self.push(Event::Close(conn.id()));
    }

    fn on_error(&self, conn: &WsConnection, _cause: &ConnectionError) {
        self.push(Event::Error(conn.id()));
    }

    fn supported_sub_protocols(&self) -> &[String] {
        &self.sub_protocols
    }
}

pub fn app(name: &str) -> ApplicationBuilder {
    Application::builder(name)
}

pub fn directory(applications: Vec<Application>) -> Arc<ApplicationDirectory> {
    let mut directory = ApplicationDirectory::new();
    for application in applications {
        directory.register(application).unwrap();
    }
    Arc::new(directory)
}

pub fn mediator_with(directory: Arc<ApplicationDirectory>, settings: MediatorSettings) -> Arc<ConnectionMediator> {
    let versions = VersionRegistry::from_config(&Default::default(), &Default::default()).unwrap();
    Arc::new(ConnectionMediator::new(directory, Arc::new(versions), settings))
}

pub fn mediator(directory: Arc<ApplicationDirectory>) -> Arc<ConnectionMediator> {
    mediator_with(directory, MediatorSettings::default())
}

pub fn owner_settings() -> MediatorSettings {
    MediatorSettings {
        fanout: FanoutPolicy::Owner,
        ..MediatorSettings::default()
    }
}

/// A server on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub mediator: Arc<ConnectionMediator>,
    pub shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn spawn_server(mediator: Arc<ConnectionMediator>) -> TestServer {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = Listener::from_tcp(tcp, 64).unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = WebSocketServer::new(Arc::clone(&mediator)).with_drain_timeout(Duration::from_millis(200));
    let stop = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, &stop).await;
    });

    TestServer {
        addr,
        mediator,
        shutdown,
    }
}

/// Poll `condition` until it holds or a second passes.
pub async fn wait_for(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn upgrade_request(path: &str, host: &str, version: &str, extra: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: {KEY}\r\nSec-WebSocket-Version: {version}\r\n{extra}\r\n"
    )
}

/// Send raw bytes and read until the peer closes.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

/// Read from `stream` until the end of the HTTP header block.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut byte))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(n, 0, "connection closed before response headers");
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}
