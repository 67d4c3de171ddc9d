#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared utilities for the Kings Gambit client integration tests.
//!
//! Provides a channel-backed [`MockTransport`] driven by a [`MockServer`],
//! a [`RecordingMedia`] backend, and helpers for server JSON frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use kingsgambit_client::game::MoveEngine;
use kingsgambit_client::video::{MediaBackend, MediaCommand, MediaEvent};
use kingsgambit_client::{
    ClientConfig, GambitError, MatchClient, PlayerColor, Router, Session, SessionEvent, Transport,
};
use tokio::sync::mpsc;

/// How long a test waits for a frame or event before failing.
pub const WAIT: Duration = Duration::from_secs(2);

// ── MockTransport ───────────────────────────────────────────────────

/// Transport whose inbound frames are pushed by a [`MockServer`].
///
/// Pushing `None` simulates the server closing the socket. When the server
/// handle is dropped `recv()` hangs, so the loop stays alive until shutdown.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Option<Result<String, GambitError>>>,
    outgoing: mpsc::UnboundedSender<String>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// The test's side of a [`MockTransport`].
pub struct MockServer {
    incoming: mpsc::UnboundedSender<Option<Result<String, GambitError>>>,
    outgoing: mpsc::UnboundedReceiver<String>,
    /// Every frame the client sent, in order.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// Whether `close()` has been called.
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new() -> (Self, MockServer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: in_rx,
            outgoing: out_tx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        let server = MockServer {
            incoming: in_tx,
            outgoing: out_rx,
            sent,
            closed,
        };
        (transport, server)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), GambitError> {
        self.sent.lock().unwrap().push(message.clone());
        let _ = self.outgoing.send(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, GambitError>> {
        match self.incoming.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), GambitError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl MockServer {
    /// Deliver one text frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        self.incoming.send(Some(Ok(frame.into()))).unwrap();
    }

    /// Deliver a receive error.
    pub fn fail(&self, error: GambitError) {
        self.incoming.send(Some(Err(error))).unwrap();
    }

    /// Close the socket from the server side.
    pub fn hang_up(&self) {
        self.incoming.send(None).unwrap();
    }

    /// Wait for the next frame the client sends, parsed as JSON.
    pub async fn next_sent(&mut self) -> serde_json::Value {
        let frame = tokio::time::timeout(WAIT, self.outgoing.recv())
            .await
            .expect("timed out waiting for an outbound frame")
            .expect("transport dropped");
        serde_json::from_str(&frame).expect("outbound frame is JSON")
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

// ── RecordingMedia ──────────────────────────────────────────────────

/// Media backend that records every command and answers the ones a real
/// device would complete on its own.
///
/// `AcquireMedia` yields `MediaReady`, `OpenPeer` yields `PeerOpened` with the
/// configured id, and `Call` yields `CallConnected`.
pub struct RecordingMedia {
    peer_id: String,
    events: Arc<StdMutex<Option<mpsc::UnboundedSender<MediaEvent>>>>,
    commands: Arc<StdMutex<Vec<MediaCommand>>>,
}

/// Test-side view of a [`RecordingMedia`].
#[derive(Clone)]
pub struct MediaRecord {
    events: Arc<StdMutex<Option<mpsc::UnboundedSender<MediaEvent>>>>,
    commands: Arc<StdMutex<Vec<MediaCommand>>>,
}

impl RecordingMedia {
    pub fn new(peer_id: &str) -> (Self, MediaRecord) {
        let events = Arc::new(StdMutex::new(None));
        let commands = Arc::new(StdMutex::new(Vec::new()));
        let media = Self {
            peer_id: peer_id.to_string(),
            events: Arc::clone(&events),
            commands: Arc::clone(&commands),
        };
        (media, MediaRecord { events, commands })
    }

    fn complete(&self, event: MediaEvent) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }
}

impl MediaBackend for RecordingMedia {
    fn attach(&mut self, events: mpsc::UnboundedSender<MediaEvent>) {
        *self.events.lock().unwrap() = Some(events);
    }

    fn execute(&mut self, command: MediaCommand) {
        self.commands.lock().unwrap().push(command.clone());
        match command {
            MediaCommand::AcquireMedia => self.complete(MediaEvent::MediaReady),
            MediaCommand::OpenPeer => self.complete(MediaEvent::PeerOpened {
                peer_id: self.peer_id.clone(),
            }),
            MediaCommand::Call { .. } => self.complete(MediaEvent::CallConnected),
            _ => {}
        }
    }
}

impl MediaRecord {
    pub fn commands(&self) -> Vec<MediaCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Report a completion as if the device produced it.
    pub fn inject(&self, event: MediaEvent) {
        self.events
            .lock()
            .unwrap()
            .as_ref()
            .expect("backend not attached")
            .send(event)
            .unwrap();
    }
}

// ── Client helpers ──────────────────────────────────────────────────

pub fn white_session() -> Session {
    Session::new("room-1", "alice", PlayerColor::White).with_opponent("bob")
}

pub fn black_session() -> Session {
    Session::new("room-1", "bob", PlayerColor::Black).with_opponent("alice")
}

/// Start a client over a fresh mock transport and consume `Connected`.
pub async fn start_client(
    session: Session,
    media: impl MediaBackend,
) -> (MatchClient, mpsc::Receiver<SessionEvent>, MockServer) {
    let (transport, server) = MockTransport::new();
    let router = Router::new(session, MoveEngine::new());
    let (client, mut events) = MatchClient::start(transport, media, router, &ClientConfig::default());
    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    (client, events, server)
}

/// Wait for the next event.
pub async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skip events until `pred` matches, returning the match.
pub async fn wait_for(
    events: &mut mpsc::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

// ── Server frames ───────────────────────────────────────────────────

pub fn move_made_json(from: &str, to: &str) -> String {
    serde_json::json!({ "type": "move_made", "from": from, "to": to }).to_string()
}

pub fn error_json(message: &str) -> String {
    serde_json::json!({ "type": "error", "message": message }).to_string()
}

pub fn chat_json(sender: &str, message: &str) -> String {
    serde_json::json!({ "type": "chat_message", "sender": sender, "message": message }).to_string()
}

pub fn lobby_json(white_ready: bool, black_ready: bool) -> String {
    serde_json::json!({
        "type": "lobby_state_update",
        "whitePlayer": "alice",
        "blackPlayer": "bob",
        "whitePlayerReady": white_ready,
        "blackPlayerReady": black_ready,
    })
    .to_string()
}

pub fn video_signal_json(peer_id: &str, sender: &str) -> String {
    serde_json::json!({ "type": "video_signal", "peerId": peer_id, "sender": sender }).to_string()
}

pub fn game_state_json(position: &str, moves: &[&str]) -> String {
    serde_json::json!({ "type": "game_state_update", "position": position, "moves": moves })
        .to_string()
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
