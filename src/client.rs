//! Async match client.
//!
//! [`MatchClient`] is a thin handle that talks to a background reaction loop
//! over an unbounded command channel. The loop owns the [`Router`] and with it
//! every per-session component; UI commands, inbound frames and media
//! completions are branches of one `tokio::select!`, so reactions never
//! overlap and game state needs no locks.
//!
//! Events go out on a bounded channel returned from [`MatchClient::start`].
//! The latest game and session snapshots are also available on `watch`
//! channels.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = WebSocketTransport::connect_room(&base, RoomKind::Match, &room).await?;
//! let router = Router::new(bootstrap.session(), bootstrap.engine()?);
//! let (client, mut events) =
//!     MatchClient::start(transport, DisabledMedia::default(), router, &ClientConfig::from_env());
//!
//! let san = client.propose_move("e2", "e4", None).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::GameUpdated(snapshot) => println!("{}", snapshot.status_text()),
//!         SessionEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::error::{GambitError, Result};
use crate::event::SessionEvent;
use crate::game::GameSnapshot;
use crate::router::{Reaction, Router};
use crate::session::Session;
use crate::transport::Transport;
use crate::video::{MediaBackend, MediaEvent};

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default timeout for opening the room socket.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Server used when nothing else is configured.
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8000";

/// Environment variable holding the socket base URL.
pub const SERVER_URL_ENV: &str = "KINGSGAMBIT_URL";

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`MatchClient`].
///
/// ```
/// use kingsgambit_client::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("wss://chess.example")
///     .with_event_channel_capacity(0)
///     .with_shutdown_timeout(Duration::from_secs(3));
/// assert_eq!(config.event_channel_capacity, 1);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the room sockets (`ws://` or `wss://`).
    pub server_url: String,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer falls behind, events are dropped with a warning so
    /// the reaction loop never blocks. `Disconnected` is always delivered.
    /// Defaults to **256**; values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`MatchClient::shutdown`] waits for the loop to release media
    /// and close the transport before aborting it. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Deadline for opening the room socket. Defaults to **10 seconds**.
    pub connect_timeout: Duration,
    /// `Cookie` header sent with the socket handshake. The server seats the
    /// player by its session cookie; see `MatchApi::cookie_header`.
    pub cookie: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            cookie: None,
        }
    }

    /// Read `KINGSGAMBIT_URL`, falling back to [`DEFAULT_SERVER_URL`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        match lookup(SERVER_URL_ENV).filter(|url| !url.trim().is_empty()) {
            Some(url) => Self::new(url.trim()),
            None => Self::default(),
        }
    }

    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// A zero timeout aborts the loop immediately on shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// Requests from the handle to the reaction loop.
#[derive(Debug)]
enum Command {
    ProposeMove {
        from: String,
        to: String,
        promotion: Option<String>,
        reply: oneshot::Sender<Result<String>>,
    },
    SendChat(String),
    SendReady,
    StartVideo,
    ToggleAudio,
    ToggleVideo,
}

// ── Client handle ───────────────────────────────────────────────────

/// Handle to a running match session.
///
/// Created via [`MatchClient::start`]. Apart from
/// [`propose_move`](Self::propose_move), which waits for the local verdict,
/// methods return as soon as the command is queued.
pub struct MatchClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    connected: Arc<AtomicBool>,
    game_rx: watch::Receiver<GameSnapshot>,
    session_rx: watch::Receiver<Session>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl MatchClient {
    /// Spawn the reaction loop and return a handle plus event receiver.
    ///
    /// `transport` must already be connected to the room socket. The first
    /// event is always [`SessionEvent::Connected`].
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        transport: impl Transport,
        media: impl MediaBackend,
        router: Router,
        config: &ClientConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // tokio panics on a zero-capacity channel.
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (game_tx, game_rx) = watch::channel(router.game().snapshot());
        let (session_tx, session_rx) = watch::channel(router.session().clone());

        let connected = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(reaction_loop(
            Loop {
                transport,
                media,
                router,
                event_tx,
                connected: Arc::clone(&connected),
                game_tx,
                session_tx,
            },
            cmd_rx,
            shutdown_rx,
        ));

        let client = Self {
            cmd_tx,
            connected,
            game_rx,
            session_rx,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (client, event_rx)
    }

    /// Open the match socket for `router`'s room and start the session.
    #[cfg(feature = "transport-websocket")]
    pub async fn connect_match(
        config: &ClientConfig,
        media: impl MediaBackend,
        router: Router,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        let transport = crate::transports::WebSocketTransport::connect_room_with_timeout(
            &config.server_url,
            crate::transport::RoomKind::Match,
            &router.session().room_id,
            config.cookie.as_deref(),
            config.connect_timeout,
        )
        .await?;
        Ok(Self::start(transport, media, router, config))
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Propose a move in coordinate form (`"e2"`, `"e4"`, optional `"q"`).
    ///
    /// Resolves once the move was validated and applied optimistically,
    /// returning its SAN. The server's verdict arrives later as events.
    ///
    /// # Errors
    ///
    /// [`GambitError::MovePending`], [`GambitError::NotYourTurn`],
    /// [`GambitError::GameOver`], [`GambitError::IllegalMove`], or
    /// [`GambitError::NotConnected`] once the session ended.
    pub async fn propose_move(&self, from: &str, to: &str, promotion: Option<&str>) -> Result<String> {
        let (reply, verdict) = oneshot::channel();
        self.send(Command::ProposeMove {
            from: from.to_string(),
            to: to.to_string(),
            promotion: promotion.map(str::to_string),
            reply,
        })?;
        verdict.await.map_err(|_| GambitError::NotConnected)?
    }

    /// Send a chat line. Blank text is ignored.
    pub fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::SendChat(text.into()))
    }

    /// Mark the local player ready. Only the first call sends anything.
    pub fn send_ready(&self) -> Result<()> {
        self.send(Command::SendReady)
    }

    /// Acquire media and open a peer connection.
    pub fn start_video(&self) -> Result<()> {
        self.send(Command::StartVideo)
    }

    pub fn toggle_audio(&self) -> Result<()> {
        self.send(Command::ToggleAudio)
    }

    pub fn toggle_video(&self) -> Result<()> {
        self.send(Command::ToggleVideo)
    }

    /// Shut down: release media, close the transport, stop the loop.
    ///
    /// The event receiver yields `Disconnected` and then `None`.
    pub async fn shutdown(&mut self) {
        debug!("MatchClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("reaction loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("reaction loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("reaction loop aborted: {join_err}");
                    }
                }
            }
        }

        self.connected.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// `true` until the transport closes or the client shuts down.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Latest game snapshot.
    pub fn game(&self) -> GameSnapshot {
        self.game_rx.borrow().clone()
    }

    /// Latest session snapshot.
    pub fn session(&self) -> Session {
        self.session_rx.borrow().clone()
    }

    /// A receiver notified on every game change.
    pub fn watch_game(&self) -> watch::Receiver<GameSnapshot> {
        self.game_rx.clone()
    }

    fn send(&self, command: Command) -> Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(GambitError::NotConnected);
        }
        self.cmd_tx
            .send(command)
            .map_err(|_| GambitError::NotConnected)
    }
}

impl std::fmt::Debug for MatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchClient")
            .field("connected", &self.is_connected())
            .field("room_id", &self.session_rx.borrow().room_id)
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for MatchClient {
    fn drop(&mut self) {
        // The loop releases media and closes the transport on its own; the
        // task is detached rather than aborted.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.task.take();
    }
}

// ── Reaction loop ───────────────────────────────────────────────────

/// Everything the loop owns.
struct Loop<T, M> {
    transport: T,
    media: M,
    router: Router,
    event_tx: mpsc::Sender<SessionEvent>,
    connected: Arc<AtomicBool>,
    game_tx: watch::Sender<GameSnapshot>,
    session_tx: watch::Sender<Session>,
}

impl<T: Transport, M: MediaBackend> Loop<T, M> {
    /// Carry out a reaction: frames first, then media commands, then events.
    ///
    /// Fails only if a frame could not be sent.
    async fn apply(&mut self, reaction: Reaction) -> Result<()> {
        let mut failure = None;
        for msg in reaction.outbound {
            let kind = msg.kind();
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    debug!(kind, "sending client message");
                    if let Err(e) = self.transport.send(json).await {
                        error!("transport send error: {e}");
                        failure = Some(e);
                        break;
                    }
                }
                Err(e) => error!(kind, "failed to serialize ClientMessage: {e}"),
            }
        }
        for command in reaction.media {
            debug!(?command, "media command");
            self.media.execute(command);
        }
        for event in reaction.events {
            emit_event(&self.event_tx, event);
        }
        self.publish();
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn publish(&self) {
        let snapshot = self.router.game().snapshot();
        self.game_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        let session = self.router.session();
        self.session_tx.send_if_modified(|current| {
            if *current == *session {
                false
            } else {
                *current = session.clone();
                true
            }
        });
    }

    async fn command(&mut self, command: Command) -> Result<()> {
        let reaction = match command {
            Command::ProposeMove {
                from,
                to,
                promotion,
                reply,
            } => {
                let (verdict, reaction) =
                    self.router.propose_move(&from, &to, promotion.as_deref());
                let _ = reply.send(verdict);
                reaction
            }
            Command::SendChat(text) => self.router.send_chat(&text),
            Command::SendReady => self.router.send_ready(),
            Command::StartVideo => self.router.start_video(),
            Command::ToggleAudio => self.router.toggle_audio(),
            Command::ToggleVideo => self.router.toggle_video(),
        };
        self.apply(reaction).await
    }

    /// Unexpected transport loss: release media, then report.
    async fn lost(&mut self, reason: Option<String>) {
        warn!(reason = ?reason, "connection lost");
        let reaction = self.router.on_transport_lost(reason.clone());
        // Nothing outbound on this path, so apply cannot fail.
        let _ = self.apply(reaction).await;
        emit_disconnected(&self.event_tx, &self.connected, reason).await;
    }

    /// Orderly shutdown: close the peer, stop media, close the transport.
    async fn shut_down(&mut self) {
        let reaction = self.router.teardown();
        let _ = self.apply(reaction).await;
        if let Err(e) = self.transport.close().await {
            debug!("transport close failed: {e}");
        }
        emit_disconnected(
            &self.event_tx,
            &self.connected,
            Some("client shut down".into()),
        )
        .await;
    }
}

/// Background loop multiplexing commands, shutdown, media completions and
/// inbound frames.
///
/// Exits when the handle is dropped or shut down, or the transport closes or
/// fails.
async fn reaction_loop<T: Transport, M: MediaBackend>(
    mut state: Loop<T, M>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let (media_tx, mut media_rx) = mpsc::unbounded_channel::<MediaEvent>();
    state.media.attach(media_tx);

    state.router.on_connected();
    state.publish();
    info!(room = %state.router.session().room_id, "match session started");
    emit_event(&state.event_tx, SessionEvent::Connected);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if let Err(e) = state.command(command).await {
                            state.lost(Some(e.to_string())).await;
                            break;
                        }
                    }
                    None => {
                        debug!("command channel closed, shutting down reaction loop");
                        state.shut_down().await;
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                state.shut_down().await;
                break;
            }

            Some(event) = media_rx.recv() => {
                debug!(?event, "media event");
                let reaction = state.router.on_media_event(event);
                if let Err(e) = state.apply(reaction).await {
                    state.lost(Some(e.to_string())).await;
                    break;
                }
            }

            incoming = state.transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        let reaction = state.router.route_text(&text);
                        if let Err(e) = state.apply(reaction).await {
                            state.lost(Some(e.to_string())).await;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        state.lost(Some(e.to_string())).await;
                        break;
                    }
                    None => {
                        debug!("transport closed by server");
                        state.lost(None).await;
                        break;
                    }
                }
            }
        }
    }

    debug!("reaction loop exited");
}

/// Emit an event without blocking. A full channel drops the event with a
/// warning.
fn emit_event(event_tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(event = ?dropped, "event channel full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit [`SessionEvent::Disconnected`], waiting for room if needed: it is
/// always the last event and must not be dropped.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<SessionEvent>,
    connected: &AtomicBool,
    reason: Option<String>,
) {
    connected.store(false, Ordering::Release);
    if event_tx
        .send(SessionEvent::Disconnected { reason })
        .await
        .is_err()
    {
        debug!("event channel closed, receiver dropped");
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::game::MoveEngine;
    use crate::protocol::PlayerColor;
    use crate::video::DisabledMedia;
    use async_trait::async_trait;

    /// Never yields a frame; records nothing.
    struct SilentTransport;

    #[async_trait]
    impl Transport for SilentTransport {
        async fn send(&mut self, _message: String) -> Result<()> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn router() -> Router {
        Router::new(
            Session::new("room-1", "alice", PlayerColor::White).with_opponent("bob"),
            MoveEngine::new(),
        )
    }

    #[test]
    fn config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.cookie.is_none());
    }

    #[test]
    fn config_from_lookup_reads_server_url() {
        let config = ClientConfig::from_lookup(|key| {
            (key == SERVER_URL_ENV).then(|| " wss://chess.example ".to_string())
        });
        assert_eq!(config.server_url, "wss://chess.example");
        let fallback = ClientConfig::from_lookup(|_| Some("   ".into()));
        assert_eq!(fallback.server_url, DEFAULT_SERVER_URL);
    }

    #[tokio::test]
    async fn connected_is_first_event() {
        let (_client, mut events) =
            MatchClient::start(SilentTransport, DisabledMedia::default(), router(), &ClientConfig::default());
        assert_eq!(events.recv().await, Some(SessionEvent::Connected));
    }

    #[tokio::test]
    async fn session_snapshot_is_open_after_start() {
        let (client, mut events) =
            MatchClient::start(SilentTransport, DisabledMedia::default(), router(), &ClientConfig::default());
        events.recv().await;
        assert!(client.session().is_open());
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn commands_after_shutdown_are_refused() {
        let (mut client, _events) =
            MatchClient::start(SilentTransport, DisabledMedia::default(), router(), &ClientConfig::default());
        client.shutdown().await;
        assert!(matches!(client.send_ready(), Err(GambitError::NotConnected)));
        assert!(matches!(
            client.propose_move("e2", "e4", None).await,
            Err(GambitError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn zero_event_channel_capacity_does_not_panic() {
        let config = ClientConfig {
            event_channel_capacity: 0,
            ..ClientConfig::default()
        };
        let (mut client, _events) =
            MatchClient::start(SilentTransport, DisabledMedia::default(), router(), &config);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn debug_impl_names_room() {
        let (client, _events) =
            MatchClient::start(SilentTransport, DisabledMedia::default(), router(), &ClientConfig::default());
        let debug = format!("{client:?}");
        assert!(debug.contains("MatchClient"));
        assert!(debug.contains("room-1"));
    }
}
