//! # Kings Gambit Client
//!
//! Match session synchronization for live two-player chess rooms.
//!
//! The crate keeps a local chess game in agreement with the room server:
//! local moves are applied optimistically and reconciled against the
//! server's verdicts, lobby presence and the ready handshake are tracked,
//! chat is relayed, and a peer-to-peer video call is negotiated over the same
//! room socket.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] for any backend
//! - **WebSocket built-in**: the default `transport-websocket` feature provides
//!   `WebSocketTransport`
//! - **REST bootstrap**: the default `rest-api` feature provides
//!   [`api::MatchApi`] for accounts, rooms and session bootstrap
//! - **Pluggable media**: camera and peer handling live behind
//!   [`video::MediaBackend`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let api = MatchApi::new(ApiConfig::from_env())?;
//! let ticket = api.create_room("alice").await?;
//! let router = api.match_bootstrap(&ticket.room_id).await?.router()?;
//! let (client, mut events) =
//!     MatchClient::connect_match(&ClientConfig::from_env(), DisabledMedia::default(), router).await?;
//! client.propose_move("e2", "e4", None).await?;
//! ```

pub mod chat;
pub mod error;
pub mod event;
pub mod game;
pub mod lobby;
pub mod protocol;
pub mod router;
pub mod rules;
pub mod session;
pub mod transport;
pub mod video;

#[cfg(feature = "rest-api")]
pub mod api;
#[cfg(feature = "tokio-runtime")]
pub mod client;
pub mod transports;

pub use error::{GambitError, Result};
pub use event::SessionEvent;
pub use game::{GameSnapshot, MoveEngine};
pub use protocol::{ClientMessage, PlayerColor, ServerMessage};
pub use router::Router;
pub use session::Session;
pub use transport::Transport;
pub use video::{DisabledMedia, MediaBackend};

#[cfg(feature = "tokio-runtime")]
pub use client::{ClientConfig, MatchClient};
#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
