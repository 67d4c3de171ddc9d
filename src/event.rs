//! Events emitted by a running [`MatchClient`](crate::client::MatchClient).
//!
//! Events are delivered on the bounded channel returned from
//! [`MatchClient::start`](crate::client::MatchClient::start). `Connected` is
//! always first and `Disconnected` always last.

use crate::chat::ChatEntry;
use crate::game::GameSnapshot;
use crate::lobby::LobbyState;
use crate::video::PeerSignalState;

/// A state change the UI should render.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The reaction loop started. Synthetic, not sent by the server.
    Connected,

    /// The visible game changed: a local proposal, a reconciled server move,
    /// a rollback, or a full resync.
    GameUpdated(GameSnapshot),

    /// The server rejected our pending move; the board was rolled back.
    MoveRejected {
        /// Reason text from the server's `error` message.
        reason: String,
    },

    /// The server sent an `error` while no move was pending.
    ServerError { message: String },

    /// Both seats are now taken.
    OpponentJoined { opponent_name: String },

    /// A new lobby snapshot arrived.
    LobbyUpdated {
        lobby: LobbyState,
        /// Status line for the lobby screen.
        status: String,
    },

    /// Both players are ready. Fired at most once per session.
    MatchReady,

    /// A chat line was appended, own or received.
    ChatAppended(ChatEntry),

    /// Video signaling state changed.
    VideoUpdated {
        state: PeerSignalState,
        /// Set when something failed; chess and chat keep working.
        status: Option<String>,
    },

    /// The transport closed unexpectedly. No automatic reconnect happens;
    /// a `Disconnected` event follows.
    ConnectionLost { reason: Option<String> },

    /// The reaction loop exited. Always the last event.
    Disconnected { reason: Option<String> },
}
