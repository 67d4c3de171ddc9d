//! Peer-to-peer video signaling.
//!
//! The coordinator is a pure state machine. It never touches a camera or a
//! peer connection itself: every side effect is a [`MediaCommand`] handed to a
//! [`MediaBackend`], and every completion comes back later as a
//! [`MediaEvent`] processed as its own reaction.
//!
//! Exactly one side places the call: the one whose peer id sorts lower. The
//! other side waits for the incoming call and answers it once local media is
//! ready. Video failures never touch the game or chat state.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::GambitError;
use crate::protocol::ClientMessage;

/// Identifier of an incoming call, assigned by the backend.
pub type CallId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    #[default]
    Idle,
    Calling,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoPhase {
    #[default]
    Uninitialized,
    PeerReady,
    CallingOut,
    AwaitingIncoming,
    Connected,
    Closed,
    Failed,
}

/// Local camera and microphone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaState {
    #[default]
    None,
    Acquiring,
    Ready,
    Unavailable,
}

/// Snapshot of the video side of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSignalState {
    pub self_peer_id: Option<String>,
    pub opponent_peer_id: Option<String>,
    pub call_state: CallState,
    pub phase: VideoPhase,
    pub media: MediaState,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl Default for PeerSignalState {
    fn default() -> Self {
        Self {
            self_peer_id: None,
            opponent_peer_id: None,
            call_state: CallState::Idle,
            phase: VideoPhase::Uninitialized,
            media: MediaState::None,
            audio_enabled: true,
            video_enabled: true,
        }
    }
}

/// Side effect requested from the media backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCommand {
    AcquireMedia,
    OpenPeer,
    Call { peer_id: String },
    Answer { call_id: CallId },
    SetAudioEnabled(bool),
    SetVideoEnabled(bool),
    HangUp,
    DestroyPeer,
    StopMedia,
}

/// Completion reported by the media backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    MediaReady,
    MediaFailed { reason: String },
    PeerOpened { peer_id: String },
    PeerFailed { reason: String },
    IncomingCall { call_id: CallId },
    CallConnected,
    CallFailed { reason: String },
    CallClosed,
}

/// Output of one video reaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoEffects {
    pub commands: Vec<MediaCommand>,
    pub outbound: Vec<ClientMessage>,
    /// User-visible status line, set on failures.
    pub status: Option<String>,
}

impl VideoEffects {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.outbound.is_empty() && self.status.is_none()
    }
}

/// Executes media side effects.
///
/// Implementations must not block: long-running work (device access, peer
/// negotiation) runs elsewhere and reports back through the sender passed to
/// [`attach`](MediaBackend::attach).
pub trait MediaBackend: Send + 'static {
    /// Called once before any command, with the channel for completions.
    fn attach(&mut self, events: mpsc::UnboundedSender<MediaEvent>);

    /// Start executing `command`.
    fn execute(&mut self, command: MediaCommand);
}

/// Backend for clients without camera support. Media acquisition always
/// fails, which leaves chess and chat unaffected.
#[derive(Debug, Default)]
pub struct DisabledMedia {
    events: Option<mpsc::UnboundedSender<MediaEvent>>,
}

impl MediaBackend for DisabledMedia {
    fn attach(&mut self, events: mpsc::UnboundedSender<MediaEvent>) {
        self.events = Some(events);
    }

    fn execute(&mut self, command: MediaCommand) {
        if command == MediaCommand::AcquireMedia {
            if let Some(events) = &self.events {
                let _ = events.send(MediaEvent::MediaFailed {
                    reason: "no media backend".into(),
                });
            }
        }
    }
}

/// Video signaling state machine for one session.
#[derive(Debug, Clone)]
pub struct VideoCoordinator {
    sender: String,
    state: PeerSignalState,
    peer_opening: bool,
    call_open: bool,
    pending_incoming: Option<CallId>,
    call_when_ready: Option<String>,
    reannounce_when_ready: bool,
}

impl VideoCoordinator {
    /// `sender` is the local player's name, attached to announcements.
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            state: PeerSignalState::default(),
            peer_opening: false,
            call_open: false,
            pending_incoming: None,
            call_when_ready: None,
            reannounce_when_ready: false,
        }
    }

    pub fn state(&self) -> PeerSignalState {
        let mut state = self.state.clone();
        state.call_state = match state.phase {
            VideoPhase::CallingOut | VideoPhase::AwaitingIncoming if self.call_open => CallState::Calling,
            VideoPhase::CallingOut => CallState::Calling,
            VideoPhase::Connected => CallState::Connected,
            VideoPhase::Failed => CallState::Failed,
            _ => CallState::Idle,
        };
        state
    }

    pub fn phase(&self) -> VideoPhase {
        self.state.phase
    }

    fn has_peer(&self) -> bool {
        self.peer_opening || self.state.self_peer_id.is_some()
    }

    fn announce(&self, effects: &mut VideoEffects) {
        if let Some(peer_id) = &self.state.self_peer_id {
            effects.outbound.push(ClientMessage::VideoSignal {
                peer_id: peer_id.clone(),
                sender: self.sender.clone(),
            });
        }
    }

    fn acquire(&mut self, effects: &mut VideoEffects) {
        if matches!(self.state.media, MediaState::None | MediaState::Unavailable) {
            self.state.media = MediaState::Acquiring;
            effects.commands.push(MediaCommand::AcquireMedia);
        }
    }

    fn open_peer(&mut self, effects: &mut VideoEffects) {
        if !self.has_peer() {
            self.peer_opening = true;
            effects.commands.push(MediaCommand::OpenPeer);
        }
    }

    /// Begin the video session: acquire media and open a peer.
    pub fn start(&mut self) -> VideoEffects {
        let mut effects = VideoEffects::default();
        if matches!(self.state.phase, VideoPhase::Closed | VideoPhase::Failed) {
            self.state.phase = VideoPhase::Uninitialized;
        }
        self.acquire(&mut effects);
        self.open_peer(&mut effects);
        if effects.commands.is_empty() {
            debug!("video already started");
        }
        effects
    }

    /// The opponent announced its peer id.
    pub fn on_remote_peer_id(&mut self, peer_id: String) -> VideoEffects {
        let mut effects = VideoEffects::default();
        debug!(peer_id = %peer_id, "remote peer id received");
        self.state.opponent_peer_id = Some(peer_id);
        if !self.call_open && self.state.self_peer_id.is_some() {
            self.decide_call(&mut effects);
        }
        effects
    }

    fn decide_call(&mut self, effects: &mut VideoEffects) {
        let (Some(local), Some(remote)) = (&self.state.self_peer_id, &self.state.opponent_peer_id) else {
            return;
        };

        if local == remote {
            let err = GambitError::SignalingFailure("local and remote peer ids are equal".into());
            warn!(peer_id = %local, "{err}");
            self.state.phase = VideoPhase::Failed;
            effects.status = Some(err.to_string());
            return;
        }

        if local < remote {
            let remote = remote.clone();
            if self.state.media == MediaState::Ready {
                info!(peer_id = %remote, "calling opponent");
                self.call_open = true;
                self.state.phase = VideoPhase::CallingOut;
                effects.commands.push(MediaCommand::Call { peer_id: remote });
            } else {
                debug!(peer_id = %remote, "deferring call until media is ready");
                self.call_when_ready = Some(remote);
                self.acquire(effects);
            }
        } else {
            debug!("waiting for opponent to call");
            self.state.phase = VideoPhase::AwaitingIncoming;
        }
    }

    /// Flip the microphone. Without media, acquire it first.
    pub fn toggle_audio(&mut self) -> VideoEffects {
        self.state.audio_enabled = !self.state.audio_enabled;
        let command = MediaCommand::SetAudioEnabled(self.state.audio_enabled);
        self.toggle(command)
    }

    /// Flip the camera. Without media, acquire it first.
    pub fn toggle_video(&mut self) -> VideoEffects {
        self.state.video_enabled = !self.state.video_enabled;
        let command = MediaCommand::SetVideoEnabled(self.state.video_enabled);
        self.toggle(command)
    }

    fn toggle(&mut self, command: MediaCommand) -> VideoEffects {
        let mut effects = VideoEffects::default();
        match self.state.media {
            MediaState::Ready => effects.commands.push(command),
            // Applied on MediaReady.
            MediaState::Acquiring => {}
            MediaState::None | MediaState::Unavailable => {
                self.reannounce_when_ready = true;
                self.acquire(&mut effects);
                self.open_peer(&mut effects);
            }
        }
        effects
    }

    /// Process a completion from the backend.
    pub fn on_event(&mut self, event: MediaEvent) -> VideoEffects {
        let mut effects = VideoEffects::default();
        match event {
            MediaEvent::MediaReady => self.on_media_ready(&mut effects),
            MediaEvent::MediaFailed { reason } => self.on_media_failed(reason, &mut effects),
            MediaEvent::PeerOpened { peer_id } if !self.peer_opening => {
                debug!(peer_id = %peer_id, "ignoring peer that was not being opened");
            }
            MediaEvent::PeerOpened { peer_id } => {
                info!(peer_id = %peer_id, "peer opened");
                self.peer_opening = false;
                self.state.self_peer_id = Some(peer_id);
                if matches!(self.state.phase, VideoPhase::Uninitialized | VideoPhase::Closed) {
                    self.state.phase = VideoPhase::PeerReady;
                }
                self.announce(&mut effects);
                if !self.call_open {
                    self.decide_call(&mut effects);
                }
            }
            MediaEvent::PeerFailed { reason } => {
                let err = GambitError::SignalingFailure(reason);
                warn!("{err}");
                self.peer_opening = false;
                self.state.self_peer_id = None;
                self.state.phase = VideoPhase::Failed;
                effects.status = Some(err.to_string());
            }
            MediaEvent::IncomingCall { call_id } => {
                if self.state.media == MediaState::Ready {
                    info!(%call_id, "answering incoming call");
                    self.call_open = true;
                    self.state.phase = VideoPhase::AwaitingIncoming;
                    effects.commands.push(MediaCommand::Answer { call_id });
                } else {
                    debug!(%call_id, "holding incoming call until media is ready");
                    self.pending_incoming = Some(call_id);
                    self.acquire(&mut effects);
                }
            }
            MediaEvent::CallConnected if !self.call_open => {
                debug!("ignoring connection for a call that is not open");
            }
            MediaEvent::CallConnected => {
                info!("call connected");
                self.call_open = true;
                self.state.phase = VideoPhase::Connected;
            }
            MediaEvent::CallFailed { reason } => {
                let err = GambitError::SignalingFailure(reason);
                warn!("{err}");
                self.call_open = false;
                self.state.phase = VideoPhase::Failed;
                effects.status = Some(err.to_string());
            }
            MediaEvent::CallClosed => {
                info!("call closed");
                self.call_open = false;
                self.state.phase = VideoPhase::Closed;
            }
        }
        effects
    }

    fn on_media_ready(&mut self, effects: &mut VideoEffects) {
        info!("local media ready");
        self.state.media = MediaState::Ready;
        if !self.state.audio_enabled {
            effects.commands.push(MediaCommand::SetAudioEnabled(false));
        }
        if !self.state.video_enabled {
            effects.commands.push(MediaCommand::SetVideoEnabled(false));
        }

        if let Some(call_id) = self.pending_incoming.take() {
            info!(%call_id, "answering held call");
            self.call_open = true;
            self.state.phase = VideoPhase::AwaitingIncoming;
            effects.commands.push(MediaCommand::Answer { call_id });
        } else if let Some(peer_id) = self.call_when_ready.take() {
            info!(peer_id = %peer_id, "placing deferred call");
            self.call_open = true;
            self.state.phase = VideoPhase::CallingOut;
            effects.commands.push(MediaCommand::Call { peer_id });
        }

        if self.reannounce_when_ready {
            self.reannounce_when_ready = false;
            self.announce(effects);
        }
    }

    fn on_media_failed(&mut self, reason: String, effects: &mut VideoEffects) {
        let err = GambitError::MediaUnavailable(reason);
        warn!("{err}");
        if self.has_peer() {
            effects.commands.push(MediaCommand::DestroyPeer);
        }
        self.state.media = MediaState::Unavailable;
        self.state.phase = VideoPhase::Uninitialized;
        self.state.self_peer_id = None;
        self.peer_opening = false;
        self.call_open = false;
        self.pending_incoming = None;
        self.call_when_ready = None;
        self.reannounce_when_ready = false;
        effects.status = Some(err.to_string());
    }

    /// Release everything: hang up, destroy the peer, stop local media.
    pub fn teardown(&mut self) -> VideoEffects {
        let mut effects = VideoEffects::default();
        if self.call_open {
            effects.commands.push(MediaCommand::HangUp);
        }
        if self.has_peer() {
            effects.commands.push(MediaCommand::DestroyPeer);
        }
        if matches!(self.state.media, MediaState::Ready | MediaState::Acquiring) {
            effects.commands.push(MediaCommand::StopMedia);
        }
        self.call_open = false;
        self.peer_opening = false;
        self.pending_incoming = None;
        self.call_when_ready = None;
        self.reannounce_when_ready = false;
        self.state.self_peer_id = None;
        self.state.media = MediaState::None;
        if self.state.phase != VideoPhase::Uninitialized {
            self.state.phase = VideoPhase::Closed;
        }
        effects
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

    fn ready(name: &str, peer_id: &str) -> VideoCoordinator {
        let mut video = VideoCoordinator::new(name);
        video.start();
        video.on_event(MediaEvent::MediaReady);
        video.on_event(MediaEvent::PeerOpened {
            peer_id: peer_id.into(),
        });
        video
    }

    fn places_call(effects: &VideoEffects) -> bool {
        effects
            .commands
            .iter()
            .any(|c| matches!(c, MediaCommand::Call { .. }))
    }

    #[test]
    fn start_acquires_media_and_opens_peer() {
        let mut video = VideoCoordinator::new("alice");
        let effects = video.start();
        assert_eq!(
            effects.commands,
            [MediaCommand::AcquireMedia, MediaCommand::OpenPeer]
        );
        assert!(video.start().commands.is_empty());
    }

    #[test]
    fn peer_open_announces_id() {
        let mut video = VideoCoordinator::new("alice");
        video.start();
        let effects = video.on_event(MediaEvent::PeerOpened {
            peer_id: "aaa".into(),
        });
        assert_eq!(
            effects.outbound,
            [ClientMessage::VideoSignal {
                peer_id: "aaa".into(),
                sender: "alice".into()
            }]
        );
        assert_eq!(video.phase(), VideoPhase::PeerReady);
    }

    #[test]
    fn exactly_one_side_calls() {
        let mut alice = ready("alice", "aaa");
        let mut bob = ready("bob", "bbb");
        let a = alice.on_remote_peer_id("bbb".into());
        let b = bob.on_remote_peer_id("aaa".into());
        assert!(places_call(&a));
        assert!(!places_call(&b));
        assert_eq!(alice.phase(), VideoPhase::CallingOut);
        assert_eq!(bob.phase(), VideoPhase::AwaitingIncoming);
    }

    #[test]
    fn equal_peer_ids_are_a_signaling_failure() {
        let mut video = ready("alice", "same");
        let effects = video.on_remote_peer_id("same".into());
        assert!(!places_call(&effects));
        assert_eq!(video.phase(), VideoPhase::Failed);
        assert!(effects.status.unwrap().starts_with("signaling failure"));
    }

    #[test]
    fn call_is_deferred_until_media_ready() {
        let mut video = VideoCoordinator::new("alice");
        video.start();
        video.on_event(MediaEvent::PeerOpened {
            peer_id: "aaa".into(),
        });
        assert!(!places_call(&video.on_remote_peer_id("zzz".into())));
        let effects = video.on_event(MediaEvent::MediaReady);
        assert_eq!(
            effects.commands,
            [MediaCommand::Call {
                peer_id: "zzz".into()
            }]
        );
    }

    #[test]
    fn incoming_call_is_held_until_media_ready() {
        let mut video = VideoCoordinator::new("bob");
        video.start();
        let call_id = Uuid::new_v4();
        let held = video.on_event(MediaEvent::IncomingCall { call_id });
        assert!(held.commands.is_empty());
        let effects = video.on_event(MediaEvent::MediaReady);
        assert_eq!(effects.commands, [MediaCommand::Answer { call_id }]);
    }

    #[test]
    fn media_failure_destroys_peer_and_resets() {
        let mut video = VideoCoordinator::new("alice");
        video.start();
        video.on_event(MediaEvent::PeerOpened {
            peer_id: "aaa".into(),
        });
        let effects = video.on_event(MediaEvent::MediaFailed {
            reason: "permission denied".into(),
        });
        assert_eq!(effects.commands, [MediaCommand::DestroyPeer]);
        assert_eq!(
            effects.status.as_deref(),
            Some("media unavailable: permission denied")
        );
        let state = video.state();
        assert_eq!(state.phase, VideoPhase::Uninitialized);
        assert_eq!(state.media, MediaState::Unavailable);
        assert!(state.self_peer_id.is_none());
    }

    #[test]
    fn peer_opened_after_media_failure_is_ignored() {
        let mut video = VideoCoordinator::new("alice");
        video.start();
        let failed = video.on_event(MediaEvent::MediaFailed {
            reason: "permission denied".into(),
        });
        assert_eq!(failed.commands, [MediaCommand::DestroyPeer]);

        let late = video.on_event(MediaEvent::PeerOpened {
            peer_id: "aaa".into(),
        });
        assert!(late.is_empty());
        assert_eq!(video.phase(), VideoPhase::Uninitialized);
        assert!(video.state().self_peer_id.is_none());
    }

    #[test]
    fn call_connected_without_open_call_is_ignored() {
        let mut video = ready("alice", "aaa");
        assert!(video.on_event(MediaEvent::CallConnected).is_empty());
        assert_eq!(video.phase(), VideoPhase::PeerReady);
        assert_eq!(video.state().call_state, CallState::Idle);
    }

    #[test]
    fn toggle_without_media_acquires_then_reannounces() {
        let mut video = ready("alice", "aaa");
        video.on_event(MediaEvent::MediaFailed {
            reason: "unplugged".into(),
        });
        let effects = video.toggle_audio();
        assert_eq!(
            effects.commands,
            [MediaCommand::AcquireMedia, MediaCommand::OpenPeer]
        );
        video.on_event(MediaEvent::PeerOpened {
            peer_id: "aaa2".into(),
        });
        let effects = video.on_event(MediaEvent::MediaReady);
        assert_eq!(effects.commands, [MediaCommand::SetAudioEnabled(false)]);
        assert_eq!(
            effects.outbound,
            [ClientMessage::VideoSignal {
                peer_id: "aaa2".into(),
                sender: "alice".into()
            }]
        );
    }

    #[test]
    fn toggle_with_media_flips_track_in_place() {
        let mut video = ready("alice", "aaa");
        assert_eq!(
            video.toggle_video().commands,
            [MediaCommand::SetVideoEnabled(false)]
        );
        assert_eq!(
            video.toggle_video().commands,
            [MediaCommand::SetVideoEnabled(true)]
        );
    }

    #[test]
    fn teardown_order_is_hangup_destroy_stop() {
        let mut video = ready("alice", "aaa");
        video.on_remote_peer_id("bbb".into());
        video.on_event(MediaEvent::CallConnected);
        assert_eq!(video.state().call_state, CallState::Connected);
        let effects = video.teardown();
        assert_eq!(
            effects.commands,
            [
                MediaCommand::HangUp,
                MediaCommand::DestroyPeer,
                MediaCommand::StopMedia
            ]
        );
        assert_eq!(video.phase(), VideoPhase::Closed);
    }

    #[test]
    fn disabled_backend_reports_media_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = DisabledMedia::default();
        backend.attach(tx);
        backend.execute(MediaCommand::AcquireMedia);
        assert!(matches!(
            rx.try_recv().unwrap(),
            MediaEvent::MediaFailed { .. }
        ));
    }
}
