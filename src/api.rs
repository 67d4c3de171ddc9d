//! REST boundary: accounts, room creation and session bootstrap.
//!
//! Thin wrapper over `reqwest` with a cookie store, since the server keys
//! the player's identity on its session cookie. Every mutating request
//! carries the cached CSRF token in `X-CSRFToken`. Response parsing lives in
//! pure functions so it can be tested without a server.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{GambitError, Result};
use crate::game::MoveEngine;
use crate::lobby::{LobbyCoordinator, LobbyState};
use crate::protocol::PlayerColor;
use crate::router::Router;
use crate::session::Session;

const CSRF_HEADER: &str = "X-CSRFToken";
const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Environment variable holding the REST base URL.
pub const API_URL_ENV: &str = "KINGSGAMBIT_API_URL";

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
        }
    }

    /// Read `KINGSGAMBIT_API_URL`, falling back to the local server.
    pub fn from_env() -> Self {
        match std::env::var(API_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Answer to `create-room` and `join-game`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomTicket {
    pub room_id: String,
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default)]
    pub player_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub username: Option<String>,
}

/// Lobby snapshot from `lobby-data`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySnapshot {
    #[serde(default)]
    pub white_player: Option<String>,
    #[serde(default)]
    pub black_player: Option<String>,
    #[serde(default)]
    pub white_player_ready: bool,
    #[serde(default)]
    pub black_player_ready: bool,
    #[serde(default)]
    pub is_user_white: bool,
}

impl LobbySnapshot {
    pub fn self_color(&self) -> PlayerColor {
        if self.is_user_white {
            PlayerColor::White
        } else {
            PlayerColor::Black
        }
    }

    pub fn state(&self) -> LobbyState {
        LobbyState {
            white_player_name: self.white_player.clone(),
            black_player_name: self.black_player.clone(),
            white_ready: self.white_player_ready,
            black_ready: self.black_player_ready,
        }
    }

    /// Lobby coordinator seeded with this snapshot.
    pub fn coordinator(&self) -> LobbyCoordinator {
        LobbyCoordinator::from_snapshot(self.state(), self.self_color())
    }
}

/// A history entry: plain SAN, or a move object carrying a `san` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HistoryEntry {
    San(String),
    Move { san: String },
}

impl HistoryEntry {
    pub fn san(&self) -> &str {
        match self {
            HistoryEntry::San(san) | HistoryEntry::Move { san } => san,
        }
    }
}

/// Everything needed to open a match session, from `game-data`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MatchBootstrap {
    pub room_id: String,
    pub player_color: PlayerColor,
    #[serde(default)]
    pub player_name: Option<String>,
    #[serde(default)]
    pub opponent_name: Option<String>,
    #[serde(default)]
    pub waiting_for_opponent: bool,
    #[serde(default = "start_position")]
    pub initial_position: String,
    #[serde(default)]
    pub moves_history: Vec<HistoryEntry>,
}

fn start_position() -> String {
    crate::rules::START_SENTINEL.to_string()
}

impl MatchBootstrap {
    pub fn session(&self) -> Session {
        Session {
            room_id: self.room_id.clone(),
            self_name: self.player_name.clone().unwrap_or_default(),
            self_color: self.player_color,
            opponent_name: self.opponent_name.clone(),
            connection_state: Default::default(),
            waiting_for_opponent: self.waiting_for_opponent,
        }
    }

    pub fn moves(&self) -> Vec<String> {
        self.moves_history.iter().map(|m| m.san().to_string()).collect()
    }

    /// Game engine restored from the history, checked against the reported
    /// position.
    pub fn engine(&self) -> Result<MoveEngine> {
        MoveEngine::from_history(&self.initial_position, &self.moves())
    }

    pub fn router(&self) -> Result<Router> {
        Ok(Router::new(self.session(), self.engine()?))
    }
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AccountResponse {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct CsrfResponse {
    #[serde(rename = "csrfToken")]
    csrf_token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct MatchApi {
    http: reqwest::Client,
    config: ApiConfig,
    cookies: Arc<Jar>,
    csrf: Mutex<Option<String>>,
}

impl std::fmt::Debug for MatchApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchApi")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl MatchApi {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let cookies = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&cookies))
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| GambitError::Http(e.to_string()))?;
        Ok(Self {
            http,
            config,
            cookies,
            csrf: Mutex::new(None),
        })
    }

    /// The `Cookie` header for the server, if it set any.
    ///
    /// The room socket identifies the player by the session cookie, so pass
    /// this to [`ClientConfig::with_cookie`](crate::client::ClientConfig::with_cookie).
    pub fn cookie_header(&self) -> Option<String> {
        let url = reqwest::Url::parse(&self.config.base_url).ok()?;
        let header = self.cookies.cookies(&url)?;
        header.to_str().ok().map(str::to_string)
    }

    /// The CSRF token, fetched once and cached.
    pub async fn csrf_token(&self) -> Result<String> {
        let mut cached = self.csrf.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let response = self.http.get(self.config.url("/api/get-csrf-token/")).send().await;
        let body: CsrfResponse = read(response).await?;
        debug!("csrf token fetched");
        *cached = Some(body.csrf_token.clone());
        Ok(body.csrf_token)
    }

    pub async fn current_user(&self) -> Result<CurrentUser> {
        let response = self.http.get(self.config.url("/api/user/")).send().await;
        read(response).await
    }

    /// Log in; returns the username the server recorded.
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        self.account("/api/login/", username, password).await
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<String> {
        self.account("/api/register/", username, password).await
    }

    async fn account(&self, path: &str, username: &str, password: &str) -> Result<String> {
        let token = self.csrf_token().await?;
        let response = self
            .http
            .post(self.config.url(path))
            .header(CSRF_HEADER, token)
            .json(&Credentials { username, password })
            .send()
            .await;
        let body: AccountResponse = read(response).await?;
        // Django rotates the token on login.
        self.csrf.lock().await.take();
        let name = body.username.unwrap_or_else(|| username.to_string());
        info!(username = %name, path, "account request succeeded");
        Ok(name)
    }

    pub async fn logout(&self) -> Result<()> {
        let token = self.csrf_token().await?;
        let response = self
            .http
            .post(self.config.url("/api/logout/"))
            .header(CSRF_HEADER, token)
            .json(&serde_json::json!({}))
            .send()
            .await;
        let _: serde_json::Value = read(response).await?;
        self.csrf.lock().await.take();
        Ok(())
    }

    /// Create a room seated as white.
    pub async fn create_room(&self, player_name: &str) -> Result<RoomTicket> {
        self.room_form("/api/create-room/", &[("player_name", player_name)])
            .await
    }

    /// Take the black seat in an existing room.
    pub async fn join_room(&self, room_id: &str, player_name: &str) -> Result<RoomTicket> {
        self.room_form(
            "/api/join-game/",
            &[("room_id", room_id), ("player_name", player_name)],
        )
        .await
    }

    async fn room_form(&self, path: &str, form: &[(&str, &str)]) -> Result<RoomTicket> {
        let token = self.csrf_token().await?;
        let response = self
            .http
            .post(self.config.url(path))
            .header(CSRF_HEADER, token)
            .form(form)
            .send()
            .await;
        let ticket: RoomTicket = read(response).await?;
        info!(room_id = %ticket.room_id, path, "room ticket issued");
        Ok(ticket)
    }

    pub async fn lobby_snapshot(&self, room_id: &str) -> Result<LobbySnapshot> {
        let response = self
            .http
            .get(self.config.url(&format!("/api/lobby-data/{room_id}")))
            .send()
            .await;
        read(response).await
    }

    pub async fn match_bootstrap(&self, room_id: &str) -> Result<MatchBootstrap> {
        let response = self
            .http
            .get(self.config.url(&format!("/api/game-data/{room_id}")))
            .send()
            .await;
        read(response).await
    }
}

async fn read<T: DeserializeOwned>(
    response: std::result::Result<reqwest::Response, reqwest::Error>,
) -> Result<T> {
    let response = response.map_err(|e| GambitError::Http(e.to_string()))?;
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| GambitError::Http(e.to_string()))?;
    parse_response(status, &text)
}

// =============================================================================
// PARSING
// =============================================================================

/// Decode a response body, mapping non-2xx statuses to [`GambitError::Api`].
///
/// Error bodies look like `{"error": "..."}`; anything else is passed
/// through as the message.
pub fn parse_response<T: DeserializeOwned>(status: u16, body: &str) -> Result<T> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.error)
            .unwrap_or_else(|_| body.trim().to_string());
        return Err(GambitError::Api { status, message });
    }
    Ok(serde_json::from_str(body)?)
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
    use crate::game::EnginePhase;

    #[test]
    fn error_body_becomes_api_error() {
        let err = parse_response::<RoomTicket>(404, r#"{"error": "Game room not found"}"#)
            .unwrap_err();
        match err {
            GambitError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Game room not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cookie_header_is_empty_before_any_request() {
        let api = MatchApi::new(ApiConfig::new("http://127.0.0.1:8000")).unwrap();
        assert!(api.cookie_header().is_none());

        api.cookies.add_cookie_str(
            "sessionid=abc123; Path=/",
            &reqwest::Url::parse("http://127.0.0.1:8000/api/create-room/").unwrap(),
        );
        assert_eq!(api.cookie_header().as_deref(), Some("sessionid=abc123"));
    }

    #[test]
    fn non_json_error_body_is_kept_verbatim() {
        let err = parse_response::<CurrentUser>(502, "Bad Gateway\n").unwrap_err();
        assert_eq!(err.to_string(), "api error (502): Bad Gateway");
    }

    #[test]
    fn room_ticket_parses() {
        let ticket: RoomTicket = parse_response(
            200,
            r#"{"message": "Room created successfully", "room_id": "1a2b3c4d",
                "player_id": "p-1", "player_name": "alice"}"#,
        )
        .unwrap();
        assert_eq!(ticket.room_id, "1a2b3c4d");
        assert_eq!(ticket.player_name.as_deref(), Some("alice"));
    }

    #[test]
    fn lobby_snapshot_seeds_coordinator() {
        let snapshot: LobbySnapshot = parse_response(
            200,
            r#"{"whitePlayer": "alice", "blackPlayer": null, "whitePlayerReady": false,
                "blackPlayerReady": false, "isUserWhite": false}"#,
        )
        .unwrap();
        assert_eq!(snapshot.self_color(), PlayerColor::Black);
        let mut lobby = snapshot.coordinator();
        assert!(lobby.send_ready().is_some());
        assert_eq!(lobby.status_text(), "Waiting for an opponent to join...");
    }

    #[test]
    fn bootstrap_builds_session_and_engine() {
        let bootstrap: MatchBootstrap = parse_response(
            200,
            r#"{"room_id": "r1", "player_color": "black", "player_name": "bob",
                "opponent_name": "alice", "waiting_for_opponent": false,
                "initial_position": "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1",
                "moves_history": [{"san": "e4", "from": "e2", "to": "e4"}]}"#,
        )
        .unwrap();
        let session = bootstrap.session();
        assert_eq!(session.self_color, PlayerColor::Black);
        assert_eq!(session.match_status(), "Playing against: alice");
        let engine = bootstrap.engine().unwrap();
        assert_eq!(engine.confirmed().history(), ["e4"]);
        assert_eq!(engine.phase(), EnginePhase::Idle);
    }

    #[test]
    fn bootstrap_with_start_sentinel_and_no_moves() {
        let bootstrap: MatchBootstrap = parse_response(
            200,
            r#"{"room_id": "r1", "player_color": "white", "player_name": "alice",
                "opponent_name": null, "waiting_for_opponent": true,
                "initial_position": "start", "moves_history": []}"#,
        )
        .unwrap();
        let router = bootstrap.router().unwrap();
        assert!(router.session().waiting_for_opponent);
        assert!(router.game().confirmed().history().is_empty());
    }

    #[test]
    fn bootstrap_with_inconsistent_history_is_refused() {
        let bootstrap: MatchBootstrap = parse_response(
            200,
            r#"{"room_id": "r1", "player_color": "white", "initial_position": "start",
                "moves_history": ["e4"]}"#,
        )
        .unwrap();
        assert!(matches!(
            bootstrap.engine(),
            Err(GambitError::InvalidPosition(_))
        ));
    }

    #[test]
    fn config_joins_paths() {
        let config = ApiConfig::new("http://localhost:8000/");
        assert_eq!(
            config.url("/api/user/"),
            "http://localhost:8000/api/user/"
        );
    }
}
