//! # Play Match Example
//!
//! A complete session against a running Kings Gambit server:
//!
//! 1. Create a room (or join one) over the REST API
//! 2. Bootstrap the match and open the room socket with the session cookie
//! 3. Play moves typed on stdin (`e2 e4`, `e7 e8 q`), chat with `/say ...`
//! 4. Shut down on `/quit`, Ctrl+C, or disconnect
//!
//! ## Running
//!
//! ```sh
//! # Create a room as white:
//! cargo run --example play_match -- alice
//!
//! # Join it as black from another terminal:
//! cargo run --example play_match -- bob <room_id>
//!
//! # Point at another server:
//! KINGSGAMBIT_API_URL=https://chess.example KINGSGAMBIT_URL=wss://chess.example \
//!     cargo run --example play_match -- alice
//! ```

use kingsgambit_client::api::{ApiConfig, MatchApi};
use kingsgambit_client::{ClientConfig, DisabledMedia, MatchClient, SessionEvent};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "guest".to_string());
    let room = args.next();

    // ── Seat ourselves over REST ────────────────────────────────────
    let api = MatchApi::new(ApiConfig::from_env())?;
    let ticket = match &room {
        Some(room_id) => api.join_room(room_id, &name).await?,
        None => api.create_room(&name).await?,
    };
    tracing::info!(room_id = %ticket.room_id, "seated; share the room id with your opponent");

    let bootstrap = api.match_bootstrap(&ticket.room_id).await?;
    let router = bootstrap.router()?;
    tracing::info!("{}", router.session().match_status());

    // ── Open the room socket ────────────────────────────────────────
    let mut config = ClientConfig::from_env();
    if let Some(cookie) = api.cookie_header() {
        config = config.with_cookie(cookie);
    }
    let (mut client, mut events) =
        MatchClient::connect_match(&config, DisabledMedia::default(), router).await?;

    // ── Event loop ──────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::GameUpdated(snapshot) => {
                        tracing::info!(fen = %snapshot.fen, "{}", snapshot.status_text());
                    }
                    SessionEvent::MoveRejected { reason } => {
                        tracing::warn!("move rejected: {reason}");
                    }
                    SessionEvent::OpponentJoined { opponent_name } => {
                        tracing::info!("playing against {opponent_name}");
                    }
                    SessionEvent::ChatAppended(entry) if !entry.is_own => {
                        tracing::info!("[chat] {}: {}", entry.sender, entry.text);
                    }
                    SessionEvent::Disconnected { reason } => {
                        tracing::info!("disconnected: {}", reason.as_deref().unwrap_or("clean"));
                        break;
                    }
                    other => tracing::debug!("event: {other:?}"),
                }
            }

            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let line = line.trim();
                if line == "/quit" {
                    break;
                }
                if let Some(text) = line.strip_prefix("/say ") {
                    client.send_chat(text)?;
                    continue;
                }
                let parts: Vec<&str> = line.split_whitespace().collect();
                match parts.as_slice() {
                    [from, to] | [from, to, _] => {
                        let promotion = parts.get(2).copied();
                        match client.propose_move(from, to, promotion).await {
                            Ok(san) => tracing::info!("sent {san}"),
                            Err(e) => tracing::warn!("{e}"),
                        }
                    }
                    _ => tracing::warn!("expected `<from> <to> [promotion]`, `/say <text>` or `/quit`"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
