//! # Loopback Match Example
//!
//! Plays a short opening against a scripted opponent over an in-process
//! [`Transport`]. No server or network is needed, which makes this a template
//! for driving a session from tests or from a custom I/O layer.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_match
//! ```

use async_trait::async_trait;
use kingsgambit_client::game::MoveEngine;
use kingsgambit_client::{
    ClientConfig, DisabledMedia, GambitError, MatchClient, PlayerColor, Router, Session,
    SessionEvent, Transport,
};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// A channel-backed transport
// ─────────────────────────────────────────────────────────────────────

/// Client half: handed to [`MatchClient::start`].
struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Server half: reads what the client sent and answers.
struct LoopbackServer {
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<String>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackServer {
            rx: server_rx,
            tx: server_tx,
        },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), GambitError> {
        self.tx
            .send(message)
            .map_err(|e| GambitError::TransportSend(e.to_string()))
    }

    /// `None` once the server half is dropped, which ends the session.
    async fn recv(&mut self) -> Option<Result<String, GambitError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), GambitError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Scripted opponent
// ─────────────────────────────────────────────────────────────────────

/// Answer each of our moves with the next reply, like the room server
/// relaying the opponent's move. The server never echoes our own move.
async fn run_opponent(mut server: LoopbackServer, replies: Vec<(&'static str, &'static str)>) {
    let mut replies = replies.into_iter();
    while let Some(frame) = server.rx.recv().await {
        let Ok(msg) = serde_json::from_str::<serde_json::Value>(&frame) else {
            continue;
        };
        tracing::info!("server received: {frame}");
        match msg["type"].as_str() {
            Some("move") => {
                let Some((from, to)) = replies.next() else {
                    break;
                };
                let reply = serde_json::json!({ "type": "move_made", "from": from, "to": to });
                if server.tx.send(reply.to_string()).is_err() {
                    break;
                }
            }
            Some("chat_message") => {
                let reply = serde_json::json!({
                    "type": "chat_message",
                    "message": "good luck to you too",
                    "sender": "bob",
                });
                let _ = server.tx.send(reply.to_string());
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (transport, server) = loopback_pair();
    tokio::spawn(run_opponent(server, vec![("e7", "e5"), ("b8", "c6"), ("a7", "a6")]));

    let session = Session::new("loopback", "alice", PlayerColor::White).with_opponent("bob");
    let router = Router::new(session, MoveEngine::new());
    let (mut client, mut events) =
        MatchClient::start(transport, DisabledMedia::default(), router, &ClientConfig::default());

    client.send_chat("good luck")?;

    let mut plan = [("e2", "e4"), ("g1", "f3"), ("f1", "b5")].into_iter();
    let mut our_turn = true;
    while let Some(event) = events.recv().await {
        match &event {
            SessionEvent::GameUpdated(snapshot) => {
                tracing::info!(
                    history = ?snapshot.move_history,
                    "{}",
                    snapshot.status_text()
                );
                our_turn = snapshot.turn == PlayerColor::White && !snapshot.awaiting_ack;
            }
            SessionEvent::ChatAppended(entry) => {
                tracing::info!("[chat] {}: {}", entry.sender, entry.text);
            }
            SessionEvent::Disconnected { reason } => {
                tracing::info!("disconnected: {}", reason.as_deref().unwrap_or("clean"));
                break;
            }
            other => tracing::info!("event: {other:?}"),
        }

        if our_turn {
            let Some((from, to)) = plan.next() else {
                break;
            };
            let san = client.propose_move(from, to, None).await?;
            tracing::info!("we played {san}");
            our_turn = false;
        }
    }

    client.shutdown().await;
    tracing::info!("final position: {}", client.game().fen);
    Ok(())
}
