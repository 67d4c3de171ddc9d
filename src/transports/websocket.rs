//! WebSocket room transport on `tokio-tungstenite`.
//!
//! `ws://` and `wss://` are both supported; TLS goes through
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), kingsgambit_client::GambitError> {
//! use kingsgambit_client::transport::RoomKind;
//! use kingsgambit_client::{Transport, WebSocketTransport};
//!
//! let mut ws =
//!     WebSocketTransport::connect_room("ws://localhost:8000", RoomKind::Match, "a1b2c3").await?;
//! if let Some(Ok(greeting)) = ws.recv().await {
//!     println!("server said: {greeting}");
//! }
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::error::GambitError;
use crate::transport::{room_url, RoomKind, Transport};

/// The underlying WebSocket stream, public for [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// [`Transport`] over one WebSocket connection.
///
/// [`recv`](Transport::recv) is cancel-safe: the frame is only taken off the
/// stream when the future completes.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

fn connect_error(e: tokio_tungstenite::tungstenite::Error) -> GambitError {
    let kind = match &e {
        tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
        _ => std::io::ErrorKind::Other,
    };
    GambitError::Io(std::io::Error::new(kind, e))
}

impl WebSocketTransport {
    /// Connect to an explicit socket URL.
    ///
    /// # Errors
    ///
    /// [`GambitError::Io`] if the URL is invalid or the handshake fails. The
    /// [`ErrorKind`](std::io::ErrorKind) of an underlying I/O error is kept.
    pub async fn connect(url: &str) -> Result<Self, GambitError> {
        Self::connect_with_cookie(url, None).await
    }

    /// Connect sending a `Cookie` header with the handshake. The server
    /// identifies the player by its session cookie.
    pub async fn connect_with_cookie(url: &str, cookie: Option<&str>) -> Result<Self, GambitError> {
        debug!(url = %url, with_cookie = cookie.is_some(), "connecting room socket");
        let mut request = url.into_client_request().map_err(connect_error)?;
        if let Some(cookie) = cookie {
            let value = HeaderValue::from_str(cookie).map_err(|e| {
                GambitError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
            })?;
            request.headers_mut().insert(COOKIE, value);
        }
        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(connect_error)?;
        info!(url = %url, "room socket open");
        Ok(Self::from_stream(stream))
    }

    /// Connect to `{base_url}/ws/{lobby|match}/{room_id}/`.
    pub async fn connect_room(
        base_url: &str,
        kind: RoomKind,
        room_id: &str,
    ) -> Result<Self, GambitError> {
        Self::connect(&room_url(base_url, kind, room_id)).await
    }

    /// [`connect_room`](Self::connect_room) with an optional session cookie,
    /// bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// [`GambitError::Timeout`] if the deadline elapses first.
    pub async fn connect_room_with_timeout(
        base_url: &str,
        kind: RoomKind,
        room_id: &str,
        cookie: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, GambitError> {
        let url = room_url(base_url, kind, room_id);
        tokio::time::timeout(timeout, Self::connect_with_cookie(&url, cookie))
            .await
            .map_err(|_| GambitError::Timeout)?
    }

    /// Wrap a stream connected elsewhere (custom TLS, cookies, proxies).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), GambitError> {
        if self.closed {
            return Err(GambitError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| GambitError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, GambitError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(GambitError::TransportReceive(e.to_string()))),
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    debug!(?frame, "room socket closed by server");
                    return None;
                }
                // tungstenite answers pings itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                Message::Binary(_) => warn!("skipping binary frame on room socket"),
            }
        }
    }

    async fn close(&mut self) -> Result<(), GambitError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| GambitError::TransportSend(e.to_string()))
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
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    type ServerStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

    /// Start a one-connection server. Returns its base URL and the request
    /// path and `Cookie` header the client sent once the handshake completes.
    async fn start_room_server<F, Fut>(handler: F) -> (String, Arc<StdMutex<Option<(String, Option<String>)>>>)
    where
        F: FnOnce(ServerStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let path = Arc::new(StdMutex::new(None));
        let seen = Arc::clone(&path);

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| {
                let cookie = req
                    .headers()
                    .get(COOKIE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                *seen.lock().unwrap() = Some((req.uri().path().to_string(), cookie));
                Ok(resp)
            };
            let ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            handler(ws).await;
        });

        (format!("ws://{addr}"), path)
    }

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-url").await.unwrap_err();
        assert!(matches!(err, GambitError::Io(_)));
    }

    #[tokio::test]
    async fn connect_room_uses_match_path() {
        let (base, path) = start_room_server(|mut ws| async move {
            ws.send(Message::Text(
                r#"{"type":"game_start","player_color":"white"}"#.into(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect_room(&base, RoomKind::Match, "room42")
            .await
            .unwrap();
        let greeting = transport.recv().await.unwrap().unwrap();
        assert!(greeting.contains("game_start"));
        assert_eq!(
            path.lock().unwrap().clone(),
            Some(("/ws/match/room42/".to_string(), None))
        );
    }

    #[tokio::test]
    async fn session_cookie_is_sent_with_handshake() {
        let (base, seen) = start_room_server(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect_room_with_timeout(
            &base,
            RoomKind::Lobby,
            "r1",
            Some("sessionid=abc123"),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert!(transport.recv().await.is_none());
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(("/ws/lobby/r1/".to_string(), Some("sessionid=abc123".to_string())))
        );
    }

    #[tokio::test]
    async fn binary_and_ping_frames_are_skipped() {
        let (base, _) = start_room_server(|mut ws| async move {
            ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
            ws.send(Message::Ping(vec![9].into())).await.unwrap();
            ws.send(Message::Text(r#"{"type":"player_ready"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect_room(&base, RoomKind::Lobby, "x")
            .await
            .unwrap();
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"type":"player_ready"}"#
        );
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn frames_are_delivered_in_order() {
        let (base, _) = start_room_server(|mut ws| async move {
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
        })
        .await;

        let mut transport = WebSocketTransport::connect_room(&base, RoomKind::Match, "x")
            .await
            .unwrap();
        for n in 0..5 {
            transport.send(format!("frame-{n}")).await.unwrap();
        }
        for n in 0..5 {
            assert_eq!(transport.recv().await.unwrap().unwrap(), format!("frame-{n}"));
        }
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_after_close_is_refused_and_close_is_idempotent() {
        let (base, _) =
            start_room_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect_room(&base, RoomKind::Match, "x")
            .await
            .unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        let err = transport.send("late".into()).await.unwrap_err();
        assert!(matches!(err, GambitError::TransportClosed));
    }

    #[tokio::test]
    async fn connect_room_with_timeout_times_out() {
        let err = WebSocketTransport::connect_room_with_timeout(
            "ws://192.0.2.1:1",
            RoomKind::Match,
            "x",
            None,
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GambitError::Timeout));
    }
}
