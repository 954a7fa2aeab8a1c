//! WebSocket listener using tokio-tungstenite.
//!
//! Accepts TCP connections, performs the HTTP upgrade at the relay path, and
//! hands each upgraded stream (with the upgrade request's headers) to the
//! server through a channel.

use futures_util::{SinkExt, StreamExt};
use http::{HeaderMap, StatusCode};
use murmur_core::{RelayError, RelayResult};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
    /// Headers of the upgrade request (cookies, authorization).
    pub headers: HeaderMap,
}

/// Upgrade options applied to every accepted connection.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Only upgrade requests for this path are accepted.
    pub path: String,
    pub max_frame_size: usize,
}

/// Start accepting on an already-bound listener.
///
/// Returns a receiver that yields upgraded connections.
pub fn start_listener(
    tcp_listener: TcpListener,
    options: ListenerOptions,
) -> RelayResult<mpsc::Receiver<WebSocketConnection>> {
    let local = tcp_listener.local_addr()?;
    info!(addr = %local, path = %options.path, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);
    let options = Arc::new(options);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let options = options.clone();
                    tokio::spawn(async move {
                        match upgrade(stream, &options).await {
                            Ok((ws_stream, headers)) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                    headers,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                debug!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok(rx)
}

/// Run the server side of the upgrade, capturing request headers and
/// refusing any path other than the relay path with 404.
async fn upgrade(
    stream: TcpStream,
    options: &ListenerOptions,
) -> RelayResult<(WebSocketStream<TcpStream>, HeaderMap)> {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(options.max_frame_size);
    ws_config.max_frame_size = Some(options.max_frame_size);

    let captured = Arc::new(OnceLock::new());
    let cell = captured.clone();
    let expected_path = options.path.clone();

    let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            if req.uri().path() != expected_path {
                let mut refusal = ErrorResponse::new(Some("not found".to_string()));
                *refusal.status_mut() = StatusCode::NOT_FOUND;
                return Err(refusal);
            }
            let _ = cell.set(req.headers().clone());
            Ok(resp)
        },
        Some(ws_config),
    )
    .await
    .map_err(|e| RelayError::Transport(format!("WS upgrade failed: {e}")))?;

    let headers = captured.get().cloned().unwrap_or_default();
    Ok((ws_stream, headers))
}

/// Send one JSON text frame.
pub async fn ws_send_text(ws: &mut WebSocketStream<TcpStream>, text: String) -> RelayResult<()> {
    ws.send(Message::Text(text))
        .await
        .map_err(|e| RelayError::Transport(format!("WS send failed: {e}")))
}

/// Start a close handshake. Errors are ignored; the peer may already be gone.
pub async fn ws_close(ws: &mut WebSocketStream<TcpStream>) {
    let _ = ws.close(None).await;
}

/// Receive the next data frame (text or binary) as bytes.
///
/// Returns `None` if the connection is closed. Control frames are skipped;
/// tungstenite queues the pong for a ping and flushes it on the next read or
/// write.
pub async fn ws_recv_frame(ws: &mut WebSocketStream<TcpStream>) -> RelayResult<Option<Vec<u8>>> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
            Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(RelayError::Transport(format!("WS recv failed: {e}")));
            }
            None => return Ok(None),
        }
    }
}
