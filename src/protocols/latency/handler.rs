//! Latency protocol handler over WebSocket.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tracing::{debug, trace};

use super::session::{run_session, ProbeTransport};
use crate::error::SessionError;
use crate::server::AppState;

/// Handle `GET /ws`: upgrade and probe until the client leaves.
pub async fn ws(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    let config = state.config.latency();

    upgrade.on_upgrade(move |socket| async move {
        debug!("Latency session started");
        let mut transport = WsTransport::new(socket);
        if let Err(e) = run_session(&mut transport, &config).await {
            debug!(error = %e, "Latency session error");
        }
    })
}

/// [`ProbeTransport`] over an upgraded axum WebSocket.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl ProbeTransport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        // A failed write means the peer is gone, as with reads
        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| {
                debug!(error = %e, "WebSocket write failed");
                SessionError::PeerClosed
            })
    }

    async fn recv_text(&mut self) -> Result<Option<String>, SessionError> {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Close(frame))) => {
                    trace!(?frame, "Close frame received");
                    return Ok(None);
                }
                Some(Ok(other)) => trace!(?other, "Ignoring non-text frame"),
                // A failed read means the peer is gone
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket read failed");
                    return Ok(None);
                }
                None => return Ok(None),
            }
        }
    }
}
