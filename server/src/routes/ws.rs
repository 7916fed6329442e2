//! WebSocket handler: delimiter-framed bytes over WebSocket messages.
//!
//! DESIGN
//! ======
//! On upgrade, wraps the socket in a [`Connection`] and enters a `select!`
//! loop:
//! - Incoming binary or text messages → framer → dispatcher
//! - Frames queued on the connection's outbound channel → socket
//!
//! Message boundaries carry no meaning; a frame may span several WebSocket
//! messages and one message may hold several frames.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → unregistered connection
//! 2. Client registers and exchanges frames through the dispatcher
//! 3. Close, socket error, or disposal → dispatcher cleanup → flush → close

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use tracing::{info, warn};

use crate::connection::{ChannelTransport, Connection};
use crate::dispatcher::Dispatcher;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(dispatcher): State<Arc<Dispatcher>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, dispatcher, peer))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, dispatcher: Arc<Dispatcher>, peer: SocketAddr) {
    let (transport, mut outbound, shutdown) = ChannelTransport::new(dispatcher.config().outbound_capacity);
    let conn = dispatcher.connection(Box::new(transport), peer.to_string());
    info!(conn = %conn.id(), %peer, "ws: client connected");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Binary(bytes) => ingest(&dispatcher, &conn, &bytes).await,
                    Message::Text(text) => ingest(&dispatcher, &conn, text.as_str().as_bytes()).await,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(bytes) = outbound.recv() => {
                if let Err(e) = socket.send(Message::Binary(bytes.into())).await {
                    warn!(conn = %conn.id(), error = %e, "ws: send failed");
                    break;
                }
            }
        }
    }

    dispatcher.disconnect(&conn).await;

    // Flush whatever was queued before the connection ended.
    while let Ok(bytes) = outbound.try_recv() {
        if socket.send(Message::Binary(bytes.into())).await.is_err() {
            break;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
    info!(conn = %conn.id(), %peer, "ws: client disconnected");
}

async fn ingest(dispatcher: &Dispatcher, conn: &Arc<Connection>, bytes: &[u8]) {
    for message in conn.ingest(bytes) {
        dispatcher.handle(conn, message).await;
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
