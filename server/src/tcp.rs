//! Raw TCP listener: delimiter-framed messages straight on the socket.
//!
//! Each accepted socket gets a read loop (this task) and a writer pump fed
//! by the connection's outbound queue. Either side ending cancels the
//! shared token, which ends the other.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connection::ChannelTransport;
use crate::dispatcher::Dispatcher;

const READ_CHUNK: usize = 16 * 1024;

/// Accept connections until the listener fails.
///
/// # Errors
///
/// Never returns `Ok`; per-connection accept errors are logged and skipped.
pub async fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>) -> std::io::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(run_connection(stream, peer, dispatcher.clone()));
            }
            Err(e) => warn!(error = %e, "tcp: accept failed"),
        }
    }
}

async fn run_connection(stream: TcpStream, peer: SocketAddr, dispatcher: Arc<Dispatcher>) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(%peer, error = %e, "tcp: failed to set nodelay");
    }
    let (mut reader, writer) = stream.into_split();
    let (transport, outbound, shutdown) = ChannelTransport::new(dispatcher.config().outbound_capacity);
    let conn = dispatcher.connection(Box::new(transport), peer.to_string());
    info!(conn = %conn.id(), %peer, "tcp: client connected");

    let pump = tokio::spawn(write_pump(writer, outbound, shutdown.clone()));

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    for message in conn.ingest(&buf[..n]) {
                        dispatcher.handle(&conn, message).await;
                    }
                }
                Err(e) => {
                    warn!(conn = %conn.id(), error = %e, "tcp: read failed");
                    break;
                }
            },
        }
    }

    dispatcher.disconnect(&conn).await;
    shutdown.cancel();
    if let Err(e) = pump.await {
        warn!(conn = %conn.id(), error = %e, "tcp: writer task failed");
    }
    info!(conn = %conn.id(), %peer, "tcp: client disconnected");
}

/// Drain the outbound queue onto the socket. Frames already queued when the
/// connection is cancelled are still flushed.
async fn write_pump(mut writer: OwnedWriteHalf, mut outbound: mpsc::Receiver<Vec<u8>>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            next = outbound.recv() => {
                let Some(bytes) = next else { break };
                if let Err(e) = writer.write_all(&bytes).await {
                    warn!(error = %e, "tcp: write failed");
                    shutdown.cancel();
                    return;
                }
            }
            () = shutdown.cancelled() => {
                while let Ok(bytes) = outbound.try_recv() {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    shutdown.cancel();
    let _ = writer.shutdown().await;
}

#[cfg(test)]
#[path = "tcp_test.rs"]
mod tests;
