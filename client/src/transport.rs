//! Connectors that turn an [`Endpoint`] into a pair of byte channels.
//!
//! Each connector spawns a reader and a writer task. Either task ending, or
//! the shared cancellation token firing, tears down both. Frames queued
//! before cancellation are still written.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Endpoint;
use crate::error::ClientError;

const READ_CHUNK: usize = 16 * 1024;

/// Raw bytes to and from the broker.
pub(crate) struct Link {
    pub outbound: mpsc::Sender<Vec<u8>>,
    pub inbound: mpsc::Receiver<Vec<u8>>,
}

pub(crate) async fn open(endpoint: &Endpoint, capacity: usize, shutdown: CancellationToken) -> Result<Link, ClientError> {
    match endpoint {
        Endpoint::Tcp(addr) => open_tcp(*addr, capacity, shutdown).await,
        Endpoint::Ws(url) => open_ws(url, capacity, shutdown).await,
    }
}

async fn open_tcp(addr: SocketAddr, capacity: usize, shutdown: CancellationToken) -> Result<Link, ClientError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();
    let (outbound, mut outbound_rx) = mpsc::channel::<Vec<u8>>(capacity);
    let (inbound_tx, inbound) = mpsc::channel::<Vec<u8>>(capacity);

    let token = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                next = outbound_rx.recv() => {
                    let Some(bytes) = next else { break };
                    if let Err(e) = writer.write_all(&bytes).await {
                        warn!(error = %e, "client: tcp write failed");
                        token.cancel();
                        return;
                    }
                }
            }
        }
        while let Ok(bytes) = outbound_rx.try_recv() {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
        token.cancel();
    });

    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        if inbound_tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "client: tcp read failed");
                        break;
                    }
                },
            }
        }
        shutdown.cancel();
    });

    Ok(Link { outbound, inbound })
}

async fn open_ws(url: &str, capacity: usize, shutdown: CancellationToken) -> Result<Link, ClientError> {
    let (stream, _) = connect_async(url).await?;
    let (mut sink, mut source) = stream.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<Vec<u8>>(capacity);
    let (inbound_tx, inbound) = mpsc::channel::<Vec<u8>>(capacity);

    let token = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                next = outbound_rx.recv() => {
                    let Some(bytes) = next else { break };
                    if let Err(e) = sink.send(Message::Binary(bytes.into())).await {
                        warn!(error = %e, "client: ws send failed");
                        token.cancel();
                        return;
                    }
                }
            }
        }
        while let Ok(bytes) = outbound_rx.try_recv() {
            if sink.send(Message::Binary(bytes.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
        token.cancel();
    });

    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                next = source.next() => {
                    let bytes = match next {
                        Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                        Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            debug!(error = %e, "client: ws read failed");
                            break;
                        }
                    };
                    if inbound_tx.send(bytes).await.is_err() {
                        break;
                    }
                }
            }
        }
        shutdown.cancel();
    });

    Ok(Link { outbound, inbound })
}
