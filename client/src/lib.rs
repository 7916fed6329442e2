//! Client for the switchboard broker.
//!
//! ```no_run
//! # async fn demo() -> Result<(), broker_client::ClientError> {
//! use broker_client::{BrokerClient, ClientConfig, Endpoint};
//!
//! let config = ClientConfig::new("A", "secret", Endpoint::Tcp("127.0.0.1:7420".parse().expect("addr")));
//! let client = BrokerClient::connect(config).await?;
//! client.on_transmission("PING", |t| async move { Ok(format!("pong from {}", t.origin)) });
//! let reply = client.transmit_value("TEST", "B", "1").await;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod events;
mod handlers;
mod pending;
mod transport;

pub use client::BrokerClient;
pub use config::{ClientConfig, ClientConfigError, DEFAULT_CONNECT_TIMEOUT, DEFAULT_OUTBOUND_CAPACITY, DEFAULT_REQUEST_TIMEOUT, Endpoint};
pub use error::{ClientError, TransmissionError};
pub use events::{EventSubscribers, ProcessEvent, SubscriptionId};
pub use handlers::{HandlerFuture, HandlerRegistry, Transmission};
pub use pending::{Completion, PendingRequests};
