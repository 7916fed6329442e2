//! Inter-process message broker.
//!
//! Named processes connect over raw TCP or WebSocket, register with a shared
//! token, and exchange request/response messages addressed by name. The
//! broker forwards application traffic verbatim and answers control
//! messages (register, terminate, list) itself.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod registry;
pub mod routes;
pub mod tcp;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

pub use config::{BrokerConfig, ConfigError};
pub use connection::{ChannelTransport, Connection, ConnectionError, Transport};
pub use dispatcher::Dispatcher;
pub use registry::{ProcessRegistry, RegistryError};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("listener failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A broker with its listeners bound and ready to serve.
pub struct Broker {
    dispatcher: Arc<Dispatcher>,
    tcp: Option<TcpListener>,
    ws: Option<TcpListener>,
}

impl Broker {
    /// Validate `config` and bind every enabled listener. Port 0 picks an
    /// ephemeral port; see [`Broker::tcp_addr`] and [`Broker::ws_addr`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Config`] for invalid settings and
    /// [`BrokerError::Io`] when a port cannot be bound.
    pub async fn bind(config: BrokerConfig) -> Result<Self, BrokerError> {
        config.validate()?;
        let tcp = match config.tcp_port {
            Some(port) => Some(TcpListener::bind(SocketAddr::new(config.bind_addr, port)).await?),
            None => None,
        };
        let ws = match config.ws_port {
            Some(port) => Some(TcpListener::bind(SocketAddr::new(config.bind_addr, port)).await?),
            None => None,
        };
        Ok(Self { dispatcher: Arc::new(Dispatcher::new(config)), tcp, ws })
    }

    #[must_use]
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().and_then(|l| l.local_addr().ok())
    }

    #[must_use]
    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.ws.as_ref().and_then(|l| l.local_addr().ok())
    }

    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Serve every bound listener until one of them fails.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Io`] if a listener stops with an error.
    pub async fn serve(self) -> Result<(), BrokerError> {
        let Self { dispatcher, tcp, ws } = self;

        let tcp_task = {
            let dispatcher = dispatcher.clone();
            async move {
                match tcp {
                    Some(listener) => tcp::serve(listener, dispatcher).await,
                    None => Ok(()),
                }
            }
        };
        let ws_task = async move {
            match ws {
                Some(listener) => {
                    let app = routes::app(dispatcher).into_make_service_with_connect_info::<SocketAddr>();
                    axum::serve(listener, app).await
                }
                None => Ok(()),
            }
        };

        tokio::try_join!(tcp_task, ws_task)?;
        Ok(())
    }
}
