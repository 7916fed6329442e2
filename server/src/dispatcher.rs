//! Broker dispatch: control traffic and point-to-point forwarding.
//!
//! DESIGN
//! ======
//! Listeners decode frames into [`Message`]s and call [`Dispatcher::handle`]
//! in arrival order for each connection, then [`Dispatcher::disconnect`]
//! once the connection ends. The dispatcher holds no per-connection state of
//! its own; everything lives in the [`ProcessRegistry`] and on the
//! [`Connection`].
//!
//! CONTROL TRAFFIC
//! ===============
//! - `process-register`: origin is the requested name, payload is the token.
//!   Success confirms to the registrant and broadcasts `{accepted: true}` to
//!   everyone else. A bad token, reserved name, or full registry replies
//!   `{accepted: false}` to the requester and broadcasts the same.
//! - `process-terminate`: payload is the token; removes the origin's binding
//!   and closes its holder.
//! - `request-processes-info`: replies with every registered name except the
//!   requester's own.
//!
//! FAILURE HANDLING
//! ================
//! A send that fails evicts the recipient. Eviction broadcasts a termination
//! notice, and a broadcast may itself uncover more dead recipients, so
//! broadcasts drain a work queue instead of recursing.

use std::collections::VecDeque;
use std::sync::Arc;

use frames::{
    BROKER_NAME, Message, MessageFactory, MessageStatus, MessageType, PROCESS_REGISTER, PROCESS_TERMINATE,
    ProcessUpdateData, REQUEST_PROCESSES_INFO, RemoteProcessData, UNKNOWN_ORIGIN, UNKNOWN_TARGET,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::connection::{Connection, Transport};
use crate::registry::{ProcessRegistry, RegistryError};

pub struct Dispatcher {
    config: BrokerConfig,
    registry: ProcessRegistry,
    factory: MessageFactory,
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        let registry = ProcessRegistry::new(config.max_processes);
        let factory = config.wire.factory();
        Self { config, registry, factory }
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Wrap a listener's outbound transport in a fresh, unregistered connection.
    #[must_use]
    pub fn connection(&self, transport: Box<dyn Transport>, peer: impl Into<String>) -> Arc<Connection> {
        Arc::new(Connection::new(transport, self.config.wire.framer(), peer))
    }

    /// Act on one decoded message from `conn`.
    pub async fn handle(&self, conn: &Arc<Connection>, message: Message) {
        if conn.is_disposed() {
            return;
        }
        if message.status == MessageStatus::MalformedMessageError {
            warn!(conn = %conn.id(), diagnostic = %message.data, "dispatch: discarding malformed frame");
            return;
        }

        if message.identifier == PROCESS_REGISTER {
            self.register(conn, &message).await;
            return;
        }
        if !conn.is_registered() {
            debug!(conn = %conn.id(), identifier = %message.identifier, "dispatch: ignoring message before registration");
            return;
        }
        match message.identifier.as_str() {
            PROCESS_TERMINATE => self.unregister(conn, &message).await,
            REQUEST_PROCESSES_INFO => self.list_processes(conn).await,
            _ => self.route(conn, message).await,
        }
    }

    /// Clean up after a connection whose socket has ended.
    pub async fn disconnect(&self, conn: &Arc<Connection>) {
        info!(conn = %conn.id(), name = %conn.name(), "dispatch: connection closed");
        self.evict(conn).await;
    }

    // =========================================================================
    // CONTROL
    // =========================================================================

    async fn register(&self, conn: &Arc<Connection>, message: &Message) {
        if conn.is_registered() {
            debug!(conn = %conn.id(), name = %conn.name(), "dispatch: ignoring repeat registration");
            return;
        }

        let name = message.origin.as_str();
        if !self.token_matches(conn, message) {
            warn!(conn = %conn.id(), %name, "dispatch: registration with invalid token");
            self.reject(conn, name).await;
            return;
        }
        if !is_registrable(name) {
            warn!(conn = %conn.id(), %name, "dispatch: registration with reserved name");
            self.reject(conn, name).await;
            return;
        }

        match self.registry.register(name, conn.clone()).await {
            Err(RegistryError::CapacityExceeded(max)) => {
                warn!(conn = %conn.id(), %name, max, "dispatch: registry full");
                self.reject(conn, name).await;
            }
            Ok(displaced) => {
                conn.mark_registered(name);
                if let Some(old) = displaced.filter(|old| old.id() != conn.id()) {
                    info!(conn = %conn.id(), displaced = %old.id(), %name, "dispatch: name taken over by new connection");
                    old.dispose();
                }
                info!(conn = %conn.id(), %name, peer = %conn.peer(), "dispatch: process registered");

                let update = ProcessUpdateData { accepted: true, name: name.to_owned() };
                self.send_update(conn, PROCESS_REGISTER, &update).await;
                self.broadcast(PROCESS_REGISTER, update, Some(conn.id())).await;
            }
        }
    }

    async fn reject(&self, conn: &Arc<Connection>, name: &str) {
        let update = ProcessUpdateData { accepted: false, name: name.to_owned() };
        self.send_update(conn, PROCESS_REGISTER, &update).await;
        self.broadcast(PROCESS_REGISTER, update, Some(conn.id())).await;
    }

    async fn unregister(&self, conn: &Arc<Connection>, message: &Message) {
        let name = message.origin.as_str();
        if !self.token_matches(conn, message) {
            warn!(conn = %conn.id(), %name, "dispatch: termination with invalid token");
            let update = ProcessUpdateData { accepted: false, name: name.to_owned() };
            self.broadcast(PROCESS_TERMINATE, update, None).await;
            return;
        }

        let Some(holder) = self.registry.remove(name).await else {
            debug!(conn = %conn.id(), %name, "dispatch: termination for unknown process");
            let update = ProcessUpdateData { accepted: false, name: name.to_owned() };
            self.broadcast(PROCESS_TERMINATE, update, None).await;
            return;
        };

        holder.dispose();
        info!(conn = %holder.id(), %name, "dispatch: process terminated");
        let update = ProcessUpdateData { accepted: true, name: name.to_owned() };
        self.broadcast(PROCESS_TERMINATE, update, None).await;
    }

    async fn list_processes(&self, conn: &Arc<Connection>) {
        let own = conn.name();
        let processes: Vec<RemoteProcessData> = self
            .registry
            .names()
            .await
            .into_iter()
            .filter(|name| *name != own && name != BROKER_NAME)
            .map(|name| RemoteProcessData { name })
            .collect();

        match self.factory.process_listing(own, &processes) {
            Ok(reply) => self.reply(conn, &reply).await,
            Err(e) => warn!(conn = %conn.id(), error = %e, "dispatch: failed to build process listing"),
        }
    }

    fn token_matches(&self, conn: &Connection, message: &Message) -> bool {
        match message.payload() {
            Ok(token) => token == self.config.token,
            Err(e) => {
                warn!(conn = %conn.id(), error = %e, "dispatch: unreadable control payload");
                false
            }
        }
    }

    // =========================================================================
    // FORWARDING
    // =========================================================================

    async fn route(&self, conn: &Arc<Connection>, mut message: Message) {
        if !self.registry.is_current(&message.origin, conn).await {
            debug!(conn = %conn.id(), origin = %message.origin, "dispatch: dropping message from unregistered origin");
            return;
        }

        let Some(target) = self.registry.get(&message.target).await else {
            debug!(origin = %message.origin, target = %message.target, id = message.id, "dispatch: target not registered");
            if message.kind == MessageType::Request {
                let reply = MessageFactory::failure(&message, MessageStatus::ProcessNotFound);
                self.reply(conn, &reply).await;
            }
            return;
        };

        message.normalize_status();
        if let Err(e) = target.send(&message).await {
            warn!(target = %message.target, error = %e, "dispatch: forward failed; evicting target");
            self.evict(&target).await;
            if message.kind == MessageType::Request {
                let reply = MessageFactory::failure(&message, MessageStatus::NetworkError);
                self.reply(conn, &reply).await;
            }
        }
    }

    // =========================================================================
    // DELIVERY
    // =========================================================================

    async fn send_update(&self, conn: &Arc<Connection>, identifier: &str, update: &ProcessUpdateData) {
        let target = if update.name.is_empty() { UNKNOWN_TARGET } else { update.name.as_str() };
        match self.factory.process_update(identifier, target, update) {
            Ok(message) => self.reply(conn, &message).await,
            Err(e) => warn!(conn = %conn.id(), error = %e, "dispatch: failed to build process update"),
        }
    }

    /// Send directly to `conn`, evicting it on failure.
    async fn reply(&self, conn: &Arc<Connection>, message: &Message) {
        if let Err(e) = conn.send(message).await {
            warn!(conn = %conn.id(), error = %e, "dispatch: reply failed; evicting");
            self.evict(conn).await;
        }
    }

    /// Send a process update to every registered connection except `exclude`.
    async fn broadcast(&self, identifier: &str, update: ProcessUpdateData, exclude: Option<Uuid>) {
        let mut queue = VecDeque::from([(identifier.to_owned(), update, exclude)]);

        while let Some((identifier, update, exclude)) = queue.pop_front() {
            for peer in self.registry.snapshot().await {
                if Some(peer.id()) == exclude {
                    continue;
                }
                let message = match self.factory.process_update(&identifier, peer.name(), &update) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "dispatch: failed to build broadcast");
                        return;
                    }
                };
                if let Err(e) = peer.send(&message).await {
                    warn!(conn = %peer.id(), name = %peer.name(), error = %e, "dispatch: broadcast failed; evicting");
                    if let Some(name) = self.forget(&peer).await {
                        queue.push_back((PROCESS_TERMINATE.to_owned(), ProcessUpdateData { accepted: true, name }, None));
                    }
                }
            }
        }
    }

    /// Dispose `conn` and, if it still held its name, announce the termination.
    async fn evict(&self, conn: &Arc<Connection>) {
        if let Some(name) = self.forget(conn).await {
            let update = ProcessUpdateData { accepted: true, name };
            self.broadcast(PROCESS_TERMINATE, update, None).await;
        }
    }

    /// Dispose `conn` and release its name if it still holds it.
    async fn forget(&self, conn: &Arc<Connection>) -> Option<String> {
        let name = conn.name();
        conn.dispose();
        if !name.is_empty() && self.registry.remove_if_current(&name, conn).await {
            info!(conn = %conn.id(), %name, "dispatch: process removed");
            return Some(name);
        }
        None
    }
}

/// Names the broker will never bind.
fn is_registrable(name: &str) -> bool {
    !name.trim().is_empty() && name != BROKER_NAME && name != UNKNOWN_ORIGIN && name != UNKNOWN_TARGET
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod tests;
