//! Broker client: registration, correlated requests, and inbound dispatch.
//!
//! DESIGN
//! ======
//! A connected client runs one receive loop that frames inbound bytes and
//! routes each message:
//! - Broker control notices → registration confirmation, listing waiters,
//!   and [`ProcessEvent`] subscribers (synchronously, in order)
//! - Responses → [`PendingRequests`] by id
//! - Requests and notifications → the handler for their identifier, each on
//!   its own task so a slow handler never stalls the loop
//!
//! Outbound frames go through a bounded queue drained by the transport's
//! writer task, so concurrent callers never interleave bytes. Waiting for
//! queue space counts against the caller's deadline: a broker that stops
//! reading surfaces as [`TransmissionError::Timeout`], never a stuck call.
//!
//! The broker answers listing requests in order, so each listing reply
//! consumes exactly one queued waiter. A waiter whose caller gave up still
//! holds its place and swallows its own late reply.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use frames::{
    BROKER_NAME, Codec, Message, MessageFactory, MessageStatus, MessageType, PROCESS_REGISTER, PROCESS_TERMINATE,
    ProcessUpdateData, REQUEST_PROCESSES_INFO, RemoteProcessData,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, TransmissionError};
use crate::events::{EventSubscribers, ProcessEvent, SubscriptionId};
use crate::handlers::{HandlerRegistry, Transmission};
use crate::pending::PendingRequests;
use crate::transport::{self, Link};

pub struct BrokerClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    codec: Codec,
    factory: MessageFactory,
    outbound: mpsc::Sender<Vec<u8>>,
    pending: PendingRequests,
    handlers: HandlerRegistry,
    events: EventSubscribers,
    listings: Mutex<VecDeque<oneshot::Sender<Vec<String>>>>,
    registration: Mutex<Option<oneshot::Sender<bool>>>,
    shutdown: CancellationToken,
}

impl BrokerClient {
    /// Dial the broker and register under `config.name`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] for invalid settings,
    /// [`ClientError::Rejected`] when the broker refuses the registration,
    /// [`ClientError::Timeout`] when dialing or confirmation exceeds the
    /// connect timeout, or a transport error.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let shutdown = CancellationToken::new();
        let link = tokio::time::timeout(
            config.connect_timeout,
            transport::open(&config.endpoint, config.outbound_capacity, shutdown.clone()),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;
        Self::establish(config, link, shutdown).await
    }

    /// Register over an already-open link.
    pub(crate) async fn establish(config: ClientConfig, link: Link, shutdown: CancellationToken) -> Result<Self, ClientError> {
        let (registered_tx, registered_rx) = oneshot::channel();
        let inner = Arc::new(Inner {
            codec: config.wire.codec(),
            factory: config.wire.factory(),
            outbound: link.outbound,
            pending: PendingRequests::new(),
            handlers: HandlerRegistry::default(),
            events: EventSubscribers::default(),
            listings: Mutex::new(VecDeque::new()),
            registration: Mutex::new(Some(registered_tx)),
            shutdown,
            config,
        });
        tokio::spawn(receive_loop(inner.clone(), link.inbound));
        let client = Self { inner };

        let deadline = Instant::now() + client.inner.config.connect_timeout;
        let register = client.inner.factory.control(PROCESS_REGISTER, client.name(), &client.inner.config.token)?;
        client.inner.send(&register, deadline).await.map_err(|e| match e {
            TransmissionError::Timeout => ClientError::Timeout,
            _ => ClientError::Disconnected,
        })?;

        let accepted = match tokio::time::timeout_at(deadline, registered_rx).await {
            Err(_) => return Err(ClientError::Timeout),
            Ok(Err(_)) => return Err(ClientError::Disconnected),
            Ok(Ok(accepted)) => accepted,
        };
        if !accepted {
            return Err(ClientError::Rejected(client.name().to_owned()));
        }
        info!(name = %client.name(), "client: registered with broker");
        Ok(client)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.inner.shutdown.is_cancelled()
    }

    /// Handle inbound requests and notifications carrying `identifier`.
    pub fn on_transmission<F, Fut>(&self, identifier: impl Into<String>, handler: F)
    where
        F: Fn(Transmission) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        self.inner.handlers.insert(identifier, handler);
    }

    pub fn remove_transmission_handler(&self, identifier: &str) -> bool {
        self.inner.handlers.remove(identifier)
    }

    pub fn subscribe(&self, handler: impl Fn(&ProcessEvent) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.events.subscribe(handler)
    }

    /// Receive every [`ProcessEvent`] on a channel instead of a callback.
    pub fn events(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<ProcessEvent>) {
        self.inner.events.channel()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Send a text request to `target` and await its text response.
    ///
    /// # Errors
    ///
    /// Returns [`TransmissionError::Timeout`] when no response arrives in
    /// time, or the error matching a failure response's status.
    pub async fn transmit_value(
        &self,
        identifier: &str,
        target: &str,
        data: impl Into<String>,
    ) -> Result<String, TransmissionError> {
        let response = self.transmit(identifier, target, data.into()).await?;
        Ok(response.into_payload()?)
    }

    /// JSON-encode `value`, send it, and decode the JSON response.
    ///
    /// # Errors
    ///
    /// As [`BrokerClient::transmit_value`], plus [`TransmissionError::Json`].
    pub async fn transmit_object<T, R>(&self, identifier: &str, target: &str, value: &T) -> Result<R, TransmissionError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let data = serde_json::to_string(value)?;
        let text = self.transmit_value(identifier, target, data).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Fire-and-forget: the target's handler runs but sends no response.
    ///
    /// # Errors
    ///
    /// Returns [`TransmissionError::Disconnected`] if the message cannot be
    /// queued, or [`TransmissionError::Timeout`] if the outbound queue stays
    /// full for the whole request timeout.
    pub async fn notify(&self, identifier: &str, target: &str, data: impl Into<String>) -> Result<(), TransmissionError> {
        let mut message = self.inner.factory.request(identifier, self.name(), target, data.into())?;
        message.kind = MessageType::Unknown;
        self.inner.send(&message, self.deadline()).await
    }

    /// Send the same request to every other registered process and wait for
    /// all of them. Each peer's outcome is independent.
    ///
    /// # Errors
    ///
    /// Fails only if the process listing itself cannot be fetched.
    pub async fn broadcast(
        &self,
        identifier: &str,
        data: impl Into<String>,
    ) -> Result<Vec<(String, Result<String, TransmissionError>)>, TransmissionError> {
        let data = data.into();
        let peers = self.list_available_processes().await?;
        let requests = peers.into_iter().map(|peer| {
            let data = data.clone();
            async move {
                let outcome = self.transmit_value(identifier, &peer, data).await;
                (peer, outcome)
            }
        });
        Ok(futures::future::join_all(requests).await)
    }

    /// Names of every other registered process.
    ///
    /// # Errors
    ///
    /// Returns [`TransmissionError::Timeout`] or
    /// [`TransmissionError::Disconnected`].
    pub async fn list_available_processes(&self) -> Result<Vec<String>, TransmissionError> {
        let deadline = self.deadline();
        let request = self.inner.factory.control(REQUEST_PROCESSES_INFO, self.name(), "")?;
        let bytes = self.inner.codec.encode_frame(&request)?;
        let permit = self.inner.reserve(deadline).await?;

        // Queue the waiter and the request together so waiter order matches
        // wire order.
        let (tx, rx) = oneshot::channel();
        {
            let mut listings = self.inner.listings.lock().unwrap_or_else(PoisonError::into_inner);
            listings.push_back(tx);
            permit.send(bytes);
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Err(_) => Err(TransmissionError::Timeout),
            Ok(Err(_)) => Err(TransmissionError::Disconnected),
            Ok(Ok(names)) => Ok(names),
        }
    }

    /// Unregister and close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Codec`] if the termination request cannot be
    /// built. A connection that is already gone is not an error.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        if self.inner.shutdown.is_cancelled() {
            return Ok(());
        }
        let terminate = self.inner.factory.control(PROCESS_TERMINATE, self.name(), &self.inner.config.token)?;
        if let Err(e) = self.inner.send(&terminate, self.deadline()).await {
            debug!(error = %e, "client: termination not sent");
        }
        self.inner.shutdown.cancel();
        Ok(())
    }

    async fn transmit(&self, identifier: &str, target: &str, data: String) -> Result<Message, TransmissionError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TransmissionError::Disconnected);
        }
        let deadline = self.deadline();
        let request = self.inner.factory.request(identifier, self.name(), target, data)?;
        let completion = self.inner.pending.register(request.id, self.inner.config.request_timeout);
        if let Err(e) = self.inner.send(&request, deadline).await {
            self.inner.pending.fail(request.id, e.clone());
            return Err(e);
        }
        completion.await.unwrap_or(Err(TransmissionError::Disconnected))
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.inner.config.request_timeout
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    /// Queue `message`, giving up at `deadline` if the queue stays full.
    async fn send(&self, message: &Message, deadline: Instant) -> Result<(), TransmissionError> {
        let bytes = self.codec.encode_frame(message)?;
        self.reserve(deadline).await?.send(bytes);
        Ok(())
    }

    async fn reserve(&self, deadline: Instant) -> Result<mpsc::Permit<'_, Vec<u8>>, TransmissionError> {
        match tokio::time::timeout_at(deadline, self.outbound.reserve()).await {
            Err(_) => {
                warn!(name = %self.config.name, "client: outbound queue full until deadline");
                Err(TransmissionError::Timeout)
            }
            Ok(Err(_)) => Err(TransmissionError::Disconnected),
            Ok(Ok(permit)) => Ok(permit),
        }
    }

    fn dispatch(self: &Arc<Self>, message: Message) {
        if message.status == MessageStatus::MalformedMessageError {
            warn!(diagnostic = %message.data, "client: discarding malformed frame");
            return;
        }
        if message.origin == BROKER_NAME && message.is_control() {
            self.handle_control(&message);
            return;
        }
        match message.kind {
            MessageType::Response => {
                self.pending.resolve(message);
            }
            MessageType::Request => self.serve(message, true),
            MessageType::Unknown => self.serve(message, false),
        }
    }

    fn handle_control(&self, message: &Message) {
        match message.identifier.as_str() {
            PROCESS_REGISTER => {
                let Some(update) = parse::<ProcessUpdateData>(message) else { return };
                if update.name == self.config.name {
                    let waiter = self.registration.lock().unwrap_or_else(PoisonError::into_inner).take();
                    if let Some(waiter) = waiter {
                        let _ = waiter.send(update.accepted);
                        return;
                    }
                }
                if update.accepted {
                    self.events.emit(&ProcessEvent::Registered(update.name));
                } else {
                    debug!(name = %update.name, "client: peer registration rejected");
                }
            }
            PROCESS_TERMINATE => {
                let Some(update) = parse::<ProcessUpdateData>(message) else { return };
                if update.accepted {
                    self.events.emit(&ProcessEvent::Ended(update.name));
                }
            }
            REQUEST_PROCESSES_INFO => {
                let Some(processes) = parse::<Vec<RemoteProcessData>>(message) else { return };
                let names: Vec<String> = processes.into_iter().map(|p| p.name).collect();
                let waiter = self.listings.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
                match waiter {
                    Some(waiter) => {
                        if waiter.send(names.clone()).is_err() {
                            debug!("client: dropping listing reply for abandoned request");
                        }
                    }
                    None => debug!("client: listing reply with no waiter"),
                }
                self.events.emit(&ProcessEvent::Fetched(names));
            }
            _ => {}
        }
    }

    fn serve(self: &Arc<Self>, message: Message, reply: bool) {
        let handler = self.handlers.get(&message.identifier);
        let inner = self.clone();
        tokio::spawn(async move {
            let outcome = match handler {
                None => Err(format!("no handler registered for {:?}", message.identifier)),
                Some(handler) => match message.payload() {
                    Ok(data) => {
                        let transmission = Transmission {
                            id: message.id,
                            origin: message.origin.clone(),
                            identifier: message.identifier.clone(),
                            data: data.to_owned(),
                        };
                        (*handler)(transmission).await
                    }
                    Err(e) => Err(e.to_string()),
                },
            };

            if !reply {
                if let Err(e) = outcome {
                    debug!(identifier = %message.identifier, origin = %message.origin, error = %e, "client: notification handler failed");
                }
                return;
            }
            match inner.factory.response(&message, inner.config.name.clone(), outcome) {
                Ok(response) => {
                    let deadline = Instant::now() + inner.config.request_timeout;
                    if let Err(e) = inner.send(&response, deadline).await {
                        debug!(id = message.id, error = %e, "client: response not sent");
                    }
                }
                Err(e) => warn!(id = message.id, error = %e, "client: failed to build response"),
            }
        });
    }
}

fn parse<T: DeserializeOwned>(message: &Message) -> Option<T> {
    let parsed = message
        .payload()
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str(text).map_err(|e| e.to_string()));
    match parsed {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(identifier = %message.identifier, error = %e, "client: unreadable control payload");
            None
        }
    }
}

async fn receive_loop(inner: Arc<Inner>, mut inbound: mpsc::Receiver<Vec<u8>>) {
    let mut framer = inner.config.wire.framer();
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            chunk = inbound.recv() => {
                let Some(chunk) = chunk else { break };
                for message in framer.append(&chunk) {
                    inner.dispatch(message);
                }
            }
        }
    }

    inner.shutdown.cancel();
    inner.registration.lock().unwrap_or_else(PoisonError::into_inner).take();
    inner.listings.lock().unwrap_or_else(PoisonError::into_inner).clear();
    inner.pending.fail_all(&TransmissionError::Disconnected);
    info!(name = %inner.config.name, "client: disconnected from broker");
    inner.events.emit(&ProcessEvent::Disconnected);
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
