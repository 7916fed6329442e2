//! Process lifecycle notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Another process registered.
    Registered(String),
    /// A process unregistered or dropped off.
    Ended(String),
    /// A process listing arrived.
    Fetched(Vec<String>),
    /// This client's own connection ended.
    Disconnected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&ProcessEvent) + Send + Sync>;

/// Ordered subscriber list. Handlers run synchronously on the emitting task
/// in subscription order.
#[derive(Default)]
pub struct EventSubscribers {
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
    next_id: AtomicU64,
}

impl EventSubscribers {
    pub fn subscribe(&self, handler: impl Fn(&ProcessEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Forward every event into an unbounded channel.
    pub fn channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub fn emit(&self, event: &ProcessEvent) {
        // Snapshot so a handler may subscribe or unsubscribe without deadlocking.
        let snapshot: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in snapshot {
            handler(event);
        }
    }
}
