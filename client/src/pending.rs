//! Correlation table for outstanding requests.
//!
//! Every entry is completed exactly once: by its response, by its expiry
//! timer, or by [`PendingRequests::fail_all`] when the connection ends.
//! Whichever removes the entry first wins and the others find nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use frames::Message;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::TransmissionError;

pub type Completion = oneshot::Receiver<Result<Message, TransmissionError>>;

struct Entry {
    completion: oneshot::Sender<Result<Message, TransmissionError>>,
    timer: Option<AbortHandle>,
}

#[derive(Clone, Default)]
pub struct PendingRequests {
    entries: Arc<Mutex<HashMap<i64, Entry>>>,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `id` and start its expiry timer. Must be called inside a tokio
    /// runtime.
    pub fn register(&self, id: i64, timeout: Duration) -> Completion {
        let (tx, rx) = oneshot::channel();
        let replaced = self.lock().insert(id, Entry { completion: tx, timer: None });
        if let Some(old) = replaced {
            Self::finish(old, Err(TransmissionError::Disconnected));
        }

        let this = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            this.expire(id);
        });
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.timer = Some(timer.abort_handle());
        }
        rx
    }

    /// Complete the entry matching `message.id`. Failure statuses complete
    /// it with the matching [`TransmissionError`]. Returns false when no
    /// entry was waiting.
    pub fn resolve(&self, message: Message) -> bool {
        let Some(entry) = self.lock().remove(&message.id) else {
            debug!(id = message.id, origin = %message.origin, "pending: dropping unmatched response");
            return false;
        };
        let outcome = if message.has_exception() {
            Err(TransmissionError::from_status(message.status, message.error))
        } else {
            Ok(message)
        };
        Self::finish(entry, outcome);
        true
    }

    /// Complete `id` with [`TransmissionError::Timeout`] if still waiting.
    pub fn expire(&self, id: i64) -> bool {
        let expired = self.fail(id, TransmissionError::Timeout);
        if expired {
            debug!(id, "pending: request timed out");
        }
        expired
    }

    /// Complete `id` with `error` if still waiting.
    pub fn fail(&self, id: i64, error: TransmissionError) -> bool {
        let Some(entry) = self.lock().remove(&id) else {
            return false;
        };
        Self::finish(entry, Err(error));
        true
    }

    /// Complete every waiting entry with `error`.
    pub fn fail_all(&self, error: &TransmissionError) {
        let drained: Vec<Entry> = self.lock().drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            Self::finish(entry, Err(error.clone()));
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn finish(entry: Entry, outcome: Result<Message, TransmissionError>) {
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        // The caller may have stopped waiting; that is not an error.
        let _ = entry.completion.send(outcome);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "pending_test.rs"]
mod tests;
