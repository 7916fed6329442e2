//! Name → connection table.
//!
//! Mutations happen under one write lock so that "check capacity, then
//! insert" and "remove only if still mine" are atomic. Readers take
//! snapshots and never hold the lock across a send.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::connection::Connection;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("registry is full ({0} processes)")]
    CapacityExceeded(usize),
}

#[derive(Clone)]
pub struct ProcessRegistry {
    processes: Arc<RwLock<HashMap<String, Arc<Connection>>>>,
    capacity: usize,
}

impl ProcessRegistry {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { processes: Arc::new(RwLock::new(HashMap::new())), capacity }
    }

    /// Bind `name` to `conn`. Returns the connection that previously held
    /// the name, if any. Replacing an existing name never counts against
    /// capacity.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CapacityExceeded`] when `name` is new and the
    /// table is full.
    pub async fn register(&self, name: &str, conn: Arc<Connection>) -> Result<Option<Arc<Connection>>, RegistryError> {
        let mut processes = self.processes.write().await;
        if !processes.contains_key(name) && processes.len() >= self.capacity {
            return Err(RegistryError::CapacityExceeded(self.capacity));
        }
        Ok(processes.insert(name.to_owned(), conn))
    }

    pub async fn remove(&self, name: &str) -> Option<Arc<Connection>> {
        self.processes.write().await.remove(name)
    }

    /// Remove `name` only while it is still bound to `conn`.
    pub async fn remove_if_current(&self, name: &str, conn: &Connection) -> bool {
        let mut processes = self.processes.write().await;
        if processes.get(name).is_some_and(|held| held.id() == conn.id()) {
            processes.remove(name);
            return true;
        }
        false
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Connection>> {
        self.processes.read().await.get(name).cloned()
    }

    /// True when `name` is bound to exactly `conn`.
    pub async fn is_current(&self, name: &str, conn: &Connection) -> bool {
        self.processes.read().await.get(name).is_some_and(|held| held.id() == conn.id())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.processes.read().await.contains_key(name)
    }

    /// Point-in-time copy of every registered connection.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.processes.read().await.values().cloned().collect()
    }

    /// Registered names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processes.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.processes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.processes.read().await.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
