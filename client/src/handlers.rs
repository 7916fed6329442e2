use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use futures::future::BoxFuture;

/// An inbound request or notification as a handler sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transmission {
    pub id: i64,
    pub origin: String,
    pub identifier: String,
    pub data: String,
}

/// `Ok` text becomes a success response, `Err` text a target error.
pub type HandlerFuture = BoxFuture<'static, Result<String, String>>;

pub(crate) type Handler = Arc<dyn Fn(Transmission) -> HandlerFuture + Send + Sync>;

/// Identifier → handler table.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
}

impl HandlerRegistry {
    /// Install `handler` for `identifier`, replacing any previous one.
    pub fn insert<F, Fut>(&self, identifier: impl Into<String>, handler: F)
    where
        F: Fn(Transmission) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |transmission| handler(transmission).boxed());
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.into(), handler);
    }

    pub fn remove(&self, identifier: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identifier)
            .is_some()
    }

    pub(crate) fn get(&self, identifier: &str) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned()
    }
}
