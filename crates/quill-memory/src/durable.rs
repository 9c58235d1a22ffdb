use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use crate::error::MemoryError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Namespaced key-value persistence behind the in-memory index.
///
/// Values are JSON strings. Callers treat every error as non-fatal.
pub trait DurableStore: Send + Sync {
    fn put(
        &self,
        namespace: &str,
        key: &str,
        value: String,
    ) -> BoxFuture<'_, Result<(), MemoryError>>;

    fn get(&self, namespace: &str, key: &str) -> BoxFuture<'_, Result<Option<String>, MemoryError>>;

    /// All `(key, value)` pairs in `namespace`, ordered by key.
    fn get_all(&self, namespace: &str) -> BoxFuture<'_, Result<Vec<(String, String)>, MemoryError>>;

    fn delete(&self, namespace: &str, key: &str) -> BoxFuture<'_, Result<(), MemoryError>>;

    fn clear(&self, namespace: &str) -> BoxFuture<'_, Result<(), MemoryError>>;
}

/// Process-local [`DurableStore`], used in tests and when no database is configured.
#[derive(Default)]
pub struct InMemoryDurableStore {
    namespaces: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl InMemoryDurableStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryDurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDurableStore").finish_non_exhaustive()
    }
}

fn poisoned(e: impl std::fmt::Display) -> MemoryError {
    MemoryError::Durable(e.to_string())
}

impl DurableStore for InMemoryDurableStore {
    fn put(
        &self,
        namespace: &str,
        key: &str,
        value: String,
    ) -> BoxFuture<'_, Result<(), MemoryError>> {
        let namespace = namespace.to_owned();
        let key = key.to_owned();
        Box::pin(async move {
            let mut ns = self.namespaces.write().map_err(poisoned)?;
            ns.entry(namespace).or_default().insert(key, value);
            Ok(())
        })
    }

    fn get(&self, namespace: &str, key: &str) -> BoxFuture<'_, Result<Option<String>, MemoryError>> {
        let namespace = namespace.to_owned();
        let key = key.to_owned();
        Box::pin(async move {
            let ns = self.namespaces.read().map_err(poisoned)?;
            Ok(ns.get(&namespace).and_then(|m| m.get(&key)).cloned())
        })
    }

    fn get_all(&self, namespace: &str) -> BoxFuture<'_, Result<Vec<(String, String)>, MemoryError>> {
        let namespace = namespace.to_owned();
        Box::pin(async move {
            let ns = self.namespaces.read().map_err(poisoned)?;
            Ok(ns
                .get(&namespace)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default())
        })
    }

    fn delete(&self, namespace: &str, key: &str) -> BoxFuture<'_, Result<(), MemoryError>> {
        let namespace = namespace.to_owned();
        let key = key.to_owned();
        Box::pin(async move {
            let mut ns = self.namespaces.write().map_err(poisoned)?;
            if let Some(m) = ns.get_mut(&namespace) {
                m.remove(&key);
            }
            Ok(())
        })
    }

    fn clear(&self, namespace: &str) -> BoxFuture<'_, Result<(), MemoryError>> {
        let namespace = namespace.to_owned();
        Box::pin(async move {
            let mut ns = self.namespaces.write().map_err(poisoned)?;
            ns.remove(&namespace);
            Ok(())
        })
    }
}
