// Coalescing write scheduler
//
// Rapid writes to the same storage key collapse into one delayed flush of
// the most recent value. State transitions that must survive a crash use
// the flush-now path instead.

use crate::port::{DurableStore, StoreError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

struct Pending {
    value: Value,
    flusher: tokio::task::JoinHandle<()>,
}

/// Key -> latest pending value -> scheduled flush
pub struct DebouncedWriter {
    store: Arc<dyn DurableStore>,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
}

impl DebouncedWriter {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule a write; an already-pending key just gets its value replaced
    /// and keeps the original flush deadline
    pub fn schedule(&self, key: &str, value: Value, delay: Duration) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = pending.get_mut(key) {
            entry.value = value;
            return;
        }

        let store = Arc::clone(&self.store);
        let map = Arc::clone(&self.pending);
        let flush_key = key.to_string();
        let flusher = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let value = map
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&flush_key)
                .map(|p| p.value);
            if let Some(value) = value {
                if let Err(e) = store.set(&flush_key, value).await {
                    warn!(key = %flush_key, error = %e, "Debounced flush failed");
                }
            }
        });

        pending.insert(
            key.to_string(),
            Pending {
                value,
                flusher,
            },
        );
    }

    /// Write immediately, cancelling any pending flush for the key
    pub async fn flush_now(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.cancel(key);
        self.store.set(key, value).await
    }

    /// Drop any pending write for the key
    pub fn cancel(&self, key: &str) {
        if let Some(entry) = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
        {
            entry.flusher.abort();
        }
    }

    /// The not-yet-flushed value for a key, if one is scheduled
    pub fn pending_value(&self, key: &str) -> Option<Value> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|p| p.value.clone())
    }

    /// Flush everything pending; used at shutdown
    pub async fn flush_all(&self) {
        let drained: Vec<(String, Value)> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending
                .drain()
                .map(|(key, entry)| {
                    entry.flusher.abort();
                    (key, entry.value)
                })
                .collect()
        };
        for (key, value) in drained {
            if let Err(e) = self.store.set(&key, value).await {
                warn!(key = %key, error = %e, "Shutdown flush failed");
            }
        }
    }
}
