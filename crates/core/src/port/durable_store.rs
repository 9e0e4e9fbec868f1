// Durable Store Port
// Key/value persistence collaborator: per-key atomicity, no ordering or
// transaction guarantees beyond that.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Durable store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Stored value is not valid JSON: {0}")]
    Corrupt(String),
}

/// Key/value store with byte-usage introspection
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read the value for a key, if present
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a value for a key (replaces any existing value)
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove a key; removing an absent key is not an error
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Bytes used by the given keys, or by the whole store when empty
    async fn bytes_in_use(&self, keys: &[&str]) -> Result<u64, StoreError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory store used throughout the unit tests
    #[derive(Default)]
    pub struct MemoryStore {
        map: Mutex<HashMap<String, Value>>,
        fail_writes: AtomicBool,
        write_count: AtomicUsize,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent set/remove fail with a backend error
        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// Number of successful set calls (for debounce assertions)
        pub fn write_count(&self) -> usize {
            self.write_count.load(Ordering::SeqCst)
        }

        /// Raw read bypassing the port, for test assertions
        pub fn peek(&self, key: &str) -> Option<Value> {
            self.map.lock().unwrap().get(key).cloned()
        }

        /// Raw write bypassing the port, for corrupt-record tests
        pub fn poke(&self, key: &str, value: Value) {
            self.map.lock().unwrap().insert(key.to_string(), value);
        }
    }

    #[async_trait]
    impl DurableStore for MemoryStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
            Ok(self.map.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("write failure injected".to_string()));
            }
            self.write_count.fetch_add(1, Ordering::SeqCst);
            self.map.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }

        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("write failure injected".to_string()));
            }
            self.map.lock().unwrap().remove(key);
            Ok(())
        }

        async fn bytes_in_use(&self, keys: &[&str]) -> Result<u64, StoreError> {
            let map = self.map.lock().unwrap();
            let sum = map
                .iter()
                .filter(|(k, _)| keys.is_empty() || keys.contains(&k.as_str()))
                .map(|(_, v)| v.to_string().len() as u64)
                .sum();
            Ok(sum)
        }
    }
}
