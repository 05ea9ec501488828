//! Key-value storage backends.
//!
//! The persistence core needs little from the host: read the value stored
//! under a key, replace it, and list the keys that are set (for repair and
//! status). [`KeyValueStore`] captures that contract; [`MemoryStore`] and
//! [`SqliteStore`] implement it.

pub mod migrations;
pub mod schema;
mod sqlite;

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};

pub use sqlite::{SqliteStore, StoreStats};

/// Device-local key-value store.
///
/// Values are UTF-8 JSON text. A key that was never set reads as `None`.
#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Get the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be written.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// All keys currently set, in sorted order.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory store, used by tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| Error::internal("memory store lock poisoned"))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
