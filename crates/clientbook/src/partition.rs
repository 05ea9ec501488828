//! Partition codec.
//!
//! A partition is the JSON array stored under one key of the
//! [`KeyValueStore`]. A key that was never written reads as an empty
//! partition. Every write replaces the whole array.
//!
//! # Write ordering
//!
//! Writes to one key are serialized through a per-key async mutex, so a
//! read-modify-write started by [`Partitions::update`] never interleaves with
//! another write to the same key. Each write runs on its own task: if the
//! caller stops awaiting, the write still completes, it just goes unobserved.
//! A key's lock is dropped from the table once no task holds or awaits it, so
//! the table stays as small as the set of keys in flight.
//!
//! # Corrupt partitions
//!
//! A stored value that does not decode is never overwritten by a
//! read-modify-write. [`Partitions::discard_if_corrupt`] is the one way to
//! reset it, and it hands back what it threw away.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::KeyValueStore;

/// Default key of the client partition.
pub const DEFAULT_CLIENTS_KEY: &str = "Clientes";

/// Default key of the shared note partition.
pub const DEFAULT_NOTES_KEY: &str = "Anotações";

/// Default prefix of the per-client instrument partitions.
pub const DEFAULT_INSTRUMENTS_PREFIX: &str = "instruments";

/// Capacity of the change notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// The partition keys used by the registries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    clients: String,
    notes: String,
    instruments_prefix: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self::new(
            DEFAULT_CLIENTS_KEY,
            DEFAULT_NOTES_KEY,
            DEFAULT_INSTRUMENTS_PREFIX,
        )
    }
}

impl StorageKeys {
    /// Create a key set.
    #[must_use]
    pub fn new(clients: &str, notes: &str, instruments_prefix: &str) -> Self {
        Self {
            clients: clients.to_string(),
            notes: notes.to_string(),
            instruments_prefix: instruments_prefix.to_string(),
        }
    }

    /// Key of the client partition.
    #[must_use]
    pub fn clients(&self) -> &str {
        &self.clients
    }

    /// Key of the shared note partition.
    #[must_use]
    pub fn notes(&self) -> &str {
        &self.notes
    }

    /// Key of the instrument partition owned by `client_id`.
    #[must_use]
    pub fn instruments_for(&self, client_id: &str) -> String {
        format!("{}:{client_id}", self.instruments_prefix)
    }

    /// Whether `key` lies in the instrument partition namespace.
    #[must_use]
    pub fn is_instrument_key(&self, key: &str) -> bool {
        self.client_of(key).is_some()
    }

    /// The client id embedded in an instrument partition key.
    #[must_use]
    pub fn client_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.instruments_prefix.as_str())?
            .strip_prefix(':')
    }
}

/// Notification sent after a partition has been written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionChanged {
    /// The key that was written.
    pub key: String,
}

/// What an [`Partitions::update`] closure decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<R> {
    /// Persist the mutated partition, then return the value.
    Persist(R),
    /// Leave the stored value untouched and return the value.
    Unchanged(R),
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Reads and writes partitions on a key-value store.
///
/// Cheap to clone; clones share the store, the key locks and the change
/// channel.
#[derive(Debug, Clone)]
pub struct Partitions {
    store: Arc<dyn KeyValueStore>,
    locks: Arc<Mutex<HashMap<String, KeyLock>>>,
    changes: broadcast::Sender<PartitionChanged>,
}

impl Partitions {
    /// Create a codec over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
            changes,
        }
    }

    /// Subscribe to write notifications.
    ///
    /// Events are only sent after the new value has been stored.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PartitionChanged> {
        self.changes.subscribe()
    }

    /// Every key that holds a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.store.keys().await
    }

    /// Whether the value under `key` is set but does not decode as an array
    /// of `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn is_corrupt<T: DeserializeOwned>(&self, key: &str) -> Result<bool> {
        let raw = self.store.get(key).await?;
        Ok(raw.is_some_and(|raw| serde_json::from_str::<Vec<T>>(&raw).is_err()))
    }

    /// Reset the partition under `key` to empty if its value does not decode
    /// as an array of `T`.
    ///
    /// Returns the discarded value, or `None` if the partition was absent or
    /// readable and left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn discard_if_corrupt<T>(&self, key: &str) -> Result<Option<String>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = key.to_string();
        let this = self.clone();
        detached(async move {
            let lock = this.lock_for(&key)?;
            let _guard = lock.lock_owned().await;

            let Some(raw) = this.store.get(&key).await? else {
                return Ok(None);
            };
            if let Err(err) = serde_json::from_str::<Vec<T>>(&raw) {
                warn!(key = %key, bytes = raw.len(), error = %err, "Discarding corrupt partition");
                this.store_and_notify(&key, "[]").await?;
                return Ok(Some(raw));
            }
            Ok(None)
        })
        .await
    }

    /// Read and decode the partition under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptPartition`] if the stored value is not a JSON
    /// array of `T`, or a storage error if the store cannot be read.
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let raw = self.store.get(key).await?;
        decode(key, raw.as_deref())
    }

    /// Replace the partition under `key` with `records`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the store write fails.
    pub async fn write<T: Serialize>(&self, key: &str, records: &[T]) -> Result<()> {
        let encoded = serde_json::to_string(records)?;
        let key = key.to_string();
        let this = self.clone();
        detached(async move {
            let lock = this.lock_for(&key)?;
            let _guard = lock.lock_owned().await;
            this.store_and_notify(&key, &encoded).await
        })
        .await
    }

    /// Replace the partition under `key`, leaving a never-written key absent
    /// when `records` is empty.
    ///
    /// Returns whether the store was written.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the store access fails.
    pub async fn replace<T: Serialize>(&self, key: &str, records: &[T]) -> Result<bool> {
        let encoded = serde_json::to_string(records)?;
        let is_empty = records.is_empty();
        let key = key.to_string();
        let this = self.clone();
        detached(async move {
            let lock = this.lock_for(&key)?;
            let _guard = lock.lock_owned().await;
            if is_empty && this.store.get(&key).await?.is_none() {
                return Ok(false);
            }
            this.store_and_notify(&key, &encoded).await?;
            Ok(true)
        })
        .await
    }

    /// Read-modify-write the partition under `key`.
    ///
    /// `mutate` sees the whole decoded partition while the key is locked.
    /// When it returns [`Outcome::Persist`] the mutated partition replaces
    /// the stored one; an error or [`Outcome::Unchanged`] writes nothing.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, [`Error::CorruptPartition`] if the stored
    /// value cannot be decoded, or a storage error.
    pub async fn update<T, R, F>(&self, key: &str, mutate: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        R: Send + 'static,
        F: FnOnce(&mut Vec<T>) -> Result<Outcome<R>> + Send + 'static,
    {
        let key = key.to_string();
        let this = self.clone();
        detached(async move {
            let lock = this.lock_for(&key)?;
            let _guard = lock.lock_owned().await;

            let raw = this.store.get(&key).await?;
            let mut records: Vec<T> = decode(&key, raw.as_deref())?;
            match mutate(&mut records)? {
                Outcome::Persist(value) => {
                    let encoded = serde_json::to_string(&records)?;
                    this.store_and_notify(&key, &encoded).await?;
                    Ok(value)
                }
                Outcome::Unchanged(value) => {
                    debug!(key = %key, "Partition unchanged, skipping write");
                    Ok(value)
                }
            }
        })
        .await
    }

    async fn store_and_notify(&self, key: &str, encoded: &str) -> Result<()> {
        self.store.set(key, encoded).await?;
        debug!(key, bytes = encoded.len(), "Partition written");
        // No receivers is fine
        let _ = self.changes.send(PartitionChanged {
            key: key.to_string(),
        });
        Ok(())
    }

    fn lock_for(&self, key: &str) -> Result<KeyLock> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::internal("partition lock table poisoned"))?;
        // Only the table holds an idle lock; every holder or waiter has a clone.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(Arc::clone(locks.entry(key.to_string()).or_default()))
    }
}

/// Decode a raw partition value; `None` is the empty partition.
fn decode<T: DeserializeOwned>(key: &str, raw: Option<&str>) -> Result<Vec<T>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    serde_json::from_str(raw).map_err(|source| {
        warn!(key, error = %source, "Partition value does not decode");
        Error::CorruptPartition {
            key: key.to_string(),
            source,
        }
    })
}

/// Run `task` to completion on the runtime, even if the caller goes away.
async fn detached<R, Fut>(task: Fut) -> Result<R>
where
    R: Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    tokio::spawn(task)
        .await
        .map_err(|err| Error::internal(format!("partition task failed: {err}")))?
}
