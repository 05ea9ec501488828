//! The notebook: one store, three registries and the backup coordinator.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::backup::BackupCoordinator;
use crate::config::Config;
use crate::error::Result;
use crate::model::{Client, Clock, Instrument, Note};
use crate::partition::{PartitionChanged, Partitions, StorageKeys};
use crate::registry::{ClientRegistry, InstrumentRegistry, NoteRegistry};
use crate::store::{KeyValueStore, MemoryStore, SqliteStore};

/// What a cascading removal deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// Clients removed.
    pub clients: usize,
    /// Instruments removed.
    pub instruments: usize,
    /// Notes removed.
    pub notes: usize,
}

/// A partition that [`Notebook::repair`] reset to empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discarded {
    /// The partition key.
    pub key: String,
    /// The value it held, exactly as stored.
    pub value: String,
}

/// Entry point to the client book.
///
/// Plain removals on the registries never touch descendants. The
/// `*_cascade` methods here are the only operations that do.
#[derive(Debug, Clone)]
pub struct Notebook {
    partitions: Partitions,
    keys: Arc<StorageKeys>,
    clients: ClientRegistry,
    instruments: InstrumentRegistry,
    notes: NoteRegistry,
}

impl Notebook {
    /// Build a notebook over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, keys: StorageKeys, clock: Clock) -> Self {
        let partitions = Partitions::new(store);
        let keys = Arc::new(keys);
        let clock = Arc::new(clock);
        Self {
            clients: ClientRegistry::new(partitions.clone(), Arc::clone(&keys), Arc::clone(&clock)),
            instruments: InstrumentRegistry::new(
                partitions.clone(),
                Arc::clone(&keys),
                Arc::clone(&clock),
            ),
            notes: NoteRegistry::new(partitions.clone(), Arc::clone(&keys), clock),
            partitions,
            keys,
        }
    }

    /// Build a notebook over `store` with the keys and timestamp format of
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the timestamp format is invalid.
    pub fn with_config(store: Arc<dyn KeyValueStore>, config: &Config) -> Result<Self> {
        let clock = Clock::new(config.records.timestamp_format.clone())?;
        Ok(Self::new(store, config.keys(), clock))
    }

    /// Open the `SQLite` database named by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the configuration
    /// is invalid.
    pub fn open(config: &Config) -> Result<Self> {
        let store = SqliteStore::open(config.database_path())?;
        Self::with_config(Arc::new(store), config)
    }

    /// A notebook backed by memory, with default keys.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            StorageKeys::default(),
            Clock::default(),
        )
    }

    /// The client registry.
    #[must_use]
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// The instrument registry.
    #[must_use]
    pub fn instruments(&self) -> &InstrumentRegistry {
        &self.instruments
    }

    /// The note registry.
    #[must_use]
    pub fn notes(&self) -> &NoteRegistry {
        &self.notes
    }

    /// A backup coordinator over this notebook's registries.
    #[must_use]
    pub fn backup(&self) -> BackupCoordinator {
        BackupCoordinator::new(
            self.clients.clone(),
            self.instruments.clone(),
            self.notes.clone(),
        )
    }

    /// Subscribe to partition write notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PartitionChanged> {
        self.partitions.subscribe()
    }

    /// Keys of the partitions whose stored value does not decode.
    ///
    /// Reads and writes on these partitions fail with
    /// [`Error::CorruptPartition`](crate::Error::CorruptPartition) until they
    /// are repaired.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn check(&self) -> Result<Vec<String>> {
        let mut corrupt = Vec::new();
        for key in self.partitions.keys().await? {
            let is_corrupt = if key == self.keys.clients() {
                self.partitions.is_corrupt::<Client>(&key).await?
            } else if key == self.keys.notes() {
                self.partitions.is_corrupt::<Note>(&key).await?
            } else if self.keys.is_instrument_key(&key) {
                self.partitions.is_corrupt::<Instrument>(&key).await?
            } else {
                false
            };
            if is_corrupt {
                corrupt.push(key);
            }
        }
        Ok(corrupt)
    }

    /// Reset every corrupt partition to empty.
    ///
    /// Returns what was thrown away so it can be kept or inspected. Records
    /// in a discarded partition are lost to the registries; partitions that
    /// decode are not touched.
    ///
    /// # Errors
    ///
    /// Returns the first storage error; partitions reset before it stay reset.
    pub async fn repair(&self) -> Result<Vec<Discarded>> {
        let mut discarded = Vec::new();
        for key in self.check().await? {
            let value = if key == self.keys.clients() {
                self.partitions.discard_if_corrupt::<Client>(&key).await?
            } else if key == self.keys.notes() {
                self.partitions.discard_if_corrupt::<Note>(&key).await?
            } else {
                self.partitions.discard_if_corrupt::<Instrument>(&key).await?
            };
            if let Some(value) = value {
                discarded.push(Discarded { key, value });
            }
        }

        if !discarded.is_empty() {
            warn!(partitions = discarded.len(), "Corrupt partitions reset to empty");
        }
        Ok(discarded)
    }

    /// Remove a client together with its instruments and their notes.
    ///
    /// Descendants go first, so an interrupted cascade leaves the client in
    /// place and can be run again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) (nothing written)
    /// if the client does not exist, or the first failing step's error.
    pub async fn remove_client_cascade(&self, client_id: &str) -> Result<CascadeReport> {
        self.clients.get(client_id).await?;

        let mut report = CascadeReport::default();
        for instrument in self.instruments.list(client_id).await? {
            report.notes += self.notes.remove_for(&instrument.id).await?;
        }
        report.instruments = self.instruments.clear(client_id).await?.len();
        self.clients.remove(client_id).await?;
        report.clients = 1;

        info!(
            client_id,
            instruments = report.instruments,
            notes = report.notes,
            "Client removed with descendants"
        );
        Ok(report)
    }

    /// Remove an instrument together with its notes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) (nothing written)
    /// if the client has no such instrument, or the first failing step's
    /// error.
    pub async fn remove_instrument_cascade(
        &self,
        client_id: &str,
        instrument_id: &str,
    ) -> Result<CascadeReport> {
        self.instruments.get(client_id, instrument_id).await?;

        let notes = self.notes.remove_for(instrument_id).await?;
        self.instruments.remove(client_id, instrument_id).await?;

        info!(client_id, instrument_id, notes, "Instrument removed with notes");
        Ok(CascadeReport {
            clients: 0,
            instruments: 1,
            notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registries_share_one_store() {
        let notebook = Notebook::in_memory();
        let ana = notebook.clients().add("Ana").await.unwrap();
        let violino = notebook.instruments().add(&ana.id, "Violino").await.unwrap();
        notebook
            .notes()
            .upsert(&violino.id, "string trocada hoje", None)
            .await
            .unwrap();

        let clone = notebook.clone();
        assert_eq!(clone.clients().list().await.unwrap(), vec![ana.clone()]);
        assert_eq!(clone.instruments().list(&ana.id).await.unwrap(), vec![violino.clone()]);
        assert_eq!(clone.notes().list_for(&violino.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_client_cascade() {
        let notebook = Notebook::in_memory();
        let ana = notebook.clients().add("Ana").await.unwrap();
        let bia = notebook.clients().add("Bia").await.unwrap();
        let violino = notebook.instruments().add(&ana.id, "Violino").await.unwrap();
        let viola = notebook.instruments().add(&ana.id, "Viola").await.unwrap();
        let cello = notebook.instruments().add(&bia.id, "Cello").await.unwrap();
        for instrument in [&violino, &violino, &viola, &cello] {
            notebook.notes().upsert(&instrument.id, "n", None).await.unwrap();
        }

        let report = notebook.remove_client_cascade(&ana.id).await.unwrap();

        assert_eq!(
            report,
            CascadeReport {
                clients: 1,
                instruments: 2,
                notes: 3,
            }
        );
        assert_eq!(notebook.clients().list().await.unwrap(), vec![bia.clone()]);
        assert!(notebook.instruments().list(&ana.id).await.unwrap().is_empty());
        assert_eq!(notebook.notes().all().await.unwrap().len(), 1);
        assert_eq!(notebook.notes().list_for(&cello.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_client_cascade_unknown_is_not_found() {
        let notebook = Notebook::in_memory();
        let err = notebook.remove_client_cascade("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_remove_instrument_cascade() {
        let notebook = Notebook::in_memory();
        let ana = notebook.clients().add("Ana").await.unwrap();
        let violino = notebook.instruments().add(&ana.id, "Violino").await.unwrap();
        let viola = notebook.instruments().add(&ana.id, "Viola").await.unwrap();
        notebook.notes().upsert(&violino.id, "a", None).await.unwrap();
        notebook.notes().upsert(&viola.id, "b", None).await.unwrap();

        let report = notebook
            .remove_instrument_cascade(&ana.id, &violino.id)
            .await
            .unwrap();

        assert_eq!(report.instruments, 1);
        assert_eq!(report.notes, 1);
        assert_eq!(notebook.instruments().list(&ana.id).await.unwrap(), vec![viola.clone()]);
        assert!(notebook.notes().list_for(&violino.id).await.unwrap().is_empty());
        assert_eq!(notebook.notes().list_for(&viola.id).await.unwrap().len(), 1);

        assert!(notebook
            .remove_instrument_cascade(&ana.id, &violino.id)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_subscribe_sees_registry_writes() {
        let notebook = Notebook::in_memory();
        let mut changes = notebook.subscribe();

        notebook.clients().add("Ana").await.unwrap();
        assert_eq!(changes.recv().await.unwrap().key, "Clientes");
    }

    #[tokio::test]
    async fn test_repair_makes_corrupt_partitions_writable() {
        crate::logging::init_test_logging();
        let store = Arc::new(MemoryStore::new());
        let notebook = Notebook::new(store.clone(), StorageKeys::default(), Clock::default());
        let ana = notebook.clients().add("Ana").await.unwrap();
        let violino = notebook.instruments().add(&ana.id, "Violino").await.unwrap();
        store.set("Clientes", "{broken").await.unwrap();
        store.set("Anotações", r#"[{"text":"no ids"}]"#).await.unwrap();
        store.set("unrelated", "not json").await.unwrap();

        assert!(notebook.clients().add("Bia").await.unwrap_err().is_corrupt_partition());
        assert!(notebook.clients().list().await.unwrap_err().is_corrupt_partition());
        assert_eq!(
            notebook.check().await.unwrap(),
            vec!["Anotações".to_string(), "Clientes".to_string()]
        );

        let discarded = notebook.repair().await.unwrap();
        assert_eq!(
            discarded,
            vec![
                Discarded {
                    key: "Anotações".to_string(),
                    value: r#"[{"text":"no ids"}]"#.to_string(),
                },
                Discarded {
                    key: "Clientes".to_string(),
                    value: "{broken".to_string(),
                },
            ]
        );
        assert!(notebook.check().await.unwrap().is_empty());
        assert_eq!(store.get("unrelated").await.unwrap().as_deref(), Some("not json"));

        assert!(notebook.clients().list().await.unwrap().is_empty());
        let bia = notebook.clients().add("Bia").await.unwrap();
        assert_eq!(notebook.clients().list().await.unwrap(), vec![bia]);
        notebook.notes().upsert(&violino.id, "a", None).await.unwrap();
        assert_eq!(
            notebook.instruments().list(&ana.id).await.unwrap(),
            vec![violino]
        );
        assert!(notebook.repair().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_finds_corrupt_instrument_partition() {
        let store = Arc::new(MemoryStore::new());
        let notebook = Notebook::new(store.clone(), StorageKeys::default(), Clock::default());
        notebook.clients().add("Ana").await.unwrap();
        store.set("instruments:C1", r#"[{"name":"x"}]"#).await.unwrap();

        assert_eq!(notebook.check().await.unwrap(), vec!["instruments:C1".to_string()]);
        let discarded = notebook.repair().await.unwrap();
        assert_eq!(discarded[0].key, "instruments:C1");
        assert!(notebook.instruments().list("C1").await.unwrap().is_empty());
    }

    #[test]
    fn test_with_config_rejects_bad_format() {
        let mut config = Config::default();
        config.records.timestamp_format = "%Q".to_string();
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        assert!(Notebook::with_config(store, &config).is_err());
    }
}
