//! Whole-notebook backup and restore.
//!
//! A backup is one JSON document holding the client partition, every
//! instrument reachable from it (flattened, each carrying its `clientId`),
//! and the shared note partition. Restoring overwrites every partition the
//! document touches; it does not merge.
//!
//! Records travel as [`Stored`] values both ways, so exporting and then
//! restoring leaves every partition byte-for-byte as it was.

mod artifact;

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tracing::{info, warn};

pub use artifact::{ArtifactStore, FileArtifacts};

use crate::error::{Error, Result};
use crate::model::{Client, Instrument, Note, Record, Stored};
use crate::registry::{ensure_unique_ids, ClientRegistry, InstrumentRegistry, NoteRegistry};

/// The serialized form of a whole notebook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    /// The client partition.
    pub clients: Vec<Stored<Client>>,
    /// Instruments of every exported client, in client order.
    ///
    /// Each must carry its `clientId`. An `id` may be missing; the import
    /// assigns one.
    pub instruments: Vec<Stored<Instrument>>,
    /// The shared note partition.
    pub notes: Vec<Stored<Note>>,
}

/// The top level of a document, with each field still undecoded.
#[derive(Deserialize)]
struct RawDocument {
    clients: Option<Box<RawValue>>,
    instruments: Option<Box<RawValue>>,
    notes: Option<Box<RawValue>>,
}

impl BackupDocument {
    /// Parse and check a backup document.
    ///
    /// All three fields must be present and hold arrays of well-formed
    /// records. Ids must be unique per partition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] describing the first problem found.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let top: Box<RawValue> = serde_json::from_slice(bytes)
            .map_err(|err| Error::validation(format!("not valid JSON: {err}")))?;
        if !top.get().starts_with('{') {
            return Err(Error::validation("top level must be an object"));
        }
        let fields: RawDocument = serde_json::from_str(top.get())
            .map_err(|err| Error::validation(err.to_string()))?;

        let document = Self {
            clients: take_array(fields.clients.as_deref(), "clients")?,
            instruments: take_array(fields.instruments.as_deref(), "instruments")?,
            notes: take_array(fields.notes.as_deref(), "notes")?,
        };
        document.validate()?;
        Ok(document)
    }

    /// Check that ids are unique per partition.
    ///
    /// Instruments without an id are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first repeated id.
    pub fn validate(&self) -> Result<()> {
        ensure_unique_ids(&self.clients)?;
        ensure_unique_ids(&self.notes)?;

        let mut seen = HashSet::new();
        for instrument in self.instruments.iter().filter(|i| !i.id.is_empty()) {
            if !seen.insert((instrument.client_id.as_str(), instrument.id.as_str())) {
                return Err(Error::validation(format!(
                    "duplicate {} id '{}' for client '{}'",
                    Instrument::KIND,
                    instrument.id,
                    instrument.client_id
                )));
            }
        }
        Ok(())
    }

    /// Compact UTF-8 JSON encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be serialized.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Record counts of this document.
    #[must_use]
    pub fn summary(&self) -> BackupSummary {
        BackupSummary {
            clients: self.clients.len(),
            instruments: self.instruments.len(),
            notes: self.notes.len(),
        }
    }
}

fn take_array<T: DeserializeOwned>(raw: Option<&RawValue>, name: &str) -> Result<Vec<Stored<T>>> {
    let Some(raw) = raw else {
        return Err(Error::validation(format!("missing field '{name}'")));
    };
    if !raw.get().starts_with('[') {
        return Err(Error::validation(format!("field '{name}' must be an array")));
    }
    serde_json::from_str(raw.get())
        .map_err(|err| Error::validation(format!("field '{name}': {err}")))
}

/// Record counts moved by an export or import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackupSummary {
    /// Number of clients.
    pub clients: usize,
    /// Number of instruments.
    pub instruments: usize,
    /// Number of notes.
    pub notes: usize,
}

/// Exports and restores whole notebooks.
#[derive(Debug, Clone)]
pub struct BackupCoordinator {
    clients: ClientRegistry,
    instruments: InstrumentRegistry,
    notes: NoteRegistry,
}

impl BackupCoordinator {
    /// Create a coordinator over the three registries.
    #[must_use]
    pub fn new(clients: ClientRegistry, instruments: InstrumentRegistry, notes: NoteRegistry) -> Self {
        Self {
            clients,
            instruments,
            notes,
        }
    }

    /// Snapshot every partition into a document.
    ///
    /// Instruments of clients that are no longer listed are not exported.
    ///
    /// # Errors
    ///
    /// Returns an error if any partition cannot be read or decoded.
    pub async fn export(&self) -> Result<BackupDocument> {
        let clients = self.clients.export().await?;
        let ids: Vec<String> = clients.iter().map(|client| client.id.clone()).collect();
        let instruments = self.instruments.export(&ids).await?;
        let notes = self.notes.export().await?;

        Ok(BackupDocument {
            clients,
            instruments,
            notes,
        })
    }

    /// Export and hand the encoded document to `artifacts`.
    ///
    /// Returns the artifact location and what was exported.
    ///
    /// # Errors
    ///
    /// Returns an error if the export or the artifact write fails.
    pub async fn export_to(&self, artifacts: &dyn ArtifactStore) -> Result<(String, BackupSummary)> {
        let document = self.export().await?;
        let location = artifacts.write_artifact(&document.to_bytes()?).await?;
        let summary = document.summary();

        info!(
            location = %location,
            clients = summary.clients,
            instruments = summary.instruments,
            notes = summary.notes,
            "Backup exported"
        );
        Ok((location, summary))
    }

    /// Overwrite every partition from `document`.
    ///
    /// Instrument partitions of clients listed before the import, or in the
    /// document, are all rewritten; those with no instruments in the document
    /// end up empty. The writes are not atomic as a group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] (nothing written) if ids repeat, or the
    /// first storage error.
    pub async fn import(&self, document: &BackupDocument) -> Result<BackupSummary> {
        document.validate()?;

        let previous = match self.clients.list().await {
            Ok(clients) => clients,
            Err(err) if err.is_corrupt_partition() => {
                warn!(error = %err, "Existing client partition unreadable, restoring over it");
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        let mut owners: Vec<String> = previous.into_iter().map(|client| client.id).collect();
        owners.extend(document.clients.iter().map(|client| client.id.clone()));

        self.clients.import(&document.clients).await?;
        self.instruments.import(&document.instruments, &owners).await?;
        self.notes.import(&document.notes).await?;

        let summary = document.summary();
        info!(
            clients = summary.clients,
            instruments = summary.instruments,
            notes = summary.notes,
            "Backup imported"
        );
        Ok(summary)
    }

    /// Parse `bytes` and import them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] (nothing written) for a malformed
    /// document, or an import error.
    pub async fn import_bytes(&self, bytes: &[u8]) -> Result<BackupSummary> {
        let document = BackupDocument::parse(bytes)?;
        self.import(&document).await
    }

    /// Read the document at `location` from `artifacts` and import it.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be read, or an import error.
    pub async fn import_from(
        &self,
        artifacts: &dyn ArtifactStore,
        location: &str,
    ) -> Result<BackupSummary> {
        let bytes = artifacts.read_artifact(location).await?;
        self.import_bytes(&bytes).await
    }
}
