use std::sync::Arc;

use tracing::info;

use super::{ensure_unique_ids, require_text, take_by_id};
use crate::error::{Error, Result};
use crate::model::{Client, Clock, Record, Stored};
use crate::partition::{Outcome, Partitions, StorageKeys};

/// Owns the client partition.
///
/// Newest clients come first.
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    partitions: Partitions,
    keys: Arc<StorageKeys>,
    clock: Arc<Clock>,
}

impl ClientRegistry {
    /// Create a registry over `partitions`.
    #[must_use]
    pub fn new(partitions: Partitions, keys: Arc<StorageKeys>, clock: Arc<Clock>) -> Self {
        Self {
            partitions,
            keys,
            clock,
        }
    }

    /// All clients, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition cannot be read or decoded.
    pub async fn list(&self) -> Result<Vec<Client>> {
        self.partitions.read(self.keys.clients()).await
    }

    /// The client with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such client exists, or a read error.
    pub async fn get(&self, id: &str) -> Result<Client> {
        self.list()
            .await?
            .into_iter()
            .find(|client| client.id == id)
            .ok_or_else(|| Error::not_found(Client::KIND, id))
    }

    /// Create a client labelled `label` and put it at the front of the list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyInput`] for a blank label, or a storage error.
    pub async fn add(&self, label: impl Into<String>) -> Result<Client> {
        let label = require_text("label", label.into())?;
        let clock = Arc::clone(&self.clock);

        let client = self
            .partitions
            .update(self.keys.clients(), move |clients: &mut Vec<Stored<Client>>| {
                let id = clock.next_id(|id| clients.iter().any(|client| client.id == id));
                let client = Client::new(id, label, clock.stamp()?);
                clients.insert(0, Stored::new(client.clone())?);
                Ok(Outcome::Persist(client))
            })
            .await?;

        info!(client_id = %client.id, "Client added");
        Ok(client)
    }

    /// Remove the client with `id`.
    ///
    /// The client's instrument partition is left as it is; see
    /// [`Notebook::remove_client_cascade`](crate::Notebook::remove_client_cascade).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] (nothing written) if no such client exists.
    pub async fn remove(&self, id: &str) -> Result<Client> {
        let id = id.to_string();
        let removed = self
            .partitions
            .update(self.keys.clients(), move |clients: &mut Vec<Stored<Client>>| {
                take_by_id(clients, &id).map(|client| Outcome::Persist(client.into_record()))
            })
            .await?;

        info!(client_id = %removed.id, "Client removed");
        Ok(removed)
    }

    /// The client partition, each client with its stored JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition cannot be read or decoded.
    pub async fn export(&self) -> Result<Vec<Stored<Client>>> {
        self.partitions.read(self.keys.clients()).await
    }

    /// Overwrite the client partition with `clients`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for duplicate ids, or a storage error.
    pub async fn import(&self, clients: &[Stored<Client>]) -> Result<()> {
        ensure_unique_ids(clients)?;
        self.partitions
            .replace(self.keys.clients(), clients)
            .await?;
        Ok(())
    }
}
