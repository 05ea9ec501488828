use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::{ensure_unique_ids, require_text, take_by_id};
use crate::error::{Error, Result};
use crate::model::{Clock, Instrument, Record, Stored};
use crate::partition::{Outcome, Partitions, StorageKeys};

/// Owns the per-client instrument partitions.
///
/// Instruments are appended, so each list is oldest first. A client whose
/// partition was never written simply has no instruments.
#[derive(Debug, Clone)]
pub struct InstrumentRegistry {
    partitions: Partitions,
    keys: Arc<StorageKeys>,
    clock: Arc<Clock>,
}

impl InstrumentRegistry {
    /// Create a registry over `partitions`.
    #[must_use]
    pub fn new(partitions: Partitions, keys: Arc<StorageKeys>, clock: Arc<Clock>) -> Self {
        Self {
            partitions,
            keys,
            clock,
        }
    }

    /// Instruments of `client_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition cannot be read or decoded.
    pub async fn list(&self, client_id: &str) -> Result<Vec<Instrument>> {
        self.partitions
            .read(&self.keys.instruments_for(client_id))
            .await
    }

    /// The instrument `id` of `client_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the client has no such instrument.
    pub async fn get(&self, client_id: &str, id: &str) -> Result<Instrument> {
        self.list(client_id)
            .await?
            .into_iter()
            .find(|instrument| instrument.id == id)
            .ok_or_else(|| Error::not_found(Instrument::KIND, id))
    }

    /// Append an instrument named `name` to `client_id`'s list.
    ///
    /// The client is not checked for existence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyInput`] (nothing written) for a blank name, or a
    /// storage error.
    pub async fn add(&self, client_id: &str, name: impl Into<String>) -> Result<Instrument> {
        let name = require_text("name", name.into())?;
        let clock = Arc::clone(&self.clock);
        let owner = client_id.to_string();

        let instrument = self
            .partitions
            .update(
                &self.keys.instruments_for(client_id),
                move |instruments: &mut Vec<Stored<Instrument>>| {
                    let id = clock.next_id(|id| instruments.iter().any(|i| i.id == id));
                    let instrument = Instrument::new(id, owner, name, clock.stamp()?);
                    instruments.push(Stored::new(instrument.clone())?);
                    Ok(Outcome::Persist(instrument))
                },
            )
            .await?;

        info!(client_id, instrument_id = %instrument.id, "Instrument added");
        Ok(instrument)
    }

    /// Remove instrument `id` from `client_id`'s list.
    ///
    /// Notes attached to the instrument are left as they are; see
    /// [`Notebook::remove_instrument_cascade`](crate::Notebook::remove_instrument_cascade).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] (nothing written) if there is no such instrument.
    pub async fn remove(&self, client_id: &str, id: &str) -> Result<Instrument> {
        let id = id.to_string();
        let removed = self
            .partitions
            .update(
                &self.keys.instruments_for(client_id),
                move |instruments: &mut Vec<Stored<Instrument>>| {
                    take_by_id(instruments, &id)
                        .map(|instrument| Outcome::Persist(instrument.into_record()))
                },
            )
            .await?;

        info!(client_id, instrument_id = %removed.id, "Instrument removed");
        Ok(removed)
    }

    /// Empty `client_id`'s list and return what it held.
    ///
    /// A partition that is already empty is not rewritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition cannot be read, decoded or written.
    pub async fn clear(&self, client_id: &str) -> Result<Vec<Instrument>> {
        self.partitions
            .update(
                &self.keys.instruments_for(client_id),
                |instruments: &mut Vec<Stored<Instrument>>| {
                    if instruments.is_empty() {
                        return Ok(Outcome::Unchanged(Vec::new()));
                    }
                    let cleared: Vec<Instrument> =
                        instruments.drain(..).map(Stored::into_record).collect();
                    Ok(Outcome::Persist(cleared))
                },
            )
            .await
    }

    /// The partitions of `client_ids`, concatenated in that order, each
    /// instrument with its stored JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if any partition cannot be read or decoded.
    pub async fn export(&self, client_ids: &[String]) -> Result<Vec<Stored<Instrument>>> {
        let mut all = Vec::new();
        for client_id in client_ids {
            all.extend(
                self.partitions
                    .read::<Stored<Instrument>>(&self.keys.instruments_for(client_id))
                    .await?,
            );
        }
        Ok(all)
    }

    /// Overwrite instrument partitions from a flat list.
    ///
    /// Instruments are grouped by `clientId`, keeping their order. Each group
    /// replaces its client's partition. Every client in `also_clear` without a
    /// group gets an empty partition. An instrument stored without an `id`
    /// gets a fresh one, unique within its client.
    ///
    /// Returns the number of partitions written.
    ///
    /// # Errors
    ///
    /// Returns a validation error if ids repeat within one client (nothing
    /// written), or a storage error.
    pub async fn import(
        &self,
        instruments: &[Stored<Instrument>],
        also_clear: &[String],
    ) -> Result<usize> {
        let groups = group_by_client(instruments);
        for (_, group) in &groups {
            ensure_unique_ids(group.iter().copied().filter(|i| !i.id.is_empty()))?;
        }

        let mut written = 0;
        let mut seen = HashSet::new();
        for (client_id, group) in &groups {
            seen.insert(*client_id);
            let records = self.assign_missing_ids(group)?;
            if self
                .partitions
                .replace(&self.keys.instruments_for(client_id), &records)
                .await?
            {
                written += 1;
            }
        }

        let empty: [Stored<Instrument>; 0] = [];
        for client_id in also_clear {
            if seen.insert(client_id.as_str())
                && self
                    .partitions
                    .replace(&self.keys.instruments_for(client_id), &empty)
                    .await?
            {
                debug!(client_id = %client_id, "Cleared instrument partition");
                written += 1;
            }
        }

        Ok(written)
    }

    fn assign_missing_ids(
        &self,
        group: &[&Stored<Instrument>],
    ) -> Result<Vec<Stored<Instrument>>> {
        let mut taken: HashSet<String> = group.iter().map(|i| i.id.clone()).collect();
        group
            .iter()
            .map(|&stored| {
                if !stored.id.is_empty() {
                    return Ok(stored.clone());
                }
                let id = self.clock.next_id(|id| taken.contains(id));
                taken.insert(id.clone());
                debug!(client_id = %stored.client_id, instrument_id = %id, "Assigned instrument id");
                let mut instrument = stored.record().clone();
                instrument.id = id;
                Stored::new(instrument)
            })
            .collect()
    }
}

/// Group instruments by owner, in order of first appearance.
fn group_by_client(
    instruments: &[Stored<Instrument>],
) -> Vec<(&str, Vec<&Stored<Instrument>>)> {
    let mut groups: Vec<(&str, Vec<&Stored<Instrument>>)> = Vec::new();
    for instrument in instruments {
        match groups
            .iter_mut()
            .find(|(client_id, _)| *client_id == instrument.client_id)
        {
            Some((_, group)) => group.push(instrument),
            None => groups.push((instrument.client_id.as_str(), vec![instrument])),
        }
    }
    groups
}
