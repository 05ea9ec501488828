//! The shared note partition.
//!
//! Notes of every instrument live under one key. Each mutation rewrites the
//! partition as `owner's notes ++ everyone else's notes`. Only the note that
//! was created or edited is encoded; every other entry, the owner's included,
//! is carried over as the exact JSON text it was stored with.

use std::collections::HashSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::{info, warn};

use super::{ensure_unique_ids, require_text, take_by_id};
use crate::error::{Error, Result};
use crate::model::{Clock, Note, Record, Stored};
use crate::partition::{Outcome, Partitions, StorageKeys};

/// Result of [`NoteRegistry::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    /// A new note was stored.
    Created(Note),
    /// An existing note got new text.
    Updated(Note),
    /// The edit carried the note's current text; nothing was written.
    Unchanged(Note),
}

impl Upsert {
    /// The resulting note.
    #[must_use]
    pub fn note(&self) -> &Note {
        match self {
            Self::Created(note) | Self::Updated(note) | Self::Unchanged(note) => note,
        }
    }

    /// Consume into the resulting note.
    #[must_use]
    pub fn into_note(self) -> Note {
        match self {
            Self::Created(note) | Self::Updated(note) | Self::Unchanged(note) => note,
        }
    }

    /// Whether the partition was written.
    #[must_use]
    pub fn was_written(&self) -> bool {
        !matches!(self, Self::Unchanged(_))
    }
}

/// The two fields every stored note must expose to be routed.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoteRef {
    id: String,
    instrument_id: String,
}

/// Owns the shared note partition and its per-instrument views.
///
/// New notes go to the front of their instrument's list.
#[derive(Debug, Clone)]
pub struct NoteRegistry {
    partitions: Partitions,
    keys: Arc<StorageKeys>,
    clock: Arc<Clock>,
}

impl NoteRegistry {
    /// Create a registry over `partitions`.
    #[must_use]
    pub fn new(partitions: Partitions, keys: Arc<StorageKeys>, clock: Arc<Clock>) -> Self {
        Self {
            partitions,
            keys,
            clock,
        }
    }

    /// Every note of every instrument, in stored order.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition cannot be read or decoded.
    pub async fn all(&self) -> Result<Vec<Note>> {
        self.partitions.read(self.keys.notes()).await
    }

    /// Notes of `instrument_id`, newest first.
    ///
    /// Notes whose instrument no longer exists stay reachable here.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition cannot be read or decoded.
    pub async fn list_for(&self, instrument_id: &str) -> Result<Vec<Note>> {
        let mut notes = self.all().await?;
        notes.retain(|note| note.instrument_id == instrument_id);
        Ok(notes)
    }

    /// The note with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such note exists.
    pub async fn get(&self, id: &str) -> Result<Note> {
        self.all()
            .await?
            .into_iter()
            .find(|note| note.id == id)
            .ok_or_else(|| Error::not_found(Note::KIND, id))
    }

    /// Create a note for `instrument_id`, or edit `existing_id`.
    ///
    /// An edit only happens when `existing_id` names one of this instrument's
    /// notes; any other id creates a new note. Editing a note to its current
    /// text writes nothing and keeps `updatedAt` as it was.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyInput`] (nothing written) for blank text, or a
    /// partition error.
    pub async fn upsert(
        &self,
        instrument_id: &str,
        text: impl Into<String>,
        existing_id: Option<&str>,
    ) -> Result<Upsert> {
        let text = require_text("text", text.into())?;
        let key = self.keys.notes().to_string();
        let owner = instrument_id.to_string();
        let existing_id = existing_id.map(str::to_string);
        let clock = Arc::clone(&self.clock);

        let result = self
            .partitions
            .update(self.keys.notes(), move |stored: &mut Vec<Box<RawValue>>| {
                merge_rest(&key, stored, &owner, |notes, taken| {
                    if let Some(slot) = existing_id
                        .as_deref()
                        .and_then(|id| notes.iter_mut().find(|note| note.id == id))
                    {
                        if slot.text == text {
                            return Ok(Outcome::Unchanged(Upsert::Unchanged(slot.record().clone())));
                        }
                        let mut note = slot.record().clone();
                        note.edit(text, clock.stamp()?);
                        *slot = Stored::new(note.clone())?;
                        return Ok(Outcome::Persist(Upsert::Updated(note)));
                    }

                    let id = clock.next_id(|id| taken.contains(id));
                    let note = Note::new(id, owner.clone(), text, clock.stamp()?);
                    notes.insert(0, Stored::new(note.clone())?);
                    Ok(Outcome::Persist(Upsert::Created(note)))
                })
            })
            .await?;

        match &result {
            Upsert::Created(note) => {
                info!(instrument_id, note_id = %note.id, "Note added");
            }
            Upsert::Updated(note) => info!(instrument_id, note_id = %note.id, "Note edited"),
            Upsert::Unchanged(_) => {}
        }
        Ok(result)
    }

    /// Remove the note with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] (nothing written) if no such note exists,
    /// including when it was already removed.
    pub async fn remove(&self, id: &str) -> Result<Note> {
        let key = self.keys.notes().to_string();
        let id = id.to_string();

        let removed = self
            .partitions
            .update(self.keys.notes(), move |stored: &mut Vec<Box<RawValue>>| {
                let owner = stored
                    .iter()
                    .map(|raw| note_ref(&key, raw))
                    .find(|found| found.as_ref().map_or(true, |found| found.id == id))
                    .transpose()?
                    .map(|found| found.instrument_id)
                    .ok_or_else(|| Error::not_found(Note::KIND, id.as_str()))?;

                merge_rest(&key, stored, &owner, |notes, _| {
                    take_by_id(notes, &id).map(|note| Outcome::Persist(note.into_record()))
                })
            })
            .await?;

        info!(note_id = %removed.id, instrument_id = %removed.instrument_id, "Note removed");
        Ok(removed)
    }

    /// Remove every note of `instrument_id`, returning how many there were.
    ///
    /// # Errors
    ///
    /// Returns a partition error.
    pub async fn remove_for(&self, instrument_id: &str) -> Result<usize> {
        let key = self.keys.notes().to_string();
        let owner = instrument_id.to_string();

        self.partitions
            .update(self.keys.notes(), move |stored: &mut Vec<Box<RawValue>>| {
                merge_rest(&key, stored, &owner, |notes, _| {
                    let count = notes.len();
                    if count == 0 {
                        return Ok(Outcome::Unchanged(0));
                    }
                    notes.clear();
                    Ok(Outcome::Persist(count))
                })
            })
            .await
    }

    /// The whole note partition, each note with its stored JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition cannot be read or decoded.
    pub async fn export(&self) -> Result<Vec<Stored<Note>>> {
        self.partitions.read(self.keys.notes()).await
    }

    /// Overwrite the note partition with `notes`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for duplicate ids, or a storage error.
    pub async fn import(&self, notes: &[Stored<Note>]) -> Result<()> {
        ensure_unique_ids(notes)?;
        self.partitions.replace(self.keys.notes(), notes).await?;
        Ok(())
    }
}

fn note_ref(key: &str, raw: &RawValue) -> Result<NoteRef> {
    decode_entry(key, raw)
}

fn decode_entry<T: DeserializeOwned>(key: &str, raw: &RawValue) -> Result<T> {
    serde_json::from_str(raw.get()).map_err(|source| {
        warn!(key, error = %source, "Note entry does not decode");
        Error::CorruptPartition {
            key: key.to_string(),
            source,
        }
    })
}

/// Apply `change` to `owner`'s notes and rebuild the partition.
///
/// `change` gets the owner's decoded notes and the set of every id in the
/// partition. On [`Outcome::Persist`], `stored` becomes the owner's notes
/// followed by all other entries, untouched and in their original order.
fn merge_rest<R>(
    key: &str,
    stored: &mut Vec<Box<RawValue>>,
    owner: &str,
    change: impl FnOnce(&mut Vec<Stored<Note>>, &HashSet<String>) -> Result<Outcome<R>>,
) -> Result<Outcome<R>> {
    let mut owned = Vec::new();
    let mut rest = Vec::with_capacity(stored.len());
    let mut taken = HashSet::with_capacity(stored.len());

    for raw in stored.drain(..) {
        let found = note_ref(key, &raw)?;
        taken.insert(found.id);
        if found.instrument_id == owner {
            owned.push(decode_entry::<Stored<Note>>(key, &raw)?);
        } else {
            rest.push(raw);
        }
    }

    let outcome = change(&mut owned, &taken)?;
    if matches!(outcome, Outcome::Persist(_)) {
        stored.extend(owned.into_iter().map(Stored::into_raw));
        stored.extend(rest);
    }
    Ok(outcome)
}
