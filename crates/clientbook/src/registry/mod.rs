//! Registries: the single authority over each record family's partitions.
//!
//! Registries hold no record state of their own. Every call re-reads the
//! partition it needs, and every mutation goes through
//! [`Partitions::update`](crate::partition::Partitions::update) so it runs
//! under the key lock.

mod client;
mod instrument;
mod note;

use std::collections::HashSet;

pub use client::ClientRegistry;
pub use instrument::InstrumentRegistry;
pub use note::{NoteRegistry, Upsert};

use crate::error::{Error, Result};
use crate::model::Record;

/// Reject empty or whitespace-only text.
pub(crate) fn require_text(field: &'static str, text: String) -> Result<String> {
    if text.trim().is_empty() {
        return Err(Error::EmptyInput { field });
    }
    Ok(text)
}

/// Remove the record with `id`, or fail with `NotFound`.
pub(crate) fn take_by_id<T: Record>(records: &mut Vec<T>, id: &str) -> Result<T> {
    let position = records
        .iter()
        .position(|record| record.id() == id)
        .ok_or_else(|| Error::not_found(T::KIND, id))?;
    Ok(records.remove(position))
}

/// Fail with a validation error if two records share an id.
pub(crate) fn ensure_unique_ids<'a, T: Record>(
    records: impl IntoIterator<Item = &'a T>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for record in records {
        if !seen.insert(record.id()) {
            return Err(Error::validation(format!(
                "duplicate {} id '{}'",
                T::KIND,
                record.id()
            )));
        }
    }
    Ok(())
}
