//! Record types stored in the partitions.
//!
//! All three record families serialize as camelCase JSON objects. Records
//! read from a partition travel as [`Stored`] values, which write back the
//! exact JSON they were read from; only new or changed records are encoded.

use std::fmt::Write as _;
use std::ops::Deref;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

use crate::config::DEFAULT_TIMESTAMP_FORMAT;
use crate::error::{Error, Result};

/// A record that lives in a partition and is addressed by `id`.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Human-readable name of the record kind (for errors and logs).
    const KIND: &'static str;

    /// The record's identifier, unique within its partition.
    fn id(&self) -> &str;
}

/// A client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    /// Time-based identifier, immutable.
    pub id: String,
    /// Display label. Older records store it as `text`.
    #[serde(alias = "text")]
    pub label: String,
    /// Human-readable creation time.
    pub created_at: String,
    /// Creation time in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_ms: Option<i64>,
    /// Unknown fields, preserved.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An instrument owned by one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    /// Time-based identifier, immutable.
    ///
    /// Empty for instruments restored from a backup that predates ids; the
    /// import assigns one.
    #[serde(default)]
    pub id: String,
    /// The owning client.
    pub client_id: String,
    /// Instrument name.
    pub name: String,
    /// Legacy inline notes; new notes go to the note partition.
    #[serde(default)]
    pub notes: Vec<String>,
    /// Human-readable creation time.
    pub created_at: String,
    /// Creation time in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_ms: Option<i64>,
    /// Unknown fields, preserved.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A free-text note attached to an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Time-based identifier, immutable.
    pub id: String,
    /// Note body.
    pub text: String,
    /// Human-readable creation time.
    pub created_at: String,
    /// Creation time in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_ms: Option<i64>,
    /// Human-readable time of the last edit; absent until edited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Time of the last edit in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at_ms: Option<i64>,
    /// The instrument this note belongs to.
    pub instrument_id: String,
    /// Unknown fields, preserved.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record for Client {
    const KIND: &'static str = "client";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Instrument {
    const KIND: &'static str = "instrument";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Note {
    const KIND: &'static str = "note";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Client {
    /// Create a client stamped with `stamp`.
    #[must_use]
    pub fn new(id: String, label: String, stamp: Stamp) -> Self {
        Self {
            id,
            label,
            created_at: stamp.display,
            created_at_ms: Some(stamp.millis),
            extra: Map::new(),
        }
    }

    /// Creation time, when the record carries the machine timestamp.
    #[must_use]
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created_at_ms.and_then(from_millis)
    }
}

impl Instrument {
    /// Create an instrument for `client_id` stamped with `stamp`.
    #[must_use]
    pub fn new(id: String, client_id: String, name: String, stamp: Stamp) -> Self {
        Self {
            id,
            client_id,
            name,
            notes: Vec::new(),
            created_at: stamp.display,
            created_at_ms: Some(stamp.millis),
            extra: Map::new(),
        }
    }

    /// Creation time, when the record carries the machine timestamp.
    #[must_use]
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created_at_ms.and_then(from_millis)
    }
}

impl Note {
    /// Create an unedited note for `instrument_id` stamped with `stamp`.
    #[must_use]
    pub fn new(id: String, instrument_id: String, text: String, stamp: Stamp) -> Self {
        Self {
            id,
            text,
            created_at: stamp.display,
            created_at_ms: Some(stamp.millis),
            updated_at: None,
            updated_at_ms: None,
            instrument_id,
            extra: Map::new(),
        }
    }

    /// Replace the text and stamp the edit time.
    pub fn edit(&mut self, text: String, stamp: Stamp) {
        self.text = text;
        self.updated_at = Some(stamp.display);
        self.updated_at_ms = Some(stamp.millis);
    }

    /// Whether the note has been edited since creation.
    #[must_use]
    pub fn is_edited(&self) -> bool {
        self.updated_at.is_some()
    }

    /// Creation time, when the record carries the machine timestamp.
    #[must_use]
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created_at_ms.and_then(from_millis)
    }

    /// Last edit time, when the record carries the machine timestamp.
    #[must_use]
    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated_at_ms.and_then(from_millis)
    }
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// A record paired with the JSON text it is stored as.
///
/// Serializing a `Stored` writes that text verbatim, so a record that was
/// read and not changed keeps its bytes, key names and field order included.
#[derive(Debug, Clone)]
pub struct Stored<T> {
    raw: Box<RawValue>,
    record: T,
}

impl<T: Serialize> Stored<T> {
    /// Encode a new or changed record.
    ///
    /// # Errors
    ///
    /// Returns an error if `record` cannot be serialized.
    pub fn new(record: T) -> Result<Self> {
        let raw = serde_json::value::to_raw_value(&record)?;
        Ok(Self { raw, record })
    }
}

impl<T: DeserializeOwned> Stored<T> {
    /// Decode `raw`, keeping it as the stored form.
    ///
    /// # Errors
    ///
    /// Returns the parse error if `raw` is not a valid `T`.
    pub fn from_raw(raw: Box<RawValue>) -> serde_json::Result<Self> {
        let record = serde_json::from_str(raw.get())?;
        Ok(Self { raw, record })
    }
}

impl<T> Stored<T> {
    /// The decoded record.
    #[must_use]
    pub fn record(&self) -> &T {
        &self.record
    }

    /// Consume into the decoded record.
    #[must_use]
    pub fn into_record(self) -> T {
        self.record
    }

    /// The stored JSON text.
    #[must_use]
    pub fn raw(&self) -> &str {
        self.raw.get()
    }

    /// Consume into the stored JSON text.
    #[must_use]
    pub fn into_raw(self) -> Box<RawValue> {
        self.raw
    }
}

impl<T> Deref for Stored<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

impl<T> PartialEq for Stored<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw.get() == other.raw.get()
    }
}

impl<T> Serialize for Stored<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Stored<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Self::from_raw(raw).map_err(de::Error::custom)
    }
}

impl<T: Record> Record for Stored<T> {
    const KIND: &'static str = T::KIND;

    fn id(&self) -> &str {
        self.record.id()
    }
}

/// A point in time in both record encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    /// Human-readable form, local time.
    pub display: String,
    /// Epoch milliseconds.
    pub millis: i64,
}

/// Source of record ids and timestamps.
///
/// Ids are the current time in milliseconds, stringified. The clock never
/// hands out the same id twice, even when called twice in one millisecond.
#[derive(Debug)]
pub struct Clock {
    format: String,
    last_id: AtomicI64,
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            last_id: AtomicI64::new(0),
        }
    }
}

impl Clock {
    /// Create a clock rendering display timestamps with `format` (`strftime`).
    ///
    /// # Errors
    ///
    /// Returns an error if `format` is not a valid `strftime` format.
    pub fn new(format: impl Into<String>) -> Result<Self> {
        let format = format.into();
        if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            return Err(Error::ConfigValidation {
                message: format!("invalid timestamp_format: {format}"),
            });
        }
        Ok(Self {
            format,
            last_id: AtomicI64::new(0),
        })
    }

    /// The current time in both encodings.
    ///
    /// # Errors
    ///
    /// Returns an error if the display format cannot be rendered.
    pub fn stamp(&self) -> Result<Stamp> {
        let now = Utc::now();
        let mut display = String::new();
        write!(display, "{}", now.with_timezone(&Local).format(&self.format))
            .map_err(|_| Error::internal(format!("cannot render timestamp with '{}'", self.format)))?;
        Ok(Stamp {
            display,
            millis: now.timestamp_millis(),
        })
    }

    /// A fresh id for which `taken` returns false.
    pub fn next_id(&self, taken: impl Fn(&str) -> bool) -> String {
        loop {
            let id = self.next_millis().to_string();
            if !taken(&id) {
                return id;
            }
        }
    }

    fn next_millis(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last_id.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last + 1);
            match self.last_id.compare_exchange(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}
