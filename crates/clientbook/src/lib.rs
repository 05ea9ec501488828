//! `clientbook` - A local book of clients, their instruments and service notes
//!
//! Records are stored as JSON arrays ("partitions") in a key-value store:
//! one partition for clients, one per client for instruments, and one shared
//! partition for the notes of every instrument. The crate provides the
//! partition codec, one registry per record family, and whole-notebook
//! backup and restore.
//!
//! ```no_run
//! # async fn demo() -> clientbook::Result<()> {
//! let notebook = clientbook::Notebook::in_memory();
//! let ana = notebook.clients().add("Ana").await?;
//! let violino = notebook.instruments().add(&ana.id, "Violino").await?;
//! notebook
//!     .notes()
//!     .upsert(&violino.id, "string trocada hoje", None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod notebook;
pub mod partition;
pub mod registry;
pub mod store;

pub use backup::{ArtifactStore, BackupCoordinator, BackupDocument, BackupSummary, FileArtifacts};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use model::{Client, Clock, Instrument, Note, Record, Stamp, Stored};
pub use notebook::{CascadeReport, Discarded, Notebook};
pub use partition::{Outcome, PartitionChanged, Partitions, StorageKeys};
pub use registry::{ClientRegistry, InstrumentRegistry, NoteRegistry, Upsert};
pub use store::{KeyValueStore, MemoryStore, SqliteStore, StoreStats};
