//! Command-line interface for clientbook.
//!
//! This module provides the CLI structure for the `cbook` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    BackupCommand, ClientCommand, ConfigCommand, InstrumentCommand, NoteCommand, RepairCommand,
    StatusCommand,
};

/// cbook - Keep track of clients, their instruments and service notes
///
/// Records live in a local database. Removals leave descendants in place
/// unless `--cascade` is given.
#[derive(Debug, Parser)]
#[command(name = "cbook")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage clients
    #[command(subcommand)]
    Client(ClientCommand),

    /// Manage a client's instruments
    #[command(subcommand)]
    Instrument(InstrumentCommand),

    /// Manage an instrument's notes
    #[command(subcommand)]
    Note(NoteCommand),

    /// Export or restore the whole notebook
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Show database status
    Status(StatusCommand),

    /// Find partitions that no longer decode and reset them to empty
    Repair(RepairCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.quiet, self.verbose)
    }
}
