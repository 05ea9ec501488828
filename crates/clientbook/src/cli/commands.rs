//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Client commands.
#[derive(Debug, Subcommand)]
pub enum ClientCommand {
    /// List clients, newest first
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Add a client
    Add {
        /// Client label
        label: String,
    },

    /// Show a client and its instruments
    Show {
        /// Client id
        id: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Remove a client
    Remove {
        /// Client id
        id: String,

        /// Also remove the client's instruments and their notes
        #[arg(long)]
        cascade: bool,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Instrument commands.
#[derive(Debug, Subcommand)]
pub enum InstrumentCommand {
    /// List a client's instruments
    List {
        /// Client id
        client: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Add an instrument to a client
    Add {
        /// Client id
        client: String,

        /// Instrument name
        name: String,
    },

    /// Remove an instrument
    Remove {
        /// Client id
        client: String,

        /// Instrument id
        id: String,

        /// Also remove the instrument's notes
        #[arg(long)]
        cascade: bool,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Note commands.
#[derive(Debug, Subcommand)]
pub enum NoteCommand {
    /// List an instrument's notes, newest first
    List {
        /// Instrument id
        instrument: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Add a note to an instrument
    Add {
        /// Instrument id
        instrument: String,

        /// Note text
        text: String,
    },

    /// Replace the text of a note
    Edit {
        /// Instrument id
        instrument: String,

        /// Note id
        id: String,

        /// New text
        text: String,
    },

    /// Remove a note
    Remove {
        /// Note id
        id: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Backup commands.
#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// Write the whole notebook to a backup file
    Export {
        /// Directory to write the backup into
        #[arg(short, long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    /// Replace the whole notebook with a backup file
    Import {
        /// Backup file to read
        file: PathBuf,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Repair command arguments.
#[derive(Debug, Args)]
pub struct RepairCommand {
    /// Reset the corrupt partitions instead of only listing them
    #[arg(short, long)]
    pub yes: bool,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_command_debug() {
        let cmd = ClientCommand::Remove {
            id: "1".to_string(),
            cascade: true,
            yes: false,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Remove"));
        assert!(debug_str.contains("cascade: true"));
    }

    #[test]
    fn test_note_command_debug() {
        let cmd = NoteCommand::Edit {
            instrument: "2".to_string(),
            id: "3".to_string(),
            text: "nova corda".to_string(),
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Edit"));
        assert!(debug_str.contains("nova corda"));
    }

    #[test]
    fn test_backup_command_debug() {
        let cmd = BackupCommand::Export { dir: None };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Export"));
    }

    #[test]
    fn test_status_command_debug() {
        let cmd = StatusCommand { json: true };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("json"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }
}
