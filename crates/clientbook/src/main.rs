//! `cbook` - CLI for clientbook
//!
//! This binary provides the command-line interface for browsing and editing
//! the client book and for backing it up.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;

use clientbook::cli::{
    BackupCommand, Cli, ClientCommand, Command, ConfigCommand, InstrumentCommand, NoteCommand,
    RepairCommand,
};
use clientbook::{
    init_logging, Config, FileArtifacts, KeyValueStore, Notebook, SqliteStore, Upsert,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
        Command::Status(status_cmd) => handle_status(&config, status_cmd.json).await,
        command => {
            let notebook = Notebook::open(&config).with_context(|| {
                format!("opening database {}", config.database_path().display())
            })?;
            match command {
                Command::Client(cmd) => handle_client(&notebook, cmd).await,
                Command::Instrument(cmd) => handle_instrument(&notebook, cmd).await,
                Command::Note(cmd) => handle_note(&notebook, cmd).await,
                Command::Backup(cmd) => handle_backup(&notebook, &config, cmd).await,
                Command::Repair(cmd) => handle_repair(&notebook, cmd).await,
                Command::Config(_) | Command::Status(_) => Ok(()),
            }
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn confirm_hint(action: &str) {
    println!("This will {action}.");
    println!("Use --yes to confirm.");
}

async fn handle_client(notebook: &Notebook, cmd: ClientCommand) -> anyhow::Result<()> {
    let clients = notebook.clients();
    match cmd {
        ClientCommand::List { json } => {
            let list = clients.list().await?;
            if json {
                return print_json(&list);
            }
            if list.is_empty() {
                println!("No clients.");
            }
            for client in list {
                println!("{:<15} {:<22} {}", client.id, client.created_at, client.label);
            }
        }
        ClientCommand::Add { label } => {
            let client = clients.add(label).await?;
            println!("Added client {} ({})", client.label, client.id);
        }
        ClientCommand::Show { id, json } => {
            let client = clients.get(&id).await?;
            let instruments = notebook.instruments().list(&id).await?;
            if json {
                return print_json(&serde_json::json!({
                    "client": client,
                    "instruments": instruments,
                }));
            }
            println!("{}", client.label);
            println!("  Id:          {}", client.id);
            println!("  Created:     {}", client.created_at);
            println!("  Instruments: {}", instruments.len());
            for instrument in instruments {
                println!("    {:<15} {}", instrument.id, instrument.name);
            }
        }
        ClientCommand::Remove { id, cascade, yes } => {
            let client = clients.get(&id).await?;
            if !yes {
                let scope = if cascade {
                    " with all of its instruments and notes"
                } else {
                    ""
                };
                confirm_hint(&format!("remove client {}{scope}", client.label));
                return Ok(());
            }
            if cascade {
                let report = notebook.remove_client_cascade(&id).await?;
                println!(
                    "Removed client {} with {} instruments and {} notes",
                    client.label, report.instruments, report.notes
                );
            } else {
                clients.remove(&id).await?;
                println!("Removed client {}", client.label);
            }
        }
    }
    Ok(())
}

async fn handle_instrument(notebook: &Notebook, cmd: InstrumentCommand) -> anyhow::Result<()> {
    let instruments = notebook.instruments();
    match cmd {
        InstrumentCommand::List { client, json } => {
            let list = instruments.list(&client).await?;
            if json {
                return print_json(&list);
            }
            if list.is_empty() {
                println!("No instruments.");
            }
            for instrument in list {
                println!(
                    "{:<15} {:<22} {}",
                    instrument.id, instrument.created_at, instrument.name
                );
            }
        }
        InstrumentCommand::Add { client, name } => {
            let instrument = instruments.add(&client, name).await?;
            println!("Added instrument {} ({})", instrument.name, instrument.id);
        }
        InstrumentCommand::Remove {
            client,
            id,
            cascade,
            yes,
        } => {
            let instrument = instruments.get(&client, &id).await?;
            if !yes {
                let scope = if cascade { " with all of its notes" } else { "" };
                confirm_hint(&format!("remove instrument {}{scope}", instrument.name));
                return Ok(());
            }
            if cascade {
                let report = notebook.remove_instrument_cascade(&client, &id).await?;
                println!(
                    "Removed instrument {} with {} notes",
                    instrument.name, report.notes
                );
            } else {
                instruments.remove(&client, &id).await?;
                println!("Removed instrument {}", instrument.name);
            }
        }
    }
    Ok(())
}

async fn handle_note(notebook: &Notebook, cmd: NoteCommand) -> anyhow::Result<()> {
    let notes = notebook.notes();
    match cmd {
        NoteCommand::List { instrument, json } => {
            let list = notes.list_for(&instrument).await?;
            if json {
                return print_json(&list);
            }
            if list.is_empty() {
                println!("No notes.");
            }
            for note in list {
                let edited = note
                    .updated_at
                    .as_deref()
                    .map(|at| format!(" (edited {at})"))
                    .unwrap_or_default();
                println!("[{}] {}{edited}", note.id, note.created_at);
                println!("  {}", note.text);
            }
        }
        NoteCommand::Add { instrument, text } => {
            let note = notes.upsert(&instrument, text, None).await?.into_note();
            println!("Added note {}", note.id);
        }
        NoteCommand::Edit {
            instrument,
            id,
            text,
        } => match notes.upsert(&instrument, text, Some(id.as_str())).await? {
            Upsert::Updated(note) => println!("Updated note {}", note.id),
            Upsert::Unchanged(note) => println!("Note {} unchanged", note.id),
            Upsert::Created(note) => {
                println!("No note {id} on instrument {instrument}; added note {}", note.id);
            }
        },
        NoteCommand::Remove { id, yes } => {
            let note = notes.get(&id).await?;
            if !yes {
                confirm_hint(&format!("remove note {}", note.id));
                return Ok(());
            }
            notes.remove(&id).await?;
            println!("Removed note {id}");
        }
    }
    Ok(())
}

async fn handle_backup(
    notebook: &Notebook,
    config: &Config,
    cmd: BackupCommand,
) -> anyhow::Result<()> {
    let backup = notebook.backup();
    match cmd {
        BackupCommand::Export { dir } => {
            let artifacts = match dir {
                Some(dir) => FileArtifacts::new(dir, config.backup.file_name.clone()),
                None => FileArtifacts::from_config(config),
            };
            let (location, summary) = backup.export_to(&artifacts).await?;
            println!(
                "Exported {} clients, {} instruments and {} notes to {location}",
                summary.clients, summary.instruments, summary.notes
            );
        }
        BackupCommand::Import { file, yes } => {
            if !yes {
                confirm_hint(&format!(
                    "replace every client, instrument and note with the contents of {}",
                    file.display()
                ));
                return Ok(());
            }
            let artifacts = FileArtifacts::from_config(config);
            let location = file.display().to_string();
            let summary = backup
                .import_from(&artifacts, &location)
                .await
                .with_context(|| format!("importing {location}"))?;
            println!(
                "Imported {} clients, {} instruments and {} notes",
                summary.clients, summary.instruments, summary.notes
            );
        }
    }
    Ok(())
}

async fn handle_repair(notebook: &Notebook, cmd: RepairCommand) -> anyhow::Result<()> {
    if !cmd.yes {
        let corrupt = notebook.check().await?;
        if cmd.json {
            return print_json(&corrupt);
        }
        if corrupt.is_empty() {
            println!("All partitions decode.");
            return Ok(());
        }
        println!("Corrupt partitions:");
        for key in &corrupt {
            println!("  {key}");
        }
        confirm_hint("reset them to empty and print what they held");
        return Ok(());
    }

    let discarded = notebook.repair().await?;
    if cmd.json {
        return print_json(&discarded);
    }
    if discarded.is_empty() {
        println!("All partitions decode; nothing reset.");
    }
    for entry in discarded {
        println!("Reset {} (was {} bytes):", entry.key, entry.value.len());
        println!("{}", entry.value);
    }
    Ok(())
}

async fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let path = config.database_path();
    let store =
        SqliteStore::open(&path).with_context(|| format!("opening database {}", path.display()))?;
    let stats = store.stats()?;
    let partitions = store.keys().await?;

    if json {
        return print_json(&serde_json::json!({
            "database_path": path,
            "keys": stats.keys,
            "partitions": partitions,
            "value_bytes": stats.value_bytes,
            "db_size_bytes": stats.db_size_bytes,
            "backup_path": FileArtifacts::from_config(config).path(),
        }));
    }

    println!("cbook status");
    println!("------------");
    println!("Database:      {}", path.display());
    println!("Partitions:    {}", stats.keys);
    for key in &partitions {
        println!("  {key}");
    }
    println!("Stored bytes:  {}", stats.value_bytes);
    println!("File size:     {}", stats.db_size_bytes);
    println!(
        "Backup file:   {}",
        FileArtifacts::from_config(config).path().display()
    );
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                return print_json(config);
            }
            println!("Current Configuration");
            println!("=====================");
            println!();
            println!("[Storage]");
            println!("  Database path:      {}", config.database_path().display());
            println!("  Clients key:        {}", config.storage.clients_key);
            println!("  Notes key:          {}", config.storage.notes_key);
            println!("  Instruments prefix: {}", config.storage.instruments_prefix);
            println!();
            println!("[Records]");
            println!("  Timestamp format:   {}", config.records.timestamp_format);
            println!();
            println!("[Backup]");
            println!("  Directory:          {}", config.backup_dir().display());
            println!("  File name:          {}", config.backup.file_name);
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
