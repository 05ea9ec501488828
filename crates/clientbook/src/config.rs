//! Configuration management for clientbook.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;

use chrono::format::{Item, StrftimeItems};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::partition::{
    StorageKeys, DEFAULT_CLIENTS_KEY, DEFAULT_INSTRUMENTS_PREFIX, DEFAULT_NOTES_KEY,
};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "clientbook";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "clientbook.db";

/// Default backup artifact file name.
const BACKUP_FILE_NAME: &str = "backup.json";

/// Default display format for `createdAt`/`updatedAt`.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%d/%m/%Y, %H:%M:%S";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `CLIENTBOOK_`, sections split by `__`)
/// 2. TOML config file at `~/.config/clientbook/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Record formatting configuration.
    pub records: RecordsConfig,
    /// Backup configuration.
    pub backup: BackupConfig,
}

/// Storage-related configuration.
///
/// The key names must match what earlier installs wrote, so they are only
/// worth changing for a fresh store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/clientbook/clientbook.db`
    pub database_path: Option<PathBuf>,
    /// Key of the client partition.
    pub clients_key: String,
    /// Key of the shared note partition.
    pub notes_key: String,
    /// Prefix of the per-client instrument partitions (`<prefix>:<clientId>`).
    pub instruments_prefix: String,
}

/// Record formatting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    /// `strftime` format of the human-readable timestamps, in local time.
    pub timestamp_format: String,
}

/// Backup-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory backups are written to.
    /// Defaults to the data directory.
    pub directory: Option<PathBuf>,
    /// File name of the exported document.
    pub file_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            clients_key: DEFAULT_CLIENTS_KEY.to_string(),
            notes_key: DEFAULT_NOTES_KEY.to_string(),
            instruments_prefix: DEFAULT_INSTRUMENTS_PREFIX.to_string(),
        }
    }
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_name: BACKUP_FILE_NAME.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("CLIENTBOOK_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let storage = &self.storage;
        for (name, value) in [
            ("clients_key", &storage.clients_key),
            ("notes_key", &storage.notes_key),
            ("instruments_prefix", &storage.instruments_prefix),
        ] {
            if value.trim().is_empty() {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must not be empty"),
                });
            }
        }

        if storage.clients_key == storage.notes_key {
            return Err(Error::ConfigValidation {
                message: format!(
                    "clients_key and notes_key must differ (both are '{}')",
                    storage.clients_key
                ),
            });
        }

        // A fixed key inside the instrument namespace would be read as some
        // client's instrument partition.
        let keys = self.keys();
        for fixed in [&storage.clients_key, &storage.notes_key] {
            if keys.is_instrument_key(fixed) {
                return Err(Error::ConfigValidation {
                    message: format!(
                        "key '{fixed}' collides with instruments_prefix '{}'",
                        storage.instruments_prefix
                    ),
                });
            }
        }

        if StrftimeItems::new(&self.records.timestamp_format).any(|item| matches!(item, Item::Error))
        {
            return Err(Error::ConfigValidation {
                message: format!(
                    "invalid timestamp_format: {}",
                    self.records.timestamp_format
                ),
            });
        }

        if self.backup.file_name.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "backup file_name must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the backup directory, resolving defaults if not set.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.backup
            .directory
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the partition keys described by this configuration.
    #[must_use]
    pub fn keys(&self) -> StorageKeys {
        StorageKeys::new(
            &self.storage.clients_key,
            &self.storage.notes_key,
            &self.storage.instruments_prefix,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.storage.clients_key, "Clientes");
        assert_eq!(config.storage.notes_key, "Anotações");
        assert_eq!(config.storage.instruments_prefix, "instruments");
        assert_eq!(config.records.timestamp_format, DEFAULT_TIMESTAMP_FORMAT);
        assert_eq!(config.backup.file_name, "backup.json");
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_key() {
        let mut config = Config::default();
        config.storage.notes_key = "  ".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("notes_key"));
    }

    #[test]
    fn test_validate_same_keys() {
        let mut config = Config::default();
        config.storage.notes_key = config.storage.clients_key.clone();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("must differ"));
    }

    #[test]
    fn test_validate_key_inside_instrument_namespace() {
        let mut config = Config::default();
        config.storage.clients_key = "instruments:all".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("collides"));
    }

    #[test]
    fn test_validate_invalid_timestamp_format() {
        let mut config = Config::default();
        config.records.timestamp_format = "%Y-%Q".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("timestamp_format"));
    }

    #[test]
    fn test_validate_empty_backup_file_name() {
        let mut config = Config::default();
        config.backup.file_name = String::new();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        let path = config.database_path();

        assert!(path.to_string_lossy().contains("clientbook.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_backup_dir_default_is_data_dir() {
        let config = Config::default();
        assert_eq!(config.backup_dir(), Config::default_data_dir());
    }

    #[test]
    fn test_keys_follow_config() {
        let mut config = Config::default();
        config.storage.instruments_prefix = "instr".to_string();

        let keys = config.keys();
        assert_eq!(keys.clients(), "Clientes");
        assert_eq!(keys.instruments_for("42"), "instr:42");
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("clientbook"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), Config::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[storage]\nclients_key = \"@notepad_items\"\n\n[backup]\nfile_name = \"copy.json\"\n",
        )
        .unwrap();

        let config = Config::load_from(Some(path)).unwrap();
        assert_eq!(config.storage.clients_key, "@notepad_items");
        assert_eq!(config.storage.notes_key, "Anotações");
        assert_eq!(config.backup.file_name, "copy.json");
    }

    #[test]
    fn test_storage_config_deserialize() {
        let json = r#"{"notes_key": "notes"}"#;
        let storage: StorageConfig = serde_json::from_str(json).unwrap();
        assert_eq!(storage.notes_key, "notes");
        assert_eq!(storage.clients_key, "Clientes");
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("timestamp_format"));
        assert!(json.contains("instruments_prefix"));
    }
}
