use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

/// Where backup bytes go to and come from.
#[async_trait]
pub trait ArtifactStore: Send + Sync + std::fmt::Debug {
    /// Persist `bytes` and return a location that [`read_artifact`] accepts.
    ///
    /// [`read_artifact`]: ArtifactStore::read_artifact
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be stored.
    async fn write_artifact(&self, bytes: &[u8]) -> Result<String>;

    /// Read the bytes stored at `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if `location` cannot be read.
    async fn read_artifact(&self, location: &str) -> Result<Vec<u8>>;
}

/// Backup files in a directory.
///
/// Every export overwrites the same file name. The bytes are written to a
/// sibling temporary file first and renamed into place.
#[derive(Debug, Clone)]
pub struct FileArtifacts {
    dir: PathBuf,
    file_name: String,
}

impl FileArtifacts {
    /// Artifacts named `file_name` inside `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.into(),
        }
    }

    /// Artifacts at the backup location of `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.backup_dir(), config.backup.file_name.clone())
    }

    /// The file every export writes.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

#[async_trait]
impl ArtifactStore for FileArtifacts {
    async fn write_artifact(&self, bytes: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| Error::DirectoryCreate {
                path: self.dir.clone(),
                source,
            })?;

        let path = self.path();
        let staging = self.dir.join(format!(".{}.tmp", self.file_name));
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path).await?;

        debug!(path = %path.display(), bytes = bytes.len(), "Backup written");
        Ok(path.display().to_string())
    }

    async fn read_artifact(&self, location: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(Path::new(location)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_directory_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let artifacts = FileArtifacts::new(dir.path().join("nested"), "backup.json");

        let location = artifacts.write_artifact(b"first").await.unwrap();
        assert!(location.ends_with("backup.json"));
        let location = artifacts.write_artifact(b"second").await.unwrap();

        assert_eq!(artifacts.read_artifact(&location).await.unwrap(), b"second");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_is_io_error() {
        let dir = TempDir::new().unwrap();
        let artifacts = FileArtifacts::new(dir.path(), "backup.json");
        let missing = dir.path().join("nope.json");

        let err = artifacts
            .read_artifact(&missing.display().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.backup.directory = Some(PathBuf::from("/tmp/cb"));
        config.backup.file_name = "out.json".to_string();

        assert_eq!(
            FileArtifacts::from_config(&config).path(),
            PathBuf::from("/tmp/cb/out.json")
        );
    }
}
