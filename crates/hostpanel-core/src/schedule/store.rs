//! Backends holding the shared schedule table.
//!
//! `install` replaces the whole table in one step: the new contents are written to a
//! temporary file first, and the live table only changes once that file is complete.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

#[async_trait]
pub trait TableStore: Send + Sync {
    /// Current table contents; an absent table reads as empty.
    async fn read(&self) -> CoreResult<String>;

    /// Replace the table with `contents`.
    async fn install(&self, contents: &str) -> CoreResult<()>;
}

/// The invoking user's crontab, managed through the `crontab` command.
#[derive(Debug, Clone)]
pub struct CrontabStore {
    binary: PathBuf,
}

impl CrontabStore {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl TableStore for CrontabStore {
    async fn read(&self) -> CoreResult<String> {
        let output = Command::new(&self.binary)
            .arg("-l")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| CoreError::LaunchFailed(format!("{}: {}", self.binary.display(), err)))?;

        // `crontab -l` fails when the user has no table yet.
        if !output.status.success() {
            debug!(
                status = %output.status,
                "crontab -l failed, treating table as empty"
            );
            return Ok(String::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn install(&self, contents: &str) -> CoreResult<()> {
        let staged = stage(contents.to_string(), None).await?;

        let output = Command::new(&self.binary)
            .arg(staged.path())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                CoreError::PersistFailed(format!("{}: {}", self.binary.display(), err))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, "crontab rejected the new table");
            return Err(CoreError::PersistFailed(format!(
                "failed to install crontab: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// A plain table file replaced by rename.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TableStore for FileStore {
    async fn read(&self) -> CoreResult<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(CoreError::Io(err)),
        }
    }

    async fn install(&self, contents: &str) -> CoreResult<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let staged = stage(contents.to_string(), Some(dir)).await?;

        let target = self.path.clone();
        tokio::task::spawn_blocking(move || staged.persist(&target).map(|_| ()))
            .await
            .map_err(|err| CoreError::PersistFailed(err.to_string()))?
            .map_err(|err| {
                CoreError::PersistFailed(format!("{}: {}", self.path.display(), err.error))
            })
    }
}

/// Write `contents` to a fresh temporary file, in `dir` when given.
async fn stage(contents: String, dir: Option<PathBuf>) -> CoreResult<NamedTempFile> {
    tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
        let mut file = match &dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        file.write_all(contents.as_bytes())?;
        file.as_file().sync_all()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))?;
        }
        Ok(file)
    })
    .await
    .map_err(|err| CoreError::PersistFailed(err.to_string()))?
    .map_err(|err| CoreError::PersistFailed(format!("staging table: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("table"));

        assert_eq!(store.read().await.unwrap(), "");
        store.install("* * * * * /x\n").await.unwrap();
        assert_eq!(store.read().await.unwrap(), "* * * * * /x\n");
        store.install("").await.unwrap();
        assert_eq!(store.read().await.unwrap(), "");

        // Only the table itself remains; staging files are renamed away.
        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["table".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_missing_directory_fails_without_writing() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("missing/table"));
        assert!(matches!(
            store.install("x\n").await,
            Err(CoreError::PersistFailed(_))
        ));
        assert!(!temp.path().join("missing").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crontab_store_with_fake_binary() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let saved = temp.path().join("saved");
        let binary = temp.path().join("crontab");
        // `-l` prints the saved table or fails like crontab does without one;
        // otherwise the argument is the file to install.
        std::fs::write(
            &binary,
            format!(
                "#!/bin/sh\nif [ \"$1\" = -l ]; then cat '{0}' 2>/dev/null || exit 1; else cp \"$1\" '{0}'; fi\n",
                saved.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let store = CrontabStore::new(&binary);
        assert_eq!(store.read().await.unwrap(), "");
        store.install("0 * * * * /y\n").await.unwrap();
        assert_eq!(store.read().await.unwrap(), "0 * * * * /y\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crontab_store_reports_install_failure() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let binary = temp.path().join("crontab");
        std::fs::write(&binary, "#!/bin/sh\necho 'bad minute' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let err = CrontabStore::new(&binary).install("x\n").await.unwrap_err();
        assert!(matches!(err, CoreError::PersistFailed(ref m) if m.contains("bad minute")));
    }
}
