//! File management inside a tenant root.
//!
//! Every path goes through [`sandbox::resolve`] before it touches the filesystem.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};

use crate::activity::{ActivityEvent, ActivitySink};
use crate::config::FilesConfig;
use crate::error::{CoreError, CoreResult};
use crate::principal::Principal;
use crate::sandbox;

/// One directory entry in a listing.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    /// Tenant-relative, `/`-separated.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

fn format_mtime(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Clone)]
pub struct FileManager {
    config: FilesConfig,
    activity: Arc<dyn ActivitySink>,
}

impl FileManager {
    pub fn new(config: FilesConfig, activity: Arc<dyn ActivitySink>) -> Self {
        Self { config, activity }
    }

    async fn emit(&self, principal: &Principal, action: &str, detail: String) {
        self.activity
            .record(ActivityEvent::new(principal, action, detail))
            .await;
    }

    /// Entries of the directory at `path`, sorted by name.
    pub async fn list(
        &self,
        principal: &Principal,
        root: &Path,
        path: &str,
    ) -> CoreResult<Vec<FileEntry>> {
        let dir = sandbox::resolve_existing(root, path)?;
        if !dir.is_dir() {
            return Err(CoreError::invalid(format!("not a directory: {path}")));
        }

        let mut entries = Vec::new();
        let mut reader = fs::read_dir(&dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            // Follows links, like the sandbox does; dangling ones are listed as files.
            let meta = match fs::metadata(entry.path()).await {
                Ok(meta) => Some(meta),
                Err(_) => fs::symlink_metadata(entry.path()).await.ok(),
            };
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: sandbox::relative_display(root, &dir.join(entry.file_name())),
                is_dir: meta.as_ref().is_some_and(|m| m.is_dir()),
                size: meta.as_ref().map_or(0, |m| m.len()),
                modified: meta
                    .as_ref()
                    .and_then(|m| m.modified().ok())
                    .map(format_mtime),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        self.emit(principal, "list_files", format!("Listed directory: {path}"))
            .await;
        Ok(entries)
    }

    /// Contents of the file at `path`.
    pub async fn read(&self, principal: &Principal, root: &Path, path: &str) -> CoreResult<Vec<u8>> {
        let file = sandbox::resolve_existing(root, path)?;
        let meta = fs::metadata(&file).await?;
        if meta.is_dir() {
            return Err(CoreError::invalid(format!("is a directory: {path}")));
        }
        if meta.len() > self.config.max_read_bytes {
            return Err(CoreError::invalid(format!(
                "file too large ({} > {} bytes): {path}",
                meta.len(),
                self.config.max_read_bytes
            )));
        }

        let contents = fs::read(&file).await?;
        self.emit(principal, "read_file", format!("Downloaded file: {path}"))
            .await;
        Ok(contents)
    }

    /// Write `contents` to `<dir>/<file_name>`, replacing an existing file.
    /// Returns the tenant-relative path written.
    pub async fn write(
        &self,
        principal: &Principal,
        root: &Path,
        dir: &str,
        file_name: &str,
        contents: &[u8],
    ) -> CoreResult<String> {
        let path = self.store(root, dir, file_name, contents).await?;
        self.emit(principal, "write_file", format!("Uploaded file: {path}"))
            .await;
        Ok(path)
    }

    /// [`FileManager::write`] restricted to Python scripts.
    pub async fn upload_script(
        &self,
        principal: &Principal,
        root: &Path,
        dir: &str,
        file_name: &str,
        contents: &[u8],
    ) -> CoreResult<String> {
        if !file_name.ends_with(".py") {
            return Err(CoreError::invalid("Only Python (.py) files are allowed"));
        }
        let path = self.store(root, dir, file_name, contents).await?;
        self.emit(principal, "upload_script", format!("Uploaded script: {path}"))
            .await;
        Ok(path)
    }

    async fn store(
        &self,
        root: &Path,
        dir: &str,
        file_name: &str,
        contents: &[u8],
    ) -> CoreResult<String> {
        sandbox::validate_file_name(file_name)?;
        let target_dir = sandbox::resolve_existing(root, dir)?;
        if !target_dir.is_dir() {
            return Err(CoreError::invalid(format!("not a directory: {dir}")));
        }
        // Re-resolve so an existing symlink with this name is checked too.
        let target = sandbox::resolve(root, target_dir.join(file_name))?;
        if target.is_dir() {
            return Err(CoreError::invalid(format!("is a directory: {file_name}")));
        }

        fs::write(&target, contents).await?;
        info!(path = %target.display(), bytes = contents.len(), "wrote file");
        Ok(sandbox::relative_display(root, &target))
    }

    /// Create the directory at `path`. Its parent must already exist.
    pub async fn create_dir(
        &self,
        principal: &Principal,
        root: &Path,
        path: &str,
    ) -> CoreResult<String> {
        let dir = sandbox::resolve(root, path)?;
        if fs::symlink_metadata(&dir).await.is_ok() {
            return Err(CoreError::AlreadyExists(path.to_string()));
        }
        match dir.parent() {
            Some(parent) if parent.is_dir() => {}
            _ => {
                return Err(CoreError::not_found(format!(
                    "parent directory of {path}"
                )));
            }
        }

        fs::create_dir(&dir).await?;
        let relative = sandbox::relative_display(root, &dir);
        self.emit(
            principal,
            "create_dir",
            format!("Created directory: {relative}"),
        )
        .await;
        Ok(relative)
    }

    /// Delete a file, or a directory with everything below it.
    ///
    /// A symbolic link is removed itself; its target is left alone.
    pub async fn delete(&self, principal: &Principal, root: &Path, path: &str) -> CoreResult<()> {
        let target = sandbox::resolve_entry(root, path)?;
        if target == root.canonicalize()? {
            warn!(tenant = %principal.tenant, "attempted to delete tenant root");
            return Err(CoreError::forbidden("cannot delete the root directory"));
        }

        if fs::symlink_metadata(&target).await?.is_dir() {
            fs::remove_dir_all(&target).await?;
        } else {
            fs::remove_file(&target).await?;
        }
        info!(path = %target.display(), "deleted");
        self.emit(principal, "delete_item", format!("Deleted: {path}"))
            .await;
        Ok(())
    }

    /// Rename or move `from` to `to`; the destination must not exist.
    /// A symbolic link is moved as a link.
    pub async fn rename(
        &self,
        principal: &Principal,
        root: &Path,
        from: &str,
        to: &str,
    ) -> CoreResult<String> {
        let source = sandbox::resolve_entry(root, from)?;
        if source == root.canonicalize()? {
            warn!(tenant = %principal.tenant, "attempted to rename tenant root");
            return Err(CoreError::forbidden("cannot rename the root directory"));
        }
        let destination = sandbox::resolve(root, to)?;
        if fs::symlink_metadata(&destination).await.is_ok() {
            return Err(CoreError::AlreadyExists(to.to_string()));
        }
        match destination.parent() {
            Some(parent) if parent.is_dir() => {}
            _ => return Err(CoreError::not_found(format!("parent directory of {to}"))),
        }
        if destination.starts_with(&source) {
            return Err(CoreError::invalid("cannot move a directory into itself"));
        }

        fs::rename(&source, &destination).await?;
        info!(from = %source.display(), to = %destination.display(), "renamed");
        self.emit(principal, "rename_item", format!("Renamed: {from} -> {to}"))
            .await;
        Ok(sandbox::relative_display(root, &destination))
    }
}
