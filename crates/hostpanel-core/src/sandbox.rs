//! Path sandbox confining every filesystem and process operation to a tenant root.
//!
//! [`resolve`] is the single trust anchor: it walks the requested path one component
//! at a time, canonicalizing every component that exists (so `..` and symbolic links
//! are evaluated against the real filesystem) and appending components that do not
//! exist yet. The result is accepted only when it is the root itself or a descendant
//! of it, compared segment by segment with [`Path::starts_with`].

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::principal::validate_tenant_id;

/// Maps tenants to their directories under a shared base directory.
#[derive(Debug, Clone)]
pub struct Sandbox {
    base_dir: PathBuf,
}

impl Sandbox {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Canonical root directory of `tenant`, created on first access.
    pub fn tenant_root(&self, tenant: &str) -> CoreResult<PathBuf> {
        validate_tenant_id(tenant)?;
        let root = self.base_dir.join(tenant);
        if !root.exists() {
            debug!(tenant, root = %root.display(), "creating tenant root");
        }
        std::fs::create_dir_all(&root)?;
        Ok(root.canonicalize()?)
    }
}

/// Resolve `relative` against `root` and verify the result stays inside `root`.
///
/// `relative` may also be an absolute path, in which case it replaces `root` before
/// validation; resolving an already-resolved path therefore yields the same path.
/// The returned path need not exist; callers check existence themselves.
pub fn resolve(root: &Path, relative: impl AsRef<Path>) -> CoreResult<PathBuf> {
    let relative = relative.as_ref();
    if relative.as_os_str().to_string_lossy().contains('\0') {
        return Err(CoreError::invalid("path contains a null byte"));
    }

    let canonical_root = root.canonicalize().map_err(|err| match err.kind() {
        ErrorKind::NotFound => CoreError::not_found(format!("tenant root {}", root.display())),
        _ => CoreError::Io(err),
    })?;
    let requested = canonical_root.join(relative);

    let mut current = PathBuf::new();
    for component in requested.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => current.push(component),
            Component::CurDir => {}
            // `current` never contains a symlink, so popping is exact.
            Component::ParentDir => {
                current.pop();
            }
            Component::Normal(name) => {
                let candidate = current.join(name);
                current = match std::fs::symlink_metadata(&candidate) {
                    Ok(meta) => match candidate.canonicalize() {
                        Ok(canonical) => canonical,
                        Err(_) if meta.file_type().is_symlink() => {
                            warn!(
                                path = %candidate.display(),
                                "dangling symlink cannot be verified"
                            );
                            return Err(CoreError::SandboxViolation(requested));
                        }
                        Err(err) => return Err(CoreError::Io(err)),
                    },
                    Err(err) if err.kind() == ErrorKind::NotFound => candidate,
                    Err(err) => return Err(CoreError::Io(err)),
                };
            }
        }
    }

    if current.starts_with(&canonical_root) {
        Ok(current)
    } else {
        warn!(
            requested = %requested.display(),
            resolved = %current.display(),
            root = %canonical_root.display(),
            "sandbox escape attempt"
        );
        Err(CoreError::SandboxViolation(requested))
    }
}

/// Resolve a path that must already exist.
pub fn resolve_existing(root: &Path, relative: impl AsRef<Path>) -> CoreResult<PathBuf> {
    let relative = relative.as_ref();
    let resolved = resolve(root, relative)?;
    if !resolved.exists() {
        return Err(CoreError::not_found(relative.display().to_string()));
    }
    Ok(resolved)
}

/// Resolve an existing directory entry without following it.
///
/// The parent directory goes through [`resolve`]; the final segment is kept as given,
/// so a symbolic link names the link itself rather than its target. Paths with no
/// final segment (`""`, `.`, `a/..`) resolve like [`resolve_existing`].
pub fn resolve_entry(root: &Path, relative: impl AsRef<Path>) -> CoreResult<PathBuf> {
    let relative = relative.as_ref();
    let Some(name) = relative.file_name() else {
        return resolve_existing(root, relative);
    };
    let parent = resolve_existing(root, relative.parent().unwrap_or(Path::new("")))?;
    let entry = parent.join(name);
    if std::fs::symlink_metadata(&entry).is_err() {
        return Err(CoreError::not_found(relative.display().to_string()));
    }
    Ok(entry)
}

/// Path of `full_path` relative to `root`, always `/`-separated.
pub fn relative_display(root: &Path, full_path: &Path) -> String {
    let Ok(relative) = full_path.strip_prefix(root) else {
        return String::new();
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            parts.push(part.to_string_lossy().to_string());
        }
    }

    parts.join("/")
}

/// Check that `name` is a single, plain path segment.
pub fn validate_file_name(name: &str) -> CoreResult<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains('\0') => Ok(()),
        _ => Err(CoreError::invalid(format!("invalid file name: {name:?}"))),
    }
}
