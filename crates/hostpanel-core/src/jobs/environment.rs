//! Per-script isolated environments (`.venv` beside the script).

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::process::Command;
use tracing::{info, warn};

use super::runner::JobRunner;
use crate::error::{CoreError, CoreResult};
use crate::process;
use crate::sandbox;

pub const ENV_DIR_NAME: &str = ".venv";
pub const MANIFEST_FILE_NAME: &str = "requirements.txt";

/// Output of a successful dependency installation.
#[derive(Debug, Clone, Serialize)]
pub struct InstallOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Location of the isolated environment belonging to `script`.
pub fn env_dir_for(script: &Path) -> CoreResult<PathBuf> {
    let parent = script
        .parent()
        .ok_or_else(|| CoreError::invalid(format!("no parent directory: {}", script.display())))?;
    Ok(parent.join(ENV_DIR_NAME))
}

pub fn interpreter_in(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts").join("python.exe")
    } else {
        env_dir.join("bin").join("python")
    }
}

pub fn installer_in(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts").join("pip.exe")
    } else {
        env_dir.join("bin").join("pip")
    }
}

pub fn activate_script_in(env_dir: &Path) -> PathBuf {
    env_dir.join("bin").join("activate")
}

/// Check package specifiers before they are written to a manifest.
///
/// Entries starting with `-` would be read by the installer as options
/// (`-r`, `--index-url`, ...), line breaks would smuggle in extra lines.
pub fn validate_packages(packages: &[String]) -> CoreResult<()> {
    for package in packages {
        let trimmed = package.trim();
        if trimmed.is_empty() {
            return Err(CoreError::invalid("empty package specifier"));
        }
        if package.contains(['\n', '\r', '\0']) {
            return Err(CoreError::invalid(format!(
                "package specifier contains a line break: {package:?}"
            )));
        }
        if trimmed.starts_with('-') {
            return Err(CoreError::invalid(format!(
                "package specifier cannot start with '-': {trimmed}"
            )));
        }
    }
    Ok(())
}

fn stderr_or_status(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.trim().is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr.into_owned()
    }
}

impl JobRunner {
    /// Create an empty environment beside `script_path`. Returns its path.
    pub async fn create_isolated_environment(
        &self,
        root: &Path,
        script_path: &str,
    ) -> CoreResult<PathBuf> {
        let script = sandbox::resolve_existing(root, script_path)?;
        let env_dir = sandbox::resolve(root, env_dir_for(&script)?)?;
        if tokio::fs::symlink_metadata(&env_dir).await.is_ok() {
            return Err(CoreError::AlreadyExists(sandbox::relative_display(
                root, &env_dir,
            )));
        }

        let mut cmd = Command::new(&self.config.venv_python);
        cmd.arg("-m").arg("venv").arg(&env_dir);
        if let Some(parent) = env_dir.parent() {
            cmd.current_dir(parent);
        }

        let output = process::output_with_timeout(&mut cmd, self.config.setup_timeout())
            .await
            .map_err(|err| {
                CoreError::CreationFailed(format!(
                    "{}: {}",
                    self.config.venv_python.display(),
                    err
                ))
            })?;
        if !output.status.success() {
            warn!(env = %env_dir.display(), "environment creation failed");
            return Err(CoreError::CreationFailed(stderr_or_status(&output)));
        }

        info!(env = %env_dir.display(), "created isolated environment");
        Ok(env_dir)
    }

    /// Write `packages` to the manifest beside `env_path` and run the environment's installer.
    ///
    /// Installer failures are returned with the installer's stderr verbatim.
    pub async fn install_dependencies(
        &self,
        root: &Path,
        env_path: &str,
        packages: &[String],
    ) -> CoreResult<InstallOutput> {
        validate_packages(packages)?;

        let env_dir = sandbox::resolve(root, env_path)?;
        if !env_dir.is_dir() {
            return Err(CoreError::EnvironmentMissing(env_path.to_string()));
        }
        let installer = installer_in(&env_dir);
        if !installer.exists() {
            return Err(CoreError::EnvironmentMissing(format!(
                "{} has no package installer",
                env_path
            )));
        }

        let parent = env_dir.parent().unwrap_or(root);
        let manifest = sandbox::resolve(root, parent.join(MANIFEST_FILE_NAME))?;
        let mut contents = packages.iter().map(|p| p.trim()).collect::<Vec<_>>().join("\n");
        contents.push('\n');
        tokio::fs::write(&manifest, contents).await?;

        let mut cmd = Command::new(&installer);
        cmd.arg("install")
            .arg("-r")
            .arg(&manifest)
            .current_dir(parent);
        let output = process::output_with_timeout(&mut cmd, self.config.setup_timeout())
            .await
            .map_err(|err| CoreError::InstallFailed(format!("{}: {}", installer.display(), err)))?;
        if !output.status.success() {
            warn!(env = %env_dir.display(), "dependency installation failed");
            return Err(CoreError::InstallFailed(stderr_or_status(&output)));
        }

        info!(
            env = %env_dir.display(),
            packages = packages.len(),
            "installed dependencies"
        );
        Ok(InstallOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
