//! Error taxonomy shared by every core component.
//!
//! Each variant maps to a stable code (see [`CoreError::code`]) that the serving
//! layer surfaces to callers unchanged.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by the execution and session core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A path resolved outside of the tenant root.
    #[error("path escapes tenant root: {}", .0.display())]
    SandboxViolation(PathBuf),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The job exceeded its wall-clock bound and was killed.
    #[error("execution timed out after {}s", .0.as_secs_f64())]
    TimedOut(Duration),

    #[error("failed to launch process: {0}")]
    LaunchFailed(String),

    #[error("failed to persist schedule table: {0}")]
    PersistFailed(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("isolated environment missing: {0}")]
    EnvironmentMissing(String),

    #[error("failed to create isolated environment: {0}")]
    CreationFailed(String),

    /// Installer output is carried verbatim.
    #[error("dependency installation failed: {0}")]
    InstallFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    /// Stable, machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SandboxViolation(_) => "SANDBOX_VIOLATION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::TimedOut(_) => "TIMED_OUT",
            Self::LaunchFailed(_) => "LAUNCH_FAILED",
            Self::PersistFailed(_) => "PERSIST_FAILED",
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::EnvironmentMissing(_) => "ENVIRONMENT_MISSING",
            Self::CreationFailed(_) => "CREATION_FAILED",
            Self::InstallFailed(_) => "INSTALL_FAILED",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
