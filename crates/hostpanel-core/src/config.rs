//! Configuration sections owned by the core components.
//!
//! These are embedded in the server's TOML configuration; every field has a default
//! so partial files deserialize.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tenant file area configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Directory holding one root per tenant.
    pub base_dir: PathBuf,
    /// Largest file `read` will return.
    pub max_read_bytes: u64,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/home"),
            max_read_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Script execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Interpreter used when a script has no isolated environment.
    pub default_interpreter: PathBuf,
    /// Interpreter used to create isolated environments (`<venv_python> -m venv`).
    pub venv_python: PathBuf,
    /// Timeout applied when a job does not specify one.
    pub default_timeout_secs: u64,
    /// Per-stream capture limit.
    pub max_output_bytes: usize,
    /// Bound for environment creation and dependency installation.
    pub setup_timeout_secs: u64,
}

impl JobsConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_interpreter: PathBuf::from("python3"),
            venv_python: PathBuf::from("python3"),
            default_timeout_secs: 30,
            max_output_bytes: 1024 * 1024,
            setup_timeout_secs: 600,
        }
    }
}

/// Interactive shell session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub shell: PathBuf,
    pub shell_args: Vec<String>,
    /// Time between SIGTERM and SIGKILL when a session is torn down.
    pub terminate_grace_ms: u64,
    /// Read size for the shell's output streams.
    pub read_chunk_bytes: usize,
}

impl SessionsConfig {
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("bash"),
            shell_args: Vec::new(),
            terminate_grace_ms: 2000,
            read_chunk_bytes: 1024,
        }
    }
}

/// Where the shared schedule table lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleBackend {
    /// The invoking user's crontab, managed through the `crontab` command.
    #[default]
    Crontab,
    /// A plain table file read by an external cron daemon.
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub backend: ScheduleBackend,
    pub crontab_binary: PathBuf,
    /// Table location for the `file` backend.
    pub table_path: PathBuf,
    /// Log file written beside each scheduled script.
    pub log_file_name: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            backend: ScheduleBackend::Crontab,
            crontab_binary: PathBuf::from("crontab"),
            table_path: PathBuf::from("/var/lib/hostpanel/crontab"),
            log_file_name: "cron_output.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// JSON-lines audit file; events are only logged when unset.
    pub audit_log: Option<String>,
}
