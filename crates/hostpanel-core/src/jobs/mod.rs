//! One-off script execution and per-script isolated environments.

mod environment;
mod runner;

use std::collections::HashMap;

pub use environment::{
    ENV_DIR_NAME, InstallOutput, MANIFEST_FILE_NAME, activate_script_in, env_dir_for,
    installer_in, interpreter_in, validate_packages,
};
pub use runner::{Job, JobOutput, JobRunner};

use crate::error::{CoreError, CoreResult};

/// Whether `name` is usable as a shell variable name.
pub fn is_shell_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Reject environment maps whose names could not be exported by a shell.
pub fn validate_env_names(env: &HashMap<String, String>) -> CoreResult<()> {
    for (name, value) in env {
        if !is_shell_identifier(name) {
            return Err(CoreError::invalid(format!(
                "invalid environment variable name: {name:?}"
            )));
        }
        if value.contains('\0') {
            return Err(CoreError::invalid(format!(
                "environment variable {name} contains a null byte"
            )));
        }
    }
    Ok(())
}
