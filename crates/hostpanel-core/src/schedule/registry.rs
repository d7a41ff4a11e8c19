//! Idempotent, name-keyed schedule entries in the shared table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::store::TableStore;
use super::table::{CronTable, TableEntry, normalize_cron};
use super::wrapper::{Wrapper, script_path_for, wrapper_path_for, write_wrapper};
use crate::activity::{ActivityEvent, ActivitySink};
use crate::config::ScheduleConfig;
use crate::error::{CoreError, CoreResult};
use crate::jobs::{self, JobRunner};
use crate::principal::Principal;
use crate::sandbox;

pub const NAME_MAX_LEN: usize = 128;
const CRON_FIELDS: usize = 5;

/// A request to (re)schedule a script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub name: String,
    pub cron_expression: String,
    /// Script path relative to the tenant root.
    pub script_path: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A managed entry as recovered from the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledScript {
    pub name: String,
    pub cron_expression: String,
    pub script_path: PathBuf,
    pub wrapper_path: PathBuf,
}

impl ScheduledScript {
    fn from_entry(entry: &TableEntry) -> Option<Self> {
        let wrapper_path = PathBuf::from(&entry.command);
        let script_path = script_path_for(&wrapper_path)?;
        Some(Self {
            name: entry.name.clone(),
            cron_expression: entry.cron_expression.clone(),
            script_path,
            wrapper_path,
        })
    }

    fn within(&self, scope: Option<&Path>) -> bool {
        scope.is_none_or(|root| self.script_path.starts_with(root))
    }
}

/// Check an entry name before it becomes part of a table comment.
pub fn validate_name(name: &str) -> CoreResult<()> {
    if name.trim().is_empty() {
        return Err(CoreError::invalid("schedule name is empty"));
    }
    if name.len() > NAME_MAX_LEN {
        return Err(CoreError::invalid(format!(
            "schedule name too long ({} > {NAME_MAX_LEN})",
            name.len()
        )));
    }
    if name != name.trim() {
        return Err(CoreError::invalid(
            "schedule name cannot start or end with whitespace",
        ));
    }
    if name.contains(['#', '\n', '\r', '\0']) {
        return Err(CoreError::invalid(
            "schedule name cannot contain '#' or line breaks",
        ));
    }
    Ok(())
}

/// Field-count check only; field values are left to cron.
pub fn validate_cron_expression(expression: &str) -> CoreResult<String> {
    let fields = expression.split_whitespace().count();
    if fields != CRON_FIELDS {
        return Err(CoreError::invalid(
            "Invalid cron expression. Must have 5 parts: minute, hour, day of month, month, day of week",
        ));
    }
    Ok(normalize_cron(expression))
}

/// Cron splits commands on whitespace and treats `%` as a newline.
fn validate_command_path(path: &Path) -> CoreResult<()> {
    let text = path.to_string_lossy();
    if text.contains(|c: char| c.is_whitespace() || c == '%') {
        return Err(CoreError::invalid(format!(
            "script path cannot contain whitespace or '%': {}",
            path.display()
        )));
    }
    Ok(())
}

pub struct ScheduleRegistry {
    store: Arc<dyn TableStore>,
    runner: JobRunner,
    config: ScheduleConfig,
    activity: Arc<dyn ActivitySink>,
    /// Serializes every read-modify-install cycle on the table.
    table_lock: Mutex<()>,
}

impl ScheduleRegistry {
    pub fn new(
        store: Arc<dyn TableStore>,
        runner: JobRunner,
        config: ScheduleConfig,
        activity: Arc<dyn ActivitySink>,
    ) -> Self {
        Self {
            store,
            runner,
            config,
            activity,
            table_lock: Mutex::new(()),
        }
    }

    /// Create or replace the entry called `request.name`.
    ///
    /// With a `scope`, an existing entry of that name may only be replaced when its
    /// script lies inside the scope; otherwise the name is taken (`AlreadyExists`)
    /// and neither the table nor any wrapper is touched.
    pub async fn upsert(
        &self,
        principal: &Principal,
        root: &Path,
        request: &ScheduleRequest,
        scope: Option<&Path>,
    ) -> CoreResult<ScheduledScript> {
        validate_name(&request.name)?;
        let cron_expression = validate_cron_expression(&request.cron_expression)?;
        for name in request.env.keys() {
            if !jobs::is_shell_identifier(name) {
                return Err(CoreError::invalid(format!(
                    "invalid environment variable name: {name:?}"
                )));
            }
        }

        let script = sandbox::resolve_existing(root, &request.script_path)?;
        if !script.is_file() {
            return Err(CoreError::invalid(format!(
                "not a file: {}",
                request.script_path
            )));
        }
        let wrapper_path = sandbox::resolve(root, wrapper_path_for(&script)?)?;
        validate_command_path(&wrapper_path)?;

        let script_dir = script.parent().unwrap_or(root);
        let log_file = sandbox::resolve(root, script_dir.join(&self.config.log_file_name))?;
        let env_dir = sandbox::resolve(root, jobs::env_dir_for(&script)?)?;
        let activate = env_dir
            .is_dir()
            .then(|| jobs::activate_script_in(&env_dir));
        let interpreter = self.runner.interpreter_for(root, &script)?;

        let contents = Wrapper {
            script: &script,
            interpreter: &interpreter,
            activate: activate.as_deref(),
            env: &request.env,
            log_file: &log_file,
        }
        .render();
        let entry = TableEntry {
            name: request.name.clone(),
            cron_expression: cron_expression.clone(),
            command: wrapper_path.to_string_lossy().into_owned(),
        };

        {
            let _guard = self.table_lock.lock().await;
            let mut table = CronTable::parse(&self.store.read().await?);
            if scope.is_some() {
                let foreign = table
                    .entries()
                    .filter(|e| e.name == request.name)
                    .any(|e| !ScheduledScript::from_entry(e).is_some_and(|s| s.within(scope)));
                if foreign {
                    return Err(CoreError::AlreadyExists(format!(
                        "scheduled script {}",
                        request.name
                    )));
                }
            }

            // The wrapper and its table line change together.
            write_wrapper(&wrapper_path, &contents).await?;
            debug!(wrapper = %wrapper_path.display(), "wrote schedule wrapper");
            table.upsert(entry);
            self.store.install(&table.render()).await?;
        }

        info!(
            name = %request.name,
            cron = %cron_expression,
            script = %script.display(),
            "scheduled script"
        );
        self.activity
            .record(ActivityEvent::new(
                principal,
                "schedule_script",
                format!(
                    "Scheduled script: {} with cron: {}",
                    request.script_path, cron_expression
                ),
            ))
            .await;

        Ok(ScheduledScript {
            name: request.name.clone(),
            cron_expression,
            script_path: script,
            wrapper_path,
        })
    }

    /// Delete the entry called `name`.
    ///
    /// With a `scope`, only entries whose script lies inside it are visible; anything
    /// else reports `NotFound`. The table is not rewritten when nothing matches.
    pub async fn remove(
        &self,
        principal: &Principal,
        name: &str,
        scope: Option<&Path>,
    ) -> CoreResult<()> {
        {
            let _guard = self.table_lock.lock().await;
            let mut table = CronTable::parse(&self.store.read().await?);
            if !table.contains(name) {
                return Err(CoreError::not_found(format!("scheduled script {name}")));
            }
            if scope.is_some() {
                let visible = table
                    .entries()
                    .filter(|e| e.name == name)
                    .filter_map(ScheduledScript::from_entry)
                    .any(|s| s.within(scope));
                if !visible {
                    return Err(CoreError::not_found(format!("scheduled script {name}")));
                }
            }
            table.remove(name);
            self.store.install(&table.render()).await?;
        }

        info!(name, "unscheduled script");
        self.activity
            .record(ActivityEvent::new(
                principal,
                "unschedule_script",
                format!("Unscheduled script: {name}"),
            ))
            .await;
        Ok(())
    }

    /// Managed entries in table order, limited to `scope` when given.
    pub async fn list(
        &self,
        principal: &Principal,
        scope: Option<&Path>,
    ) -> CoreResult<Vec<ScheduledScript>> {
        let table = {
            let _guard = self.table_lock.lock().await;
            CronTable::parse(&self.store.read().await?)
        };
        let scripts = table
            .entries()
            .filter_map(|entry| {
                let script = ScheduledScript::from_entry(entry);
                if script.is_none() {
                    debug!(name = %entry.name, "skipping unrecognized schedule entry");
                }
                script
            })
            .filter(|s| s.within(scope))
            .collect();

        self.activity
            .record(ActivityEvent::new(
                principal,
                "list_scheduled_scripts",
                "Listed scheduled scripts",
            ))
            .await;
        Ok(scripts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("nightly report").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("  ").is_err());
        assert!(validate_name(" padded").is_err());
        assert!(validate_name("a#b").is_err());
        assert!(validate_name("a\nb").is_err());
        assert!(validate_name(&"x".repeat(NAME_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_cron_expression() {
        assert_eq!(
            validate_cron_expression(" */5  * * * 1-5 ").unwrap(),
            "*/5 * * * 1-5"
        );
        // Only the field count is checked.
        assert!(validate_cron_expression("70 * * * *").is_ok());
        assert!(validate_cron_expression("* * * *").is_err());
        assert!(validate_cron_expression("* * * * * *").is_err());
        assert!(validate_cron_expression("* * * *\n* /bin/evil").is_err());
    }

    #[test]
    fn test_scope_filter() {
        let script = ScheduledScript {
            name: "a".to_string(),
            cron_expression: "* * * * *".to_string(),
            script_path: PathBuf::from("/home/alice/a.py"),
            wrapper_path: PathBuf::from("/home/alice/a_wrapper.sh"),
        };
        assert!(script.within(None));
        assert!(script.within(Some(Path::new("/home/alice"))));
        assert!(!script.within(Some(Path::new("/home/al"))));
        assert!(!script.within(Some(Path::new("/home/bob"))));
    }
}
