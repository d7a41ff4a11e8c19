//! Recurring script execution through a shared cron table.

mod registry;
mod store;
mod table;
mod wrapper;

use std::sync::Arc;

pub use registry::{
    NAME_MAX_LEN, ScheduleRegistry, ScheduleRequest, ScheduledScript, validate_cron_expression,
    validate_name,
};
pub use store::{CrontabStore, FileStore, TableStore};
pub use table::{CronTable, MARKER_SUFFIX, TableEntry, marker};
pub use wrapper::{Wrapper, script_path_for, shell_quote, wrapper_path_for};

use crate::config::{ScheduleBackend, ScheduleConfig};

/// Table store selected by the configuration.
pub fn store_from_config(config: &ScheduleConfig) -> Arc<dyn TableStore> {
    match config.backend {
        ScheduleBackend::Crontab => Arc::new(CrontabStore::new(&config.crontab_binary)),
        ScheduleBackend::File => Arc::new(FileStore::new(&config.table_path)),
    }
}
