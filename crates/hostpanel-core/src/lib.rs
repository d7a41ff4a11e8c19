//! Execution and session core of the hostpanel control panel.
//!
//! Every component operates on behalf of an authenticated [`Principal`] and confines
//! its filesystem and process side effects to that tenant's root through the
//! [`sandbox`]:
//!
//! - [`JobRunner`] runs scripts once, bounded by a timeout, and manages their
//!   isolated environments.
//! - [`SessionManager`] bridges interactive shells to duplex frame channels.
//! - [`ScheduleRegistry`] maintains name-keyed entries in the shared cron table.
//! - [`FileManager`] performs file operations inside a tenant root.

pub mod activity;
pub mod config;
pub mod error;
pub mod files;
pub mod jobs;
pub mod principal;
mod process;
pub mod sandbox;
pub mod schedule;
pub mod session;

pub use activity::{ActivityEvent, ActivitySink, AuditLog, TracingActivity};
pub use error::{CoreError, CoreResult};
pub use files::{FileEntry, FileManager};
pub use jobs::{Job, JobOutput, JobRunner};
pub use principal::{Principal, Role};
pub use sandbox::Sandbox;
pub use schedule::{ScheduleRegistry, ScheduleRequest, ScheduledScript};
pub use session::{SessionId, SessionManager, SessionState, SessionSummary};
