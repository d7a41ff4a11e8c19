//! Activity events for externally visible operations.
//!
//! Events are fire-and-forget: a sink that fails to record an event logs the problem
//! and carries on, it never fails the operation that produced the event.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::CoreResult;
use crate::principal::Principal;

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEvent {
    pub timestamp: String,
    pub actor: String,
    pub action: String,
    pub source_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ActivityEvent {
    pub fn new(principal: &Principal, action: &str, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            actor: principal.tenant.clone(),
            action: action.to_string(),
            source_address: principal.source().to_string(),
            detail: Some(detail.into()),
        }
    }
}

/// Receiver of activity events.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn record(&self, event: ActivityEvent);
}

/// Sink that only emits a log line per event.
#[derive(Debug, Clone, Default)]
pub struct TracingActivity;

#[async_trait]
impl ActivitySink for TracingActivity {
    async fn record(&self, event: ActivityEvent) {
        info!(
            actor = %event.actor,
            action = %event.action,
            source = %event.source_address,
            detail = event.detail.as_deref().unwrap_or(""),
            "activity"
        );
    }
}

/// Appends one JSON object per event to a file.
#[derive(Clone)]
pub struct AuditLog {
    file: Arc<Mutex<File>>,
    path: PathBuf,
}

impl AuditLog {
    pub async fn open(path: PathBuf) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ActivitySink for AuditLog {
    async fn record(&self, event: ActivityEvent) {
        let mut line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(err) => {
                warn!("failed to serialize activity event: {}", err);
                return;
            }
        };
        line.push('\n');

        let mut file = self.file.lock().await;
        if let Err(err) = file.write_all(line.as_bytes()).await {
            warn!(path = %self.path.display(), "failed to write activity event: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::Role;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_audit_log_appends_json_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logs/activity.jsonl");
        let log = AuditLog::open(path.clone()).await.unwrap();

        let alice = Principal::new("alice", Role::User).with_source_address("10.0.0.7");
        log.record(ActivityEvent::new(&alice, "run_script", "Ran script: a.py"))
            .await;
        log.record(ActivityEvent::new(&alice, "list_files", "Listed directory: "))
            .await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["actor"], "alice");
        assert_eq!(lines[0]["action"], "run_script");
        assert_eq!(lines[0]["source_address"], "10.0.0.7");
        assert_eq!(lines[1]["action"], "list_files");
    }

    #[test]
    fn test_event_defaults_source() {
        let bob = Principal::new("bob", Role::User);
        let event = ActivityEvent::new(&bob, "kill_terminal", "x");
        assert_eq!(event.source_address, "unknown");
    }
}
