//! Shared fixtures for core integration tests.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hostpanel_core::config::{JobsConfig, ScheduleConfig, SessionsConfig};
use hostpanel_core::schedule::FileStore;
use hostpanel_core::{
    ActivityEvent, ActivitySink, JobRunner, Principal, Role, Sandbox, ScheduleRegistry,
    SessionManager,
};
use tempfile::TempDir;

/// Activity sink that keeps every event for inspection.
#[derive(Default)]
pub struct RecordingActivity {
    events: Mutex<Vec<ActivityEvent>>,
}

impl RecordingActivity {
    pub fn actions(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.action.clone())
            .collect()
    }
}

#[async_trait]
impl ActivitySink for RecordingActivity {
    async fn record(&self, event: ActivityEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn user(tenant: &str) -> Principal {
    Principal::new(tenant, Role::User).with_source_address("127.0.0.1")
}

pub fn admin() -> Principal {
    Principal::new("admin", Role::Admin)
}

pub fn jobs_config() -> JobsConfig {
    JobsConfig {
        default_interpreter: PathBuf::from("/bin/sh"),
        ..JobsConfig::default()
    }
}

/// A base directory with tenant roots created on demand.
pub struct Fixture {
    pub temp: TempDir,
    pub sandbox: Sandbox,
    pub activity: Arc<RecordingActivity>,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let sandbox = Sandbox::new(temp.path().join("home"));
        Self {
            temp,
            sandbox,
            activity: Arc::new(RecordingActivity::default()),
        }
    }

    pub fn root(&self, tenant: &str) -> PathBuf {
        self.sandbox.tenant_root(tenant).unwrap()
    }

    /// Write `body` at `relative` inside the tenant's root.
    pub fn script(&self, tenant: &str, relative: &str, body: &str) -> PathBuf {
        let path = self.root(tenant).join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    pub fn table_path(&self) -> PathBuf {
        self.temp.path().join("crontab")
    }

    pub fn runner(&self) -> JobRunner {
        JobRunner::new(jobs_config())
    }

    pub fn registry(&self) -> ScheduleRegistry {
        ScheduleRegistry::new(
            Arc::new(FileStore::new(self.table_path())),
            self.runner(),
            ScheduleConfig::default(),
            self.activity.clone(),
        )
    }

    pub fn sessions(&self) -> SessionManager {
        SessionManager::new(
            self.sandbox.clone(),
            SessionsConfig {
                shell: PathBuf::from("/bin/sh"),
                terminate_grace_ms: 500,
                ..SessionsConfig::default()
            },
            self.activity.clone(),
        )
    }
}
