//! Application state shared across handlers.

use std::sync::Arc;

use hostpanel_core::schedule::store_from_config;
use hostpanel_core::{
    ActivityEvent, ActivitySink, FileManager, JobRunner, Principal, Sandbox, ScheduleRegistry,
    SessionManager,
};

use crate::auth::AuthState;
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub sandbox: Sandbox,
    pub files: FileManager,
    pub jobs: JobRunner,
    pub schedules: Arc<ScheduleRegistry>,
    pub sessions: SessionManager,
    pub activity: Arc<dyn ActivitySink>,
    pub max_body_bytes: usize,
}

impl AppState {
    /// Wire the core components described by `config`.
    pub fn new(config: &AppConfig, activity: Arc<dyn ActivitySink>) -> Self {
        let sandbox = Sandbox::new(&config.files.base_dir);
        let jobs = JobRunner::new(config.jobs.clone());
        let schedules = ScheduleRegistry::new(
            store_from_config(&config.schedule),
            jobs.clone(),
            config.schedule.clone(),
            Arc::clone(&activity),
        );

        Self {
            auth: AuthState::new(config.auth.clone()),
            files: FileManager::new(config.files.clone(), Arc::clone(&activity)),
            sessions: SessionManager::new(
                sandbox.clone(),
                config.sessions.clone(),
                Arc::clone(&activity),
            ),
            sandbox,
            jobs,
            schedules: Arc::new(schedules),
            activity,
            max_body_bytes: config.server.max_body_bytes,
        }
    }

    /// Record an activity event for an operation handled at the API layer.
    pub async fn record(&self, principal: &Principal, action: &str, detail: String) {
        self.activity
            .record(ActivityEvent::new(principal, action, detail))
            .await;
    }
}
