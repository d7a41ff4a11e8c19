//! Server configuration file model.

use hostpanel_core::config::{
    ActivityConfig, FilesConfig, JobsConfig, ScheduleConfig, SessionsConfig,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub files: FilesConfig,
    pub jobs: JobsConfig,
    pub sessions: SessionsConfig,
    pub schedule: ScheduleConfig,
    pub activity: ActivityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used when neither `RUST_LOG` nor a verbosity flag is given.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body, uploads included.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_bytes: 50 * 1024 * 1024,
        }
    }
}
