//! Test utilities and common setup.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode, header};
use chrono::Utc;
use hostpanel::api::{self, AppState};
use hostpanel::auth::{AuthConfig, Claims};
use hostpanel::config::AppConfig;
use hostpanel_core::TracingActivity;
use hostpanel_core::config::{JobsConfig, ScheduleBackend, ScheduleConfig, SessionsConfig};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const SECRET: &str = "test-secret-for-integration-tests-minimum-32-chars";

/// A configured application over a temporary base directory.
pub struct TestApp {
    pub temp: TempDir,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.auth = AuthConfig {
            jwt_secret: Some(SECRET.to_string()),
            ..AuthConfig::default()
        };
        config.files.base_dir = temp.path().join("home");
        config.jobs = JobsConfig {
            default_interpreter: PathBuf::from("/bin/sh"),
            ..JobsConfig::default()
        };
        config.sessions = SessionsConfig {
            shell: PathBuf::from("/bin/sh"),
            terminate_grace_ms: 500,
            ..SessionsConfig::default()
        };
        config.schedule = ScheduleConfig {
            backend: ScheduleBackend::File,
            table_path: temp.path().join("crontab"),
            ..ScheduleConfig::default()
        };

        let state = AppState::new(&config, Arc::new(TracingActivity));
        Self { temp, state }
    }

    pub fn router(&self) -> Router {
        api::create_router(self.state.clone())
    }

    /// Tenant root on disk, created on demand.
    pub fn root(&self, tenant: &str) -> PathBuf {
        self.state.sandbox.tenant_root(tenant).unwrap()
    }

    pub fn write(&self, tenant: &str, relative: &str, body: &str) -> PathBuf {
        let path = self.root(tenant).join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    pub fn table(&self) -> String {
        std::fs::read_to_string(self.temp.path().join("crontab")).unwrap_or_default()
    }

    /// Send one request through a fresh router.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().uri(uri).method(method);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };
        self.router()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    /// Send a request and decode its JSON body.
    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.send(method, uri, token, body).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    /// Serve the router on an ephemeral local port.
    pub async fn spawn_server(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = self.router();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        addr
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Sign a token for `tenant`; `role` becomes the `role` claim.
pub fn token(tenant: &str, role: Option<&str>) -> String {
    sign(tenant, role, 3600)
}

pub fn sign(tenant: &str, role: Option<&str>, ttl_secs: i64) -> String {
    let claims = Claims {
        sub: tenant.to_string(),
        iss: Some("tests".to_string()),
        exp: Utc::now().timestamp() + ttl_secs,
        iat: Some(Utc::now().timestamp()),
        jti: None,
        roles: vec![],
        role: role.map(str::to_string),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}
