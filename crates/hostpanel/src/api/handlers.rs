//! API request handlers.

use std::path::PathBuf;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use hostpanel_core::sandbox::relative_display;
use hostpanel_core::{
    FileEntry, Job, JobOutput, ScheduleRequest, ScheduledScript, SessionSummary,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::auth::CurrentUser;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Acknowledgement for mutating operations.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }

    fn with_path(mut self, path: String) -> Self {
        self.path = Some(path);
        self
    }
}

// ============================================================================
// Files
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ListFilesResponse {
    pub path: String,
    pub entries: Vec<FileEntry>,
}

#[instrument(skip(state, user), fields(tenant = %user.id()))]
pub async fn list_files(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<ListFilesResponse>> {
    let root = state.sandbox.tenant_root(user.id())?;
    let entries = state
        .files
        .list(&user.principal(), &root, &query.path)
        .await?;
    Ok(Json(ListFilesResponse {
        path: query.path,
        entries,
    }))
}

#[instrument(skip(state, user), fields(tenant = %user.id()))]
pub async fn download_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PathQuery>,
) -> ApiResult<impl IntoResponse> {
    let root = state.sandbox.tenant_root(user.id())?;
    let contents = state
        .files
        .read(&user.principal(), &root, &query.path)
        .await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        contents,
    ))
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Target directory, relative to the tenant root.
    #[serde(default)]
    pub path: String,
    pub name: String,
}

/// Store the raw request body as `name` inside `path`.
#[instrument(skip(state, user, body), fields(tenant = %user.id(), bytes = body.len()))]
pub async fn upload_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<Json<MessageResponse>> {
    let root = state.sandbox.tenant_root(user.id())?;
    let path = state
        .files
        .write(&user.principal(), &root, &query.path, &query.name, &body)
        .await?;
    Ok(Json(
        MessageResponse::new("File uploaded successfully").with_path(path),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CreateDirRequest {
    pub path: String,
}

#[instrument(skip(state, user), fields(tenant = %user.id()))]
pub async fn create_dir(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateDirRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let root = state.sandbox.tenant_root(user.id())?;
    let path = state
        .files
        .create_dir(&user.principal(), &root, &request.path)
        .await?;
    Ok(Json(
        MessageResponse::new("Directory created successfully").with_path(path),
    ))
}

#[instrument(skip(state, user), fields(tenant = %user.id()))]
pub async fn delete_item(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<MessageResponse>> {
    let root = state.sandbox.tenant_root(user.id())?;
    state
        .files
        .delete(&user.principal(), &root, &query.path)
        .await?;
    Ok(Json(MessageResponse::new("Deleted successfully")))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub from: String,
    pub to: String,
}

#[instrument(skip(state, user), fields(tenant = %user.id()))]
pub async fn rename_item(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let root = state.sandbox.tenant_root(user.id())?;
    let path = state
        .files
        .rename(&user.principal(), &root, &request.from, &request.to)
        .await?;
    Ok(Json(
        MessageResponse::new("Renamed successfully").with_path(path),
    ))
}

// ============================================================================
// Scripts
// ============================================================================

#[instrument(skip(state, user, body), fields(tenant = %user.id(), bytes = body.len()))]
pub async fn upload_script(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<Json<MessageResponse>> {
    let root = state.sandbox.tenant_root(user.id())?;
    let path = state
        .files
        .upload_script(&user.principal(), &root, &query.path, &query.name, &body)
        .await?;
    Ok(Json(
        MessageResponse::new("Script uploaded successfully").with_path(path),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CreateEnvironmentRequest {
    pub script_path: String,
}

#[derive(Debug, Serialize)]
pub struct CreateEnvironmentResponse {
    pub message: String,
    pub venv_path: String,
}

#[instrument(skip(state, user), fields(tenant = %user.id()))]
pub async fn create_virtualenv(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateEnvironmentRequest>,
) -> ApiResult<Json<CreateEnvironmentResponse>> {
    let principal = user.principal();
    let root = state.sandbox.tenant_root(user.id())?;
    let env_dir = state
        .jobs
        .create_isolated_environment(&root, &request.script_path)
        .await?;
    let venv_path = relative_display(&root, &env_dir);

    state
        .record(
            &principal,
            "create_virtualenv",
            format!("Created virtual environment: {venv_path}"),
        )
        .await;
    Ok(Json(CreateEnvironmentResponse {
        message: "Virtual environment created successfully".to_string(),
        venv_path,
    }))
}

#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    pub venv_path: String,
    pub packages: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InstallResponse {
    pub message: String,
    pub stdout: String,
    pub stderr: String,
}

#[instrument(skip(state, user, request), fields(tenant = %user.id(), packages = request.packages.len()))]
pub async fn install_requirements(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<InstallRequest>,
) -> ApiResult<Json<InstallResponse>> {
    if request.packages.is_empty() {
        return Err(ApiError::bad_request("no packages specified"));
    }
    let principal = user.principal();
    let root = state.sandbox.tenant_root(user.id())?;
    let output = state
        .jobs
        .install_dependencies(&root, &request.venv_path, &request.packages)
        .await?;

    state
        .record(
            &principal,
            "install_requirements",
            format!(
                "Installed requirements in {}: {}",
                request.venv_path,
                request.packages.join(", ")
            ),
        )
        .await;
    Ok(Json(InstallResponse {
        message: "Requirements installed successfully".to_string(),
        stdout: output.stdout,
        stderr: output.stderr,
    }))
}

#[instrument(skip(state, user, job), fields(tenant = %user.id(), script = %job.script_path))]
pub async fn run_script(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(job): Json<Job>,
) -> ApiResult<Json<JobOutput>> {
    let principal = user.principal();
    let root = state.sandbox.tenant_root(user.id())?;
    let result = state.jobs.run_once(&root, &job).await;

    let outcome = match &result {
        Ok(output) => format!("exit code {:?}", output.exit_code),
        Err(err) => err.code().to_string(),
    };
    state
        .record(
            &principal,
            "run_script",
            format!("Executed script: {} ({outcome})", job.script_path),
        )
        .await;
    Ok(Json(result?))
}

// ============================================================================
// Schedules
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ScheduledScriptsResponse {
    pub scheduled_scripts: Vec<ScheduledScript>,
}

/// Ordinary tenants only see schedules for scripts inside their own root.
fn schedule_scope(state: &AppState, user: &CurrentUser) -> ApiResult<Option<PathBuf>> {
    if user.is_admin() {
        Ok(None)
    } else {
        Ok(Some(state.sandbox.tenant_root(user.id())?))
    }
}

#[instrument(skip(state, user, request), fields(tenant = %user.id(), name = %request.name))]
pub async fn schedule_script(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ScheduleRequest>,
) -> ApiResult<Json<ScheduledScript>> {
    let root = state.sandbox.tenant_root(user.id())?;
    let scope = schedule_scope(&state, &user)?;
    let scheduled = state
        .schedules
        .upsert(&user.principal(), &root, &request, scope.as_deref())
        .await?;
    Ok(Json(scheduled))
}

#[instrument(skip(state, user), fields(tenant = %user.id()))]
pub async fn list_scheduled(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<ScheduledScriptsResponse>> {
    let scope = schedule_scope(&state, &user)?;
    let scheduled_scripts = state
        .schedules
        .list(&user.principal(), scope.as_deref())
        .await?;
    Ok(Json(ScheduledScriptsResponse { scheduled_scripts }))
}

#[derive(Debug, Deserialize)]
pub struct UnscheduleQuery {
    pub name: String,
}

#[instrument(skip(state, user), fields(tenant = %user.id()))]
pub async fn unschedule_script(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<UnscheduleQuery>,
) -> ApiResult<Json<MessageResponse>> {
    let scope = schedule_scope(&state, &user)?;
    state
        .schedules
        .remove(&user.principal(), &query.name, scope.as_deref())
        .await?;
    Ok(Json(MessageResponse::new("Script unscheduled successfully")))
}

// ============================================================================
// Terminal sessions
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

pub async fn list_terminal_sessions(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Json<SessionsResponse> {
    let sessions = state.sessions.list(&user.principal()).await;
    Json(SessionsResponse { sessions })
}

#[instrument(skip(state, user), fields(tenant = %user.id()))]
pub async fn kill_terminal_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.sessions.kill(&session_id, &user.principal()).await?;
    info!(session_id = %session_id, "terminal session killed");
    Ok(Json(MessageResponse::new("Terminal session terminated")))
}
