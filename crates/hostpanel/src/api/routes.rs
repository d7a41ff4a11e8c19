//! API route definitions.

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::auth_middleware;

use super::handlers;
use super::state::AppState;
use super::terminal;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let auth_state = state.auth.clone();
    let max_body_bytes = state.max_body_bytes;

    let protected_routes = Router::new()
        // File manager
        .route("/files/list", get(handlers::list_files))
        .route("/files/download", get(handlers::download_file))
        .route("/files/upload", post(handlers::upload_file))
        .route("/files/mkdir", post(handlers::create_dir))
        .route("/files/delete", delete(handlers::delete_item))
        .route("/files/rename", post(handlers::rename_item))
        // Script execution and scheduling
        .route("/python/upload_script", post(handlers::upload_script))
        .route("/python/create_virtualenv", post(handlers::create_virtualenv))
        .route(
            "/python/install_requirements",
            post(handlers::install_requirements),
        )
        .route("/python/run_script", post(handlers::run_script))
        .route("/python/schedule_script", post(handlers::schedule_script))
        .route("/python/list_scheduled", get(handlers::list_scheduled))
        .route(
            "/python/unschedule_script",
            delete(handlers::unschedule_script),
        )
        // Terminal sessions
        .route("/terminal/ws", get(terminal::terminal_ws))
        .route("/terminal/sessions", get(handlers::list_terminal_sessions))
        .route(
            "/terminal/kill/{session_id}",
            post(handlers::kill_terminal_session),
        )
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .nest("/api", protected_routes)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(trace_layer)
}

/// Build the CORS layer from the configured origins.
///
/// With no configured origins, cross-origin requests are denied.
fn build_cors_layer(state: &AppState) -> CorsLayer {
    let allowed_origins = state.auth.allowed_origins();

    let methods = [
        Method::GET,
        Method::POST,
        Method::DELETE,
        Method::OPTIONS,
    ];

    let headers = [
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        header::ACCEPT,
        header::ORIGIN,
    ];

    if allowed_origins.is_empty() {
        tracing::warn!("CORS: No origins configured, denying all cross-origin requests");
        return CorsLayer::new().allow_origin(AllowOrigin::exact(HeaderValue::from_static("null")));
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("CORS: Invalid origin in config: {}", origin);
                None
            })
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(true)
}
