//! HTTP API module.
//!
//! Maps each core operation to an endpoint under `/api` and adapts WebSockets to
//! terminal sessions.

mod error;
mod handlers;
mod routes;
mod state;
mod terminal;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
pub use terminal::WsChannel;
