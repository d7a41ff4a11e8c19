//! Interactive shell sessions bridged to a duplex frame channel.

mod channel;
mod manager;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use channel::{
    ControlFrame, DuplexChannel, FrameSink, FrameSource, MemoryChannel, MemoryClient,
    MemorySink, MemorySource, RESIZE_PREFIX, memory_channel,
};
pub use manager::SessionManager;

/// `<tenant>_<random>`; unique for the lifetime of the process.
pub type SessionId = String;

/// Lifecycle of a session. `Closed` is terminal and never observable through
/// the registry, since the entry is evicted at that point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Running,
    Terminating,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Running => "running",
            SessionState::Terminating => "terminating",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub owner: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
}
