//! # Conduit Errors
//!
//! One error taxonomy shared by the stores, the agent gateway and the
//! orchestrator. The server maps each variant onto an HTTP status.

use std::time::Duration;

/// Errors surfaced by every core operation
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A referenced chat, stage or message does not exist
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    /// The caller sent malformed or incomplete input
    #[error("validation failed: {0}")]
    Validation(String),

    /// The agent gateway call failed
    #[error("agent gateway error: {0}")]
    Gateway(String),

    /// The agent gateway did not answer in time
    #[error("agent gateway timed out after {}s", .0.as_secs())]
    GatewayTimeout(Duration),

    /// The requested transition is not valid for the stage's current status
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backing store failed
    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(kind: &'static str, id: i64) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Stable machine-readable kind, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::Gateway(_) => "gateway",
            Self::GatewayTimeout(_) => "gateway_timeout",
            Self::Conflict(_) => "conflict",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Gateway(e.to_string())
    }
}
