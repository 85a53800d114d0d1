//! Error types for draftsmith.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition: cannot {action} a task that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: crate::model::TaskStatus,
    },

    #[error("duplicate task id: {0}")]
    DuplicateId(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("task was cancelled")]
    Cancelled,

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
