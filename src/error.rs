//! Error types for cityfix.

use thiserror::Error;

use crate::model::Status;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("transient storage error: {0}")]
    TransientStorage(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("event publish failed: {0}")]
    Publish(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same operation may succeed.
    ///
    /// Only connectivity-shaped failures qualify. Rule violations and
    /// missing rows never do.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientStorage(_) | Error::Io(_) => true,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
