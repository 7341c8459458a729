//! Error taxonomy for the reconciliation engine.
//!
//! Every fallible library operation returns [`Result`]. Callers that need
//! to map failures onto an outer protocol (HTTP status codes, CLI exit
//! codes) inspect [`Error::kind`], which sees through any number of
//! [`Error::Context`] layers to the root cause.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The three failure categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing input. Client-correctable, detected before any write.
    Validation,
    /// A referenced entity does not exist.
    NotFound,
    /// Anything else: storage faults, unresolved races, timeouts.
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A create lost the race on a natural key.
    #[error("{entity} already exists: {key}")]
    Conflict { entity: &'static str, key: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid tender payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Error::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn conflict(entity: &'static str, key: impl ToString) -> Self {
        Error::Conflict {
            entity,
            key: key.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::Payload(_) => ErrorKind::Validation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Conflict { .. } | Error::Database(_) | Error::Timeout(_) => {
                ErrorKind::Internal
            }
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// True when the root cause is a lost create race on a unique key,
    /// whether reported by the resolver itself or by the store.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            Error::Context { source, .. } => source.is_unique_violation(),
            _ => false,
        }
    }

    /// The innermost error, past every context layer.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Attach a description of the entity or step that failed.
pub trait ResultExt<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|err| Error::Context {
            context: f().into(),
            source: Box::new(err.into()),
        })
    }
}
