use thiserror::Error;

use crate::types::{ConflictEntry, EntityKind};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: EntityKind, id: String },

    #[error("commit conflict on {} file(s)", .0.len())]
    CommitConflict(Vec<ConflictEntry>),

    #[error("no checkout registered for project {project} at {path}")]
    NoSuchCheckout { project: String, path: String },

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("I/O error at {path}: {message}")]
    IOError { path: String, message: String },

    #[error("operation cancelled by caller")]
    CancelledByCaller,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl Error {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Error::NotFound { kind, id: id.into() }
    }

    pub fn already_exists(kind: EntityKind, id: impl Into<String>) -> Self {
        Error::AlreadyExists { kind, id: id.into() }
    }

    pub fn io(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::IOError { path: path.into(), message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
