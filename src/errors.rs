//! Typed error hierarchy for boardsync.
//!
//! `BoardError` is the single taxonomy used by the store, the mutation
//! service and the transport. The HTTP layer (`board::api::ApiError`) maps
//! each variant onto a status code.

use thiserror::Error;

/// Errors from the board store, mutation service and realtime transport.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Unsupported media type '{mime}': only images, PDFs and documents are allowed")]
    UnsupportedMediaType { mime: String },

    #[error("Payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Persistence error: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

impl BoardError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Socket send and receive failures.
impl From<axum::Error> for BoardError {
    fn from(e: axum::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<rusqlite::Error> for BoardError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.into())
    }
}

pub type Result<T, E = BoardError> = std::result::Result<T, E>;
