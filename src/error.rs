//! Errors surfaced by the sync core.
//!
//! Every failure is scoped to the single edit that caused it. Nothing here
//! is fatal to the server, and nothing is retried by the core.

use thiserror::Error;

use crate::document::DocumentId;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The edit referenced a document that does not exist.
    #[error("unknown document {0}")]
    UnknownDocument(DocumentId),

    /// The store rejected the write; the edit was dropped and not broadcast.
    #[error("failed to persist document {id}")]
    PersistenceFailure {
        id: DocumentId,
        #[source]
        source: anyhow::Error,
    },

    /// A creation request failed validation.
    #[error("invalid document: {0}")]
    InvalidDocument(&'static str),
}

impl SyncError {
    /// Short machine-readable reason sent back to the originating client.
    pub fn reason(&self) -> &'static str {
        match self {
            SyncError::UnknownDocument(_) => "unknown-document",
            SyncError::PersistenceFailure { .. } => "persistence-failure",
            SyncError::InvalidDocument(_) => "invalid-document",
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
