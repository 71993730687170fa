//! Error type shared by the taxonomy, catalog and store modules.

use crate::metadata_store::TransactionState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Taxonomy structure violated: {0}")]
    Structural(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} was modified or deleted by someone else, reload and retry")]
    StaleReference { kind: &'static str, id: String },

    #[error("Transaction failed after staging {staged} of {total} edits, call rollback(): {source}")]
    TransactionFailed {
        staged: usize,
        total: usize,
        #[source]
        source: Box<CatalogError>,
    },

    #[error("Transaction already closed ({0:?})")]
    TransactionClosed(TransactionState),

    #[error("Taxonomy migration from revision {from} to {to} failed: {reason}")]
    Migration { from: u32, to: u32, reason: String },

    #[error("Playlist {id} is corrupt: {reason}")]
    CorruptPlaylist { id: String, reason: String },

    #[error("Invalid playlist edit: {0}")]
    InvalidPlaylistEdit(String),

    #[error("Invalid reference taxonomy: {0}")]
    InvalidReference(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CatalogError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CatalogError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn stale(kind: &'static str, id: impl Into<String>) -> Self {
        CatalogError::StaleReference {
            kind,
            id: id.into(),
        }
    }

    /// True when the failure came from a concurrent modification, looking
    /// through a failed transaction to its cause.
    pub fn is_stale(&self) -> bool {
        match self {
            CatalogError::StaleReference { .. } => true,
            CatalogError::TransactionFailed { source, .. } => source.is_stale(),
            _ => false,
        }
    }
}
