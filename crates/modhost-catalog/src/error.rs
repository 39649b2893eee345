//! Error types for the modhost-catalog crate.
//!
//! All catalog operations return [`CatalogError`] via [`CatalogResult`].

use thiserror::Error;

/// Alias for `Result<T, CatalogError>`.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors that can occur in the module catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// The requested record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A manifest failed validation.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),

    /// Filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio::task::JoinError> for CatalogError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
