//! Error types for the ipam-store crate

use thiserror::Error;

/// Result type alias using `StoreError`
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during prefix storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// A prefix with the same name already exists under the same parent
    #[error("prefix already exists: {name} (parent: {parent})")]
    AlreadyExists { name: String, parent: String },

    /// Another prefix already holds this CIDR under the same parent
    #[error("uniqueness conflict: {cidr} already allocated under {parent}")]
    UniqueConflict { parent: String, cidr: String },

    /// Prefix not found
    #[error("prefix not found: {0}")]
    NotFound(String),

    /// Prefix cannot be stored as given
    #[error("invalid prefix: {0}")]
    InvalidPrefix(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("migration failed: {0}")]
    Migration(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether a concurrent writer won the race for the same (parent, cidr)
    pub fn is_uniqueness_conflict(&self) -> bool {
        matches!(self, StoreError::UniqueConflict { .. })
    }
}
