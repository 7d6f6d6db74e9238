//! Error types for the ipam-core crate

use ipam_store::{Prefix, StoreError};
use thiserror::Error;

/// Result type alias using `IpamError`
pub type Result<T> = std::result::Result<T, IpamError>;

/// Errors that can occur while allocating or releasing prefixes
#[derive(Error, Debug)]
pub enum IpamError {
    /// Requested length does not fit under the parent
    #[error("invalid prefix length requested (should be > {parent} and <= {max}): {requested}")]
    InvalidLength { requested: u8, parent: u8, max: u8 },

    /// Every candidate under the parent is taken
    #[error("no more prefix available in {parent}")]
    NoSpaceAvailable { parent: String },

    /// A CIDR string failed to parse
    #[error("invalid cidr: {0}")]
    InvalidCidr(String),

    /// The caller's request cannot be served as given
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Storage backend error
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Conduit notification stream failure
    #[error("conduit source error: {0}")]
    Source(String),

    /// A new prefix's storage id matches a stored prefix of another name and parent
    #[error("prefix {name} under {parent} collides with the stored id of another prefix")]
    IdCollision { name: String, parent: String },

    /// The operation ran past its deadline
    #[error("operation cancelled: deadline exceeded")]
    Cancelled,
}

impl IpamError {
    pub(crate) fn id_collision(name: &str, parent: &Prefix) -> Self {
        IpamError::IdCollision {
            name: name.to_string(),
            parent: parent.id(),
        }
    }

    /// Whether another writer already stored a prefix with the same name and parent
    pub fn is_already_exists(&self) -> bool {
        matches!(self, IpamError::Storage(StoreError::AlreadyExists { .. }))
    }

    /// Whether the error is the caller's fault
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            IpamError::InvalidLength { .. }
                | IpamError::InvalidCidr(_)
                | IpamError::InvalidRequest(_)
                | IpamError::IdCollision { .. }
        )
    }
}
