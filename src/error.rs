// ⚠️ Error types for the recognition wall library
// Binaries wrap these in anyhow; library code returns Result<T> below.

use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A required field was empty on manual entry
    #[error("Validation error: {field} is required")]
    MissingField { field: &'static str },

    /// Distributor id already belongs to another record
    #[error("Validation error: distributor id {distributor_id} is already registered to {holder}")]
    DuplicateDistributorId {
        distributor_id: String,
        holder: String,
    },

    /// Rank name is not part of the catalog
    #[error("Validation error: unknown rank {0}")]
    UnknownRank(String),

    /// Catalog construction failed (empty list or duplicate names)
    #[error("Invalid rank catalog: {0}")]
    InvalidCatalog(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backing store rejected a write or read
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The player task is no longer running
    #[error("Player stopped")]
    PlayerStopped,
}

impl Error {
    /// True for errors reported before any write was attempted
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::MissingField { .. } | Error::DuplicateDistributorId { .. } | Error::UnknownRank(_)
        )
    }
}
