//! Storage traits and error types

use crate::storage::CrawlSnapshot;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for crawl state persistence backends
///
/// The frontier writes the complete snapshot on every save; backends never
/// see partial updates. A failed save must be reported, since it means a
/// crash could no longer be resumed exactly.
pub trait StateStore: Send {
    /// Loads the last saved snapshot, or `None` if nothing was saved yet
    fn load(&self) -> StorageResult<Option<CrawlSnapshot>>;

    /// Replaces the stored snapshot
    fn save(&mut self, snapshot: &CrawlSnapshot) -> StorageResult<()>;

    /// Human-readable location, for log messages
    fn describe(&self) -> String;
}
