use thiserror::Error;

/// Failures surfaced by the catalog, registry and player.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RadioError {
    /// Backend unreachable, schema setup failed, or an I/O error while
    /// reading or writing records.
    #[error("storage error: {0}")]
    Storage(String),

    /// The backend refused a write because it would exceed its byte quota.
    #[error("storage quota exceeded: needed {needed} bytes, limit {limit}")]
    QuotaExceeded { needed: u64, limit: u64 },

    /// The audio primitive refused to start (autoplay policy, dead process).
    #[error("playback rejected: {0}")]
    PlaybackRejected(String),

    /// Rejected before reaching storage: empty name, missing payload,
    /// disallowed MIME type.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl RadioError {
    pub fn storage(e: impl std::fmt::Display) -> Self {
        Self::Storage(e.to_string())
    }

    /// True for every variant that originates in the persistence backend.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::QuotaExceeded { .. })
    }
}

impl From<std::io::Error> for RadioError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for RadioError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("record encoding: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, RadioError>;
