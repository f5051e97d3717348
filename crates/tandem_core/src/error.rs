use thiserror::Error;

/// Unified error type for tandem collaboration operations.
///
/// Nothing in this crate is fatal to the host process: every variant degrades
/// one capability (live sync, history seed, presence) while the rest of the
/// session keeps working. Duplicate or stale update frames are not errors at
/// all - they are silently dropped at the point of detection.
#[derive(Debug, Error)]
pub enum TandemError {
    /// Connection dropped or never established. Recovered by
    /// reconnect-and-resync; local operations are buffered meanwhile.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Canonical snapshot fetch failed. Retryable; collaboration continues
    /// without the canonical seed.
    #[error("Failed to load canonical snapshot for '{entity_id}': {reason}")]
    SnapshotLoad { entity_id: String, reason: String },

    /// CRDT engine error (decode/apply of an update or state vector).
    #[error("CRDT error: {0}")]
    Crdt(String),

    /// Session opened with an empty entity id.
    #[error("Entity id must be non-empty")]
    InvalidEntityId,

    /// JSON payload error in a presence or control frame.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config parse error.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl TandemError {
    /// Whether the failure is expected to succeed on retry without
    /// intervention (used by UIs to decide between a retry affordance and a
    /// permanent error state).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TandemError::Transport(_) | TandemError::SnapshotLoad { .. }
        )
    }
}

/// Result type alias for tandem operations.
pub type Result<T> = std::result::Result<T, TandemError>;
