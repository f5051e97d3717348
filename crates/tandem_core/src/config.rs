//! Configuration for the collaboration engine.
//!
//! All timing knobs of the engine live here: the typing-indicator quiet
//! period, presence staleness expiry, heartbeat cadence and the undo capture
//! window. Hosts typically embed a `[collab]` table in their own TOML config
//! and deserialize it into [`CollabConfig`]; every field has a default so an
//! empty table is valid.

use serde::{Deserialize, Serialize};

use crate::error::Result;

fn default_typing_quiet_ms() -> i64 {
    2_000
}

fn default_presence_ttl_ms() -> i64 {
    30_000
}

fn default_heartbeat_ms() -> i64 {
    10_000
}

fn default_undo_capture_ms() -> u64 {
    500
}

/// Tunable parameters for sessions, presence and undo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollabConfig {
    /// Quiet period after the last keystroke before the typing indicator
    /// flips back to idle and the transition is broadcast (once).
    #[serde(default = "default_typing_quiet_ms")]
    pub typing_quiet_ms: i64,

    /// A remote presence entry with no heartbeat for this long is expired
    /// even if its leave frame was lost.
    #[serde(default = "default_presence_ttl_ms")]
    pub presence_ttl_ms: i64,

    /// Cadence at which a session re-broadcasts its own presence entry so
    /// peers never expire a live client.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: i64,

    /// Local edits closer together than this are captured as a single undo
    /// group, which also keeps the undo stack bounded under sustained
    /// typing.
    #[serde(default = "default_undo_capture_ms")]
    pub undo_capture_ms: u64,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            typing_quiet_ms: default_typing_quiet_ms(),
            presence_ttl_ms: default_presence_ttl_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            undo_capture_ms: default_undo_capture_ms(),
        }
    }
}

impl CollabConfig {
    /// Parse a config from a TOML string. Missing fields take defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CollabConfig::default();
        assert_eq!(config.typing_quiet_ms, 2_000);
        assert_eq!(config.presence_ttl_ms, 30_000);
        assert!(config.heartbeat_ms < config.presence_ttl_ms);
    }

    #[test]
    fn test_empty_toml_is_valid() {
        let config = CollabConfig::from_toml_str("").unwrap();
        assert_eq!(config, CollabConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = CollabConfig::from_toml_str("typing_quiet_ms = 1500").unwrap();
        assert_eq!(config.typing_quiet_ms, 1_500);
        assert_eq!(config.presence_ttl_ms, 30_000);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(CollabConfig::from_toml_str("typing_quiet_ms = \"soon\"").is_err());
    }
}
