//! Core types for the replicated document layer.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Origin of a CRDT update, used to distinguish local edits from updates
/// that arrived over the wire.
///
/// The distinction matters in three places: only non-network updates are
/// forwarded to the transport, only [`UpdateOrigin::Local`] transactions are
/// captured by the undo coordinator, and the canonical seed is excluded from
/// undo while still replicating to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum UpdateOrigin {
    /// Update originated from a local user action.
    Local,

    /// Update received as a live broadcast from a remote peer.
    Remote,

    /// Update received during the initial state-vector handshake.
    Sync,

    /// Update produced by the reconciliation loader seeding an empty store.
    Seed,
}

impl std::fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateOrigin::Local => write!(f, "local"),
            UpdateOrigin::Remote => write!(f, "remote"),
            UpdateOrigin::Sync => write!(f, "sync"),
            UpdateOrigin::Seed => write!(f, "seed"),
        }
    }
}

impl std::str::FromStr for UpdateOrigin {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" => Ok(UpdateOrigin::Local),
            "remote" => Ok(UpdateOrigin::Remote),
            "sync" => Ok(UpdateOrigin::Sync),
            "seed" => Ok(UpdateOrigin::Seed),
            _ => Err(format!("Unknown update origin: {}", s)),
        }
    }
}

/// One applied update frame, recorded in the store's in-memory log.
///
/// The log backs resync diagnostics and attribution; it is not consulted for
/// merging (the engine's state vector handles that).
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    /// Monotonic per-store sequence number (arrival order at this replica).
    pub seq: i64,

    /// Binary yrs v1 update data.
    pub data: Vec<u8>,

    /// Unix timestamp when this update was applied (milliseconds).
    pub timestamp: i64,

    /// Where the update came from.
    pub origin: UpdateOrigin,
}
