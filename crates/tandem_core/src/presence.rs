//! Presence and awareness: who is in the room, where their cursor is,
//! whether they are typing.
//!
//! Presence is ephemeral last-writer-wins state, deliberately kept out of
//! the CRDT document: it carries no history, does not merge, and vanishes
//! when its owner disconnects. Each client broadcasts a versioned
//! [`PresenceEntry`] and keeps a roster of its peers, expiring entries it
//! has not heard from within the TTL.
//!
//! The tracker is poll-driven: the session calls [`PresenceTracker::tick`]
//! with the current time, and typing expiry / heartbeats fall out of that
//! rather than out of timers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::config::CollabConfig;
use crate::error::Result;

/// Deterministic participant color palette. A client keeps the same color
/// across sessions because the pick is a hash of its id.
const COLORS: &[&str] = &[
    "#1f6feb", "#d29922", "#3fb950", "#db61a2", "#f85149", "#8957e5", "#39c5cf", "#e3b341",
];

/// A cursor position within an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CursorPosition {
    /// Character offset of the caret.
    pub index: u32,
    /// Length of the active selection (0 for a bare caret).
    pub selection_len: u32,
}

/// One participant's ephemeral presence state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PresenceEntry {
    /// Stable client identifier.
    pub client_id: String,
    /// Human-readable name shown next to the cursor.
    pub display_name: String,
    /// Assigned participant color (hex).
    pub color: String,
    /// Cursor, if the participant has one in this entity.
    pub cursor: Option<CursorPosition>,
    /// Whether the participant is actively typing.
    pub typing: bool,
    /// Per-sender monotonic version. Receivers keep the highest seen, so
    /// reordered broadcasts never resurrect stale state.
    pub version: u64,
    /// Host-defined extension values (avatar URLs, view scroll state and
    /// the like). Carried opaquely, last-writer-wins with the whole entry.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Wire form of a presence broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceMessage {
    /// Full state announcement; also serves as the heartbeat.
    Announce { state: PresenceEntry },
    /// Explicit departure; peers drop the entry without waiting for the TTL.
    Depart { client_id: String },
}

impl PresenceMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[derive(Debug, Clone)]
struct PeerEntry {
    state: PresenceEntry,
    /// Local arrival time of the last broadcast, used for TTL expiry. Local
    /// clocks only; peer timestamps are never compared across machines.
    last_seen_ms: i64,
}

/// Tracks local presence and the peer roster for one session.
#[derive(Debug)]
pub struct PresenceTracker {
    local: PresenceEntry,
    peers: HashMap<String, PeerEntry>,
    typing_quiet_ms: i64,
    presence_ttl_ms: i64,
    heartbeat_ms: i64,
    /// Time of the last local edit, driving typing expiry.
    last_typing_ms: i64,
    last_heartbeat_ms: i64,
}

impl PresenceTracker {
    pub fn new(client_id: &str, display_name: &str, config: &CollabConfig) -> Self {
        let local = PresenceEntry {
            client_id: client_id.to_string(),
            display_name: display_name.to_string(),
            color: pick_color(client_id).to_string(),
            cursor: None,
            typing: false,
            version: 0,
            extra: HashMap::new(),
        };
        Self {
            local,
            peers: HashMap::new(),
            typing_quiet_ms: config.typing_quiet_ms,
            presence_ttl_ms: config.presence_ttl_ms,
            heartbeat_ms: config.heartbeat_ms,
            last_typing_ms: 0,
            last_heartbeat_ms: 0,
        }
    }

    /// The local participant's current state.
    pub fn local(&self) -> &PresenceEntry {
        &self.local
    }

    fn bump(&mut self) {
        self.local.version += 1;
    }

    /// Move the local cursor. Returns the state to broadcast if it changed.
    pub fn set_cursor(&mut self, cursor: Option<CursorPosition>) -> Option<PresenceEntry> {
        if self.local.cursor == cursor {
            return None;
        }
        self.local.cursor = cursor;
        self.bump();
        Some(self.local.clone())
    }

    /// Change the local display name. Returns the state to broadcast if it
    /// changed.
    pub fn set_display_name(&mut self, name: &str) -> Option<PresenceEntry> {
        if self.local.display_name == name {
            return None;
        }
        self.local.display_name = name.to_string();
        self.bump();
        Some(self.local.clone())
    }

    /// Set a host-defined extension value. Returns the state to broadcast if
    /// it changed.
    pub fn set_extra(
        &mut self,
        key: &str,
        value: serde_json::Value,
    ) -> Option<PresenceEntry> {
        if self.local.extra.get(key) == Some(&value) {
            return None;
        }
        self.local.extra.insert(key.to_string(), value);
        self.bump();
        Some(self.local.clone())
    }

    /// Record local typing activity at `now_ms`.
    ///
    /// The first keystroke flips the typing flag on and is broadcast;
    /// continued typing only refreshes the quiet-period timer, so a burst of
    /// keystrokes costs one broadcast, not one per key.
    pub fn mark_typing(&mut self, now_ms: i64) -> Option<PresenceEntry> {
        self.last_typing_ms = now_ms;
        if self.local.typing {
            return None;
        }
        self.local.typing = true;
        self.bump();
        Some(self.local.clone())
    }

    /// Advance time. Clears the typing flag once the quiet period has passed
    /// and re-announces on the heartbeat interval. Returns the state to
    /// broadcast, if any is due.
    pub fn tick(&mut self, now_ms: i64) -> Option<PresenceEntry> {
        if self.local.typing && now_ms - self.last_typing_ms >= self.typing_quiet_ms {
            self.local.typing = false;
            self.bump();
            self.last_heartbeat_ms = now_ms;
            return Some(self.local.clone());
        }
        if now_ms - self.last_heartbeat_ms >= self.heartbeat_ms {
            self.last_heartbeat_ms = now_ms;
            return Some(self.local.clone());
        }
        None
    }

    /// Drop peers not heard from within the TTL. Returns the ids removed.
    pub fn expire_stale(&mut self, now_ms: i64) -> Vec<String> {
        let ttl = self.presence_ttl_ms;
        let expired: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, entry)| now_ms - entry.last_seen_ms >= ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.peers.remove(id);
            log::debug!("[Presence] Expired stale peer {}", id);
        }
        expired
    }

    /// Apply a presence broadcast from the room. Returns true if the roster
    /// visibly changed.
    pub fn apply_remote(&mut self, message: PresenceMessage, now_ms: i64) -> bool {
        match message {
            PresenceMessage::Announce { state } => {
                if state.client_id == self.local.client_id {
                    return false;
                }
                match self.peers.get_mut(&state.client_id) {
                    Some(entry) => {
                        entry.last_seen_ms = now_ms;
                        // Per-sender versions are monotonic; an older version
                        // means a reordered broadcast.
                        if state.version < entry.state.version {
                            return false;
                        }
                        let changed = entry.state != state;
                        entry.state = state;
                        changed
                    }
                    None => {
                        log::debug!("[Presence] Peer {} joined roster", state.client_id);
                        self.peers.insert(
                            state.client_id.clone(),
                            PeerEntry {
                                state,
                                last_seen_ms: now_ms,
                            },
                        );
                        true
                    }
                }
            }
            PresenceMessage::Depart { client_id } => self.remove_peer(&client_id),
        }
    }

    /// Remove a departed peer. Returns true if it was present.
    pub fn remove_peer(&mut self, client_id: &str) -> bool {
        self.peers.remove(client_id).is_some()
    }

    /// Remote participants only, sorted by client id.
    pub fn peers(&self) -> Vec<PresenceEntry> {
        let mut peers: Vec<PresenceEntry> = self
            .peers
            .values()
            .map(|entry| entry.state.clone())
            .collect();
        peers.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        peers
    }

    /// All known participants (local included), sorted by client id.
    pub fn roster(&self) -> Vec<PresenceEntry> {
        let mut roster: Vec<PresenceEntry> = self
            .peers
            .values()
            .map(|entry| entry.state.clone())
            .collect();
        roster.push(self.local.clone());
        roster.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        roster
    }

    /// The departure message to broadcast when this session closes.
    pub fn departure(&self) -> PresenceMessage {
        PresenceMessage::Depart {
            client_id: self.local.client_id.clone(),
        }
    }
}

fn pick_color(client_id: &str) -> &'static str {
    let sum: usize = client_id.bytes().map(usize::from).sum();
    COLORS[sum % COLORS.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(client: &str) -> PresenceTracker {
        PresenceTracker::new(client, client, &CollabConfig::default())
    }

    fn peer_entry(client: &str, version: u64, typing: bool) -> PresenceEntry {
        PresenceEntry {
            client_id: client.to_string(),
            display_name: client.to_string(),
            color: "#fff".to_string(),
            cursor: None,
            typing,
            version,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn test_color_is_deterministic() {
        let a1 = tracker("client-a");
        let a2 = tracker("client-a");
        assert_eq!(a1.local().color, a2.local().color);
    }

    #[test]
    fn test_typing_broadcast_once_per_burst() {
        let mut t = tracker("a");
        assert!(t.mark_typing(1_000).is_some());
        assert!(t.mark_typing(1_100).is_none());
        assert!(t.mark_typing(1_900).is_none());
        assert!(t.local().typing);
    }

    #[test]
    fn test_typing_clears_after_quiet_period() {
        let mut t = tracker("a");
        t.mark_typing(1_000);
        // Continued typing keeps the flag alive past the original deadline.
        t.mark_typing(2_500);
        assert!(t.tick(3_500).is_none());
        assert!(t.local().typing);

        let cleared = t.tick(4_500).expect("typing should expire");
        assert!(!cleared.typing);
        assert!(!t.local().typing);
    }

    #[test]
    fn test_cursor_change_bumps_version() {
        let mut t = tracker("a");
        let cursor = CursorPosition {
            index: 4,
            selection_len: 0,
        };
        let state = t.set_cursor(Some(cursor)).unwrap();
        assert_eq!(state.cursor, Some(cursor));
        assert_eq!(state.version, 1);
        // Same position again is not a change.
        assert!(t.set_cursor(Some(cursor)).is_none());
    }

    #[test]
    fn test_stale_version_is_ignored() {
        let mut t = tracker("a");
        let mut peer = peer_entry("b", 5, true);
        assert!(t.apply_remote(PresenceMessage::Announce { state: peer.clone() }, 1_000));

        // A reordered older broadcast must not overwrite the newer state.
        peer.version = 3;
        peer.typing = false;
        assert!(!t.apply_remote(PresenceMessage::Announce { state: peer }, 1_100));
        assert!(t.roster().iter().find(|p| p.client_id == "b").unwrap().typing);
    }

    #[test]
    fn test_peer_expires_after_ttl() {
        let mut t = tracker("a");
        t.apply_remote(
            PresenceMessage::Announce {
                state: peer_entry("b", 1, false),
            },
            1_000,
        );
        assert!(t.expire_stale(20_000).is_empty());
        assert_eq!(t.expire_stale(31_000), vec!["b".to_string()]);
        assert_eq!(t.roster().len(), 1);
    }

    #[test]
    fn test_depart_removes_immediately() {
        let mut t = tracker("a");
        t.apply_remote(
            PresenceMessage::Announce {
                state: peer_entry("b", 1, false),
            },
            1_000,
        );
        assert!(t.apply_remote(
            PresenceMessage::Depart {
                client_id: "b".to_string()
            },
            1_001,
        ));
        assert_eq!(t.roster().len(), 1);
    }

    #[test]
    fn test_own_announce_is_ignored() {
        let mut t = tracker("a");
        let own = t.local().clone();
        assert!(!t.apply_remote(PresenceMessage::Announce { state: own }, 1_000));
        assert_eq!(t.roster().len(), 1);
    }

    #[test]
    fn test_heartbeat_reannounces() {
        let mut t = tracker("a");
        assert!(t.tick(10_000).is_some());
        assert!(t.tick(15_000).is_none());
        assert!(t.tick(20_000).is_some());
    }

    #[test]
    fn test_message_roundtrip() {
        let mut state = peer_entry("a", 7, true);
        state.display_name = "Ada".to_string();
        state.cursor = Some(CursorPosition {
            index: 12,
            selection_len: 3,
        });
        state
            .extra
            .insert("avatar".to_string(), serde_json::json!("https://cdn/a.png"));
        let msg = PresenceMessage::Announce { state };
        let decoded = PresenceMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }
}
