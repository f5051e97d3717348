//! Append-only, user-attributed activity log.
//!
//! Every material change to an entity (a field write, a bulk text
//! replacement, a stroke) produces one [`ActivityRecord`]. Records are
//! broadcast on the control lane so every participant's history view stays
//! live, and are applied in arrival order on peers. Restoring a record
//! re-applies its value as a fresh local edit; it never rewrites CRDT
//! history.
//!
//! The log is in-memory and session-scoped. Long-term history belongs to
//! the backend, which receives the same records through its own channel.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// What kind of change a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ActivityAction {
    /// A field was set to a new value.
    SetField,
    /// A field was removed.
    RemoveField,
    /// The shared text was replaced in bulk (one record per replacement,
    /// not per keystroke).
    ReplaceText,
    /// A stroke was appended to the stroke list.
    AddStroke,
}

/// One attributed change, as shown in the history view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActivityRecord {
    /// Unique record id (uuid v4), used for dedup and restore.
    pub id: String,
    /// Entity the change applies to.
    pub entity_id: String,
    /// Client that made the change.
    pub actor_id: String,
    /// Display name of the actor at the time of the change.
    pub actor_name: String,
    /// What happened.
    pub action: ActivityAction,
    /// Field name for field-level actions.
    pub field: Option<String>,
    /// Value before the change, when known.
    pub old_value: Option<String>,
    /// Value after the change. Restore re-applies this.
    pub new_value: Option<String>,
    /// Unix millis at the actor's replica.
    pub timestamp: i64,
    /// Human-readable one-liner ("Ada set status to done").
    pub description: String,
}

impl ActivityRecord {
    pub fn new(
        entity_id: &str,
        actor_id: &str,
        actor_name: &str,
        action: ActivityAction,
        field: Option<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        let description = describe(actor_name, action, field.as_deref(), new_value.as_deref());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity_id: entity_id.to_string(),
            actor_id: actor_id.to_string(),
            actor_name: actor_name.to_string(),
            action,
            field,
            old_value,
            new_value,
            timestamp: chrono::Utc::now().timestamp_millis(),
            description,
        }
    }
}

fn describe(
    actor: &str,
    action: ActivityAction,
    field: Option<&str>,
    new_value: Option<&str>,
) -> String {
    match action {
        ActivityAction::SetField => match (field, new_value) {
            (Some(f), Some(v)) => format!("{} set {} to {}", actor, f, v),
            (Some(f), None) => format!("{} set {}", actor, f),
            _ => format!("{} set a field", actor),
        },
        ActivityAction::RemoveField => match field {
            Some(f) => format!("{} removed {}", actor, f),
            None => format!("{} removed a field", actor),
        },
        ActivityAction::ReplaceText => format!("{} edited the text", actor),
        ActivityAction::AddStroke => format!("{} drew a stroke", actor),
    }
}

/// Per-session activity log. Appends locally recorded and remotely received
/// records in arrival order; [`ActivityLog::list`] returns newest first.
#[derive(Debug, Default)]
pub struct ActivityLog {
    entries: Vec<ActivityRecord>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Re-delivered records (same id) are dropped.
    pub fn append(&mut self, record: ActivityRecord) -> bool {
        if self.entries.iter().any(|e| e.id == record.id) {
            return false;
        }
        self.entries.push(record);
        true
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<ActivityRecord> {
        self.entries.iter().rev().cloned().collect()
    }

    /// Look up a record by id.
    pub fn find(&self, id: &str) -> Option<&ActivityRecord> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_record(actor: &str, field: &str, value: &str) -> ActivityRecord {
        ActivityRecord::new(
            "task-1",
            actor,
            actor,
            ActivityAction::SetField,
            Some(field.to_string()),
            None,
            Some(value.to_string()),
        )
    }

    #[test]
    fn test_list_is_newest_first() {
        let mut log = ActivityLog::new();
        let first = field_record("ada", "status", "open");
        let second = field_record("grace", "status", "done");
        log.append(first.clone());
        log.append(second.clone());

        let listed = log.list();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[test]
    fn test_redelivered_record_is_dropped() {
        let mut log = ActivityLog::new();
        let record = field_record("ada", "status", "open");
        assert!(log.append(record.clone()));
        assert!(!log.append(record));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_description_is_human_readable() {
        let record = field_record("Ada", "status", "done");
        assert_eq!(record.description, "Ada set status to done");

        let removal = ActivityRecord::new(
            "task-1",
            "a",
            "Grace",
            ActivityAction::RemoveField,
            Some("assignee".to_string()),
            Some("ada".to_string()),
            None,
        );
        assert_eq!(removal.description, "Grace removed assignee");
    }

    #[test]
    fn test_find_by_id() {
        let mut log = ActivityLog::new();
        let record = field_record("ada", "status", "open");
        let id = record.id.clone();
        log.append(record);
        assert!(log.find(&id).is_some());
        assert!(log.find("missing").is_none());
    }

    #[test]
    fn test_record_json_roundtrip() {
        let record = field_record("ada", "status", "open");
        let json = serde_json::to_string(&record).unwrap();
        let decoded: ActivityRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, record);
    }
}
