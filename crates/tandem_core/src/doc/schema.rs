//! Shared-type schemas for collaborative entities.
//!
//! Every collaborative feature in Tandem (note editor, whiteboard, task
//! detail) used to carry its own connect/observe/disconnect wiring. The
//! schema enum is what replaces that duplication: one generic
//! [`DocumentStore`](super::DocumentStore) is instantiated with the schema
//! matching the feature, and everything else (sessions, sync, undo,
//! presence) is schema-agnostic.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Name of the shared text holding rich text content ([`Schema::Text`]).
pub(crate) const TEXT_NAME: &str = "content";

/// Name of the shared array holding immutable stroke records
/// ([`Schema::StrokeList`]).
pub(crate) const STROKES_NAME: &str = "strokes";

/// Name of the shared map holding field values. Present in every schema:
/// notes use it for the title, tasks for their fields.
pub(crate) const FIELDS_NAME: &str = "fields";

/// The shared-type layout of a replicated document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Schema {
    /// A shared text plus a field map. Used by notes and chat drafts.
    Text,

    /// An append-mostly list of immutable records plus a field map. Used by
    /// whiteboards, where each stroke is drawn once and never edited.
    StrokeList,

    /// A field map only. Used by task cards and other form-like entities.
    FieldMap,
}

impl Schema {
    /// Whether documents of this schema carry a shared text.
    pub fn has_text(&self) -> bool {
        matches!(self, Schema::Text)
    }

    /// Whether documents of this schema carry a stroke list.
    pub fn has_strokes(&self) -> bool {
        matches!(self, Schema::StrokeList)
    }
}

impl std::fmt::Display for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schema::Text => write!(f, "text"),
            Schema::StrokeList => write!(f, "stroke_list"),
            Schema::FieldMap => write!(f, "field_map"),
        }
    }
}
