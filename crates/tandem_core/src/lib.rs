//! Real-time collaboration engine for Tandem workspaces.
//!
//! `tandem_core` lets many clients edit the same entity (a note's rich
//! text, a whiteboard's strokes, a task's fields) concurrently and converge
//! without locks. Conflict resolution is delegated to the `yrs` CRDT
//! engine; this crate provides everything around it: sessions, the room
//! wire protocol, presence, per-user undo, canonical-snapshot
//! reconciliation and the attributed activity log.
//!
//! Entry point: build a [`session::SessionManager`], open a
//! [`session::Session`] per (entity, client) pair over a
//! [`transport::Transport`], mutate through the session and call
//! [`session::Session::pump`] on your cadence. See the crate README for a
//! worked example.

pub mod activity;
pub mod config;
pub mod doc;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod transport;
pub mod undo;

pub use config::CollabConfig;
pub use doc::{DocumentStore, Schema, UpdateOrigin};
pub use error::{Result, TandemError};
pub use presence::{CursorPosition, PresenceEntry};
pub use session::{Mutation, Session, SessionManager};

/// Generate a fresh client id (uuid v4). Hosts with stable user identities
/// should pass their own ids instead.
pub fn new_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
