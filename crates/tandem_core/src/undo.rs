//! Per-user undo/redo over a shared document.
//!
//! Undo in a collaborative document must only revert the local user's own
//! edits: undoing a teammate's work from another keyboard is never
//! acceptable. The coordinator scopes the engine's undo manager to
//! transactions tagged with the local client's origin, so remote updates,
//! handshake syncs and the reconciliation seed are invisible to it.
//!
//! An undo is not history rewriting. The engine emits new inverse
//! operations that replicate to peers like ordinary edits, which is what
//! keeps undo meaningful after concurrent remote changes have landed on
//! top of the edit being reverted.

use yrs::undo::{Options, UndoManager};
use yrs::Subscription;

pub use yrs::undo::EventKind;

use crate::config::CollabConfig;
use crate::doc::DocumentStore;

/// Undo/redo scoped to one client's edits on one document store.
pub struct UndoCoordinator {
    manager: UndoManager<()>,
}

impl UndoCoordinator {
    /// Build a coordinator tracking the local origin of `store`, across
    /// every shared type its schema defines.
    pub fn new(store: &DocumentStore, config: &CollabConfig) -> Self {
        let mut options = Options::default();
        // Edits closer together than the capture window collapse into one
        // undo step, so sustained typing undoes in word-sized chunks rather
        // than keystroke by keystroke.
        options.capture_timeout_millis = config.undo_capture_ms;

        let mut manager =
            UndoManager::with_scope_and_options(store.doc(), store.fields_ref(), options);
        if let Some(text) = store.text_ref() {
            manager.expand_scope(text);
        }
        if let Some(strokes) = store.strokes_ref() {
            manager.expand_scope(strokes);
        }
        // Track only the local origin: remote, sync and seed transactions
        // never land on this user's undo stack.
        manager.include_origin(store.local_origin().clone());

        Self { manager }
    }

    /// Revert the most recent local undo step. Returns false if there was
    /// nothing to undo.
    pub fn undo(&mut self) -> bool {
        self.manager.undo_blocking()
    }

    /// Re-apply the most recently undone step. Returns false if there was
    /// nothing to redo.
    pub fn redo(&mut self) -> bool {
        self.manager.redo_blocking()
    }

    pub fn can_undo(&self) -> bool {
        self.manager.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.manager.can_redo()
    }

    /// Drop both stacks, e.g. when the session is reset.
    pub fn clear(&mut self) {
        self.manager.clear();
    }

    /// Observe stack growth. The callback fires once per captured step,
    /// with the stack the step landed on. Dropping the subscription
    /// unregisters the callback.
    pub fn observe_item_added<F>(&self, f: F) -> Subscription
    where
        F: Fn(EventKind) + Send + Sync + 'static,
    {
        self.manager
            .observe_item_added(move |_txn, event| f(event.kind()))
    }

    /// Observe stack pops, i.e. every applied undo or redo.
    pub fn observe_item_popped<F>(&self, f: F) -> Subscription
    where
        F: Fn(EventKind) + Send + Sync + 'static,
    {
        self.manager
            .observe_item_popped(move |_txn, event| f(event.kind()))
    }
}

impl std::fmt::Debug for UndoCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoCoordinator")
            .field("can_undo", &self.can_undo())
            .field("can_redo", &self.can_redo())
            .finish()
    }
}
