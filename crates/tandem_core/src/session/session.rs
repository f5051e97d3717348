//! A live collaboration session: one client on one entity.
//!
//! The session wires everything together: it owns the replicated store,
//! tracks presence and activity, scopes undo to the local user, and speaks
//! the room protocol over its transport. It is poll-driven: the host calls
//! [`Session::pump`] on its own cadence (frame tick, timer, or after each
//! user action) and the session drains the transport, answers handshakes,
//! expires presence and flushes its outbox.
//!
//! Local mutations go through [`Session::mutate`] so they pick up activity
//! attribution and the typing indicator; reads go straight to the store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use yrs::Subscription;

use crate::activity::{ActivityAction, ActivityLog, ActivityRecord};
use crate::config::CollabConfig;
use crate::doc::{DocumentStore, Schema, UpdateOrigin};
use crate::error::{Result, TandemError};
use crate::presence::{CursorPosition, PresenceEntry, PresenceMessage, PresenceTracker};
use crate::protocol::{ControlMessage, Frame, SyncMessage};
use crate::reconcile::{Reconciler, SnapshotSource};
use crate::transport::Transport;
use crate::undo::UndoCoordinator;

/// A local mutation of the session's document.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Replace the whole text (applied as a minimal diff). One activity
    /// record per call.
    SetText { text: String },
    /// Insert at a position (a keystroke; drives the typing indicator, no
    /// activity record).
    InsertText { index: u32, text: String },
    /// Delete a range (a keystroke as well).
    DeleteText { index: u32, len: u32 },
    /// Append a stroke record.
    PushStroke { stroke: serde_json::Value },
    /// Set a field value.
    SetField { field: String, value: String },
    /// Remove a field.
    RemoveField { field: String },
}

pub struct Session {
    entity_id: String,
    client_id: String,
    store: DocumentStore,
    transport: Arc<dyn Transport>,
    undo: Mutex<UndoCoordinator>,
    presence: Mutex<PresenceTracker>,
    activity: Mutex<ActivityLog>,
    reconciler: tokio::sync::Mutex<Reconciler>,
    /// Frames waiting to be sent. Doubles as the offline buffer: flushing
    /// stops at the first send failure and resumes when the link is back.
    outbox: Arc<Mutex<VecDeque<Frame>>>,
    closed: Arc<AtomicBool>,
    /// Link state seen by the previous pump, for reconnect detection.
    was_connected: AtomicBool,
    /// Host clock as of the last pump. Typing activity is stamped against
    /// it so the quiet period and its expiry read the same clock.
    clock_ms: AtomicI64,
    update_sub: Mutex<Option<Subscription>>,
    presence_observers: Mutex<Vec<PresenceObserver>>,
}

type PresenceObserver = Box<dyn Fn(&[PresenceEntry]) + Send + Sync>;

impl Session {
    /// Open a session for `client_id` on `entity_id`.
    ///
    /// Never touches the network: the join announcement and the sync
    /// handshake are queued and go out on the first [`Session::pump`] with a
    /// connected transport, so opening against a dead transport still
    /// yields a usable (offline) session.
    pub(crate) fn open(
        entity_id: &str,
        client_id: &str,
        schema: Schema,
        transport: Arc<dyn Transport>,
        config: &CollabConfig,
    ) -> Result<Self> {
        if entity_id.is_empty() {
            return Err(TandemError::InvalidEntityId);
        }

        let store = DocumentStore::new(schema, entity_id, client_id)?;
        let undo = UndoCoordinator::new(&store, config);
        let presence = PresenceTracker::new(client_id, client_id, config);

        let outbox: Arc<Mutex<VecDeque<Frame>>> = Arc::new(Mutex::new(VecDeque::new()));
        let closed = Arc::new(AtomicBool::new(false));

        // Forward every locally originated update (edits, undo/redo, the
        // canonical seed) to the room. Frames that came from the room are
        // not echoed back.
        let update_sub = {
            let outbox = Arc::clone(&outbox);
            let closed = Arc::clone(&closed);
            let entity = entity_id.to_string();
            store.observe_updates(move |update, origin| {
                if closed.load(Ordering::SeqCst) {
                    return;
                }
                if matches!(origin, UpdateOrigin::Remote | UpdateOrigin::Sync) {
                    return;
                }
                outbox.lock().unwrap().push_back(Frame::Sync {
                    entity_id: entity.clone(),
                    message: SyncMessage::Update {
                        update: update.to_vec(),
                    },
                });
            })?
        };

        log::debug!("[Session] Opened {} for {}", entity_id, client_id);
        Ok(Self {
            entity_id: entity_id.to_string(),
            client_id: client_id.to_string(),
            store,
            transport,
            undo: Mutex::new(undo),
            presence: Mutex::new(presence),
            activity: Mutex::new(ActivityLog::new()),
            reconciler: tokio::sync::Mutex::new(Reconciler::new()),
            outbox,
            closed,
            was_connected: AtomicBool::new(false),
            clock_ms: AtomicI64::new(0),
            update_sub: Mutex::new(Some(update_sub)),
            presence_observers: Mutex::new(Vec::new()),
        })
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Read access to the replicated document.
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ==================== Mutations ====================

    /// Apply a local mutation, record it in the activity log where material,
    /// and refresh the typing indicator for keystroke-level edits.
    ///
    /// On a closed session this is a warning-logged no-op.
    pub fn mutate(&self, mutation: Mutation) -> Result<()> {
        if self.is_closed() {
            log::warn!(
                "[Session] Ignoring mutation on closed session {}",
                self.entity_id
            );
            return Ok(());
        }
        let now_ms = self.clock_ms.load(Ordering::SeqCst);
        match mutation {
            Mutation::SetText { text } => {
                let old = self.store.text();
                if old == text {
                    return Ok(());
                }
                self.store.set_text(&text)?;
                self.record_activity(ActivityAction::ReplaceText, None, Some(old), Some(text));
            }
            Mutation::InsertText { index, text } => {
                self.store.insert_text(index, &text)?;
                self.mark_typing(now_ms);
            }
            Mutation::DeleteText { index, len } => {
                self.store.delete_text(index, len)?;
                self.mark_typing(now_ms);
            }
            Mutation::PushStroke { stroke } => {
                self.store.push_stroke(&stroke)?;
                self.record_activity(
                    ActivityAction::AddStroke,
                    None,
                    None,
                    Some(stroke.to_string()),
                );
            }
            Mutation::SetField { field, value } => {
                let old = self.store.get_field(&field);
                self.store.set_field(&field, &value)?;
                self.record_activity(ActivityAction::SetField, Some(field), old, Some(value));
            }
            Mutation::RemoveField { field } => {
                let old = self.store.get_field(&field);
                self.store.remove_field(&field)?;
                self.record_activity(ActivityAction::RemoveField, Some(field), old, None);
            }
        }
        Ok(())
    }

    fn mark_typing(&self, now_ms: i64) {
        let announce = self.presence.lock().unwrap().mark_typing(now_ms);
        if let Some(state) = announce {
            self.enqueue_presence(PresenceMessage::Announce { state });
        }
    }

    fn record_activity(
        &self,
        action: ActivityAction,
        field: Option<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        let actor_name = self.presence.lock().unwrap().local().display_name.clone();
        let record = ActivityRecord::new(
            &self.entity_id,
            &self.client_id,
            &actor_name,
            action,
            field,
            old_value,
            new_value,
        );
        self.activity.lock().unwrap().append(record.clone());
        self.enqueue(Frame::Control {
            entity_id: self.entity_id.clone(),
            message: ControlMessage::Activity { record },
        });
    }

    // ==================== Undo / Redo ====================

    /// Undo the most recent local edit. False if there was nothing to undo
    /// or the session is closed.
    pub fn undo(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.undo.lock().unwrap().undo()
    }

    /// Redo the most recently undone local edit.
    pub fn redo(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.undo.lock().unwrap().redo()
    }

    pub fn can_undo(&self) -> bool {
        self.undo.lock().unwrap().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.lock().unwrap().can_redo()
    }

    // ==================== Presence ====================

    /// Every participant currently in the room, local client included.
    pub fn roster(&self) -> Vec<PresenceEntry> {
        self.presence.lock().unwrap().roster()
    }

    /// Remote participants only, sorted by client id.
    pub fn peers(&self) -> Vec<PresenceEntry> {
        self.presence.lock().unwrap().peers()
    }

    /// Register a callback fired from [`Session::pump`] whenever the remote
    /// roster changes: a peer arrives, updates its state, departs or
    /// expires. The callback receives the remote entries only; local state
    /// is read through [`Session::roster`]. Observers are dropped when the
    /// session closes.
    pub fn observe_presence<F>(&self, f: F)
    where
        F: Fn(&[PresenceEntry]) + Send + Sync + 'static,
    {
        self.presence_observers.lock().unwrap().push(Box::new(f));
    }

    fn notify_presence(&self) {
        let peers = self.presence.lock().unwrap().peers();
        for observer in self.presence_observers.lock().unwrap().iter() {
            observer(&peers);
        }
    }

    /// Move the local cursor; broadcast if it changed.
    pub fn set_cursor(&self, cursor: Option<CursorPosition>) {
        if self.is_closed() {
            return;
        }
        let announce = self.presence.lock().unwrap().set_cursor(cursor);
        if let Some(state) = announce {
            self.enqueue_presence(PresenceMessage::Announce { state });
        }
    }

    /// Change the local display name shown to peers.
    pub fn set_display_name(&self, name: &str) {
        if self.is_closed() {
            return;
        }
        let announce = self.presence.lock().unwrap().set_display_name(name);
        if let Some(state) = announce {
            self.enqueue_presence(PresenceMessage::Announce { state });
        }
    }

    /// Set a host-defined presence extension value.
    pub fn set_presence_extra(&self, key: &str, value: serde_json::Value) {
        if self.is_closed() {
            return;
        }
        let announce = self.presence.lock().unwrap().set_extra(key, value);
        if let Some(state) = announce {
            self.enqueue_presence(PresenceMessage::Announce { state });
        }
    }

    // ==================== Activity ====================

    /// Attributed change history, newest first. Includes records received
    /// from peers.
    pub fn activity(&self) -> Vec<ActivityRecord> {
        self.activity.lock().unwrap().list()
    }

    /// Re-apply a past activity record's value as a fresh local edit.
    /// Returns false if the record id is unknown.
    pub fn restore_activity(&self, record_id: &str) -> Result<bool> {
        let record = match self.activity.lock().unwrap().find(record_id) {
            Some(record) => record.clone(),
            None => return Ok(false),
        };
        let mutation = match record.action {
            ActivityAction::SetField => match (record.field, record.new_value) {
                (Some(field), Some(value)) => Mutation::SetField { field, value },
                _ => return Ok(false),
            },
            ActivityAction::RemoveField => match record.field {
                Some(field) => Mutation::RemoveField { field },
                None => return Ok(false),
            },
            ActivityAction::ReplaceText => match record.new_value {
                Some(text) => Mutation::SetText { text },
                None => return Ok(false),
            },
            ActivityAction::AddStroke => match record
                .new_value
                .as_deref()
                .and_then(|v| serde_json::from_str(v).ok())
            {
                Some(stroke) => Mutation::PushStroke { stroke },
                None => return Ok(false),
            },
        };
        self.mutate(mutation)?;
        Ok(true)
    }

    // ==================== Reconciliation ====================

    /// Seed the store from the backend's canonical snapshot, at most once
    /// per session and only while the store is empty. Safe to retry on a
    /// [`TandemError::SnapshotLoad`] failure.
    pub async fn reconcile(&self, source: &dyn SnapshotSource) -> Result<bool> {
        let mut reconciler = self.reconciler.lock().await;
        reconciler.run(&self.store, source).await
    }

    // ==================== Pump ====================

    /// Drive the session: detect reconnects, drain and dispatch inbound
    /// frames, advance presence timers, flush the outbox.
    ///
    /// `now_ms` is the host's clock; presence expiry and the typing quiet
    /// period are measured against it.
    pub fn pump(&self, now_ms: i64) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.clock_ms.store(now_ms, Ordering::SeqCst);

        let connected = self.transport.is_connected();
        if connected && !self.was_connected.swap(true, Ordering::SeqCst) {
            self.enqueue_handshake();
        } else if !connected {
            self.was_connected.store(false, Ordering::SeqCst);
        }

        let mut roster_changed = false;
        for frame in self.transport.poll() {
            if frame.entity_id() != self.entity_id {
                continue;
            }
            roster_changed |= self.dispatch(frame, now_ms);
        }

        {
            let mut presence = self.presence.lock().unwrap();
            let announce = presence.tick(now_ms);
            roster_changed |= !presence.expire_stale(now_ms).is_empty();
            if let Some(state) = announce {
                drop(presence);
                self.enqueue_presence(PresenceMessage::Announce { state });
            }
        }
        if roster_changed {
            self.notify_presence();
        }

        if connected {
            self.flush();
        }
        Ok(())
    }

    /// Handle one inbound frame. Returns true if the remote roster changed.
    fn dispatch(&self, frame: Frame, now_ms: i64) -> bool {
        match frame {
            Frame::Sync { message, .. } => {
                match message {
                    SyncMessage::Step1 { state_vector } => {
                        // Answer with what the peer is missing. Each peer
                        // advertises its own state vector when it connects,
                        // never in reply, so the exchange quiesces.
                        match self.store.encode_diff(&state_vector) {
                            Ok(diff) => self.enqueue(Frame::Sync {
                                entity_id: self.entity_id.clone(),
                                message: SyncMessage::Step2 { update: diff },
                            }),
                            Err(e) => log::warn!("[Session] Bad state vector from peer: {}", e),
                        }
                    }
                    SyncMessage::Step2 { update } => {
                        if let Err(e) = self.store.apply_update(&update, UpdateOrigin::Sync) {
                            log::warn!("[Session] Dropping bad sync response: {}", e);
                        }
                    }
                    SyncMessage::Update { update } => {
                        if let Err(e) = self.store.apply_update(&update, UpdateOrigin::Remote) {
                            log::warn!("[Session] Dropping bad update frame: {}", e);
                        }
                    }
                }
                false
            }
            Frame::Presence { payload, .. } => match PresenceMessage::decode(&payload) {
                Ok(message) => self.presence.lock().unwrap().apply_remote(message, now_ms),
                Err(e) => {
                    log::debug!("[Session] Dropping bad presence payload: {}", e);
                    false
                }
            },
            Frame::Control { message, .. } => match message {
                ControlMessage::Join { client_id } => {
                    log::debug!("[Session] {} joined {}", client_id, self.entity_id);
                    // Announce ourselves so the newcomer sees us without
                    // waiting for the next heartbeat. The roster change is
                    // reported when the newcomer's own announce arrives.
                    let state = self.presence.lock().unwrap().local().clone();
                    self.enqueue_presence(PresenceMessage::Announce { state });
                    false
                }
                ControlMessage::Leave { client_id } => {
                    self.presence.lock().unwrap().remove_peer(&client_id)
                }
                ControlMessage::Activity { record } => {
                    self.activity.lock().unwrap().append(record);
                    false
                }
            },
        }
    }

    /// Queue the room entry sequence: join, announce, sync handshake.
    fn enqueue_handshake(&self) {
        let frames = [
            Frame::Control {
                entity_id: self.entity_id.clone(),
                message: ControlMessage::Join {
                    client_id: self.client_id.clone(),
                },
            },
            Frame::Presence {
                entity_id: self.entity_id.clone(),
                payload: self.announce_payload(),
            },
            Frame::Sync {
                entity_id: self.entity_id.clone(),
                message: SyncMessage::Step1 {
                    state_vector: self.store.encode_state_vector(),
                },
            },
        ];
        let mut outbox = self.outbox.lock().unwrap();
        // Ahead of any updates buffered while offline.
        for frame in frames.into_iter().rev() {
            outbox.push_front(frame);
        }
    }

    fn announce_payload(&self) -> Vec<u8> {
        let state = self.presence.lock().unwrap().local().clone();
        PresenceMessage::Announce { state }
            .encode()
            .unwrap_or_default()
    }

    fn enqueue(&self, frame: Frame) {
        self.outbox.lock().unwrap().push_back(frame);
    }

    fn enqueue_presence(&self, message: PresenceMessage) {
        match message.encode() {
            Ok(payload) => self.enqueue(Frame::Presence {
                entity_id: self.entity_id.clone(),
                payload,
            }),
            Err(e) => log::warn!("[Session] Failed to encode presence: {}", e),
        }
    }

    fn flush(&self) {
        loop {
            let frame = match self.outbox.lock().unwrap().pop_front() {
                Some(frame) => frame,
                None => return,
            };
            if let Err(e) = self.transport.send(&frame) {
                log::debug!("[Session] Send failed, buffering: {}", e);
                self.outbox.lock().unwrap().push_front(frame);
                return;
            }
        }
    }

    // ==================== Teardown ====================

    /// Close the session: notify the room, drop every subscription, stop
    /// reacting to traffic. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("[Session] Closing {} for {}", self.entity_id, self.client_id);

        // Unsubscribe before the goodbye so nothing re-enters the outbox.
        *self.update_sub.lock().unwrap() = None;
        self.presence_observers.lock().unwrap().clear();
        self.outbox.lock().unwrap().clear();

        let departure = self.presence.lock().unwrap().departure();
        if let Ok(payload) = departure.encode() {
            // Best effort: if the link is down peers expire us by TTL.
            let _ = self.transport.send(&Frame::Presence {
                entity_id: self.entity_id.clone(),
                payload,
            });
        }
        let _ = self.transport.send(&Frame::Control {
            entity_id: self.entity_id.clone(),
            message: ControlMessage::Leave {
                client_id: self.client_id.clone(),
            },
        });
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("entity_id", &self.entity_id)
            .field("client_id", &self.client_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::relay::RelayHub;

    fn open(
        hub: &RelayHub,
        entity: &str,
        client: &str,
        schema: Schema,
    ) -> (Session, Arc<crate::transport::relay::LocalTransport>) {
        let transport = Arc::new(hub.connect());
        let session = Session::open(
            entity,
            client,
            schema,
            transport.clone() as Arc<dyn Transport>,
            &CollabConfig::default(),
        )
        .unwrap();
        (session, transport)
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    #[test]
    fn test_empty_entity_id_is_rejected() {
        let hub = RelayHub::new();
        let transport: Arc<dyn Transport> = Arc::new(hub.connect());
        let err = Session::open("", "a", Schema::Text, transport, &CollabConfig::default())
            .unwrap_err();
        assert!(matches!(err, TandemError::InvalidEntityId));
    }

    #[test]
    fn test_edits_replicate_between_sessions() {
        let hub = RelayHub::new();
        let (a, _ta) = open(&hub, "note-1", "client-a", Schema::Text);
        let (b, _tb) = open(&hub, "note-1", "client-b", Schema::Text);

        a.mutate(Mutation::SetText {
            text: "Hello".into(),
        })
        .unwrap();
        a.pump(now()).unwrap();
        b.pump(now()).unwrap();
        // a answers b's handshake step 1.
        a.pump(now()).unwrap();
        b.pump(now()).unwrap();

        assert_eq!(b.store().text(), "Hello");
    }

    #[test]
    fn test_frames_for_other_entities_are_ignored() {
        let hub = RelayHub::new();
        let (a, _ta) = open(&hub, "note-1", "client-a", Schema::Text);
        let (b, _tb) = open(&hub, "note-2", "client-b", Schema::Text);

        a.mutate(Mutation::SetText {
            text: "only note-1".into(),
        })
        .unwrap();
        a.pump(now()).unwrap();
        b.pump(now()).unwrap();

        assert_eq!(b.store().text(), "");
    }

    #[test]
    fn test_mutation_on_closed_session_is_a_noop() {
        let hub = RelayHub::new();
        let (a, _ta) = open(&hub, "note-1", "client-a", Schema::Text);
        a.close();
        a.mutate(Mutation::SetText {
            text: "ignored".into(),
        })
        .unwrap();
        assert_eq!(a.store().text(), "");
        assert!(!a.undo());
    }

    #[test]
    fn test_close_is_idempotent() {
        let hub = RelayHub::new();
        let (a, _ta) = open(&hub, "note-1", "client-a", Schema::Text);
        a.close();
        a.close();
        assert!(a.is_closed());
    }

    #[test]
    fn test_field_mutations_record_activity() {
        let hub = RelayHub::new();
        let (a, _ta) = open(&hub, "task-1", "client-a", Schema::FieldMap);

        a.mutate(Mutation::SetField {
            field: "status".into(),
            value: "open".into(),
        })
        .unwrap();
        a.mutate(Mutation::SetField {
            field: "status".into(),
            value: "done".into(),
        })
        .unwrap();

        let activity = a.activity();
        assert_eq!(activity.len(), 2);
        assert_eq!(activity[0].old_value, Some("open".to_string()));
        assert_eq!(activity[0].new_value, Some("done".to_string()));
        assert_eq!(activity[0].actor_id, "client-a");
    }

    #[test]
    fn test_keystrokes_do_not_record_activity() {
        let hub = RelayHub::new();
        let (a, _ta) = open(&hub, "note-1", "client-a", Schema::Text);
        a.mutate(Mutation::InsertText {
            index: 0,
            text: "h".into(),
        })
        .unwrap();
        assert!(a.activity().is_empty());
        // But they do flip the typing indicator.
        assert!(a.roster()[0].typing);
    }

    #[test]
    fn test_restore_activity_reapplies_value() {
        let hub = RelayHub::new();
        let (a, _ta) = open(&hub, "task-1", "client-a", Schema::FieldMap);

        a.mutate(Mutation::SetField {
            field: "status".into(),
            value: "open".into(),
        })
        .unwrap();
        let open_record = a.activity()[0].id.clone();
        a.mutate(Mutation::SetField {
            field: "status".into(),
            value: "done".into(),
        })
        .unwrap();

        assert!(a.restore_activity(&open_record).unwrap());
        assert_eq!(a.store().get_field("status"), Some("open".to_string()));
        // The restore itself is a new attributed change.
        assert_eq!(a.activity().len(), 3);

        assert!(!a.restore_activity("no-such-id").unwrap());
    }

    #[test]
    fn test_offline_edits_are_buffered_until_reconnect() {
        let hub = RelayHub::new();
        let (a, ta) = open(&hub, "note-1", "client-a", Schema::Text);
        let (b, _tb) = open(&hub, "note-1", "client-b", Schema::Text);

        ta.disconnect();
        a.mutate(Mutation::SetText {
            text: "Written offline".into(),
        })
        .unwrap();
        a.pump(now()).unwrap();
        b.pump(now()).unwrap();
        assert_eq!(b.store().text(), "");

        ta.reconnect();
        a.pump(now()).unwrap();
        b.pump(now()).unwrap();
        a.pump(now()).unwrap();
        b.pump(now()).unwrap();
        assert_eq!(b.store().text(), "Written offline");
    }

    #[test]
    fn test_sync_handshake_quiesces_when_idle() {
        let hub = RelayHub::new();
        let watcher = hub.connect();
        let (a, _ta) = open(&hub, "note-1", "client-a", Schema::Text);
        let (b, _tb) = open(&hub, "note-1", "client-b", Schema::Text);

        let t = now();
        for _ in 0..5 {
            a.pump(t).unwrap();
            b.pump(t).unwrap();
        }
        watcher.poll();

        a.pump(t).unwrap();
        b.pump(t).unwrap();
        let frames = watcher.poll();
        assert!(
            frames.iter().all(|f| !matches!(f, Frame::Sync { .. })),
            "idle peers kept exchanging sync frames: {:?}",
            frames
        );
    }

    #[test]
    fn test_presence_observer_sees_roster_changes() {
        let hub = RelayHub::new();
        let (a, _ta) = open(&hub, "note-1", "client-a", Schema::Text);
        let (b, _tb) = open(&hub, "note-1", "client-b", Schema::Text);

        let seen: Arc<Mutex<Vec<Vec<PresenceEntry>>>> = Arc::new(Mutex::new(Vec::new()));
        b.observe_presence({
            let seen = Arc::clone(&seen);
            move |peers| seen.lock().unwrap().push(peers.to_vec())
        });

        let t = now();
        a.pump(t).unwrap();
        b.pump(t).unwrap();

        let arrival = seen.lock().unwrap().last().cloned().expect("arrival fires");
        assert_eq!(arrival.len(), 1);
        // Peers only; the observing client's own entry is not delivered.
        assert_eq!(arrival[0].client_id, "client-a");

        a.close();
        b.pump(t + 1).unwrap();
        assert!(seen.lock().unwrap().last().unwrap().is_empty());
    }

    #[test]
    fn test_typing_expiry_follows_the_pump_clock() {
        let hub = RelayHub::new();
        let (a, _ta) = open(&hub, "note-1", "client-a", Schema::Text);

        // A synthetic clock nowhere near wall time.
        let base = 1_000_000;
        a.pump(base).unwrap();
        a.mutate(Mutation::InsertText {
            index: 0,
            text: "h".into(),
        })
        .unwrap();
        a.pump(base + 1_999).unwrap();
        assert!(a.roster()[0].typing);

        a.pump(base + 2_000).unwrap();
        assert!(!a.roster()[0].typing);
    }

    #[test]
    fn test_undo_replicates_to_peers() {
        let hub = RelayHub::new();
        let (a, _ta) = open(&hub, "note-1", "client-a", Schema::Text);
        let (b, _tb) = open(&hub, "note-1", "client-b", Schema::Text);

        a.mutate(Mutation::SetText {
            text: "undo me".into(),
        })
        .unwrap();
        for _ in 0..2 {
            a.pump(now()).unwrap();
            b.pump(now()).unwrap();
        }
        assert_eq!(b.store().text(), "undo me");

        assert!(a.undo());
        a.pump(now()).unwrap();
        b.pump(now()).unwrap();
        assert_eq!(a.store().text(), "");
        assert_eq!(b.store().text(), "");
    }
}
