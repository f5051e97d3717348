//! Per-entity replicated document store.
//!
//! `DocumentStore` wraps one `yrs::Doc` for a single collaborative entity
//! and exposes the shared types named by its [`Schema`]. All conflict
//! resolution is delegated to the engine: each inserted element carries a
//! globally unique (client id, counter) identifier, concurrent inserts at
//! the same position are ordered deterministically by that identifier, and
//! deletions are tombstoned. This module's job is the contract around the
//! engine - origin tagging, update capture, idempotent application and
//! change observation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use yrs::{
    Array, ArrayRef, Doc, GetString, Map, MapRef, Origin, ReadTxn, Subscription, Text, TextRef,
    Transact, Update, updates::decoder::Decode, updates::encoder::Encode,
};

use super::schema::{FIELDS_NAME, STROKES_NAME, Schema, TEXT_NAME};
use super::types::{UpdateOrigin, UpdateRecord};
use crate::error::{Result, TandemError};

/// Transaction origin tag for updates applied from live peer broadcasts.
const REMOTE_ORIGIN: &str = "tandem:remote";

/// Transaction origin tag for updates applied during the sync handshake.
const SYNC_ORIGIN: &str = "tandem:sync";

/// Transaction origin tag for the canonical snapshot seed. Replicates to
/// peers like a local edit but is excluded from undo tracking.
const SEED_ORIGIN: &str = "tandem:seed";

/// In-memory log of applied update frames, shared with the update observer.
#[derive(Debug, Default)]
struct UpdateLog {
    next_seq: AtomicI64,
    records: RwLock<Vec<UpdateRecord>>,
}

impl UpdateLog {
    fn append(&self, data: Vec<u8>, origin: UpdateOrigin) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let record = UpdateRecord {
            seq,
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
            origin,
        };
        self.records.write().unwrap().push(record);
    }
}

/// A CRDT document for a single collaborative entity.
///
/// One store exists per entity per process and is exclusively owned by its
/// session (single writer-of-record per client replica). Local mutations
/// apply synchronously and optimistically; the session observes the
/// resulting update frames and ships them to the room.
pub struct DocumentStore {
    doc: Doc,
    schema: Schema,
    entity_id: String,
    client_id: String,
    text: Option<TextRef>,
    strokes: Option<ArrayRef>,
    fields: MapRef,
    local_origin: Origin,
    remote_origin: Origin,
    sync_origin: Origin,
    seed_origin: Origin,
    log: Arc<UpdateLog>,
    _log_sub: Subscription,
}

impl DocumentStore {
    /// Create a new empty store for `entity_id`, owned by `client_id`.
    pub fn new(schema: Schema, entity_id: &str, client_id: &str) -> Result<Self> {
        let doc = Doc::new();
        let text = schema.has_text().then(|| doc.get_or_insert_text(TEXT_NAME));
        let strokes = schema
            .has_strokes()
            .then(|| doc.get_or_insert_array(STROKES_NAME));
        let fields = doc.get_or_insert_map(FIELDS_NAME);

        let local_origin = Origin::from(client_id);
        let remote_origin = Origin::from(REMOTE_ORIGIN);
        let sync_origin = Origin::from(SYNC_ORIGIN);
        let seed_origin = Origin::from(SEED_ORIGIN);

        let log = Arc::new(UpdateLog::default());
        let log_sub = {
            let log = Arc::clone(&log);
            let local = local_origin.clone();
            let remote = remote_origin.clone();
            let sync = sync_origin.clone();
            let seed = seed_origin.clone();
            doc.observe_update_v1(move |txn, event| {
                let origin = classify_origin(txn.origin(), &local, &remote, &sync, &seed);
                log.append(event.update.clone(), origin);
            })
            .map_err(|_| TandemError::Crdt("Failed to attach update observer".to_string()))?
        };

        Ok(Self {
            doc,
            schema,
            entity_id: entity_id.to_string(),
            client_id: client_id.to_string(),
            text,
            strokes,
            fields,
            local_origin,
            remote_origin,
            sync_origin,
            seed_origin,
            log,
            _log_sub: log_sub,
        })
    }

    /// The schema this store was created with.
    pub fn schema(&self) -> Schema {
        self.schema
    }

    /// The entity this store replicates.
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// The local client owning this replica.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn doc(&self) -> &Doc {
        &self.doc
    }

    pub(crate) fn local_origin(&self) -> &Origin {
        &self.local_origin
    }

    pub(crate) fn text_ref(&self) -> Option<&TextRef> {
        self.text.as_ref()
    }

    pub(crate) fn strokes_ref(&self) -> Option<&ArrayRef> {
        self.strokes.as_ref()
    }

    pub(crate) fn fields_ref(&self) -> &MapRef {
        &self.fields
    }

    fn text_or_err(&self) -> Result<&TextRef> {
        self.text.as_ref().ok_or_else(|| {
            TandemError::Crdt(format!("Schema {} has no shared text", self.schema))
        })
    }

    fn strokes_or_err(&self) -> Result<&ArrayRef> {
        self.strokes.as_ref().ok_or_else(|| {
            TandemError::Crdt(format!("Schema {} has no stroke list", self.schema))
        })
    }

    // ==================== Text Operations ====================

    /// Materialized text content. Empty for schemas without a shared text.
    pub fn text(&self) -> String {
        match &self.text {
            Some(text) => {
                let txn = self.doc.transact();
                text.get_string(&txn)
            }
            None => String::new(),
        }
    }

    /// Length of the shared text.
    pub fn text_len(&self) -> u32 {
        match &self.text {
            Some(text) => {
                let txn = self.doc.transact();
                text.len(&txn)
            }
            None => 0,
        }
    }

    /// Insert text at a position. Applies locally at once; the session ships
    /// the resulting frame.
    pub fn insert_text(&self, index: u32, chunk: &str) -> Result<()> {
        let text = self.text_or_err()?;
        let mut txn = self.doc.transact_mut_with(self.local_origin.clone());
        text.insert(&mut txn, index, chunk);
        Ok(())
    }

    /// Delete a range of text.
    pub fn delete_text(&self, index: u32, length: u32) -> Result<()> {
        let text = self.text_or_err()?;
        let mut txn = self.doc.transact_mut_with(self.local_origin.clone());
        text.remove_range(&mut txn, index, length);
        Ok(())
    }

    /// Replace the whole text using minimal diff operations.
    ///
    /// Instead of delete-all + insert-all (which would discard the operation
    /// ids peers anchor to), this computes the common prefix/suffix and
    /// applies only the changed middle. Bulk replacement therefore merges
    /// with concurrent edits like any other edit.
    pub fn set_text(&self, content: &str) -> Result<()> {
        self.replace_text(content, &self.local_origin)
    }

    pub(crate) fn replace_text(&self, content: &str, origin: &Origin) -> Result<()> {
        let text = self.text_or_err()?;
        let current = self.text();
        if current == content {
            return Ok(());
        }

        let current_chars: Vec<char> = current.chars().collect();
        let new_chars: Vec<char> = content.chars().collect();

        let common_prefix = current_chars
            .iter()
            .zip(new_chars.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let remaining_current = current_chars.len() - common_prefix;
        let remaining_new = new_chars.len() - common_prefix;
        let common_suffix = current_chars[common_prefix..]
            .iter()
            .rev()
            .zip(new_chars[common_prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .take(remaining_current.min(remaining_new))
            .count();

        let delete_len = (current_chars.len() - common_suffix - common_prefix) as u32;
        let insert_end = new_chars.len() - common_suffix;

        let mut txn = self.doc.transact_mut_with(origin.clone());
        if delete_len > 0 {
            text.remove_range(&mut txn, common_prefix as u32, delete_len);
        }
        if insert_end > common_prefix {
            let insert_text: String = new_chars[common_prefix..insert_end].iter().collect();
            text.insert(&mut txn, common_prefix as u32, &insert_text);
        }
        Ok(())
    }

    // ==================== Stroke Operations ====================

    /// Append an immutable stroke record to the stroke list.
    pub fn push_stroke(&self, stroke: &serde_json::Value) -> Result<()> {
        let strokes = self.strokes_or_err()?;
        let encoded = serde_json::to_string(stroke)?;
        let mut txn = self.doc.transact_mut_with(self.local_origin.clone());
        strokes.push_back(&mut txn, encoded);
        Ok(())
    }

    /// All stroke records, in converged list order.
    pub fn strokes(&self) -> Vec<serde_json::Value> {
        match &self.strokes {
            Some(strokes) => {
                let txn = self.doc.transact();
                strokes
                    .iter(&txn)
                    .filter_map(|v| serde_json::from_str(&v.to_string(&txn)).ok())
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// Number of strokes in the list.
    pub fn stroke_count(&self) -> u32 {
        match &self.strokes {
            Some(strokes) => {
                let txn = self.doc.transact();
                strokes.len(&txn)
            }
            None => 0,
        }
    }

    // ==================== Field Operations ====================

    /// Set a field value.
    pub fn set_field(&self, key: &str, value: &str) -> Result<()> {
        let mut txn = self.doc.transact_mut_with(self.local_origin.clone());
        self.fields.insert(&mut txn, key, value);
        Ok(())
    }

    pub(crate) fn set_field_with_origin(&self, key: &str, value: &str, origin: &Origin) {
        let mut txn = self.doc.transact_mut_with(origin.clone());
        self.fields.insert(&mut txn, key, value);
    }

    /// Get a field value.
    pub fn get_field(&self, key: &str) -> Option<String> {
        let txn = self.doc.transact();
        self.fields
            .get(&txn, key)
            .and_then(|v| v.cast::<String>().ok())
    }

    /// Remove a field.
    pub fn remove_field(&self, key: &str) -> Result<()> {
        let mut txn = self.doc.transact_mut_with(self.local_origin.clone());
        self.fields.remove(&mut txn, key);
        Ok(())
    }

    /// All field keys.
    pub fn field_keys(&self) -> Vec<String> {
        let txn = self.doc.transact();
        self.fields.keys(&txn).map(String::from).collect()
    }

    /// All fields as a plain map.
    pub fn fields(&self) -> HashMap<String, String> {
        let txn = self.doc.transact();
        self.fields
            .iter(&txn)
            .map(|(k, v)| (k.to_string(), v.to_string(&txn)))
            .collect()
    }

    /// Whether the schema's primary shared type is still empty.
    ///
    /// The reconciliation loader uses this as its guard: a canonical
    /// snapshot is only merged into an empty store.
    pub fn is_empty(&self) -> bool {
        match self.schema {
            Schema::Text => self.text_len() == 0,
            Schema::StrokeList => self.stroke_count() == 0,
            Schema::FieldMap => {
                let txn = self.doc.transact();
                self.fields.len(&txn) == 0
            }
        }
    }

    // ==================== Sync Operations ====================

    /// Encode the current state vector (compact summary of which operations
    /// this replica has seen).
    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode the full state as a single update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&Default::default())
    }

    /// Encode only the operations a peer with `remote_state_vector` is
    /// missing.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = yrs::StateVector::decode_v1(remote_state_vector)
            .map_err(|e| TandemError::Crdt(format!("Failed to decode state vector: {}", e)))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Apply an update frame received over the wire (or from the seed).
    ///
    /// Re-applying an already-known frame is a no-op: the engine detects
    /// duplicates by operation id and changes nothing, so no change
    /// notification fires.
    pub fn apply_update(&self, update: &[u8], origin: UpdateOrigin) -> Result<()> {
        let decoded = Update::decode_v1(update)
            .map_err(|e| TandemError::Crdt(format!("Failed to decode update: {}", e)))?;
        let mut txn = self.doc.transact_mut_with(self.yrs_origin(origin));
        txn.apply_update(decoded)
            .map_err(|e| TandemError::Crdt(format!("Failed to apply update: {}", e)))?;
        Ok(())
    }

    pub(crate) fn yrs_origin(&self, origin: UpdateOrigin) -> Origin {
        match origin {
            UpdateOrigin::Local => self.local_origin.clone(),
            UpdateOrigin::Remote => self.remote_origin.clone(),
            UpdateOrigin::Sync => self.sync_origin.clone(),
            UpdateOrigin::Seed => self.seed_origin.clone(),
        }
    }

    // ==================== Observers ====================

    /// Observe every applied update together with its classified origin.
    ///
    /// The session uses this to forward locally generated frames (including
    /// undo/redo and seed transactions) to the room while skipping the ones
    /// that just arrived from it.
    pub fn observe_updates<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(&[u8], UpdateOrigin) + Send + Sync + 'static,
    {
        let local = self.local_origin.clone();
        let remote = self.remote_origin.clone();
        let sync = self.sync_origin.clone();
        let seed = self.seed_origin.clone();
        self.doc
            .observe_update_v1(move |txn, event| {
                let origin = classify_origin(txn.origin(), &local, &remote, &sync, &seed);
                callback(&event.update, origin);
            })
            .map_err(|_| TandemError::Crdt("Failed to attach update observer".to_string()))
    }

    /// Observe any materialized change, local or remote, so a UI can
    /// re-render. Dropping the returned subscription unregisters it.
    pub fn observe_changes<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.doc
            .observe_update_v1(move |_txn, _event| callback())
            .map_err(|_| TandemError::Crdt("Failed to attach change observer".to_string()))
    }

    /// Snapshot of the applied-update log, in arrival order.
    pub fn update_log(&self) -> Vec<UpdateRecord> {
        self.log.records.read().unwrap().clone()
    }
}

fn classify_origin(
    origin: Option<&Origin>,
    local: &Origin,
    remote: &Origin,
    sync: &Origin,
    seed: &Origin,
) -> UpdateOrigin {
    match origin {
        Some(o) if o == remote => UpdateOrigin::Remote,
        Some(o) if o == sync => UpdateOrigin::Sync,
        Some(o) if o == seed => UpdateOrigin::Seed,
        Some(o) if o == local => UpdateOrigin::Local,
        // Undo/redo transactions carry the undo manager's own origin; they
        // are local-origin for transport purposes.
        _ => UpdateOrigin::Local,
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("entity_id", &self.entity_id)
            .field("client_id", &self.client_id)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn text_store(client: &str) -> DocumentStore {
        DocumentStore::new(Schema::Text, "note-1", client).unwrap()
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = text_store("a");
        assert_eq!(store.text(), "");
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_and_get_text() {
        let store = text_store("a");
        store.set_text("Hello world").unwrap();
        assert_eq!(store.text(), "Hello world");
        assert!(!store.is_empty());
    }

    #[test]
    fn test_set_text_minimal_diff_preserves_concurrent_merge() {
        let a = text_store("a");
        let b = text_store("b");

        a.set_text("Hello world").unwrap();
        b.apply_update(&a.encode_state_as_update(), UpdateOrigin::Sync)
            .unwrap();

        // A replaces the middle via set_text, B appends concurrently.
        a.set_text("Hello brave world").unwrap();
        b.insert_text(11, "!").unwrap();

        let ua = a.encode_state_as_update();
        let ub = b.encode_state_as_update();
        a.apply_update(&ub, UpdateOrigin::Remote).unwrap();
        b.apply_update(&ua, UpdateOrigin::Remote).unwrap();

        assert_eq!(a.text(), b.text());
        assert!(a.text().contains("brave"));
        assert!(a.text().contains('!'));
    }

    #[test]
    fn test_insert_and_delete() {
        let store = text_store("a");
        store.set_text("Hello World").unwrap();
        store.insert_text(6, "Beautiful ").unwrap();
        assert_eq!(store.text(), "Hello Beautiful World");
        store.delete_text(6, 10).unwrap();
        assert_eq!(store.text(), "Hello World");
    }

    #[test]
    fn test_text_ops_rejected_for_field_schema() {
        let store = DocumentStore::new(Schema::FieldMap, "task-1", "a").unwrap();
        assert!(store.insert_text(0, "x").is_err());
        assert!(store.set_text("x").is_err());
        assert_eq!(store.text(), "");
    }

    #[test]
    fn test_field_operations() {
        let store = DocumentStore::new(Schema::FieldMap, "task-1", "a").unwrap();
        assert!(store.is_empty());

        store.set_field("status", "open").unwrap();
        store.set_field("assignee", "dana").unwrap();
        assert!(!store.is_empty());
        assert_eq!(store.get_field("status"), Some("open".to_string()));
        assert_eq!(store.get_field("missing"), None);

        store.remove_field("assignee").unwrap();
        assert_eq!(store.get_field("assignee"), None);
        assert_eq!(store.field_keys(), vec!["status".to_string()]);
    }

    #[test]
    fn test_stroke_operations() {
        let store = DocumentStore::new(Schema::StrokeList, "board-1", "a").unwrap();
        assert!(store.is_empty());

        let stroke = serde_json::json!({"points": [[0, 0], [4, 4]], "color": "#1f6feb"});
        store.push_stroke(&stroke).unwrap();
        store
            .push_stroke(&serde_json::json!({"points": [[9, 9]], "color": "#d29922"}))
            .unwrap();

        assert_eq!(store.stroke_count(), 2);
        assert_eq!(store.strokes()[0], stroke);
    }

    #[test]
    fn test_convergence_any_order_with_duplicates() {
        let a = text_store("a");
        let b = text_store("b");

        a.set_text("Hello").unwrap();
        let seed = a.encode_state_as_update();
        b.apply_update(&seed, UpdateOrigin::Sync).unwrap();

        a.insert_text(5, " world").unwrap();
        b.insert_text(5, "!").unwrap();

        let ua = a.encode_state_as_update();
        let ub = b.encode_state_as_update();

        // Apply in different orders, with duplicates.
        a.apply_update(&ub, UpdateOrigin::Remote).unwrap();
        a.apply_update(&ub, UpdateOrigin::Remote).unwrap();
        b.apply_update(&ua, UpdateOrigin::Remote).unwrap();
        b.apply_update(&seed, UpdateOrigin::Remote).unwrap();

        assert_eq!(a.text(), b.text());
        assert!(a.text().contains(" world"));
        assert!(a.text().contains('!'));
    }

    #[test]
    fn test_idempotent_apply() {
        let a = text_store("a");
        let b = text_store("b");

        a.set_text("once").unwrap();
        let update = a.encode_state_as_update();

        b.apply_update(&update, UpdateOrigin::Remote).unwrap();
        let after_first = b.text();
        b.apply_update(&update, UpdateOrigin::Remote).unwrap();

        assert_eq!(b.text(), after_first);
    }

    #[test]
    fn test_encode_diff_transfers_only_missing_ops() {
        let a = text_store("a");
        let b = text_store("b");

        a.set_text("Initial").unwrap();
        b.apply_update(&a.encode_state_as_update(), UpdateOrigin::Sync)
            .unwrap();

        let sv_b = b.encode_state_vector();
        a.insert_text(0, "NEW: ").unwrap();

        let diff = a.encode_diff(&sv_b).unwrap();
        b.apply_update(&diff, UpdateOrigin::Remote).unwrap();

        assert_eq!(b.text(), "NEW: Initial");
    }

    #[test]
    fn test_observe_updates_classifies_origin() {
        let a = text_store("a");
        let b = text_store("b");

        let seen: Arc<RwLock<Vec<UpdateOrigin>>> = Arc::new(RwLock::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = b
            .observe_updates(move |_update, origin| {
                seen_clone.write().unwrap().push(origin);
            })
            .unwrap();

        b.set_text("local edit").unwrap();
        a.set_text("peer edit").unwrap();
        b.apply_update(&a.encode_state_as_update(), UpdateOrigin::Remote)
            .unwrap();

        let seen = seen.read().unwrap();
        assert_eq!(seen[0], UpdateOrigin::Local);
        assert_eq!(seen[1], UpdateOrigin::Remote);
    }

    #[test]
    fn test_change_observer_fires_for_local_and_remote() {
        let a = text_store("a");
        let b = text_store("b");

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let _sub = b
            .observe_changes(move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        b.set_text("local").unwrap();
        a.set_text("remote").unwrap();
        b.apply_update(&a.encode_state_as_update(), UpdateOrigin::Remote)
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_update_log_attribution() {
        let a = text_store("a");
        let b = text_store("b");

        b.set_text("mine").unwrap();
        a.set_text("theirs").unwrap();
        b.apply_update(&a.encode_state_as_update(), UpdateOrigin::Sync)
            .unwrap();

        let log = b.update_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].origin, UpdateOrigin::Local);
        assert_eq!(log[1].origin, UpdateOrigin::Sync);
        assert!(log[0].seq < log[1].seq);
    }
}
