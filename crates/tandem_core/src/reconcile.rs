//! Reconciliation with the backend's canonical snapshot.
//!
//! A client joining an entity has an empty replica; the backend holds the
//! canonical snapshot persisted before collaboration started. The
//! reconciler seeds that snapshot into the store exactly once per session,
//! and only while the store is still empty: once any peer state has been
//! merged through the handshake, the snapshot is already represented and
//! seeding it again would duplicate content.
//!
//! The seed is applied as ordinary operations under a dedicated origin, so
//! it replicates to peers like an edit but never lands on the local undo
//! stack.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::doc::{DocumentStore, UpdateOrigin};
use crate::error::{Result, TandemError};

/// A boxed future for object-safe async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Field name the snapshot title is seeded into.
const TITLE_FIELD: &str = "title";

/// The canonical snapshot of an entity, as served by the backend
/// (`GET /entities/{id}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Entity title, seeded into the `title` field.
    pub title: Option<String>,
    /// Body content, seeded into the shared text for schemas that have one.
    pub content: Option<String>,
}

/// Read access to canonical snapshots. Implemented over the workspace REST
/// backend in production; tests use an in-memory double.
pub trait SnapshotSource: Send + Sync {
    /// Fetch the snapshot for an entity. `Ok(None)` means the entity has no
    /// canonical snapshot (it was created live and never persisted).
    fn fetch<'a>(
        &'a self,
        entity_id: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Option<Snapshot>, String>>;
}

/// Seeds a store from its canonical snapshot, at most once.
#[derive(Debug)]
pub struct Reconciler {
    seeded: bool,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self { seeded: false }
    }

    /// Whether this session has already reconciled (successfully fetched,
    /// regardless of whether a seed was applied).
    pub fn is_done(&self) -> bool {
        self.seeded
    }

    /// Fetch the canonical snapshot and merge it into `store` if the store
    /// is still empty. Returns true if a seed was applied.
    ///
    /// A fetch failure leaves the reconciler un-done and surfaces as a
    /// retryable [`TandemError::SnapshotLoad`]; live collaboration carries
    /// on regardless.
    pub async fn run(&mut self, store: &DocumentStore, source: &dyn SnapshotSource) -> Result<bool> {
        if self.seeded {
            return Ok(false);
        }
        if !store.is_empty() {
            // Peer state already merged; the snapshot is represented in it.
            log::debug!(
                "[Reconcile] Store for {} is non-empty, skipping seed",
                store.entity_id()
            );
            self.seeded = true;
            return Ok(false);
        }

        let snapshot = source
            .fetch(store.entity_id())
            .await
            .map_err(|reason| TandemError::SnapshotLoad {
                entity_id: store.entity_id().to_string(),
                reason,
            })?;
        self.seeded = true;

        let Some(snapshot) = snapshot else {
            log::debug!(
                "[Reconcile] No canonical snapshot for {}",
                store.entity_id()
            );
            return Ok(false);
        };

        // Re-check after the await: a handshake may have filled the store
        // while the fetch was in flight.
        if !store.is_empty() {
            log::debug!(
                "[Reconcile] Store for {} filled during fetch, discarding snapshot",
                store.entity_id()
            );
            return Ok(false);
        }

        let seed_origin = store.yrs_origin(UpdateOrigin::Seed);
        if let Some(content) = &snapshot.content {
            if store.schema().has_text() {
                store.replace_text(content, &seed_origin)?;
            }
        }
        if let Some(title) = &snapshot.title {
            store.set_field_with_origin(TITLE_FIELD, title, &seed_origin);
        }
        log::debug!("[Reconcile] Seeded {} from canonical snapshot", store.entity_id());
        Ok(true)
    }
}

/// Snapshot source backed by the workspace REST API.
#[cfg(feature = "http-snapshot")]
pub struct HttpSnapshotSource {
    base_url: String,
    client: reqwest::Client,
}

#[cfg(feature = "http-snapshot")]
impl HttpSnapshotSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[cfg(feature = "http-snapshot")]
impl SnapshotSource for HttpSnapshotSource {
    fn fetch<'a>(
        &'a self,
        entity_id: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Option<Snapshot>, String>> {
        Box::pin(async move {
            let url = format!("{}/entities/{}", self.base_url, entity_id);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| format!("GET {} failed: {}", url, e))?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let response = response
                .error_for_status()
                .map_err(|e| format!("GET {} failed: {}", url, e))?;
            let snapshot = response
                .json::<Snapshot>()
                .await
                .map_err(|e| format!("Invalid snapshot body from {}: {}", url, e))?;
            Ok(Some(snapshot))
        })
    }
}
