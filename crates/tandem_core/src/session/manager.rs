//! Session lifecycle: open, look up, close.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::session::Session;
use crate::config::CollabConfig;
use crate::doc::Schema;
use crate::error::Result;
use crate::transport::Transport;

/// Owns every live session in the process, keyed by (entity, client).
///
/// Opening an already-open pair returns the existing handle instead of a
/// second replica; two stores for one (entity, client) would fork local
/// state.
pub struct SessionManager {
    config: CollabConfig,
    sessions: Mutex<HashMap<(String, String), Arc<Session>>>,
}

impl SessionManager {
    pub fn new(config: CollabConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Open (or return the already-open) session for a client on an entity.
    pub fn open_session(
        &self,
        entity_id: &str,
        client_id: &str,
        schema: Schema,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Session>> {
        let key = (entity_id.to_string(), client_id.to_string());
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(existing) = sessions.get(&key) {
            if !existing.is_closed() {
                log::debug!(
                    "[SessionManager] Reusing open session {} / {}",
                    entity_id,
                    client_id
                );
                return Ok(Arc::clone(existing));
            }
        }
        let session = Arc::new(Session::open(
            entity_id,
            client_id,
            schema,
            transport,
            &self.config,
        )?);
        sessions.insert(key, Arc::clone(&session));
        Ok(session)
    }

    /// Look up a live session.
    pub fn session(&self, entity_id: &str, client_id: &str) -> Option<Arc<Session>> {
        let key = (entity_id.to_string(), client_id.to_string());
        self.sessions
            .lock()
            .unwrap()
            .get(&key)
            .filter(|s| !s.is_closed())
            .cloned()
    }

    /// Close and forget a session. A no-op for unknown pairs, and safe to
    /// call repeatedly.
    pub fn close_session(&self, entity_id: &str, client_id: &str) {
        let key = (entity_id.to_string(), client_id.to_string());
        if let Some(session) = self.sessions.lock().unwrap().remove(&key) {
            session.close();
        }
    }

    /// Pump every live session with one clock reading.
    pub fn pump_all(&self, now_ms: i64) {
        let sessions: Vec<Arc<Session>> =
            self.sessions.lock().unwrap().values().cloned().collect();
        for session in sessions {
            if let Err(e) = session.pump(now_ms) {
                log::warn!(
                    "[SessionManager] Pump failed for {}: {}",
                    session.entity_id(),
                    e
                );
            }
        }
    }

    /// Close every session, e.g. on application shutdown.
    pub fn close_all(&self) {
        for (_, session) in self.sessions.lock().unwrap().drain() {
            session.close();
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| !s.is_closed())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.len())
            .finish()
    }
}
