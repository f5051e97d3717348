//! In-process relay: a broadcast hub standing in for the relay server.
//!
//! Every transport connected to a [`RelayHub`] sees every frame sent by
//! every other transport (rooms are filtered by entity id at the session
//! layer, exactly as they are over a real socket). Fan-out uses a
//! `tokio::sync::broadcast` channel drained with `try_recv`, so the relay
//! works with or without an async runtime.
//!
//! A disconnected transport stops sending and receiving; frames broadcast
//! in the meantime are simply missed, which is what forces the session to
//! re-run the state-vector handshake on reconnect.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;
use ts_rs::TS;

use super::Transport;
use crate::error::{Result, TandemError};
use crate::protocol::{ControlMessage, Frame};

/// Frames buffered per subscriber before the oldest are dropped as lagged.
const RELAY_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Envelope {
    source: u64,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct HubShared {
    tx: broadcast::Sender<Envelope>,
    /// entity id -> client ids that joined it, learned from control frames.
    rooms: Mutex<HashMap<String, HashSet<String>>>,
}

/// Occupancy counters for the relay, for diagnostics views.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RelayStats {
    pub num_rooms: usize,
    pub total_clients: usize,
    pub rooms: Vec<RoomStat>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RoomStat {
    pub entity_id: String,
    pub clients: usize,
}

/// The in-process relay. Cheap to clone handles out of via [`RelayHub::connect`].
#[derive(Debug)]
pub struct RelayHub {
    shared: Arc<HubShared>,
    next_id: AtomicU64,
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayHub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(RELAY_CAPACITY);
        Self {
            shared: Arc::new(HubShared {
                tx,
                rooms: Mutex::new(HashMap::new()),
            }),
            next_id: AtomicU64::new(0),
        }
    }

    /// Open a new connection to the hub.
    pub fn connect(&self) -> LocalTransport {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        LocalTransport {
            id,
            shared: Arc::clone(&self.shared),
            rx: Mutex::new(self.shared.tx.subscribe()),
            connected: AtomicBool::new(true),
        }
    }

    /// Current room occupancy, derived from join/leave control frames.
    pub fn stats(&self) -> RelayStats {
        let rooms = self.shared.rooms.lock().unwrap();
        let mut per_room: Vec<RoomStat> = rooms
            .iter()
            .map(|(entity_id, clients)| RoomStat {
                entity_id: entity_id.clone(),
                clients: clients.len(),
            })
            .collect();
        per_room.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        RelayStats {
            num_rooms: per_room.len(),
            total_clients: per_room.iter().map(|r| r.clients).sum(),
            rooms: per_room,
        }
    }
}

/// One client's connection to a [`RelayHub`].
#[derive(Debug)]
pub struct LocalTransport {
    id: u64,
    shared: Arc<HubShared>,
    rx: Mutex<broadcast::Receiver<Envelope>>,
    connected: AtomicBool,
}

impl LocalTransport {
    /// Sever the link. Sends fail and polls return nothing until
    /// [`LocalTransport::reconnect`].
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        log::debug!("[Relay] Transport {} disconnected", self.id);
    }

    /// Restore the link with a fresh subscription. Frames broadcast while
    /// disconnected stay missed; the session's reconnect handshake fills
    /// the gap.
    pub fn reconnect(&self) {
        *self.rx.lock().unwrap() = self.shared.tx.subscribe();
        self.connected.store(true, Ordering::SeqCst);
        log::debug!("[Relay] Transport {} reconnected", self.id);
    }

    fn track_rooms(&self, frame: &Frame) {
        if let Frame::Control { entity_id, message } = frame {
            let mut rooms = self.shared.rooms.lock().unwrap();
            match message {
                ControlMessage::Join { client_id } => {
                    rooms
                        .entry(entity_id.clone())
                        .or_default()
                        .insert(client_id.clone());
                }
                ControlMessage::Leave { client_id } => {
                    if let Some(clients) = rooms.get_mut(entity_id) {
                        clients.remove(client_id);
                        if clients.is_empty() {
                            rooms.remove(entity_id);
                        }
                    }
                }
                ControlMessage::Activity { .. } => {}
            }
        }
    }
}

impl Transport for LocalTransport {
    fn send(&self, frame: &Frame) -> Result<()> {
        if !self.is_connected() {
            return Err(TandemError::Transport(
                "Transport is disconnected".to_string(),
            ));
        }
        self.track_rooms(frame);
        // Send only fails with zero subscribers; our own receiver keeps the
        // channel alive, so a no-peer send is just a broadcast nobody reads.
        let _ = self.shared.tx.send(Envelope {
            source: self.id,
            bytes: frame.encode(),
        });
        Ok(())
    }

    fn poll(&self) -> Vec<Frame> {
        if !self.is_connected() {
            return Vec::new();
        }
        let mut rx = self.rx.lock().unwrap();
        let mut frames = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(envelope) => {
                    if envelope.source == self.id {
                        continue;
                    }
                    match Frame::decode(&envelope.bytes) {
                        Ok((frame, _)) => frames.push(frame),
                        Err(e) => {
                            log::debug!("[Relay] Dropping undecodable frame: {}", e);
                        }
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    log::warn!(
                        "[Relay] Transport {} lagged, skipped {} frames",
                        self.id,
                        skipped
                    );
                }
                Err(_) => break,
            }
        }
        frames
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SyncMessage;

    fn update_frame(entity: &str, data: &[u8]) -> Frame {
        Frame::Sync {
            entity_id: entity.to_string(),
            message: SyncMessage::Update {
                update: data.to_vec(),
            },
        }
    }

    #[test]
    fn test_frames_fan_out_to_peers_not_sender() {
        let hub = RelayHub::new();
        let a = hub.connect();
        let b = hub.connect();

        a.send(&update_frame("note-1", &[1, 2, 3])).unwrap();

        assert_eq!(b.poll(), vec![update_frame("note-1", &[1, 2, 3])]);
        assert!(a.poll().is_empty());
    }

    #[test]
    fn test_send_while_disconnected_fails() {
        let hub = RelayHub::new();
        let a = hub.connect();
        a.disconnect();

        let err = a.send(&update_frame("note-1", &[1])).unwrap_err();
        assert!(matches!(err, TandemError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_disconnected_transport_misses_broadcasts() {
        let hub = RelayHub::new();
        let a = hub.connect();
        let b = hub.connect();

        b.disconnect();
        a.send(&update_frame("note-1", &[7])).unwrap();
        assert!(b.poll().is_empty());

        b.reconnect();
        // The missed frame stays missed; only new traffic arrives.
        assert!(b.poll().is_empty());
        a.send(&update_frame("note-1", &[8])).unwrap();
        assert_eq!(b.poll(), vec![update_frame("note-1", &[8])]);
    }

    #[test]
    fn test_stats_track_join_and_leave() {
        let hub = RelayHub::new();
        let a = hub.connect();
        let b = hub.connect();

        let join = |client: &str| Frame::Control {
            entity_id: "note-1".to_string(),
            message: ControlMessage::Join {
                client_id: client.to_string(),
            },
        };
        a.send(&join("client-a")).unwrap();
        b.send(&join("client-b")).unwrap();

        let stats = hub.stats();
        assert_eq!(stats.num_rooms, 1);
        assert_eq!(stats.total_clients, 2);
        assert_eq!(stats.rooms[0].entity_id, "note-1");

        b.send(&Frame::Control {
            entity_id: "note-1".to_string(),
            message: ControlMessage::Leave {
                client_id: "client-b".to_string(),
            },
        })
        .unwrap();
        a.send(&Frame::Control {
            entity_id: "note-1".to_string(),
            message: ControlMessage::Leave {
                client_id: "client-a".to_string(),
            },
        })
        .unwrap();
        assert_eq!(hub.stats().num_rooms, 0);
    }

    #[test]
    fn test_multiplexes_entities_on_one_connection() {
        let hub = RelayHub::new();
        let a = hub.connect();
        let b = hub.connect();

        a.send(&update_frame("note-1", &[1])).unwrap();
        a.send(&update_frame("board-2", &[2])).unwrap();

        let frames = b.poll();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].entity_id(), "note-1");
        assert_eq!(frames[1].entity_id(), "board-2");
    }
}
