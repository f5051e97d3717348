//! Transport abstraction for room traffic.
//!
//! A transport is one persistent duplex connection per client, multiplexing
//! frames for every room that client participates in (the frame envelope
//! carries the entity id). Document sync, presence and control traffic all
//! share it.
//!
//! The engine polls rather than blocks: [`Transport::poll`] drains whatever
//! has arrived, and `Session::pump` calls it on the host's cadence. A
//! WebSocket implementation lives in the client shell; this crate ships the
//! in-process [`relay`] used by tests and embedded multi-pane views.

pub mod relay;

use crate::error::Result;
use crate::protocol::Frame;

/// A duplex, connection-oriented frame channel.
pub trait Transport: Send + Sync {
    /// Send one frame. Fails with [`crate::TandemError::Transport`] while
    /// disconnected; the session buffers and retries on reconnect.
    fn send(&self, frame: &Frame) -> Result<()>;

    /// Drain every frame received since the last poll. Returns nothing
    /// while disconnected.
    fn poll(&self) -> Vec<Frame>;

    /// Current link state.
    fn is_connected(&self) -> bool;
}
