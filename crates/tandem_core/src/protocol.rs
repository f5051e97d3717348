//! Binary wire protocol for room traffic.
//!
//! Every frame is a self-delimiting binary message:
//!
//! ```text
//! [entity_id: var_string][msg_type: var_uint][payload]
//! ```
//!
//! where `msg_type` selects the channel lane (sync, presence or control)
//! and sync payloads carry a further sub-type. Lengths are encoded as
//! variable-length integers (7 bits per byte, high bit = continuation), so
//! frames can be concatenated and split back apart without an outer
//! transport framing.

use crate::activity::ActivityRecord;
use crate::error::{Result, TandemError};

/// Message type: document sync (state vectors, diffs, incremental updates).
pub const MSG_SYNC: u32 = 0;
/// Message type: presence payloads (cursors, selections, typing flags).
pub const MSG_PRESENCE: u32 = 1;
/// Message type: room control (join/leave).
pub const MSG_CONTROL: u32 = 2;

/// Sync sub-type: "here is what I have seen" (a state vector).
pub const SYNC_STEP_1: u32 = 0;
/// Sync sub-type: "here is what you are missing" (a diff update).
pub const SYNC_STEP_2: u32 = 1;
/// Sync sub-type: an incremental update to apply.
pub const SYNC_UPDATE: u32 = 2;

/// A document synchronization message, exchanged within a room.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// Step 1 of the handshake: sender advertises its state vector.
    Step1 { state_vector: Vec<u8> },
    /// Step 2: responder sends the operations the other side is missing.
    Step2 { update: Vec<u8> },
    /// An incremental update broadcast after a local edit.
    Update { update: Vec<u8> },
}

/// One wire frame: an entity-scoped message on one of the three lanes.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Document sync traffic for an entity.
    Sync { entity_id: String, message: SyncMessage },
    /// Opaque presence payload (JSON-encoded, see [`crate::presence`]).
    Presence { entity_id: String, payload: Vec<u8> },
    /// Room membership control message.
    Control { entity_id: String, message: ControlMessage },
}

/// Room control messages, JSON-encoded on the wire.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// A client announces itself to the room.
    Join { client_id: String },
    /// A client leaves; peers drop its presence immediately.
    Leave { client_id: String },
    /// An activity record for live history views, applied in arrival order.
    Activity { record: ActivityRecord },
}

impl Frame {
    /// The entity this frame belongs to.
    pub fn entity_id(&self) -> &str {
        match self {
            Frame::Sync { entity_id, .. }
            | Frame::Presence { entity_id, .. }
            | Frame::Control { entity_id, .. } => entity_id,
        }
    }

    /// Encode the frame to its binary wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Frame::Sync { entity_id, message } => {
                write_var_string(&mut buf, entity_id);
                write_var_uint(&mut buf, MSG_SYNC);
                match message {
                    SyncMessage::Step1 { state_vector } => {
                        write_var_uint(&mut buf, SYNC_STEP_1);
                        write_var_byte_array(&mut buf, state_vector);
                    }
                    SyncMessage::Step2 { update } => {
                        write_var_uint(&mut buf, SYNC_STEP_2);
                        write_var_byte_array(&mut buf, update);
                    }
                    SyncMessage::Update { update } => {
                        write_var_uint(&mut buf, SYNC_UPDATE);
                        write_var_byte_array(&mut buf, update);
                    }
                }
            }
            Frame::Presence { entity_id, payload } => {
                write_var_string(&mut buf, entity_id);
                write_var_uint(&mut buf, MSG_PRESENCE);
                write_var_byte_array(&mut buf, payload);
            }
            Frame::Control { entity_id, message } => {
                write_var_string(&mut buf, entity_id);
                write_var_uint(&mut buf, MSG_CONTROL);
                // Control messages are rare; JSON keeps them debuggable.
                let json = serde_json::to_vec(message).unwrap_or_default();
                write_var_byte_array(&mut buf, &json);
            }
        }
        buf
    }

    /// Decode a single frame from the start of `data`, returning it together
    /// with the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Frame, usize)> {
        let mut pos = 0;
        let entity_id = read_var_string(data, &mut pos)?;
        let msg_type = read_var_uint(data, &mut pos)?;
        let frame = match msg_type {
            MSG_SYNC => {
                let sub_type = read_var_uint(data, &mut pos)?;
                let payload = read_var_byte_array(data, &mut pos)?;
                let message = match sub_type {
                    SYNC_STEP_1 => SyncMessage::Step1 { state_vector: payload },
                    SYNC_STEP_2 => SyncMessage::Step2 { update: payload },
                    SYNC_UPDATE => SyncMessage::Update { update: payload },
                    other => {
                        return Err(TandemError::Transport(format!(
                            "Unknown sync sub-type: {}",
                            other
                        )));
                    }
                };
                Frame::Sync { entity_id, message }
            }
            MSG_PRESENCE => {
                let payload = read_var_byte_array(data, &mut pos)?;
                Frame::Presence { entity_id, payload }
            }
            MSG_CONTROL => {
                let payload = read_var_byte_array(data, &mut pos)?;
                let message = serde_json::from_slice(&payload)?;
                Frame::Control { entity_id, message }
            }
            other => {
                return Err(TandemError::Transport(format!(
                    "Unknown message type: {}",
                    other
                )));
            }
        };
        Ok((frame, pos))
    }

    /// Decode all frames from a buffer of concatenated frames.
    pub fn decode_all(data: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let (frame, consumed) = Frame::decode(&data[pos..])?;
            frames.push(frame);
            pos += consumed;
        }
        Ok(frames)
    }
}

// ==================== Varint Encoding ====================

/// Write a variable-length unsigned integer (7 bits per byte, high bit set
/// while more bytes follow).
fn write_var_uint(buf: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

fn read_var_uint(data: &[u8], pos: &mut usize) -> Result<u32> {
    let mut value: u32 = 0;
    let mut shift = 0;
    loop {
        if *pos >= data.len() {
            return Err(TandemError::Transport(
                "Unexpected end of frame while reading varint".to_string(),
            ));
        }
        let byte = data[*pos];
        *pos += 1;
        value |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 32 {
            return Err(TandemError::Transport("Varint overflow".to_string()));
        }
    }
}

fn write_var_byte_array(buf: &mut Vec<u8>, data: &[u8]) {
    write_var_uint(buf, data.len() as u32);
    buf.extend_from_slice(data);
}

fn read_var_byte_array(data: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let len = read_var_uint(data, pos)? as usize;
    if *pos + len > data.len() {
        return Err(TandemError::Transport(format!(
            "Frame payload truncated: expected {} bytes, {} remain",
            len,
            data.len() - *pos
        )));
    }
    let bytes = data[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(bytes)
}

fn write_var_string(buf: &mut Vec<u8>, value: &str) {
    write_var_byte_array(buf, value.as_bytes());
}

fn read_var_string(data: &[u8], pos: &mut usize) -> Result<String> {
    let bytes = read_var_byte_array(data, pos)?;
    String::from_utf8(bytes)
        .map_err(|_| TandemError::Transport("Frame entity id is not valid UTF-8".to_string()))
}
