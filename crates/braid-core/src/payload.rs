//! Payload and envelope model
//!
//! A [`Payload`] is the unit handed to a subclient for transmission. Its pid
//! field carries a unique message-id for application traffic and the
//! session-id for session segments. The [`Envelope`] wraps a payload with
//! the delivery metadata that crosses the overlay.

use serde::{Deserialize, Serialize};

use crate::types::Pid;

// ----------------------------------------------------------------------------
// Payload
// ----------------------------------------------------------------------------

/// Payload type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    /// Opaque application bytes.
    Binary,
    /// UTF-8 text.
    Text,
    /// Receipt for a previously received payload; carries no data.
    Ack,
}

/// The unit of transmission over a subclient path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub kind: PayloadKind,
    /// Message-id for application payloads, session-id for session segments.
    pub pid: Pid,
    pub data: Vec<u8>,
    /// Session segments are routed to the session layer instead of the
    /// application message stream.
    pub is_session: bool,
}

impl Payload {
    /// Binary payload with a fresh message-id.
    pub fn binary(data: Vec<u8>) -> Self {
        Self {
            kind: PayloadKind::Binary,
            pid: Pid::random(),
            data,
            is_session: false,
        }
    }

    /// Binary reply carrying the originating request's message-id.
    pub fn binary_reply(data: Vec<u8>, pid: Pid) -> Self {
        Self {
            kind: PayloadKind::Binary,
            pid,
            data,
            is_session: false,
        }
    }

    /// Text payload with a fresh message-id.
    pub fn text(text: &str) -> Self {
        Self {
            kind: PayloadKind::Text,
            pid: Pid::random(),
            data: text.as_bytes().to_vec(),
            is_session: false,
        }
    }

    /// Text reply carrying the originating request's message-id.
    pub fn text_reply(text: &str, pid: Pid) -> Self {
        Self {
            kind: PayloadKind::Text,
            pid,
            data: text.as_bytes().to_vec(),
            is_session: false,
        }
    }

    /// Acknowledgement for the request identified by `pid`.
    pub fn ack(pid: Pid) -> Self {
        Self {
            kind: PayloadKind::Ack,
            pid,
            data: Vec::new(),
            is_session: false,
        }
    }

    /// Session segment: a framed buffer whose pid field carries the
    /// session-id rather than a message-id.
    pub fn session(session_id: Pid, frame: Vec<u8>) -> Self {
        Self {
            kind: PayloadKind::Binary,
            pid: session_id,
            data: frame,
            is_session: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// What actually crosses the overlay between two tagged addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Tagged source address of the sending subclient.
    pub src: String,
    pub payload: Payload,
    /// Whether the payload was end-to-end encrypted by the subclient layer.
    pub encrypted: bool,
    /// Hint for how long relays may hold the message for an offline
    /// destination; zero means the overlay default.
    pub max_holding_secs: u32,
}
