//! Application message model
//!
//! Inbound payloads surface to the application as [`Message`] values. The
//! fan-in router attaches a [`ReplyHandle`] before publication so handlers
//! can answer without holding a reference to the client itself.

use core::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::errors::TransportError;
use crate::payload::{Envelope, Payload, PayloadKind};
use crate::types::Pid;

// ----------------------------------------------------------------------------
// Reply Sink
// ----------------------------------------------------------------------------

/// Outbound side used by reply handles. Implemented by the multi-path
/// client's fan-out sender.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Broadcast a reply payload to a single logical destination.
    async fn send_reply(
        &self,
        dest: &str,
        payload: Payload,
        encrypted: bool,
    ) -> Result<(), TransportError>;
}

// ----------------------------------------------------------------------------
// Reply Handle
// ----------------------------------------------------------------------------

/// Captures everything needed to answer a message: the untagged source, the
/// originating pid, and the request's encryption flag. Holds the sink weakly
/// so an outstanding handle never keeps a closed client alive.
#[derive(Clone)]
pub struct ReplyHandle {
    sink: Weak<dyn ReplySink>,
    dest: String,
    pid: Pid,
    encrypted: bool,
}

impl ReplyHandle {
    pub fn new(sink: &Arc<dyn ReplySink>, dest: String, pid: Pid, encrypted: bool) -> Self {
        Self {
            sink: Arc::downgrade(sink),
            dest,
            pid,
            encrypted,
        }
    }

    async fn send(&self, payload: Payload) -> Result<(), TransportError> {
        let sink = self.sink.upgrade().ok_or(TransportError::Closed)?;
        sink.send_reply(&self.dest, payload, self.encrypted).await
    }
}

impl fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyHandle")
            .field("dest", &self.dest)
            .field("pid", &self.pid)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// An inbound message as surfaced to the application.
#[derive(Debug)]
pub struct Message {
    /// Logical source address. Untagged by the time the application sees it.
    pub src: String,
    pub data: Vec<u8>,
    pub kind: PayloadKind,
    pub encrypted: bool,
    /// Message-id for application messages, session-id for session segments.
    pub pid: Pid,
    /// Set for session segments, which never reach the application stream.
    pub is_session: bool,
    reply: Option<ReplyHandle>,
}

impl Message {
    /// Build a message from an envelope drained off a subclient path.
    pub fn from_envelope(envelope: Envelope) -> Self {
        Self {
            src: envelope.src,
            data: envelope.payload.data,
            kind: envelope.payload.kind,
            encrypted: envelope.encrypted,
            pid: envelope.payload.pid,
            is_session: envelope.payload.is_session,
            reply: None,
        }
    }

    /// Attach the reply handle. Called by the fan-in router before the
    /// message is published.
    pub fn attach_reply(&mut self, handle: ReplyHandle) {
        self.reply = Some(handle);
    }

    /// Answer this message. `None` sends a bare acknowledgement, `Some`
    /// sends a binary reply; both echo the originating pid and preserve the
    /// request's encryption flag.
    pub async fn reply(&self, response: Option<&[u8]>) -> Result<(), TransportError> {
        let handle = self.reply.as_ref().ok_or(TransportError::Closed)?;
        let payload = match response {
            None => Payload::ack(self.pid),
            Some(data) => Payload::binary_reply(data.to_vec(), self.pid),
        };
        handle.send(payload).await
    }

    /// Answer with a text payload echoing the originating pid.
    pub async fn reply_text(&self, text: &str) -> Result<(), TransportError> {
        let handle = self.reply.as_ref().ok_or(TransportError::Closed)?;
        handle.send(Payload::text_reply(text, self.pid)).await
    }

    /// The message data as UTF-8 text, when it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        core::str::from_utf8(&self.data).ok()
    }
}
