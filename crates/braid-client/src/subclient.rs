//! Single-path subclient handle
//!
//! One subclient owns one overlay path under a tagged address. A pump task
//! drains the path's inbound envelopes: payloads whose pid matches a pending
//! request resolve that request's one-shot reply channel; everything else
//! becomes a [`Message`] on the subclient's inbound stream for the fan-in
//! router. Orphaned acknowledgements are dropped here.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::debug;

use braid_core::{
    add_tag, Envelope, Message, OverlayPath, PathSender, Payload, PayloadKind, Pid, TransportError,
};

/// One-shot reply channels keyed by the pid of an outstanding request.
pub(crate) type ResponseChannels = Arc<DashMap<Pid, oneshot::Sender<Message>>>;

/// Handle to one path of a logical identity.
pub(crate) struct Subclient {
    index: i32,
    address: String,
    sender: Arc<dyn PathSender>,
    connected: watch::Receiver<bool>,
    write_deadline: Mutex<Option<Instant>>,
    pub(crate) response_channels: ResponseChannels,
    inbound: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl Subclient {
    /// Wrap an open overlay path and start its inbound pump.
    pub(crate) fn start(index: i32, address: String, path: OverlayPath, chan_len: usize) -> Self {
        let OverlayPath {
            sender,
            inbound: mut envelopes,
            connected,
        } = path;

        let response_channels: ResponseChannels = Arc::new(DashMap::new());
        let (messages_tx, messages_rx) = mpsc::channel(chan_len.max(1));

        let pump_responses = response_channels.clone();
        tokio::spawn(async move {
            while let Some(envelope) = envelopes.recv().await {
                if let Some(message) = route_envelope(envelope, &pump_responses) {
                    if messages_tx.send(message).await.is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            index,
            address,
            sender,
            connected,
            write_deadline: Mutex::new(None),
            response_channels,
            inbound: Mutex::new(Some(messages_rx)),
        }
    }

    /// The tag component of this path's address (empty for the original).
    pub(crate) fn tag(&self) -> String {
        add_tag("", self.index)
    }

    /// Take the inbound message stream. The fan-in router calls this once.
    pub(crate) fn take_inbound(&self) -> Option<mpsc::Receiver<Message>> {
        self.inbound.lock().unwrap().take()
    }

    /// Resolves once the path has become usable.
    pub(crate) async fn wait_connect(&self) {
        let mut connected = self.connected.clone();
        let _ = connected.wait_for(|ready| *ready).await;
    }

    /// Submit a payload toward each destination, honoring the current write
    /// deadline when one is set.
    pub(crate) async fn send(
        &self,
        dests: &[String],
        payload: Payload,
        encrypted: bool,
        max_holding_secs: u32,
    ) -> Result<(), TransportError> {
        let envelope = Envelope {
            src: self.address.clone(),
            payload,
            encrypted,
            max_holding_secs,
        };
        let deadline = *self.write_deadline.lock().unwrap();
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.sender.send(dests, envelope))
                .await
                .map_err(|_| TransportError::DeadlineExceeded)?,
            None => self.sender.send(dests, envelope).await,
        }
    }

    /// Set or clear the deadline applied to subsequent writes.
    pub(crate) fn set_write_deadline(&self, deadline: Option<Instant>) {
        *self.write_deadline.lock().unwrap() = deadline;
    }

    /// Tear the path down and fail any outstanding requests on it.
    pub(crate) async fn close(&self) {
        self.sender.close().await;
        self.response_channels.clear();
    }
}

/// Decide where one inbound envelope goes. Returns a message for the fan-in
/// router, or `None` when the envelope resolved a pending request or was an
/// orphaned acknowledgement.
fn route_envelope(envelope: Envelope, responses: &ResponseChannels) -> Option<Message> {
    let message = Message::from_envelope(envelope);
    if !message.is_session {
        if let Some((pid, reply_tx)) = responses.remove(&message.pid) {
            if reply_tx.send(message).is_err() {
                debug!(message_id = %pid, "response arrived after requester gave up");
            }
            return None;
        }
        if message.kind == PayloadKind::Ack {
            debug!(message_id = %message.pid, "acknowledgement without pending request");
            return None;
        }
    }
    Some(message)
}
