//! Session table, demultiplexing, and the accept queue
//!
//! Sessions are keyed by (peer logical address, session-id). Inbound
//! segments either land in an existing session or create one on the spot,
//! which is then announced on the bounded accept queue. The table lock is
//! never held across session-layer calls.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::warn;

use braid_core::{
    add_tag_prefix, strip_tag, tag_index, Payload, Pid, SegmentTransport, Session, SessionConfig,
    SessionError, SessionOverrides,
};

use crate::errors::{ClientError, ClientResult};
use crate::multiclient::ClientInner;

/// Key of one session in the client's table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SessionKey {
    pub(crate) remote: String,
    pub(crate) id: Pid,
}

// ----------------------------------------------------------------------------
// Segment Transport
// ----------------------------------------------------------------------------

/// Writes session segments through the owning client's subclients. Holds
/// the client weakly: a live session must not keep a closed client alive.
struct SessionSender {
    client: Weak<ClientInner>,
    remote_addr: String,
    session_id: Pid,
}

#[async_trait]
impl SegmentTransport for SessionSender {
    async fn send_segment(
        &self,
        local_tag: &str,
        remote_tag: &str,
        frame: Vec<u8>,
        write_timeout: Duration,
    ) -> Result<(), SessionError> {
        let client = self.client.upgrade().ok_or(SessionError::Closed)?;
        let index = tag_index(local_tag).ok_or_else(|| SessionError::UnknownTag {
            tag: local_tag.to_string(),
        })?;
        let subclient = client
            .subclients
            .get(&index)
            .ok_or_else(|| SessionError::UnknownTag {
                tag: local_tag.to_string(),
            })?;

        // The outbound edge is unicast: one segment, one subclient, one
        // tagged destination. Striping across edges is the session's call.
        let payload = Payload::session(self.session_id, frame);
        let dest = add_tag_prefix(&self.remote_addr, remote_tag);
        if !write_timeout.is_zero() {
            subclient.set_write_deadline(Some(Instant::now() + write_timeout));
        }
        let result = subclient.send(&[dest], payload, true, 0).await;
        if !write_timeout.is_zero() {
            subclient.set_write_deadline(None);
        }
        result.map_err(SessionError::from)
    }
}

// ----------------------------------------------------------------------------
// Session Manager
// ----------------------------------------------------------------------------

impl ClientInner {
    /// Sorted tags of the live subclients; the session stripes over these.
    fn local_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.subclients.values().map(|s| s.tag()).collect();
        tags.sort();
        tags
    }

    fn new_session(
        self: &Arc<Self>,
        remote_addr: &str,
        session_id: Pid,
        config: SessionConfig,
    ) -> Session {
        let transport = Arc::new(SessionSender {
            client: Arc::downgrade(self),
            remote_addr: remote_addr.to_string(),
            session_id,
        });
        Session::new(
            self.address().clone(),
            remote_addr,
            session_id,
            self.local_tags(),
            transport,
            config,
        )
    }

    /// Active open: fresh 8-byte session-id, caller overrides merged over
    /// the configured defaults, table insert, then the handshake.
    pub(crate) async fn dial_session(
        self: &Arc<Self>,
        remote_addr: &str,
        overrides: &SessionOverrides,
    ) -> ClientResult<Session> {
        let config = self.config.session.with_overrides(overrides);
        let session_id = Pid::random();
        let session = self.new_session(remote_addr, session_id, config);

        {
            let mut shared = self.shared.write().unwrap();
            if shared.closed {
                return Err(ClientError::Closed);
            }
            shared.sessions.insert(
                SessionKey {
                    remote: remote_addr.to_string(),
                    id: session_id,
                },
                session.clone(),
            );
        }

        session.dial().await?;
        Ok(session)
    }

    /// Route one inbound segment, creating and announcing the session on
    /// first contact. The table lock is released before the segment is fed.
    pub(crate) async fn handle_segment(
        self: &Arc<Self>,
        local_tag: &str,
        raw_src: &str,
        session_id: Pid,
        data: &[u8],
    ) -> Result<(), SessionError> {
        let (remote_addr, remote_tag) = strip_tag(raw_src);
        let key = SessionKey {
            remote: remote_addr.to_string(),
            id: session_id,
        };

        let (session, newly_observed) = {
            let mut shared = self.shared.write().unwrap();
            if shared.closed {
                return Err(SessionError::Closed);
            }
            match shared.sessions.get(&key) {
                Some(session) => (session.clone(), false),
                None => {
                    let session =
                        self.new_session(remote_addr, session_id, self.config.session.clone());
                    shared.sessions.insert(key, session.clone());
                    (session, true)
                }
            }
        };

        session.receive_segment(local_tag, remote_tag, data).await?;

        if newly_observed {
            match self.accept_tx.try_send(session) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Lossy by design: inbound announcements are best-effort
                    // and the peer may retry.
                    warn!(session_id = %session_id, "accept queue full, dropping inbound session");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        Ok(())
    }

    /// Pop the next announced session and complete its passive open.
    /// Returns the closed error once the client shuts down.
    pub(crate) async fn accept_session(&self) -> ClientResult<Session> {
        let mut shutdown = self.shutdown.subscribe();
        let mut queue = self.accept_rx.lock().await;
        loop {
            tokio::select! {
                _ = async { let _ = shutdown.wait_for(|closed| *closed).await; } => return Err(ClientError::Closed),
                maybe = queue.recv() => match maybe {
                    Some(session) => {
                        if let Err(e) = session.accept().await {
                            warn!(session_id = %session.id(), error = %e, "failed to accept session");
                            continue;
                        }
                        return Ok(session);
                    }
                    None => return Err(ClientError::Closed),
                },
            }
        }
    }
}
