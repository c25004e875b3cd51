//! Reliable ordered byte stream striped across subclient paths
//!
//! A session connects two logical addresses over every usable
//! (local tag, remote tag) edge between them. Writes are chunked to the MTU
//! and rotated across edges; reads reassemble in sequence order no matter
//! which path carried each segment. Redundancy across paths is the
//! reliability mechanism; there is no per-segment retransmission here.
//!
//! The session does not know how bytes move: it writes through a
//! [`SegmentTransport`] that the client implements per (local, remote) tag
//! pair, and is fed inbound segments via [`Session::receive_segment`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::address::Address;
use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::types::Pid;

// ----------------------------------------------------------------------------
// Segment Transport
// ----------------------------------------------------------------------------

/// Outbound edge writer supplied by the client. One call delivers one framed
/// segment over the given (local tag, remote tag) edge; a non-zero
/// `write_timeout` bounds the underlying subclient write.
#[async_trait]
pub trait SegmentTransport: Send + Sync + 'static {
    async fn send_segment(
        &self,
        local_tag: &str,
        remote_tag: &str,
        frame: Vec<u8>,
        write_timeout: Duration,
    ) -> Result<(), SessionError>;
}

// ----------------------------------------------------------------------------
// Segment Framing
// ----------------------------------------------------------------------------

const KIND_HANDSHAKE: u8 = 1;
const KIND_HANDSHAKE_ACK: u8 = 2;
const KIND_DATA: u8 = 3;
const KIND_FIN: u8 = 4;

/// One framed unit on the wire inside a session payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    /// Active open; advertises the sender's subclient tags.
    Handshake { tags: Vec<String> },
    /// Passive-open answer; advertises the sender's subclient tags.
    HandshakeAck { tags: Vec<String> },
    /// Ordered stream data.
    Data { seq: u32, data: Vec<u8> },
    /// Terminal marker.
    Fin,
}

impl Segment {
    pub(crate) fn encode(&self) -> Vec<u8> {
        match self {
            Segment::Handshake { tags } => encode_tags(KIND_HANDSHAKE, tags),
            Segment::HandshakeAck { tags } => encode_tags(KIND_HANDSHAKE_ACK, tags),
            Segment::Data { seq, data } => {
                let mut buf = Vec::with_capacity(5 + data.len());
                buf.push(KIND_DATA);
                buf.extend_from_slice(&seq.to_be_bytes());
                buf.extend_from_slice(data);
                buf
            }
            Segment::Fin => vec![KIND_FIN],
        }
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self, SessionError> {
        let (&kind, rest) = buf.split_first().ok_or_else(|| malformed("empty segment"))?;
        match kind {
            KIND_HANDSHAKE => Ok(Segment::Handshake {
                tags: decode_tags(rest)?,
            }),
            KIND_HANDSHAKE_ACK => Ok(Segment::HandshakeAck {
                tags: decode_tags(rest)?,
            }),
            KIND_DATA => {
                if rest.len() < 4 {
                    return Err(malformed("truncated data segment"));
                }
                let seq = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
                Ok(Segment::Data {
                    seq,
                    data: rest[4..].to_vec(),
                })
            }
            KIND_FIN => Ok(Segment::Fin),
            other => Err(malformed(format!("unknown segment kind {other}"))),
        }
    }
}

fn encode_tags(kind: u8, tags: &[String]) -> Vec<u8> {
    let mut buf = vec![kind, tags.len() as u8];
    for tag in tags {
        buf.push(tag.len() as u8);
        buf.extend_from_slice(tag.as_bytes());
    }
    buf
}

fn decode_tags(buf: &[u8]) -> Result<Vec<String>, SessionError> {
    let (&count, mut rest) = buf
        .split_first()
        .ok_or_else(|| malformed("missing tag count"))?;
    let mut tags = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (&len, tail) = rest
            .split_first()
            .ok_or_else(|| malformed("missing tag length"))?;
        if tail.len() < len as usize {
            return Err(malformed("truncated tag"));
        }
        let (tag, tail) = tail.split_at(len as usize);
        tags.push(
            String::from_utf8(tag.to_vec()).map_err(|_| malformed("tag is not valid UTF-8"))?,
        );
        rest = tail;
    }
    Ok(tags)
}

fn malformed(reason: impl Into<String>) -> SessionError {
    SessionError::MalformedSegment {
        reason: reason.into(),
    }
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Establishing,
    Established,
    Closed,
}

struct State {
    phase: Phase,
    /// Peer tags, advertised by handshakes and refined lazily from the
    /// first segment observed on each path.
    remote_tags: Vec<String>,
    handshake_received: bool,
    next_send_seq: u32,
    edge_cursor: usize,
    next_recv_seq: u32,
    pending: BTreeMap<u32, Vec<u8>>,
}

struct SessionInner {
    local_addr: Address,
    remote_addr: String,
    id: Pid,
    config: SessionConfig,
    transport: Arc<dyn SegmentTransport>,
    local_tags: Vec<String>,
    state: Mutex<State>,
    established: watch::Sender<bool>,
    closed: watch::Sender<bool>,
    incoming_tx: mpsc::Sender<Vec<u8>>,
    incoming_rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
}

/// A reliable ordered byte stream between two logical addresses. Cheap to
/// clone; `close` is idempotent and every clone observes it.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Build a session over the given sorted local tags. Until the peer
    /// advertises its own tag set, remote tags mirror the local ones (the
    /// overlay's path-selection convention).
    pub fn new(
        local_addr: Address,
        remote_addr: impl Into<String>,
        id: Pid,
        local_tags: Vec<String>,
        transport: Arc<dyn SegmentTransport>,
        config: SessionConfig,
    ) -> Self {
        let (established, _) = watch::channel(false);
        let (closed, _) = watch::channel(false);
        let (incoming_tx, incoming_rx) = mpsc::channel(config.recv_window.max(1));
        Self {
            inner: Arc::new(SessionInner {
                local_addr,
                remote_addr: remote_addr.into(),
                id,
                config,
                transport,
                state: Mutex::new(State {
                    phase: Phase::Establishing,
                    remote_tags: local_tags.clone(),
                    handshake_received: false,
                    next_send_seq: 0,
                    edge_cursor: 0,
                    next_recv_seq: 0,
                    pending: BTreeMap::new(),
                }),
                local_tags,
                established,
                closed,
                incoming_tx,
                incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            }),
        }
    }

    /// Session identifier, chosen by the dialing side.
    pub fn id(&self) -> Pid {
        self.inner.id
    }

    pub fn local_addr(&self) -> &Address {
        &self.inner.local_addr
    }

    /// The peer's logical (untagged) address.
    pub fn remote_addr(&self) -> &str {
        &self.inner.remote_addr
    }

    pub fn is_established(&self) -> bool {
        *self.inner.established.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().unwrap().phase == Phase::Closed
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Active open: announce this side's tags over every path, then wait for
    /// the peer's answer.
    pub async fn dial(&self) -> Result<(), SessionError> {
        let frame = Segment::Handshake {
            tags: self.inner.local_tags.clone(),
        }
        .encode();

        let mut sent = 0usize;
        let mut last_err = None;
        for tag in &self.inner.local_tags {
            match self
                .inner
                .transport
                .send_segment(tag, tag, frame.clone(), self.inner.config.write_timeout)
                .await
            {
                Ok(()) => sent += 1,
                Err(e) => {
                    debug!(session_id = %self.inner.id, tag = %tag, error = %e,
                        "handshake send failed on path");
                    last_err = Some(e);
                }
            }
        }
        if sent == 0 {
            return Err(last_err.unwrap_or(SessionError::Closed));
        }

        let mut established = self.inner.established.subscribe();
        let wait = established.wait_for(|ready| *ready);
        let result = match tokio::time::timeout(self.inner.config.dial_timeout, wait).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => Err(SessionError::DialTimeout(self.inner.config.dial_timeout)),
        };
        result
    }

    /// Passive open: answer the recorded handshake with this side's tags.
    pub async fn accept(&self) -> Result<(), SessionError> {
        let remote_tags = {
            let mut state = self.inner.state.lock().unwrap();
            if state.phase == Phase::Closed {
                return Err(SessionError::Closed);
            }
            if !state.handshake_received {
                return Err(SessionError::NotEstablished);
            }
            state.phase = Phase::Established;
            state.remote_tags.clone()
        };
        let _ = self.inner.established.send(true);

        let frame = Segment::HandshakeAck {
            tags: self.inner.local_tags.clone(),
        }
        .encode();
        for local in &self.inner.local_tags {
            for remote in &remote_tags {
                if let Err(e) = self
                    .inner
                    .transport
                    .send_segment(local, remote, frame.clone(), self.inner.config.write_timeout)
                    .await
                {
                    debug!(session_id = %self.inner.id, local = %local, remote = %remote,
                        error = %e, "handshake ack failed on edge");
                }
            }
        }
        Ok(())
    }

    /// Close both directions. Idempotent; the peer learns of the close from
    /// a best-effort terminal marker on every edge.
    pub async fn close(&self) -> Result<(), SessionError> {
        let edges = {
            let mut state = self.inner.state.lock().unwrap();
            if state.phase == Phase::Closed {
                return Ok(());
            }
            state.phase = Phase::Closed;
            edge_list(&self.inner.local_tags, &state.remote_tags)
        };
        let _ = self.inner.closed.send(true);

        let frame = Segment::Fin.encode();
        for (local, remote) in edges {
            if let Err(e) = self
                .inner
                .transport
                .send_segment(&local, &remote, frame.clone(), self.inner.config.write_timeout)
                .await
            {
                debug!(session_id = %self.inner.id, local = %local, remote = %remote,
                    error = %e, "close marker failed on edge");
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Byte I/O
    // ------------------------------------------------------------------

    /// Write a buffer to the peer. Chunked to the MTU; consecutive chunks
    /// rotate across (local, remote) edges.
    pub async fn send(&self, data: &[u8]) -> Result<(), SessionError> {
        let mtu = self.inner.config.mtu.max(1);
        for chunk in data.chunks(mtu) {
            let (seq, local, remote) = {
                let mut state = self.inner.state.lock().unwrap();
                match state.phase {
                    Phase::Closed => return Err(SessionError::Closed),
                    Phase::Establishing => return Err(SessionError::NotEstablished),
                    Phase::Established => {}
                }
                let seq = state.next_send_seq;
                state.next_send_seq += 1;
                let (local, remote) = pick_edge(
                    &self.inner.local_tags,
                    &state.remote_tags,
                    state.edge_cursor,
                );
                state.edge_cursor = state.edge_cursor.wrapping_add(1);
                (seq, local, remote)
            };

            let frame = Segment::Data {
                seq,
                data: chunk.to_vec(),
            }
            .encode();
            self.inner
                .transport
                .send_segment(&local, &remote, frame, self.inner.config.write_timeout)
                .await?;
        }
        Ok(())
    }

    /// Read the next in-order chunk of stream data. Returns
    /// [`SessionError::Closed`] once the session is terminal and drained.
    pub async fn recv(&self) -> Result<Vec<u8>, SessionError> {
        let mut rx = self.inner.incoming_rx.lock().await;
        let mut closed = self.inner.closed.subscribe();
        loop {
            match rx.try_recv() {
                Ok(chunk) => return Ok(chunk),
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => return Err(SessionError::Closed),
            }
            if *closed.borrow() {
                return Err(SessionError::Closed);
            }
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(chunk) => return Ok(chunk),
                    None => return Err(SessionError::Closed),
                },
                _ = closed.changed() => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound Segments
    // ------------------------------------------------------------------

    /// Feed one inbound segment observed on (`local_tag`, `remote_tag`).
    /// Must be called in per-path FIFO order; returns the benign
    /// [`SessionError::Closed`] once the session is terminal.
    pub async fn receive_segment(
        &self,
        local_tag: &str,
        remote_tag: &str,
        data: &[u8],
    ) -> Result<(), SessionError> {
        let segment = Segment::decode(data)?;

        let mut ready = Vec::new();
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.phase == Phase::Closed {
                return Err(SessionError::Closed);
            }
            learn_tag(&mut state.remote_tags, remote_tag);

            match segment {
                Segment::Handshake { tags } => {
                    state.remote_tags = merged_tags(tags, remote_tag);
                    state.handshake_received = true;
                }
                Segment::HandshakeAck { tags } => {
                    state.remote_tags = merged_tags(tags, remote_tag);
                    if state.phase == Phase::Establishing {
                        state.phase = Phase::Established;
                        let _ = self.inner.established.send(true);
                    }
                }
                Segment::Data { seq, data } => {
                    if seq >= state.next_recv_seq && !state.pending.contains_key(&seq) {
                        let in_window = (seq - state.next_recv_seq) as usize
                            <= self.inner.config.recv_window;
                        if in_window {
                            state.pending.insert(seq, data);
                        } else {
                            debug!(session_id = %self.inner.id, seq, local_tag,
                                "segment beyond receive window, dropping");
                        }
                    }
                    while let Some(chunk) = {
                        let next = state.next_recv_seq;
                        state.pending.remove(&next)
                    } {
                        ready.push(chunk);
                        state.next_recv_seq += 1;
                    }
                }
                Segment::Fin => {
                    state.phase = Phase::Closed;
                    let _ = self.inner.closed.send(true);
                }
            }
        }

        for chunk in ready {
            if self.inner.incoming_tx.send(chunk).await.is_err() {
                return Err(SessionError::Closed);
            }
        }
        Ok(())
    }

    /// Whether an unanswered handshake is recorded, i.e. `accept` would
    /// proceed.
    pub fn handshake_pending(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        state.handshake_received && state.phase == Phase::Establishing
    }
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("local", &self.inner.local_addr)
            .field("remote", &self.inner.remote_addr)
            .finish()
    }
}

fn learn_tag(tags: &mut Vec<String>, tag: &str) {
    if !tags.iter().any(|t| t == tag) {
        tags.push(tag.to_string());
        tags.sort();
    }
}

fn merged_tags(advertised: Vec<String>, observed: &str) -> Vec<String> {
    let mut tags = advertised;
    if !tags.iter().any(|t| t == observed) {
        tags.push(observed.to_string());
    }
    tags.sort();
    tags.dedup();
    tags
}

fn edge_list(local: &[String], remote: &[String]) -> Vec<(String, String)> {
    let mut edges = Vec::with_capacity(local.len() * remote.len());
    for l in local {
        for r in remote {
            edges.push((l.clone(), r.clone()));
        }
    }
    edges
}

fn pick_edge(local: &[String], remote: &[String], cursor: usize) -> (String, String) {
    let l = &local[cursor % local.len()];
    let r = &remote[(cursor / local.len()) % remote.len()];
    (l.clone(), r.clone())
}
