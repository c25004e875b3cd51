//! The multi-path client
//!
//! A [`MultiClient`] registers one logical identity under N tagged
//! subclient addresses and fans application traffic out across all of them.
//! Inbound traffic from every path is merged by the fan-in router
//! (`router`), deduplicated, and surfaced exactly once; session segments
//! are demultiplexed into reliable sessions (`sessions`).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use braid_core::{
    add_tag, make_address, strip_tag, Account, Address, ClientConfig, DedupCache, Message,
    OverlayNetwork, Payload, Pid, ReplySink, Session, SessionOverrides, TransportError,
};

use crate::errors::{ClientError, ClientResult};
use crate::router;
use crate::sessions::SessionKey;
use crate::subclient::Subclient;

/// Capacity of the accept queue for newly observed inbound sessions.
pub(crate) const ACCEPT_QUEUE_LEN: usize = 128;

/// Capacity of the channel merging all subclient inbound streams.
pub(crate) const FANIN_QUEUE_LEN: usize = 64;

// ----------------------------------------------------------------------------
// Client State
// ----------------------------------------------------------------------------

/// State guarded by the client-wide lock: the session table and the closed
/// flag move together.
pub(crate) struct Shared {
    pub(crate) sessions: HashMap<SessionKey, Session>,
    pub(crate) closed: bool,
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    address: Address,
    pub(crate) subclients: BTreeMap<i32, Arc<Subclient>>,
    default_index: i32,
    connected: watch::Receiver<bool>,
    messages: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    /// Seen pids, shared between the fan-in router and request retirement.
    dedup: std::sync::Mutex<DedupCache>,
    pub(crate) accept_tx: mpsc::Sender<Session>,
    pub(crate) accept_rx: tokio::sync::Mutex<mpsc::Receiver<Session>>,
    pub(crate) shared: RwLock<Shared>,
    pub(crate) shutdown: watch::Sender<bool>,
}

/// A multi-path messaging client. Cheap to clone; all clones share the same
/// identity, subclients, and session table.
#[derive(Clone)]
pub struct MultiClient {
    inner: Arc<ClientInner>,
}

impl MultiClient {
    /// Construct the client by opening `num_subclients` tagged paths (plus
    /// the untagged original when `include_original` is set) in parallel.
    /// Individual failures are logged and leave holes; construction fails
    /// only when every path fails.
    pub async fn new(
        overlay: Arc<dyn OverlayNetwork>,
        account: &Account,
        base_identifier: &str,
        num_subclients: usize,
        include_original: bool,
        config: ClientConfig,
    ) -> ClientResult<Self> {
        let offset = usize::from(include_original);

        let mut constructions = JoinSet::new();
        for index in -(offset as i32)..num_subclients as i32 {
            let overlay = overlay.clone();
            let address = make_address(&add_tag(base_identifier, index), account.public_key());
            constructions.spawn(async move {
                let path = overlay.open(&address).await;
                (index, address, path)
            });
        }

        let mut subclients = BTreeMap::new();
        while let Some(joined) = constructions.join_next().await {
            let Ok((index, address, path)) = joined else {
                continue;
            };
            match path {
                Ok(path) => {
                    let subclient = Subclient::start(index, address, path, config.msg_chan_len);
                    subclients.insert(index, Arc::new(subclient));
                }
                Err(e) => warn!(index, error = %e, "failed to construct subclient"),
            }
        }
        if subclients.is_empty() {
            return Err(ClientError::Construction);
        }
        let default_index = *subclients.keys().next().expect("at least one subclient");

        // One-shot connect readiness: usable as soon as any path is up.
        let (connected_tx, connected_rx) = watch::channel(false);
        let mut connect_waiters = JoinSet::new();
        for subclient in subclients.values() {
            let subclient = subclient.clone();
            connect_waiters.spawn(async move { subclient.wait_connect().await });
        }
        tokio::spawn(async move {
            if connect_waiters.join_next().await.is_some() {
                let _ = connected_tx.send(true);
            }
            connect_waiters.abort_all();
        });

        let address = Address::new(make_address(base_identifier, account.public_key()));
        let (messages_tx, messages_rx) = mpsc::channel(config.msg_chan_len.max(1));
        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_QUEUE_LEN);
        let (shutdown, _) = watch::channel(false);

        let dedup = DedupCache::new(config.msg_cache_expiration, config.msg_cache_expiration);
        let inner = Arc::new(ClientInner {
            config,
            address,
            subclients,
            default_index,
            connected: connected_rx,
            messages: tokio::sync::Mutex::new(messages_rx),
            dedup: std::sync::Mutex::new(dedup),
            accept_tx,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
            shared: RwLock::new(Shared {
                sessions: HashMap::new(),
                closed: false,
            }),
            shutdown,
        });

        let inbounds: Vec<_> = inner
            .subclients
            .iter()
            .filter_map(|(&index, sub)| sub.take_inbound().map(|rx| (index, rx)))
            .collect();
        router::spawn(inner.clone(), messages_tx, inbounds);

        info!(address = %inner.address, subclients = inner.subclients.len(),
            "multi-path client constructed");
        Ok(Self { inner })
    }

    /// The logical (untagged) address of this client.
    pub fn address(&self) -> &str {
        self.inner.address.as_str()
    }

    pub fn addr(&self) -> &Address {
        &self.inner.address
    }

    /// Index of the designated default subclient: the original when it is
    /// included and alive, otherwise the lowest live index.
    pub fn default_subclient(&self) -> i32 {
        self.inner.default_index
    }

    /// Indices of the live subclients, in order.
    pub fn subclient_indices(&self) -> Vec<i32> {
        self.inner.subclients.keys().copied().collect()
    }

    /// Resolves once at least one subclient path is connected. Fires at
    /// most once per client.
    pub async fn wait_for_connect(&self) -> ClientResult<()> {
        let mut connected = self.inner.connected.clone();
        connected
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Closed)
    }

    /// Receive the next application message. Each message is surfaced
    /// exactly once regardless of how many paths delivered it.
    pub async fn recv(&self) -> ClientResult<Message> {
        self.inner.ensure_open()?;
        let mut messages = self.inner.messages.lock().await;
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => Err(ClientError::Closed),
            maybe = messages.recv() => maybe.ok_or(ClientError::Closed),
        }
    }

    /// Broadcast `data` to `dests` over every subclient and wait for the
    /// first reply. Blocks until a reply arrives or a send fails.
    pub async fn send(
        &self,
        dests: &[&str],
        data: &[u8],
        encrypted: bool,
        max_holding_secs: u32,
    ) -> ClientResult<Message> {
        self.inner.ensure_open()?;
        let indices = self.subclient_indices();
        self.inner
            .request_with(&indices, dests, Payload::binary(data.to_vec()), encrypted, max_holding_secs)
            .await
    }

    /// Like [`MultiClient::send`] with a text payload.
    pub async fn send_text(
        &self,
        dests: &[&str],
        text: &str,
        encrypted: bool,
        max_holding_secs: u32,
    ) -> ClientResult<Message> {
        self.inner.ensure_open()?;
        let indices = self.subclient_indices();
        self.inner
            .request_with(&indices, dests, Payload::text(text), encrypted, max_holding_secs)
            .await
    }

    /// Like [`MultiClient::send`] but pinned to one subclient, for callers
    /// that want deterministic path selection.
    pub async fn send_with_subclient(
        &self,
        index: i32,
        dests: &[&str],
        data: &[u8],
        encrypted: bool,
        max_holding_secs: u32,
    ) -> ClientResult<Message> {
        self.inner.ensure_open()?;
        self.inner
            .request_with(&[index], dests, Payload::binary(data.to_vec()), encrypted, max_holding_secs)
            .await
    }

    /// Open a session to `remote_addr` with the default session settings.
    pub async fn dial(&self, remote_addr: &str) -> ClientResult<Session> {
        self.dial_with_overrides(remote_addr, &SessionOverrides::default())
            .await
    }

    /// Open a session with caller overrides merged over the configured
    /// defaults (caller wins, field-wise).
    pub async fn dial_with_overrides(
        &self,
        remote_addr: &str,
        overrides: &SessionOverrides,
    ) -> ClientResult<Session> {
        self.inner.dial_session(remote_addr, overrides).await
    }

    /// Wait for the next inbound session and complete its passive open.
    pub async fn accept(&self) -> ClientResult<Session> {
        self.inner.accept_session().await
    }

    /// Close every session and subclient and stop the fan-in router.
    /// Idempotent.
    pub async fn close(&self) -> ClientResult<()> {
        self.inner.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.read().unwrap().closed
    }
}

// ----------------------------------------------------------------------------
// Fan-out Sender
// ----------------------------------------------------------------------------

impl ClientInner {
    pub(crate) fn ensure_open(&self) -> ClientResult<()> {
        if self.shared.read().unwrap().closed {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn subclient(&self, index: i32) -> ClientResult<&Arc<Subclient>> {
        self.subclients
            .get(&index)
            .ok_or(ClientError::SubclientUnavailable { index })
    }

    pub(crate) fn address(&self) -> &Address {
        &self.address
    }

    /// Send one payload via subclient `index`, mirroring the sender's tag
    /// onto every destination (the overlay's path-selection convention).
    pub(crate) async fn send_via(
        &self,
        index: i32,
        dests: &[&str],
        payload: Payload,
        encrypted: bool,
        max_holding_secs: u32,
    ) -> ClientResult<()> {
        let subclient = self.subclient(index)?;
        let tagged: Vec<String> = dests.iter().map(|dest| add_tag(dest, index)).collect();
        subclient
            .send(&tagged, payload, encrypted, max_holding_secs)
            .await
            .map_err(ClientError::from)
    }

    /// Submit the payload on every live subclient in index order. The first
    /// error aborts the walk: early failure over silent partial send.
    pub(crate) async fn broadcast(
        &self,
        dests: &[&str],
        payload: Payload,
        encrypted: bool,
        max_holding_secs: u32,
    ) -> ClientResult<()> {
        for &index in self.subclients.keys() {
            self.send_via(index, dests, payload.clone(), encrypted, max_holding_secs)
                .await?;
        }
        Ok(())
    }

    /// Fan a request out over `indices` and return the first reply. The
    /// request is retired on every exit path: its pid is recorded as seen
    /// (the peer's reply is broadcast, so further copies are still in
    /// flight on other paths and must be suppressed) and the reply channels
    /// installed under it are removed.
    pub(crate) async fn request_with(
        &self,
        indices: &[i32],
        dests: &[&str],
        payload: Payload,
        encrypted: bool,
        max_holding_secs: u32,
    ) -> ClientResult<Message> {
        let pid = payload.pid;
        let (first_tx, mut first_rx) = mpsc::channel::<Message>(1);
        let mut installed: Vec<i32> = Vec::new();
        let mut send_error: Option<ClientError> = None;

        for &index in indices {
            let subclient = match self.subclient(index) {
                Ok(subclient) => subclient,
                Err(e) => {
                    send_error = Some(e);
                    break;
                }
            };
            let (reply_tx, reply_rx) = oneshot::channel();
            subclient.response_channels.insert(pid, reply_tx);
            installed.push(index);

            let first_tx = first_tx.clone();
            tokio::spawn(async move {
                if let Ok(message) = reply_rx.await {
                    let _ = first_tx.try_send(message);
                }
            });

            if let Err(e) = self
                .send_via(index, dests, payload.clone(), encrypted, max_holding_secs)
                .await
            {
                send_error = Some(e);
                break;
            }
        }
        drop(first_tx);

        if let Some(e) = send_error {
            self.retire_request(pid, &installed);
            return Err(e);
        }

        let result = match first_rx.recv().await {
            Some(mut message) => {
                let src = strip_tag(&message.src).0.to_string();
                message.src = src;
                Ok(message)
            }
            None => Err(ClientError::ResponseChannel),
        };
        self.retire_request(pid, &installed);
        result
    }

    /// Retire a finished request. The pid is marked seen first so that
    /// reply copies still in flight drop at the router as duplicates, then
    /// the remaining reply channels come out of the subclient maps.
    fn retire_request(&self, pid: Pid, indices: &[i32]) {
        self.mark_seen(pid);
        for index in indices {
            if let Some(subclient) = self.subclients.get(index) {
                subclient.response_channels.remove(&pid);
            }
        }
    }

    /// Whether `pid` was already surfaced or retired.
    pub(crate) fn already_seen(&self, pid: Pid) -> bool {
        self.dedup.lock().unwrap().seen(pid.as_bytes())
    }

    /// Record `pid` so further copies arriving over other paths are dropped.
    pub(crate) fn mark_seen(&self, pid: Pid) {
        self.dedup.lock().unwrap().insert(pid.as_bytes().to_vec());
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub(crate) async fn close(&self) -> ClientResult<()> {
        let sessions: Vec<(SessionKey, Session)> = {
            let mut shared = self.shared.write().unwrap();
            if shared.closed {
                return Ok(());
            }
            shared.closed = true;
            shared
                .sessions
                .iter()
                .map(|(key, session)| (key.clone(), session.clone()))
                .collect()
        };

        for (key, session) in sessions {
            if let Err(e) = session.close().await {
                warn!(session_id = %key.id, error = %e, "failed to close session");
            }
        }
        for subclient in self.subclients.values() {
            subclient.close().await;
        }
        let _ = self.shutdown.send(true);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Reply Sink
// ----------------------------------------------------------------------------

#[async_trait]
impl ReplySink for ClientInner {
    async fn send_reply(
        &self,
        dest: &str,
        payload: Payload,
        encrypted: bool,
    ) -> Result<(), TransportError> {
        if self.ensure_open().is_err() {
            return Err(TransportError::Closed);
        }
        self.broadcast(&[dest], payload, encrypted, 0)
            .await
            .map_err(|e| match e {
                ClientError::Transport(t) => t,
                ClientError::Closed => TransportError::Closed,
                other => TransportError::SendFailed {
                    reason: other.to_string(),
                },
            })
    }
}
