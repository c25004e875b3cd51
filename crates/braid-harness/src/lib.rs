//! In-memory overlay for deterministic tests
//!
//! [`MemoryOverlay`] routes envelopes between registered tagged addresses
//! inside one process: exact-match lookup, per-path FIFO delivery, and
//! best-effort semantics (unknown destinations are dropped, like an overlay
//! relaying to an absent subclient). Failure hooks cover the scenarios the
//! client suite needs: refusing an address at open time and injecting
//! envelopes directly to simulate redundant multi-path delivery.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use braid_core::{Envelope, OverlayNetwork, OverlayPath, PathSender, TransportError};

/// Capacity of each registered path's inbound queue.
const PATH_QUEUE_LEN: usize = 256;

// ----------------------------------------------------------------------------
// Memory Overlay
// ----------------------------------------------------------------------------

/// A process-local overlay mesh. Clone handles share the same registry.
#[derive(Clone, Default)]
pub struct MemoryOverlay {
    state: Arc<OverlayState>,
}

#[derive(Default)]
struct OverlayState {
    routes: DashMap<String, mpsc::Sender<Envelope>>,
    refused: DashSet<String>,
}

impl MemoryOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make future `open` calls for `address` fail, for partial-construction
    /// scenarios.
    pub fn refuse(&self, address: &str) {
        self.state.refused.insert(address.to_string());
    }

    /// Whether a path is currently registered for `address`.
    pub fn is_registered(&self, address: &str) -> bool {
        self.state.routes.contains_key(address)
    }

    /// Push an envelope straight into the path registered at `dest`,
    /// bypassing any sender. Returns whether a path was registered. Used to
    /// simulate the same message arriving over several paths.
    pub async fn inject(&self, dest: &str, envelope: Envelope) -> bool {
        let tx = match self.state.routes.get(dest) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };
        tx.send(envelope).await.is_ok()
    }
}

#[async_trait]
impl OverlayNetwork for MemoryOverlay {
    async fn open(&self, address: &str) -> Result<OverlayPath, TransportError> {
        if self.state.refused.contains(address) {
            return Err(TransportError::OpenFailed {
                address: address.to_string(),
                reason: "address refused by overlay".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(PATH_QUEUE_LEN);
        self.state.routes.insert(address.to_string(), tx);

        // An in-memory path is usable the moment it is registered.
        let (connected_tx, connected_rx) = watch::channel(true);

        Ok(OverlayPath {
            sender: Arc::new(MemoryPathSender {
                state: self.state.clone(),
                address: address.to_string(),
                _connected: connected_tx,
            }),
            inbound: rx,
            connected: connected_rx,
        })
    }
}

// ----------------------------------------------------------------------------
// Path Sender
// ----------------------------------------------------------------------------

struct MemoryPathSender {
    state: Arc<OverlayState>,
    address: String,
    // Keeps the connected signal alive for the path's lifetime.
    _connected: watch::Sender<bool>,
}

#[async_trait]
impl PathSender for MemoryPathSender {
    async fn send(&self, dests: &[String], envelope: Envelope) -> Result<(), TransportError> {
        for dest in dests {
            let tx = match self.state.routes.get(dest) {
                Some(entry) => entry.value().clone(),
                None => {
                    debug!(dest = %dest, "no path registered, dropping envelope");
                    continue;
                }
            };
            if tx.send(envelope.clone()).await.is_err() {
                debug!(dest = %dest, "path queue closed, dropping envelope");
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.state.routes.remove(&self.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::Payload;

    fn envelope(src: &str, data: &[u8]) -> Envelope {
        Envelope {
            src: src.to_string(),
            payload: Payload::binary(data.to_vec()),
            encrypted: false,
            max_holding_secs: 0,
        }
    }

    #[tokio::test]
    async fn routes_between_registered_addresses() {
        let overlay = MemoryOverlay::new();
        let alice = overlay.open("alice.key").await.unwrap();
        let mut bob = overlay.open("bob.key").await.unwrap();

        alice
            .sender
            .send(&["bob.key".to_string()], envelope("alice.key", b"hi"))
            .await
            .unwrap();

        let received = bob.inbound.recv().await.unwrap();
        assert_eq!(received.src, "alice.key");
        assert_eq!(received.payload.data, b"hi");
    }

    #[tokio::test]
    async fn unknown_destination_is_dropped_silently() {
        let overlay = MemoryOverlay::new();
        let alice = overlay.open("alice.key").await.unwrap();

        alice
            .sender
            .send(&["ghost.key".to_string()], envelope("alice.key", b"hi"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn refused_address_fails_open() {
        let overlay = MemoryOverlay::new();
        overlay.refuse("__0__.alice.key");

        let err = overlay.open("__0__.alice.key").await.unwrap_err();
        assert!(matches!(err, TransportError::OpenFailed { .. }));
        assert!(overlay.open("__1__.alice.key").await.is_ok());
    }

    #[tokio::test]
    async fn close_deregisters_the_path() {
        let overlay = MemoryOverlay::new();
        let alice = overlay.open("alice.key").await.unwrap();
        assert!(overlay.is_registered("alice.key"));

        alice.sender.close().await;
        assert!(!overlay.is_registered("alice.key"));
    }

    #[tokio::test]
    async fn inject_delivers_directly() {
        let overlay = MemoryOverlay::new();
        let mut alice = overlay.open("alice.key").await.unwrap();

        assert!(overlay.inject("alice.key", envelope("peer.key", b"dup")).await);
        assert!(!overlay.inject("nobody.key", envelope("peer.key", b"dup")).await);

        let received = alice.inbound.recv().await.unwrap();
        assert_eq!(received.payload.data, b"dup");
    }

    #[tokio::test]
    async fn connected_signal_is_immediately_true() {
        let overlay = MemoryOverlay::new();
        let alice = overlay.open("alice.key").await.unwrap();
        assert!(*alice.connected.borrow());
    }
}
