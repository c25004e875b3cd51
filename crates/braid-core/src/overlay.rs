//! Overlay path contract
//!
//! One [`OverlayPath`] is a single authenticated path from a tagged address
//! into the overlay: the unit of multi-pathing. How a path authenticates,
//! encrypts, and relays is the provider's business; this crate only needs
//! the channel bundle below.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::errors::TransportError;
use crate::payload::Envelope;

/// A provider of overlay paths, e.g. a relay pool or the in-memory mesh
/// used in tests.
#[async_trait]
pub trait OverlayNetwork: Send + Sync + 'static {
    /// Register `address` with the overlay and open one path for it.
    async fn open(&self, address: &str) -> Result<OverlayPath, TransportError>;
}

/// The handles backing one open path.
pub struct OverlayPath {
    /// Outbound half, shared with anything that writes on this path.
    pub sender: Arc<dyn PathSender>,
    /// Inbound envelopes, in per-path FIFO order.
    pub inbound: mpsc::Receiver<Envelope>,
    /// Transitions to `true` once when the path becomes usable.
    pub connected: watch::Receiver<bool>,
}

impl std::fmt::Debug for OverlayPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayPath").finish_non_exhaustive()
    }
}

/// Outbound operations on one overlay path.
#[async_trait]
pub trait PathSender: Send + Sync {
    /// Submit an envelope toward each destination. Submission is
    /// best-effort and non-blocking from the caller's point of view;
    /// unknown destinations are dropped by the overlay.
    async fn send(&self, dests: &[String], envelope: Envelope) -> Result<(), TransportError>;

    /// Tear the path down. Idempotent.
    async fn close(&self);
}
