//! Error types for the Braid protocol layer

use std::time::Duration;

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Errors surfaced by an overlay path or a subclient wrapping one.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open overlay path for {address}: {reason}")]
    OpenFailed { address: String, reason: String },

    #[error("send failed: {reason}")]
    SendFailed { reason: String },

    #[error("write deadline exceeded")]
    DeadlineExceeded,

    #[error("overlay path closed")]
    Closed,
}

// ----------------------------------------------------------------------------
// Session Errors
// ----------------------------------------------------------------------------

/// Errors surfaced by the reliable session layer.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session reached a terminal state. Segments arriving for a closed
    /// session are expected during teardown and dropped silently upstream.
    #[error("session closed")]
    Closed,

    #[error("dial timed out after {0:?}")]
    DialTimeout(Duration),

    #[error("passive open before any handshake segment arrived")]
    NotEstablished,

    #[error("malformed segment: {reason}")]
    MalformedSegment { reason: String },

    #[error("no subclient for tag {tag:?}")]
    UnknownTag { tag: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Whether this error is the benign closed-session signal rather than a
    /// failure worth logging.
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionError::Closed)
    }
}
