//! Error types for the multi-path client

use braid_core::{SessionError, TransportError};

/// Errors surfaced by [`crate::MultiClient`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Every subclient failed to construct.
    #[error("failed to construct any subclient")]
    Construction,

    /// Operation attempted after `close`.
    #[error("client is closed")]
    Closed,

    /// No live subclient at the requested index.
    #[error("subclient {index} not available")]
    SubclientUnavailable { index: i32 },

    /// Every reply channel for a request closed without a response.
    #[error("no response: all reply channels closed")]
    ResponseChannel,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type ClientResult<T> = Result<T, ClientError>;
