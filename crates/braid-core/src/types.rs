//! Core identifier types for the Braid protocol
//!
//! Newtypes over raw byte identifiers keep message-ids, session-ids and
//! account material from being mixed up at call sites.

use core::fmt;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Payload Identifier
// ----------------------------------------------------------------------------

/// Size of a payload identifier in bytes. Message-ids and session-ids share
/// the same width and travel in the same payload field.
pub const PID_SIZE: usize = 8;

/// Size of a session identifier in bytes.
pub const SESSION_ID_SIZE: usize = PID_SIZE;

/// Payload identifier: a unique message-id for application messages, a
/// session-id for session segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pid([u8; PID_SIZE]);

impl Pid {
    /// Create a pid from 8 bytes.
    pub fn new(bytes: [u8; PID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh uniformly random pid.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Create a pid from the first 8 bytes of a longer identifier.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut id = [0u8; PID_SIZE];
        let len = core::cmp::min(bytes.len(), PID_SIZE);
        id[..len].copy_from_slice(&bytes[..len]);
        Self(id)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; PID_SIZE] {
        &self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ----------------------------------------------------------------------------
// Account
// ----------------------------------------------------------------------------

/// Minimal identity carrier: the hex-encoded public key that terminates an
/// overlay address. Key management and on-chain operations live outside this
/// crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    public_key: String,
}

impl Account {
    /// Wrap an existing hex-encoded public key.
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
        }
    }

    /// Generate a throwaway account with a random 32-byte public key.
    pub fn random() -> Self {
        let key: [u8; 32] = rand::random();
        Self {
            public_key: hex::encode(key),
        }
    }

    /// The hex-encoded public key.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }
}
