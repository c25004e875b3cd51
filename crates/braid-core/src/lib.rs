//! Protocol layer for the Braid multi-path overlay messaging client
//!
//! One logical identity reaches the overlay through N independent subclient
//! paths. This crate holds everything below the client itself:
//!
//! - `address`: overlay addresses and the `__<n>__` subclient tag codec
//! - `types`: payload identifiers and account material
//! - `payload` / `message`: what travels over a path and what applications see
//! - `dedup`: time-bounded suppression of multi-path duplicates
//! - `session`: the reliable ordered byte stream striped across paths
//! - `overlay`: the contract a single-path transport provider implements
//! - `config` / `errors`: shared configuration and error trees

pub mod address;
pub mod config;
pub mod dedup;
pub mod errors;
pub mod message;
pub mod overlay;
pub mod payload;
pub mod session;
pub mod types;

pub use address::{add_tag, add_tag_prefix, make_address, strip_tag, tag_index, Address};
pub use config::{ClientConfig, SessionConfig, SessionOverrides};
pub use dedup::DedupCache;
pub use errors::{SessionError, TransportError};
pub use message::{Message, ReplyHandle, ReplySink};
pub use overlay::{OverlayNetwork, OverlayPath, PathSender};
pub use payload::{Envelope, Payload, PayloadKind};
pub use session::{SegmentTransport, Session};
pub use types::{Account, Pid, PID_SIZE, SESSION_ID_SIZE};
