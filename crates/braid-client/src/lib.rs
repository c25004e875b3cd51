//! Multi-path messaging client for the Braid overlay
//!
//! One logical identity transmits and receives over N independent subclient
//! paths to improve delivery probability and latency. Application messages
//! fan out across every path and duplicates are suppressed on the way in;
//! reliable sessions stripe their segments across (local, remote) path
//! pairs.
//!
//! ```no_run
//! # async fn example() -> Result<(), braid_client::ClientError> {
//! # use std::sync::Arc;
//! # use braid_core::{Account, ClientConfig, OverlayNetwork};
//! # use braid_client::MultiClient;
//! # let overlay: Arc<dyn OverlayNetwork> = unimplemented!();
//! let account = Account::random();
//! let client =
//!     MultiClient::new(overlay, &account, "alice", 3, true, ClientConfig::default()).await?;
//! client.wait_for_connect().await?;
//!
//! let reply = client.send(&["bob.deadbeef"], b"hello", true, 0).await?;
//! println!("{} answered: {:?}", reply.src, reply.data);
//! # Ok(())
//! # }
//! ```

mod errors;
mod multiclient;
mod router;
mod sessions;
mod subclient;

pub use errors::{ClientError, ClientResult};
pub use multiclient::MultiClient;

// Protocol-layer types callers interact with directly.
pub use braid_core::{
    Account, Address, ClientConfig, Message, Session, SessionConfig, SessionError,
    SessionOverrides,
};
