//! SAML message identifier tracking for replay protection.
//!
//! Every SAML message ID the endpoint sees is registered here exactly once;
//! a second registration of the same ID means a replayed message and is
//! rejected. Entries are swept once they are older than any window in which
//! a replay would still validate.

pub mod cache;
pub mod dispatcher;
pub mod proxy;

pub use cache::IdentifierCacheImpl;
pub use dispatcher::IdentifierCacheDispatcher;
pub use proxy::IdentifierCacheProxy;

use crate::ipc::{InvocationError, IpcError};
use rand::RngCore;
use thiserror::Error;

pub(crate) const KIND_DUPLICATE_IDENTIFIER: &str = "DuplicateIdentifier";
pub(crate) const KIND_IPC: &str = "Ipc";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// The identifier has been seen before; the message is a replay.
    #[error("identifier has already been registered: {0}")]
    Duplicate(String),

    #[error("ipc failure: {0}")]
    Ipc(String),
}

/// Usable in-process (the daemon's own cache) or remotely (the client proxy);
/// callers cannot tell which they hold.
pub trait IdentifierCache: Send + Sync {
    /// Record an identifier, failing if it was already present.
    fn register_identifier(&self, identifier: &str) -> Result<(), IdentifierError>;

    fn contains_identifier(&self, identifier: &str) -> Result<bool, IdentifierError>;

    /// Drop entries older than `max_age_secs`, returning how many were
    /// removed.
    fn sweep(&self, max_age_secs: u64) -> Result<usize, IdentifierError>;
}

/// A fresh random identifier, 160 bits hex-encoded. Used for daemon service
/// IDs and anywhere the endpoint needs a new unique SAML-style identifier.
pub fn generate_id() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

impl From<IdentifierError> for IpcError {
    fn from(e: IdentifierError) -> Self {
        let inv = match e {
            IdentifierError::Duplicate(id) => InvocationError::new(KIND_DUPLICATE_IDENTIFIER, &id),
            IdentifierError::Ipc(msg) => InvocationError::new(KIND_IPC, &msg),
        };
        IpcError::Invocation(inv)
    }
}

impl From<IpcError> for IdentifierError {
    fn from(e: IpcError) -> Self {
        match e {
            IpcError::Invocation(inv) if inv.kind == KIND_DUPLICATE_IDENTIFIER => {
                IdentifierError::Duplicate(inv.message)
            }
            other => IdentifierError::Ipc(other.to_string()),
        }
    }
}
