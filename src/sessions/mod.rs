//! Principal and unauthenticated session state.
//!
//! A principal session represents an authenticated user. It is stored once,
//! keyed by the identity provider's (ESOE) session ID, and reachable through
//! any number of local session IDs (one per web-server instance the user has
//! touched). An unauthenticated session parks the original request URL while
//! the user is off authenticating, keyed by the SAML AuthnRequest ID, and is
//! consumed when the response comes back.

pub mod cache;
pub mod dispatcher;
pub mod proxy;

pub use cache::SessionCacheImpl;
pub use dispatcher::SessionCacheDispatcher;
pub use proxy::SessionCacheProxy;

use crate::ipc::{InvocationError, IpcError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub(crate) const KIND_NOT_FOUND: &str = "NotFound";
pub(crate) const KIND_INVALID_PARAMETER: &str = "InvalidParameter";
pub(crate) const KIND_CACHE_INCONSISTENT: &str = "CacheInconsistent";
pub(crate) const KIND_IPC: &str = "Ipc";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// No live session for the given identifier. Also returned when a
    /// session existed but had expired.
    #[error("no session was found for the given identifier")]
    NotFound,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The secondary index pointed at a primary entry that does not exist.
    /// Indicates a bug, not a caller error.
    #[error("session cache state is inconsistent")]
    CacheInconsistent,

    #[error("ipc failure: {0}")]
    Ipc(String),
}

impl From<SessionError> for IpcError {
    fn from(e: SessionError) -> Self {
        let inv = match e {
            SessionError::NotFound => InvocationError::new(KIND_NOT_FOUND, "no session found"),
            SessionError::InvalidParameter(msg) => {
                InvocationError::new(KIND_INVALID_PARAMETER, &msg)
            }
            SessionError::CacheInconsistent => {
                InvocationError::new(KIND_CACHE_INCONSISTENT, "session cache inconsistent")
            }
            SessionError::Ipc(msg) => InvocationError::new(KIND_IPC, &msg),
        };
        IpcError::Invocation(inv)
    }
}

impl From<IpcError> for SessionError {
    fn from(e: IpcError) -> Self {
        match e {
            IpcError::Invocation(inv) if inv.kind == KIND_NOT_FOUND => SessionError::NotFound,
            IpcError::Invocation(inv) if inv.kind == KIND_INVALID_PARAMETER => {
                SessionError::InvalidParameter(inv.message)
            }
            IpcError::Invocation(inv) if inv.kind == KIND_CACHE_INCONSISTENT => {
                SessionError::CacheInconsistent
            }
            other => SessionError::Ipc(other.to_string()),
        }
    }
}

/// An authenticated user's session as held by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalSession {
    /// Identity provider's session identifier; the primary storage key.
    pub esoe_session_id: String,
    /// Hard expiry. Lookups past this instant terminate the session.
    pub session_not_on_or_after: DateTime<Utc>,
    /// Every local session ID that resolves to this principal.
    pub session_id_list: Vec<String>,
    /// ESOE session index -> local session ID, one entry per service
    /// instance the principal has authenticated to.
    pub esoe_session_index_map: HashMap<String, String>,
    /// Attribute name -> values, as released by the attribute authority.
    pub attributes: HashMap<String, Vec<String>>,
}

impl PrincipalSession {
    pub fn new(esoe_session_id: &str, session_not_on_or_after: DateTime<Utc>) -> Self {
        PrincipalSession {
            esoe_session_id: esoe_session_id.to_string(),
            session_not_on_or_after,
            session_id_list: Vec::new(),
            esoe_session_index_map: HashMap::new(),
            attributes: HashMap::new(),
        }
    }

    /// Record that `local_session_id` belongs to this principal under the
    /// given ESOE session index.
    pub fn add_esoe_session_index(&mut self, esoe_session_index: &str, local_session_id: &str) {
        self.esoe_session_index_map
            .insert(esoe_session_index.to_string(), local_session_id.to_string());
        if !self
            .session_id_list
            .iter()
            .any(|id| id == local_session_id)
        {
            self.session_id_list.push(local_session_id.to_string());
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.session_not_on_or_after <= now
    }
}

/// A request parked while its user authenticates at the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnauthenticatedSession {
    /// SAML AuthnRequest ID; the storage key.
    pub authn_request_saml_id: String,
    /// URL to return the user to after authentication.
    pub request_url: String,
    /// When the session was parked, for idle sweeping.
    pub timestamp: DateTime<Utc>,
}

impl UnauthenticatedSession {
    pub fn new(authn_request_saml_id: &str, request_url: &str) -> Self {
        UnauthenticatedSession {
            authn_request_saml_id: authn_request_saml_id.to_string(),
            request_url: request_url.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn idle_seconds_at(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }
}

/// Usable in-process (the daemon's own cache) or remotely (the client proxy).
pub trait SessionCache: Send + Sync {
    /// Store a principal session under `local_session_id`. If a session with
    /// the same ESOE session ID already exists, the new session's ESOE
    /// session index entries are merged into it.
    fn insert_principal_session(
        &self,
        local_session_id: &str,
        session: PrincipalSession,
    ) -> Result<(), SessionError>;

    fn get_principal_session(
        &self,
        local_session_id: &str,
    ) -> Result<PrincipalSession, SessionError>;

    fn get_principal_session_by_esoe_session_id(
        &self,
        esoe_session_id: &str,
    ) -> Result<PrincipalSession, SessionError>;

    /// Remove the principal and every local session ID pointing at it.
    /// Terminating an unknown session is not an error.
    fn terminate_principal_session(&self, esoe_session_id: &str) -> Result<(), SessionError>;

    fn insert_unauthenticated_session(
        &self,
        session: UnauthenticatedSession,
    ) -> Result<(), SessionError>;

    fn get_unauthenticated_session(
        &self,
        request_id: &str,
    ) -> Result<UnauthenticatedSession, SessionError>;

    /// Terminating an unknown session is not an error.
    fn terminate_unauthenticated_session(&self, request_id: &str) -> Result<(), SessionError>;

    /// Drop expired principal sessions and unauthenticated sessions idle
    /// for longer than `timeout_secs`.
    fn terminate_expired_sessions(&self, timeout_secs: u32) -> Result<(), SessionError>;
}
