//! Cached authorization decisions for the policy enforcement point.
//!
//! The daemon holds, per principal session, the decisions already obtained
//! from the policy decision point (PDP), organised by policy group target
//! and authorization target (both regular expressions over resource URLs).
//! Enforcement consults this cache first; only a `Cache` result sends the
//! enforcement point back to the PDP.

pub mod cache;
pub mod dispatcher;
pub mod proxy;

pub use cache::SessionGroupCacheImpl;
pub use dispatcher::SessionGroupCacheDispatcher;
pub use proxy::SessionGroupCacheProxy;

use crate::ipc::{InvocationError, IpcError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub(crate) const KIND_INVALID_PATTERN: &str = "InvalidPattern";
pub(crate) const KIND_IPC: &str = "Ipc";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// A group or authorization target failed to compile as a regular
    /// expression.
    #[error("invalid target pattern: {0}")]
    InvalidPattern(String),

    #[error("ipc failure: {0}")]
    Ipc(String),
}

impl From<PolicyError> for IpcError {
    fn from(e: PolicyError) -> Self {
        let inv = match e {
            PolicyError::InvalidPattern(msg) => InvocationError::new(KIND_INVALID_PATTERN, &msg),
            PolicyError::Ipc(msg) => InvocationError::new(KIND_IPC, &msg),
        };
        IpcError::Invocation(inv)
    }
}

impl From<IpcError> for PolicyError {
    fn from(e: IpcError) -> Self {
        match e {
            IpcError::Invocation(inv) if inv.kind == KIND_INVALID_PATTERN => {
                PolicyError::InvalidPattern(inv.message)
            }
            other => PolicyError::Ipc(other.to_string()),
        }
    }
}

/// Outcome of an authorization lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Permit,
    Deny,
    /// No usable cached decision; the caller must consult the PDP and feed
    /// the result back via `update_cache`.
    Cache,
    /// The decision could not be made safely; enforcement must fail closed.
    Error,
}

impl Decision {
    /// Combine a running result with the decision from one more matching
    /// target. `Deny` absorbs everything except `Error`; `Error` absorbs
    /// everything; `Cache` yields only to a later non-`Permit` decision.
    /// Callers fail fast once the running result is `Deny`.
    pub(crate) fn combine(lhs: Option<Decision>, rhs: Decision) -> Decision {
        match lhs {
            None => rhs,
            Some(Decision::Permit) => rhs,
            Some(Decision::Deny) => {
                if rhs == Decision::Error {
                    Decision::Error
                } else {
                    Decision::Deny
                }
            }
            Some(Decision::Cache) => {
                if rhs == Decision::Permit {
                    Decision::Cache
                } else {
                    rhs
                }
            }
            Some(Decision::Error) => Decision::Error,
        }
    }
}

/// Usable in-process (the daemon's own cache) or remotely (the client proxy).
pub trait SessionGroupCache: Send + Sync {
    /// Answer from cache alone. Never contacts the PDP: a miss is reported
    /// as [`Decision::Cache`].
    fn make_cached_authz_decision(
        &self,
        session_id: &str,
        resource: &str,
    ) -> Result<Decision, PolicyError>;

    /// Record a PDP decision for every authorization target under the given
    /// group target, for one session.
    fn update_cache(
        &self,
        session_id: &str,
        group_target: &str,
        authz_targets: &[String],
        decision: Decision,
    ) -> Result<(), PolicyError>;

    /// Replace the known policy group targets wholesale and drop every
    /// per-session cache. The first call initializes the cache.
    fn clear_cache(
        &self,
        group_targets: std::collections::HashMap<String, Vec<String>>,
    ) -> Result<(), PolicyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_from_empty_takes_rhs() {
        for d in [Decision::Permit, Decision::Deny, Decision::Cache, Decision::Error] {
            assert_eq!(Decision::combine(None, d), d);
        }
    }

    #[test]
    fn test_permit_yields_to_anything() {
        assert_eq!(
            Decision::combine(Some(Decision::Permit), Decision::Deny),
            Decision::Deny
        );
        assert_eq!(
            Decision::combine(Some(Decision::Permit), Decision::Cache),
            Decision::Cache
        );
        assert_eq!(
            Decision::combine(Some(Decision::Permit), Decision::Permit),
            Decision::Permit
        );
    }

    #[test]
    fn test_deny_holds_except_against_error() {
        assert_eq!(
            Decision::combine(Some(Decision::Deny), Decision::Permit),
            Decision::Deny
        );
        assert_eq!(
            Decision::combine(Some(Decision::Deny), Decision::Cache),
            Decision::Deny
        );
        assert_eq!(
            Decision::combine(Some(Decision::Deny), Decision::Error),
            Decision::Error
        );
    }

    #[test]
    fn test_cache_holds_against_permit_only() {
        assert_eq!(
            Decision::combine(Some(Decision::Cache), Decision::Permit),
            Decision::Cache
        );
        assert_eq!(
            Decision::combine(Some(Decision::Cache), Decision::Deny),
            Decision::Deny
        );
        assert_eq!(
            Decision::combine(Some(Decision::Cache), Decision::Error),
            Decision::Error
        );
    }

    #[test]
    fn test_error_absorbs_everything() {
        for d in [Decision::Permit, Decision::Deny, Decision::Cache, Decision::Error] {
            assert_eq!(Decision::combine(Some(Decision::Error), d), Decision::Error);
        }
    }
}
