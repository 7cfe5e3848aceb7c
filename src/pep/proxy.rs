//! Client-side proxy: the same trait, forwarded over the connection pool.
//!
//! `update_cache` and `clear_cache` are blocking requests so an enforcement
//! point that writes a PDP result and immediately re-queries sees its own
//! write.

use crate::ipc::ClientPool;
use crate::pep::dispatcher::{
    AuthzDecisionQuery, UpdateCacheCommand, CLEAR_CACHE, MAKE_CACHED_AUTHZ_DECISION, UPDATE_CACHE,
};
use crate::pep::{Decision, PolicyError, SessionGroupCache};
use std::collections::HashMap;
use std::sync::Arc;

pub struct SessionGroupCacheProxy {
    pool: Arc<ClientPool>,
}

impl SessionGroupCacheProxy {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        SessionGroupCacheProxy { pool }
    }
}

impl SessionGroupCache for SessionGroupCacheProxy {
    fn make_cached_authz_decision(
        &self,
        session_id: &str,
        resource: &str,
    ) -> Result<Decision, PolicyError> {
        let query = AuthzDecisionQuery {
            session_id: session_id.to_string(),
            resource: resource.to_string(),
        };
        let mut lease = self.pool.lease();
        lease
            .make_request::<_, Decision>(MAKE_CACHED_AUTHZ_DECISION, &query)
            .map_err(PolicyError::from)
    }

    fn update_cache(
        &self,
        session_id: &str,
        group_target: &str,
        authz_targets: &[String],
        decision: Decision,
    ) -> Result<(), PolicyError> {
        let command = UpdateCacheCommand {
            session_id: session_id.to_string(),
            group_target: group_target.to_string(),
            authz_targets: authz_targets.to_vec(),
            decision,
        };
        let mut lease = self.pool.lease();
        lease
            .make_request::<_, ()>(UPDATE_CACHE, &command)
            .map_err(PolicyError::from)
    }

    fn clear_cache(
        &self,
        group_targets: HashMap<String, Vec<String>>,
    ) -> Result<(), PolicyError> {
        let mut lease = self.pool.lease();
        lease
            .make_request::<_, ()>(CLEAR_CACHE, &group_targets)
            .map_err(PolicyError::from)
    }
}
