//! Daemon-side dispatcher exposing the session group cache over RPC.

use crate::ipc::{Dispatcher, Engine, IpcError, MessageHeader, MessageType};
use crate::pep::{Decision, SessionGroupCache};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) const PREFIX: &str = "spep/pep/SessionGroupCache/";
pub(crate) const MAKE_CACHED_AUTHZ_DECISION: &str =
    "spep/pep/SessionGroupCache/makeCachedAuthzDecision";
pub(crate) const UPDATE_CACHE: &str = "spep/pep/SessionGroupCache/updateCache";
pub(crate) const CLEAR_CACHE: &str = "spep/pep/SessionGroupCache/clearCache";

/// Wire argument for `makeCachedAuthzDecision`.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AuthzDecisionQuery {
    pub session_id: String,
    pub resource: String,
}

/// Wire argument for `updateCache`.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct UpdateCacheCommand {
    pub session_id: String,
    pub group_target: String,
    pub authz_targets: Vec<String>,
    pub decision: Decision,
}

pub struct SessionGroupCacheDispatcher {
    cache: Arc<dyn SessionGroupCache>,
}

impl SessionGroupCacheDispatcher {
    pub fn new(cache: Arc<dyn SessionGroupCache>) -> Self {
        SessionGroupCacheDispatcher { cache }
    }
}

impl Dispatcher for SessionGroupCacheDispatcher {
    fn dispatch(&self, header: &MessageHeader, engine: &mut Engine) -> Result<bool, IpcError> {
        if !header.dispatch.starts_with(PREFIX) {
            return Ok(false);
        }

        match header.dispatch.as_str() {
            MAKE_CACHED_AUTHZ_DECISION => {
                let query: AuthzDecisionQuery = engine.get_object()?;
                let decision = self
                    .cache
                    .make_cached_authz_decision(&query.session_id, &query.resource)?;
                if header.message_type == MessageType::Request {
                    engine.send_response_header()?;
                    engine.send_object(&decision)?;
                }
                Ok(true)
            }
            UPDATE_CACHE => {
                let command: UpdateCacheCommand = engine.get_object()?;
                self.cache.update_cache(
                    &command.session_id,
                    &command.group_target,
                    &command.authz_targets,
                    command.decision,
                )?;
                if header.message_type == MessageType::Request {
                    engine.send_response_header()?;
                    engine.send_object(&())?;
                }
                Ok(true)
            }
            CLEAR_CACHE => {
                let group_targets: HashMap<String, Vec<String>> = engine.get_object()?;
                self.cache.clear_cache(group_targets)?;
                if header.message_type == MessageType::Request {
                    engine.send_response_header()?;
                    engine.send_object(&())?;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
