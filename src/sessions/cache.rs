//! In-process session cache held by the daemon.
//!
//! Both session maps and the local-ID index live behind a single mutex so
//! every operation sees (and leaves) the pair consistent: a local session ID
//! in the index always resolves to a live principal entry.

use crate::sessions::{PrincipalSession, SessionCache, SessionError, UnauthenticatedSession};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, error, info};

#[derive(Default)]
struct Inner {
    /// Local session ID -> ESOE session ID.
    session_ids: HashMap<String, String>,
    /// ESOE session ID -> principal session (the primary store).
    esoe_sessions: HashMap<String, PrincipalSession>,
    /// SAML AuthnRequest ID -> parked session.
    unauthenticated: HashMap<String, UnauthenticatedSession>,
}

impl Inner {
    /// Remove a principal and every local session ID resolving to it. Must
    /// be called with the lock already held, which is why it is a free
    /// function on the guarded state rather than on the cache.
    fn terminate_principal(&mut self, esoe_session_id: &str) {
        if let Some(session) = self.esoe_sessions.remove(esoe_session_id) {
            for local_id in &session.session_id_list {
                self.session_ids.remove(local_id);
            }
            info!(
                esoe_session_id,
                local_sessions = session.session_id_list.len(),
                "terminated principal session"
            );
        }
    }
}

#[derive(Default)]
pub struct SessionCacheImpl {
    inner: Mutex<Inner>,
}

impl SessionCacheImpl {
    pub fn new() -> Self {
        SessionCacheImpl::default()
    }
}

impl SessionCache for SessionCacheImpl {
    fn insert_principal_session(
        &self,
        local_session_id: &str,
        mut session: PrincipalSession,
    ) -> Result<(), SessionError> {
        if local_session_id.is_empty() {
            return Err(SessionError::InvalidParameter(String::from(
                "local session ID must not be empty",
            )));
        }
        if session.esoe_session_id.is_empty() {
            return Err(SessionError::InvalidParameter(String::from(
                "ESOE session ID must not be empty",
            )));
        }

        let mut inner = self.inner.lock().unwrap();
        let esoe_session_id = session.esoe_session_id.clone();

        if let Some(existing) = inner.esoe_sessions.get_mut(&esoe_session_id) {
            // Same principal authenticating to another service instance:
            // fold the new index entries and local ID into the stored session
            for (index, local_id) in session.esoe_session_index_map.drain() {
                existing.add_esoe_session_index(&index, &local_id);
            }
            if !existing
                .session_id_list
                .iter()
                .any(|id| id == local_session_id)
            {
                existing.session_id_list.push(local_session_id.to_string());
            }
            debug!(esoe_session_id, local_session_id, "merged principal session");
        } else {
            if !session
                .session_id_list
                .iter()
                .any(|id| id == local_session_id)
            {
                session.session_id_list.push(local_session_id.to_string());
            }
            debug!(esoe_session_id, local_session_id, "inserted principal session");
            inner.esoe_sessions.insert(esoe_session_id.clone(), session);
        }

        inner
            .session_ids
            .insert(local_session_id.to_string(), esoe_session_id);
        Ok(())
    }

    fn get_principal_session(
        &self,
        local_session_id: &str,
    ) -> Result<PrincipalSession, SessionError> {
        let mut inner = self.inner.lock().unwrap();

        let esoe_session_id = match inner.session_ids.get(local_session_id) {
            Some(id) => id.clone(),
            None => return Err(SessionError::NotFound),
        };
        let session = match inner.esoe_sessions.get(&esoe_session_id) {
            Some(session) => session.clone(),
            None => {
                error!(
                    local_session_id,
                    esoe_session_id, "local session ID resolved to a missing principal"
                );
                return Err(SessionError::CacheInconsistent);
            }
        };

        if session.is_expired_at(Utc::now()) {
            debug!(esoe_session_id, "principal session expired; terminating on lookup");
            inner.terminate_principal(&esoe_session_id);
            return Err(SessionError::NotFound);
        }

        Ok(session)
    }

    fn get_principal_session_by_esoe_session_id(
        &self,
        esoe_session_id: &str,
    ) -> Result<PrincipalSession, SessionError> {
        let mut inner = self.inner.lock().unwrap();

        let session = match inner.esoe_sessions.get(esoe_session_id) {
            Some(session) => session.clone(),
            None => return Err(SessionError::NotFound),
        };

        if session.is_expired_at(Utc::now()) {
            debug!(esoe_session_id, "principal session expired; terminating on lookup");
            inner.terminate_principal(esoe_session_id);
            return Err(SessionError::NotFound);
        }

        Ok(session)
    }

    fn terminate_principal_session(&self, esoe_session_id: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.terminate_principal(esoe_session_id);
        Ok(())
    }

    fn insert_unauthenticated_session(
        &self,
        session: UnauthenticatedSession,
    ) -> Result<(), SessionError> {
        if session.authn_request_saml_id.is_empty() {
            return Err(SessionError::InvalidParameter(String::from(
                "AuthnRequest ID must not be empty",
            )));
        }

        let mut inner = self.inner.lock().unwrap();
        if inner
            .unauthenticated
            .contains_key(&session.authn_request_saml_id)
        {
            return Err(SessionError::InvalidParameter(format!(
                "unauthenticated session already present for request ID {}",
                session.authn_request_saml_id
            )));
        }
        debug!(
            request_id = %session.authn_request_saml_id,
            "inserted unauthenticated session"
        );
        inner
            .unauthenticated
            .insert(session.authn_request_saml_id.clone(), session);
        Ok(())
    }

    fn get_unauthenticated_session(
        &self,
        request_id: &str,
    ) -> Result<UnauthenticatedSession, SessionError> {
        let inner = self.inner.lock().unwrap();
        inner
            .unauthenticated
            .get(request_id)
            .cloned()
            .ok_or(SessionError::NotFound)
    }

    fn terminate_unauthenticated_session(&self, request_id: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.unauthenticated.remove(request_id).is_some() {
            debug!(request_id, "terminated unauthenticated session");
        }
        Ok(())
    }

    fn terminate_expired_sessions(&self, timeout_secs: u32) -> Result<(), SessionError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();

        let expired: Vec<String> = inner
            .esoe_sessions
            .iter()
            .filter(|(_, session)| session.is_expired_at(now))
            .map(|(id, _)| id.clone())
            .collect();
        for esoe_session_id in &expired {
            inner.terminate_principal(esoe_session_id);
        }

        let idle_limit = i64::from(timeout_secs);
        let before = inner.unauthenticated.len();
        inner
            .unauthenticated
            .retain(|_, session| session.idle_seconds_at(now) <= idle_limit);
        let idle_removed = before - inner.unauthenticated.len();

        if !expired.is_empty() || idle_removed > 0 {
            debug!(
                expired_principals = expired.len(),
                idle_unauthenticated = idle_removed,
                "swept session cache"
            );
        }
        Ok(())
    }
}
