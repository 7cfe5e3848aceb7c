//! Client-side proxy: the same trait, forwarded over the connection pool.
//!
//! All operations are blocking requests except `terminate_expired_sessions`,
//! which is only ever issued by a background sweeper and is fire-and-forget.

use crate::ipc::ClientPool;
use crate::sessions::dispatcher::{
    InsertPrincipalSessionCommand, GET_PRINCIPAL_SESSION,
    GET_PRINCIPAL_SESSION_BY_ESOE_SESSION_ID, GET_UNAUTHENTICATED_SESSION,
    INSERT_PRINCIPAL_SESSION, INSERT_UNAUTHENTICATED_SESSION, TERMINATE_EXPIRED_SESSIONS,
    TERMINATE_PRINCIPAL_SESSION, TERMINATE_UNAUTHENTICATED_SESSION,
};
use crate::sessions::{PrincipalSession, SessionCache, SessionError, UnauthenticatedSession};
use std::sync::Arc;

pub struct SessionCacheProxy {
    pool: Arc<ClientPool>,
}

impl SessionCacheProxy {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        SessionCacheProxy { pool }
    }
}

impl SessionCache for SessionCacheProxy {
    fn insert_principal_session(
        &self,
        local_session_id: &str,
        session: PrincipalSession,
    ) -> Result<(), SessionError> {
        let command = InsertPrincipalSessionCommand {
            local_session_id: local_session_id.to_string(),
            session,
        };
        let mut lease = self.pool.lease();
        lease
            .make_request::<_, ()>(INSERT_PRINCIPAL_SESSION, &command)
            .map_err(SessionError::from)
    }

    fn get_principal_session(
        &self,
        local_session_id: &str,
    ) -> Result<PrincipalSession, SessionError> {
        let mut lease = self.pool.lease();
        lease
            .make_request::<str, PrincipalSession>(GET_PRINCIPAL_SESSION, local_session_id)
            .map_err(SessionError::from)
    }

    fn get_principal_session_by_esoe_session_id(
        &self,
        esoe_session_id: &str,
    ) -> Result<PrincipalSession, SessionError> {
        let mut lease = self.pool.lease();
        lease
            .make_request::<str, PrincipalSession>(
                GET_PRINCIPAL_SESSION_BY_ESOE_SESSION_ID,
                esoe_session_id,
            )
            .map_err(SessionError::from)
    }

    fn terminate_principal_session(&self, esoe_session_id: &str) -> Result<(), SessionError> {
        let mut lease = self.pool.lease();
        lease
            .make_request::<str, ()>(TERMINATE_PRINCIPAL_SESSION, esoe_session_id)
            .map_err(SessionError::from)
    }

    fn insert_unauthenticated_session(
        &self,
        session: UnauthenticatedSession,
    ) -> Result<(), SessionError> {
        let mut lease = self.pool.lease();
        lease
            .make_request::<_, ()>(INSERT_UNAUTHENTICATED_SESSION, &session)
            .map_err(SessionError::from)
    }

    fn get_unauthenticated_session(
        &self,
        request_id: &str,
    ) -> Result<UnauthenticatedSession, SessionError> {
        let mut lease = self.pool.lease();
        lease
            .make_request::<str, UnauthenticatedSession>(GET_UNAUTHENTICATED_SESSION, request_id)
            .map_err(SessionError::from)
    }

    fn terminate_unauthenticated_session(&self, request_id: &str) -> Result<(), SessionError> {
        let mut lease = self.pool.lease();
        lease
            .make_request::<str, ()>(TERMINATE_UNAUTHENTICATED_SESSION, request_id)
            .map_err(SessionError::from)
    }

    fn terminate_expired_sessions(&self, timeout_secs: u32) -> Result<(), SessionError> {
        let mut lease = self.pool.lease();
        lease
            .make_nonblocking_request(TERMINATE_EXPIRED_SESSIONS, &timeout_secs)
            .map_err(SessionError::from)
    }
}
