//! Daemon-side dispatcher exposing the session cache over RPC.

use crate::ipc::{Dispatcher, Engine, IpcError, MessageHeader, MessageType};
use crate::sessions::{PrincipalSession, SessionCache, UnauthenticatedSession};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub(crate) const PREFIX: &str = "spep/sessions/SessionCache/";
pub(crate) const INSERT_PRINCIPAL_SESSION: &str =
    "spep/sessions/SessionCache/insertPrincipalSession";
pub(crate) const GET_PRINCIPAL_SESSION: &str = "spep/sessions/SessionCache/getPrincipalSession";
pub(crate) const GET_PRINCIPAL_SESSION_BY_ESOE_SESSION_ID: &str =
    "spep/sessions/SessionCache/getPrincipalSessionByEsoeSessionID";
pub(crate) const TERMINATE_PRINCIPAL_SESSION: &str =
    "spep/sessions/SessionCache/terminatePrincipalSession";
pub(crate) const INSERT_UNAUTHENTICATED_SESSION: &str =
    "spep/sessions/SessionCache/insertUnauthenticatedSession";
pub(crate) const GET_UNAUTHENTICATED_SESSION: &str =
    "spep/sessions/SessionCache/getUnauthenticatedSession";
pub(crate) const TERMINATE_UNAUTHENTICATED_SESSION: &str =
    "spep/sessions/SessionCache/terminateUnauthenticatedSession";
pub(crate) const TERMINATE_EXPIRED_SESSIONS: &str =
    "spep/sessions/SessionCache/terminateExpiredSessions";

/// Wire argument for `insertPrincipalSession`.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct InsertPrincipalSessionCommand {
    pub local_session_id: String,
    pub session: PrincipalSession,
}

pub struct SessionCacheDispatcher {
    cache: Arc<dyn SessionCache>,
}

impl SessionCacheDispatcher {
    pub fn new(cache: Arc<dyn SessionCache>) -> Self {
        SessionCacheDispatcher { cache }
    }

    fn respond<T: Serialize>(
        header: &MessageHeader,
        engine: &mut Engine,
        result: &T,
    ) -> Result<(), IpcError> {
        if header.message_type == MessageType::Request {
            engine.send_response_header()?;
            engine.send_object(result)?;
        }
        Ok(())
    }
}

impl Dispatcher for SessionCacheDispatcher {
    fn dispatch(&self, header: &MessageHeader, engine: &mut Engine) -> Result<bool, IpcError> {
        if !header.dispatch.starts_with(PREFIX) {
            return Ok(false);
        }

        match header.dispatch.as_str() {
            INSERT_PRINCIPAL_SESSION => {
                let command: InsertPrincipalSessionCommand = engine.get_object()?;
                self.cache
                    .insert_principal_session(&command.local_session_id, command.session)?;
                Self::respond(header, engine, &())?;
                Ok(true)
            }
            GET_PRINCIPAL_SESSION => {
                let local_session_id: String = engine.get_object()?;
                let session = self.cache.get_principal_session(&local_session_id)?;
                Self::respond(header, engine, &session)?;
                Ok(true)
            }
            GET_PRINCIPAL_SESSION_BY_ESOE_SESSION_ID => {
                let esoe_session_id: String = engine.get_object()?;
                let session = self
                    .cache
                    .get_principal_session_by_esoe_session_id(&esoe_session_id)?;
                Self::respond(header, engine, &session)?;
                Ok(true)
            }
            TERMINATE_PRINCIPAL_SESSION => {
                let esoe_session_id: String = engine.get_object()?;
                self.cache.terminate_principal_session(&esoe_session_id)?;
                Self::respond(header, engine, &())?;
                Ok(true)
            }
            INSERT_UNAUTHENTICATED_SESSION => {
                let session: UnauthenticatedSession = engine.get_object()?;
                self.cache.insert_unauthenticated_session(session)?;
                Self::respond(header, engine, &())?;
                Ok(true)
            }
            GET_UNAUTHENTICATED_SESSION => {
                let request_id: String = engine.get_object()?;
                let session = self.cache.get_unauthenticated_session(&request_id)?;
                Self::respond(header, engine, &session)?;
                Ok(true)
            }
            TERMINATE_UNAUTHENTICATED_SESSION => {
                let request_id: String = engine.get_object()?;
                self.cache.terminate_unauthenticated_session(&request_id)?;
                Self::respond(header, engine, &())?;
                Ok(true)
            }
            TERMINATE_EXPIRED_SESSIONS => {
                let timeout_secs: u32 = engine.get_object()?;
                self.cache.terminate_expired_sessions(timeout_secs)?;
                Self::respond(header, engine, &())?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
