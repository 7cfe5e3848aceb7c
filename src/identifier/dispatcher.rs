//! Daemon-side dispatcher exposing the identifier cache over RPC.

use crate::identifier::IdentifierCache;
use crate::ipc::{Dispatcher, Engine, IpcError, MessageHeader, MessageType};
use std::sync::Arc;

pub(crate) const PREFIX: &str = "spep/identifier/IdentifierCache/";
pub(crate) const REGISTER_IDENTIFIER: &str = "spep/identifier/IdentifierCache/registerIdentifier";
pub(crate) const CONTAINS_IDENTIFIER: &str = "spep/identifier/IdentifierCache/containsIdentifier";
pub(crate) const SWEEP: &str = "spep/identifier/IdentifierCache/sweep";

pub struct IdentifierCacheDispatcher {
    cache: Arc<dyn IdentifierCache>,
}

impl IdentifierCacheDispatcher {
    pub fn new(cache: Arc<dyn IdentifierCache>) -> Self {
        IdentifierCacheDispatcher { cache }
    }
}

impl Dispatcher for IdentifierCacheDispatcher {
    fn dispatch(&self, header: &MessageHeader, engine: &mut Engine) -> Result<bool, IpcError> {
        if !header.dispatch.starts_with(PREFIX) {
            return Ok(false);
        }

        match header.dispatch.as_str() {
            REGISTER_IDENTIFIER => {
                let identifier: String = engine.get_object()?;
                self.cache.register_identifier(&identifier)?;
                if header.message_type == MessageType::Request {
                    engine.send_response_header()?;
                    engine.send_object(&())?;
                }
                Ok(true)
            }
            CONTAINS_IDENTIFIER => {
                let identifier: String = engine.get_object()?;
                let present = self.cache.contains_identifier(&identifier)?;
                if header.message_type == MessageType::Request {
                    engine.send_response_header()?;
                    engine.send_object(&present)?;
                }
                Ok(true)
            }
            SWEEP => {
                let max_age_secs: u64 = engine.get_object()?;
                let removed = self.cache.sweep(max_age_secs)?;
                if header.message_type == MessageType::Request {
                    engine.send_response_header()?;
                    engine.send_object(&(removed as u64))?;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
