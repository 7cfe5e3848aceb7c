//! Client-side proxy: the same trait, forwarded over the connection pool.

use crate::identifier::dispatcher::{CONTAINS_IDENTIFIER, REGISTER_IDENTIFIER, SWEEP};
use crate::identifier::{IdentifierCache, IdentifierError};
use crate::ipc::ClientPool;
use std::sync::Arc;

pub struct IdentifierCacheProxy {
    pool: Arc<ClientPool>,
}

impl IdentifierCacheProxy {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        IdentifierCacheProxy { pool }
    }
}

impl IdentifierCache for IdentifierCacheProxy {
    fn register_identifier(&self, identifier: &str) -> Result<(), IdentifierError> {
        let mut lease = self.pool.lease();
        lease
            .make_request::<str, ()>(REGISTER_IDENTIFIER, identifier)
            .map_err(IdentifierError::from)
    }

    fn contains_identifier(&self, identifier: &str) -> Result<bool, IdentifierError> {
        let mut lease = self.pool.lease();
        lease
            .make_request::<str, bool>(CONTAINS_IDENTIFIER, identifier)
            .map_err(IdentifierError::from)
    }

    fn sweep(&self, max_age_secs: u64) -> Result<usize, IdentifierError> {
        let mut lease = self.pool.lease();
        let removed: u64 = lease
            .make_request(SWEEP, &max_age_secs)
            .map_err(IdentifierError::from)?;
        Ok(removed as usize)
    }
}
