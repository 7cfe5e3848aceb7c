//! In-process identifier cache held by the daemon.

use crate::identifier::{IdentifierCache, IdentifierError};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Default)]
pub struct IdentifierCacheImpl {
    entries: Mutex<HashMap<String, Instant>>,
}

impl IdentifierCacheImpl {
    pub fn new() -> Self {
        IdentifierCacheImpl::default()
    }

    #[cfg(test)]
    fn register_at(&self, identifier: &str, seen: Instant) {
        self.entries
            .lock()
            .unwrap()
            .insert(identifier.to_string(), seen);
    }
}

impl IdentifierCache for IdentifierCacheImpl {
    fn register_identifier(&self, identifier: &str) -> Result<(), IdentifierError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(identifier) {
            return Err(IdentifierError::Duplicate(identifier.to_string()));
        }
        entries.insert(identifier.to_string(), Instant::now());
        Ok(())
    }

    fn contains_identifier(&self, identifier: &str) -> Result<bool, IdentifierError> {
        Ok(self.entries.lock().unwrap().contains_key(identifier))
    }

    fn sweep(&self, max_age_secs: u64) -> Result<usize, IdentifierError> {
        let max_age = Duration::from_secs(max_age_secs);
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, seen| now.duration_since(*seen) <= max_age);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "swept identifier cache");
        }
        Ok(removed)
    }
}
