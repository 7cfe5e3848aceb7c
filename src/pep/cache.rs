//! In-process session group cache held by the daemon.
//!
//! State is two levels of map under one lock: known policy group targets
//! (shared by all sessions, replaced wholesale when policy changes) and a
//! per-session cache of decisions keyed by group target then authorization
//! target. Target patterns are regular expressions matched against the whole
//! resource URL; compiled patterns are memoized across lookups.

use crate::pep::{Decision, PolicyError, SessionGroupCache};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, error, info};

#[derive(Default)]
struct GroupCache {
    /// Group target pattern -> decisions per authorization target pattern.
    authz_caches: HashMap<String, HashMap<String, Decision>>,
}

impl GroupCache {
    /// A fresh per-session cache: every known authorization target starts as
    /// `Cache` so the first touch of any of them goes to the PDP.
    fn seeded(group_targets: &HashMap<String, Vec<String>>) -> Self {
        let mut cache = GroupCache::default();
        for (group_target, authz_targets) in group_targets {
            cache.update(group_target, authz_targets, Decision::Cache);
        }
        cache
    }

    fn update(&mut self, group_target: &str, authz_targets: &[String], decision: Decision) {
        let decisions = self.authz_caches.entry(group_target.to_string()).or_default();
        for target in authz_targets {
            decisions.insert(target.clone(), decision);
        }
    }
}

#[derive(Default)]
struct State {
    /// Set once the first policy set arrives via `clear_cache`.
    initialized: bool,
    group_targets: HashMap<String, Vec<String>>,
    group_caches: HashMap<String, GroupCache>,
    patterns: HashMap<String, Regex>,
}

pub struct SessionGroupCacheImpl {
    state: Mutex<State>,
    default_policy_decision: Decision,
}

impl SessionGroupCacheImpl {
    /// `default_policy_decision` is returned when a lookup matches no target
    /// at all, which means no policy governs the resource.
    pub fn new(default_policy_decision: Decision) -> Self {
        SessionGroupCacheImpl {
            state: Mutex::new(State::default()),
            default_policy_decision,
        }
    }
}

/// Whole-string regular expression match of a target pattern against a
/// resource, compiling and memoizing the pattern on first use.
fn target_match(
    patterns: &mut HashMap<String, Regex>,
    pattern: &str,
    resource: &str,
) -> Result<bool, PolicyError> {
    if !patterns.contains_key(pattern) {
        let anchored = format!("^(?:{})$", pattern);
        let regex = Regex::new(&anchored)
            .map_err(|e| PolicyError::InvalidPattern(format!("{}: {}", pattern, e)))?;
        patterns.insert(pattern.to_string(), regex);
    }
    Ok(patterns[pattern].is_match(resource))
}

impl SessionGroupCache for SessionGroupCacheImpl {
    fn make_cached_authz_decision(
        &self,
        session_id: &str,
        resource: &str,
    ) -> Result<Decision, PolicyError> {
        let mut state = self.state.lock().unwrap();

        if !state.initialized {
            error!("session group cache not yet initialized; rejecting authorization request");
            return Ok(Decision::Error);
        }

        let State {
            group_caches,
            patterns,
            ..
        } = &mut *state;

        let group_cache = match group_caches.get(session_id) {
            Some(cache) => cache,
            None => {
                debug!(session_id, "no authorization cache for session yet");
                return Ok(Decision::Cache);
            }
        };

        let mut result: Option<Decision> = None;
        'groups: for (group_target, decisions) in &group_cache.authz_caches {
            if !target_match(patterns, group_target, resource)? {
                continue;
            }
            if decisions.is_empty() {
                result = Some(Decision::combine(result, Decision::Cache));
                continue;
            }
            for (authz_target, decision) in decisions {
                if !target_match(patterns, authz_target, resource)? {
                    continue;
                }
                result = Some(Decision::combine(result, *decision));
                if result == Some(Decision::Deny) {
                    break 'groups;
                }
            }
        }

        match result {
            None => {
                debug!(
                    resource,
                    default = ?self.default_policy_decision,
                    "no matching policy target; using default policy decision"
                );
                Ok(self.default_policy_decision)
            }
            Some(decision) => {
                info!(session_id, resource, ?decision, "cached authorization decision");
                Ok(decision)
            }
        }
    }

    fn update_cache(
        &self,
        session_id: &str,
        group_target: &str,
        authz_targets: &[String],
        decision: Decision,
    ) -> Result<(), PolicyError> {
        let mut state = self.state.lock().unwrap();
        let State {
            group_targets,
            group_caches,
            ..
        } = &mut *state;

        let group_cache = group_caches
            .entry(session_id.to_string())
            .or_insert_with(|| GroupCache::seeded(group_targets));
        group_cache.update(group_target, authz_targets, decision);
        debug!(
            session_id,
            group_target,
            targets = authz_targets.len(),
            ?decision,
            "updated session authorization cache"
        );
        Ok(())
    }

    fn clear_cache(
        &self,
        group_targets: HashMap<String, Vec<String>>,
    ) -> Result<(), PolicyError> {
        let mut state = self.state.lock().unwrap();
        state.group_caches.clear();
        info!(
            group_targets = group_targets.len(),
            "cleared session authorization caches for new policy set"
        );
        state.group_targets = group_targets;
        state.initialized = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(entries: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(group, authz)| {
                (
                    group.to_string(),
                    authz.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect()
    }

    fn initialized_cache() -> SessionGroupCacheImpl {
        let cache = SessionGroupCacheImpl::new(Decision::Deny);
        cache
            .clear_cache(targets(&[("/secure/.*", &["/secure/admin/.*", "/secure/docs/.*"])]))
            .unwrap();
        cache
    }

    #[test]
    fn test_uninitialized_cache_returns_error() {
        let cache = SessionGroupCacheImpl::new(Decision::Permit);
        assert_eq!(
            cache
                .make_cached_authz_decision("session-1", "/secure/docs/a")
                .unwrap(),
            Decision::Error
        );
    }

    #[test]
    fn test_unknown_session_returns_cache_miss() {
        let cache = initialized_cache();
        assert_eq!(
            cache
                .make_cached_authz_decision("session-1", "/secure/docs/a")
                .unwrap(),
            Decision::Cache
        );
        // Still a miss on repeat: a miss is never persisted as a decision
        assert_eq!(
            cache
                .make_cached_authz_decision("session-1", "/secure/docs/a")
                .unwrap(),
            Decision::Cache
        );
    }

    #[test]
    fn test_update_then_permit() {
        let cache = initialized_cache();
        cache
            .update_cache(
                "session-1",
                "/secure/.*",
                &[String::from("/secure/docs/.*")],
                Decision::Permit,
            )
            .unwrap();
        assert_eq!(
            cache
                .make_cached_authz_decision("session-1", "/secure/docs/report.html")
                .unwrap(),
            Decision::Permit
        );
    }

    #[test]
    fn test_seeded_targets_still_miss_after_partial_update() {
        let cache = initialized_cache();
        cache
            .update_cache(
                "session-1",
                "/secure/.*",
                &[String::from("/secure/docs/.*")],
                Decision::Permit,
            )
            .unwrap();
        // The admin target was seeded as Cache and not updated; Cache beats
        // the permit from the docs target
        assert_eq!(
            cache
                .make_cached_authz_decision("session-1", "/secure/docs/a")
                .unwrap(),
            Decision::Permit
        );
        assert_eq!(
            cache
                .make_cached_authz_decision("session-1", "/secure/admin/panel")
                .unwrap(),
            Decision::Cache
        );
    }

    #[test]
    fn test_deny_wins_over_permit() {
        let cache = initialized_cache();
        cache
            .update_cache(
                "session-1",
                "/secure/.*",
                &[String::from("/secure/.*")],
                Decision::Permit,
            )
            .unwrap();
        cache
            .update_cache(
                "session-1",
                "/secure/.*",
                &[String::from("/secure/admin/.*")],
                Decision::Deny,
            )
            .unwrap();
        assert_eq!(
            cache
                .make_cached_authz_decision("session-1", "/secure/admin/panel")
                .unwrap(),
            Decision::Deny
        );
        assert_eq!(
            cache
                .make_cached_authz_decision("session-1", "/secure/other")
                .unwrap(),
            Decision::Permit
        );
    }

    #[test]
    fn test_no_matching_target_uses_default_decision() {
        let deny_default = SessionGroupCacheImpl::new(Decision::Deny);
        deny_default.clear_cache(targets(&[("/secure/.*", &[])])).unwrap();
        deny_default
            .update_cache("s", "/secure/.*", &[], Decision::Permit)
            .unwrap();
        assert_eq!(
            deny_default
                .make_cached_authz_decision("s", "/public/index.html")
                .unwrap(),
            Decision::Deny
        );

        let permit_default = SessionGroupCacheImpl::new(Decision::Permit);
        permit_default.clear_cache(targets(&[("/secure/.*", &[])])).unwrap();
        permit_default
            .update_cache("s", "/secure/.*", &[], Decision::Permit)
            .unwrap();
        assert_eq!(
            permit_default
                .make_cached_authz_decision("s", "/public/index.html")
                .unwrap(),
            Decision::Permit
        );
    }

    #[test]
    fn test_match_is_anchored_to_whole_resource() {
        let cache = SessionGroupCacheImpl::new(Decision::Deny);
        cache.clear_cache(targets(&[("/secure", &[])])).unwrap();
        cache
            .update_cache("s", "/secure", &[String::from("/secure")], Decision::Permit)
            .unwrap();
        // "/secure" must not match "/secure/sub" as a substring would
        assert_eq!(
            cache.make_cached_authz_decision("s", "/secure/sub").unwrap(),
            Decision::Deny
        );
        assert_eq!(
            cache.make_cached_authz_decision("s", "/secure").unwrap(),
            Decision::Permit
        );
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let cache = initialized_cache();
        cache
            .update_cache("s", "/secure/.*", &[String::from("([unclosed")], Decision::Permit)
            .unwrap();
        let err = cache
            .make_cached_authz_decision("s", "/secure/docs/a")
            .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPattern(_)));
    }

    #[test]
    fn test_clear_cache_drops_session_decisions() {
        let cache = initialized_cache();
        cache
            .update_cache(
                "session-1",
                "/secure/.*",
                &[String::from("/secure/docs/.*")],
                Decision::Permit,
            )
            .unwrap();
        cache
            .clear_cache(targets(&[("/secure/.*", &["/secure/docs/.*"])]))
            .unwrap();
        assert_eq!(
            cache
                .make_cached_authz_decision("session-1", "/secure/docs/a")
                .unwrap(),
            Decision::Cache
        );
    }
}
