//! Daemon configuration parsing from spepd.conf
//!
//! Parses a shell-style KEY=value file:
//! - SPEP_DAEMON_PORT (loopback TCP port, default 7142)
//! - SPEP_CLIENT_POOL_SIZE (connections per worker process, default 5)
//! - SPEP_SESSION_CACHE_TIMEOUT (seconds before idle/expired sessions are swept)
//! - SPEP_SESSION_CACHE_INTERVAL (seconds between sweeps)
//! - SPEP_IDENTIFIER_CACHE_TIMEOUT (seconds before seen identifiers are swept)
//! - SPEP_DEFAULT_POLICY_DECISION (permit or deny, for resources no policy covers)

use crate::pep::Decision;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Loopback TCP port the daemon listens on.
    pub port: u16,
    /// Connections each client pool pre-allocates.
    pub client_pool_size: usize,
    /// Seconds before idle unauthenticated sessions are swept.
    pub session_cache_timeout: u32,
    /// Seconds between background sweep passes.
    pub session_cache_interval: u64,
    /// Seconds a registered identifier is retained for replay detection.
    pub identifier_cache_timeout: u64,
    /// Decision for resources no policy target matches. Deny unless
    /// explicitly configured otherwise.
    pub default_policy_decision: Decision,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            port: 7142,
            client_pool_size: 5,
            session_cache_timeout: 3600,
            session_cache_interval: 120,
            identifier_cache_timeout: 3600,
            default_policy_decision: Decision::Deny,
        }
    }
}

impl DaemonConfig {
    /// Load from the default config path, falling back to defaults when the
    /// file is absent or unreadable.
    pub fn load() -> Self {
        Self::from_file(&Self::config_path()).unwrap_or_default()
    }

    /// Get the path to spepd.conf
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".spep")
            .join("spepd.conf")
    }

    /// Parse configuration from a specific file
    pub fn from_file(path: &PathBuf) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        Some(Self::parse(&content))
    }

    /// Parse configuration from content string. Unknown keys and
    /// unparseable values are ignored, leaving the default in place.
    pub fn parse(content: &str) -> Self {
        let mut config = DaemonConfig::default();

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // Parse variable assignments (handle both = and export)
            let line = line.strip_prefix("export ").unwrap_or(line);

            if let Some((key, value)) = parse_assignment(line) {
                let value = unquote(&value);

                match key.as_str() {
                    "SPEP_DAEMON_PORT" => {
                        if let Ok(port) = value.parse() {
                            config.port = port;
                        }
                    }
                    "SPEP_CLIENT_POOL_SIZE" => {
                        if let Ok(size) = value.parse() {
                            config.client_pool_size = size;
                        }
                    }
                    "SPEP_SESSION_CACHE_TIMEOUT" => {
                        if let Ok(secs) = value.parse() {
                            config.session_cache_timeout = secs;
                        }
                    }
                    "SPEP_SESSION_CACHE_INTERVAL" => {
                        if let Ok(secs) = value.parse() {
                            config.session_cache_interval = secs;
                        }
                    }
                    "SPEP_IDENTIFIER_CACHE_TIMEOUT" => {
                        if let Ok(secs) = value.parse() {
                            config.identifier_cache_timeout = secs;
                        }
                    }
                    "SPEP_DEFAULT_POLICY_DECISION" => {
                        match value.to_lowercase().as_str() {
                            "permit" => config.default_policy_decision = Decision::Permit,
                            "deny" => config.default_policy_decision = Decision::Deny,
                            _ => {}
                        }
                    }
                    _ => {}
                }
            }
        }

        config
    }
}

/// Parse a shell variable assignment (KEY=value or KEY="value")
fn parse_assignment(line: &str) -> Option<(String, String)> {
    let eq_pos = line.find('=')?;
    let key = line[..eq_pos].trim().to_string();
    let value = line[eq_pos + 1..].trim().to_string();

    // Validate key is a valid identifier
    if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }

    Some((key, value))
}

/// Remove surrounding quotes from a value
fn unquote(s: &str) -> String {
    let s = s.trim();

    if s.starts_with('"') && s.ends_with('"') && s.len() >= 2 {
        return s[1..s.len() - 1].to_string();
    }

    if s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2 {
        return s[1..s.len() - 1].to_string();
    }

    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = DaemonConfig::parse("");
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.port, 7142);
        assert_eq!(config.default_policy_decision, Decision::Deny);
    }

    #[test]
    fn test_parse_full_config() {
        let content = r#"
# SPEP daemon settings
SPEP_DAEMON_PORT=7200
SPEP_CLIENT_POOL_SIZE=20
SPEP_SESSION_CACHE_TIMEOUT=1800
SPEP_SESSION_CACHE_INTERVAL=60
SPEP_IDENTIFIER_CACHE_TIMEOUT=900
SPEP_DEFAULT_POLICY_DECISION="permit"
"#;
        let config = DaemonConfig::parse(content);
        assert_eq!(config.port, 7200);
        assert_eq!(config.client_pool_size, 20);
        assert_eq!(config.session_cache_timeout, 1800);
        assert_eq!(config.session_cache_interval, 60);
        assert_eq!(config.identifier_cache_timeout, 900);
        assert_eq!(config.default_policy_decision, Decision::Permit);
    }

    #[test]
    fn test_parse_with_export_and_quotes() {
        let content = r#"
export SPEP_DAEMON_PORT='7300'
export SPEP_DEFAULT_POLICY_DECISION="Deny"
"#;
        let config = DaemonConfig::parse(content);
        assert_eq!(config.port, 7300);
        assert_eq!(config.default_policy_decision, Decision::Deny);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let content = r#"
SPEP_DAEMON_PORT=notaport
SPEP_DEFAULT_POLICY_DECISION=maybe
SPEP_CLIENT_POOL_SIZE=-3
"#;
        let config = DaemonConfig::parse(content);
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spepd.conf");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "SPEP_DAEMON_PORT=7500").unwrap();

        let config = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 7500);

        let missing = dir.path().join("missing.conf");
        assert!(DaemonConfig::from_file(&missing).is_none());
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"hello\""), "hello");
        assert_eq!(unquote("'hello'"), "hello");
        assert_eq!(unquote("hello"), "hello");
        assert_eq!(unquote("  \"hello\"  "), "hello");
    }
}
