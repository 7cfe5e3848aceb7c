// Library interface for the SPEP session daemon
// This allows the daemon binary and integration tests to access internal modules

pub mod config;
pub mod identifier;
pub mod ipc;
pub mod pep;
pub mod sessions;
