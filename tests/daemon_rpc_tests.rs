//! End-to-end tests running a real daemon listener on an ephemeral loopback
//! port, with clients talking to it through the connection pool and the
//! remote cache proxies.

use spepd::identifier::{
    IdentifierCache, IdentifierCacheDispatcher, IdentifierCacheImpl, IdentifierCacheProxy,
    IdentifierError,
};
use spepd::ipc::{ClientPool, IpcError, MultiplexingDispatcher, ServerSocket};
use spepd::pep::{
    Decision, SessionGroupCache, SessionGroupCacheDispatcher, SessionGroupCacheImpl,
    SessionGroupCacheProxy,
};
use spepd::sessions::{
    PrincipalSession, SessionCache, SessionCacheDispatcher, SessionCacheImpl, SessionCacheProxy,
    SessionError, UnauthenticatedSession,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct TestDaemon {
    port: u16,
    service_id: String,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TestDaemon {
    fn start() -> Self {
        Self::start_with_default_decision(Decision::Deny)
    }

    fn start_with_default_decision(default_decision: Decision) -> Self {
        let session_cache: Arc<dyn SessionCache> = Arc::new(SessionCacheImpl::new());
        let group_cache: Arc<dyn SessionGroupCache> =
            Arc::new(SessionGroupCacheImpl::new(default_decision));
        let identifier_cache: Arc<dyn IdentifierCache> = Arc::new(IdentifierCacheImpl::new());

        let dispatcher = MultiplexingDispatcher::new()
            .with(Box::new(SessionCacheDispatcher::new(session_cache)))
            .with(Box::new(SessionGroupCacheDispatcher::new(group_cache)))
            .with(Box::new(IdentifierCacheDispatcher::new(identifier_cache)));

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut server = ServerSocket::new(Arc::new(dispatcher), 0, Arc::clone(&shutdown));
        server.bind().unwrap();
        let port = server.local_port().unwrap();
        let service_id = server.service_id().to_string();

        let handle = thread::spawn(move || {
            server.run().unwrap();
        });

        TestDaemon {
            port,
            service_id,
            shutdown,
            handle: Some(handle),
        }
    }

    fn pool(&self, size: usize) -> Arc<ClientPool> {
        ClientPool::new(self.port, size)
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

fn live_session(esoe_id: &str) -> PrincipalSession {
    PrincipalSession::new(esoe_id, chrono::Utc::now() + chrono::Duration::hours(1))
}

#[test]
fn test_unauthenticated_session_round_trip_over_rpc() {
    let daemon = TestDaemon::start();
    let sessions = SessionCacheProxy::new(daemon.pool(2));

    let parked = UnauthenticatedSession::new("req-42", "https://sp.example.com/deep/link?q=1");
    sessions.insert_unauthenticated_session(parked.clone()).unwrap();

    let fetched = sessions.get_unauthenticated_session("req-42").unwrap();
    assert_eq!(fetched, parked);

    sessions.terminate_unauthenticated_session("req-42").unwrap();
    assert_eq!(
        sessions.get_unauthenticated_session("req-42").unwrap_err(),
        SessionError::NotFound
    );
}

#[test]
fn test_principal_session_round_trip_over_rpc() {
    let daemon = TestDaemon::start();
    let sessions = SessionCacheProxy::new(daemon.pool(2));

    let mut session = live_session("esoe-9");
    session.add_esoe_session_index("idx-1", "local-1");
    session
        .attributes
        .insert(String::from("mail"), vec![String::from("user@example.com")]);
    sessions.insert_principal_session("local-1", session).unwrap();

    let by_local = sessions.get_principal_session("local-1").unwrap();
    assert_eq!(by_local.esoe_session_id, "esoe-9");
    assert_eq!(
        by_local.attributes.get("mail"),
        Some(&vec![String::from("user@example.com")])
    );

    let by_esoe = sessions
        .get_principal_session_by_esoe_session_id("esoe-9")
        .unwrap();
    assert_eq!(by_esoe.session_id_list, by_local.session_id_list);

    sessions.terminate_principal_session("esoe-9").unwrap();
    assert_eq!(
        sessions.get_principal_session("local-1").unwrap_err(),
        SessionError::NotFound
    );
}

#[test]
fn test_invalid_parameter_crosses_the_wire_typed() {
    let daemon = TestDaemon::start();
    let sessions = SessionCacheProxy::new(daemon.pool(1));

    let err = sessions
        .insert_principal_session("local-1", live_session(""))
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidParameter(_)));
}

#[test]
fn test_duplicate_identifier_crosses_the_wire_typed() {
    let daemon = TestDaemon::start();
    let identifiers = IdentifierCacheProxy::new(daemon.pool(2));

    identifiers.register_identifier("saml-msg-1").unwrap();
    assert!(identifiers.contains_identifier("saml-msg-1").unwrap());
    assert!(!identifiers.contains_identifier("saml-msg-2").unwrap());

    let err = identifiers.register_identifier("saml-msg-1").unwrap_err();
    assert_eq!(err, IdentifierError::Duplicate(String::from("saml-msg-1")));
}

#[test]
fn test_authz_flow_over_rpc() {
    let daemon = TestDaemon::start();
    let authz = SessionGroupCacheProxy::new(daemon.pool(2));

    // Before any policy arrives, every decision is an error
    assert_eq!(
        authz.make_cached_authz_decision("s-1", "/secure/a").unwrap(),
        Decision::Error
    );

    let mut targets = HashMap::new();
    targets.insert(
        String::from("/secure/.*"),
        vec![String::from("/secure/.*")],
    );
    authz.clear_cache(targets.clone()).unwrap();

    // Initialized, but this session has no decisions yet
    assert_eq!(
        authz.make_cached_authz_decision("s-1", "/secure/a").unwrap(),
        Decision::Cache
    );

    authz
        .update_cache(
            "s-1",
            "/secure/.*",
            &[String::from("/secure/.*")],
            Decision::Permit,
        )
        .unwrap();
    assert_eq!(
        authz.make_cached_authz_decision("s-1", "/secure/a").unwrap(),
        Decision::Permit
    );

    // Unmatched resource falls back to the default policy decision
    assert_eq!(
        authz.make_cached_authz_decision("s-1", "/public/x").unwrap(),
        Decision::Deny
    );

    // A new policy set drops every per-session decision
    authz.clear_cache(targets).unwrap();
    assert_eq!(
        authz.make_cached_authz_decision("s-1", "/secure/a").unwrap(),
        Decision::Cache
    );
}

#[test]
fn test_unknown_dispatch_yields_invocation_error() {
    let daemon = TestDaemon::start();
    let pool = daemon.pool(1);

    let mut lease = pool.lease();
    let err = lease
        .make_request::<str, ()>("spep/metadata/Metadata/bogusCall", "arg")
        .unwrap_err();
    match err {
        IpcError::Invocation(inv) => {
            assert!(inv.message.contains("No dispatcher was available"));
        }
        other => panic!("expected invocation error, got {:?}", other),
    }

    // The connection survives the failed call
    drop(lease);
    let identifiers = IdentifierCacheProxy::new(pool);
    identifiers.register_identifier("still-works").unwrap();
}

#[test]
fn test_service_id_handshake() {
    let daemon = TestDaemon::start();
    let pool = daemon.pool(1);
    assert!(pool.service_id().is_empty());

    let identifiers = IdentifierCacheProxy::new(Arc::clone(&pool));
    identifiers.register_identifier("any").unwrap();

    assert_eq!(pool.service_id(), daemon.service_id);

    // Stable across further requests
    identifiers.register_identifier("other").unwrap();
    assert_eq!(pool.service_id(), daemon.service_id);
}

#[test]
fn test_concurrent_clients_share_consistent_state() {
    let daemon = TestDaemon::start();
    let pool = daemon.pool(4);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        handles.push(thread::spawn(move || {
            let identifiers = IdentifierCacheProxy::new(pool);
            identifiers.register_identifier("contested").is_ok()
        }));
    }

    let wins: usize = handles
        .into_iter()
        .map(|h| usize::from(h.join().unwrap()))
        .sum();
    assert_eq!(wins, 1, "exactly one registration may succeed");
}

#[test]
fn test_pool_blocks_at_capacity_but_makes_progress() {
    let daemon = TestDaemon::start();
    let pool = daemon.pool(1);

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..4 {
        let pool = Arc::clone(&pool);
        handles.push(thread::spawn(move || {
            let identifiers = IdentifierCacheProxy::new(pool);
            identifiers.register_identifier(&format!("id-{}", i)).unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    // Four sequentialized requests through one connection, without deadlock
    assert!(start.elapsed() < Duration::from_secs(10));
}
