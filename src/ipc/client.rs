//! Client-side connection handling: transparent reconnection and a bounded
//! blocking connection pool.
//!
//! Web-server workers hold a pool sized for their worst-case concurrency.
//! Every remote call leases a connection, runs exactly one exchange on it and
//! returns it. When the daemon is down, callers block inside the retry loop
//! until it comes back; daemon restarts are observable through the service ID
//! the daemon sends on every accepted connection.

use crate::ipc::engine::Engine;
use crate::ipc::error::IpcError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, TcpStream};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Pause between reconnection attempts once the first one has failed, so a
/// downed daemon is polled rather than hammered.
const RECONNECT_DELAY: Duration = Duration::from_millis(200);

/// A single connection to the daemon, lazily established.
///
/// `make_request` never gives up on transport failure: the socket is
/// discarded and reconnection is retried indefinitely, so callers see at
/// worst a stall while the daemon restarts, never a spurious error.
pub struct ClientConnection {
    port: u16,
    engine: Option<Engine>,
    service_id: Arc<Mutex<String>>,
}

impl ClientConnection {
    pub fn new(port: u16, service_id: Arc<Mutex<String>>) -> Self {
        ClientConnection {
            port,
            engine: None,
            service_id,
        }
    }

    /// Invoke a remote operation, blocking until the daemon answers.
    ///
    /// Invocation errors and protocol violations are returned to the caller;
    /// transport failures trigger reconnection and a retry of the whole
    /// exchange.
    pub fn make_request<Req, Res>(&mut self, dispatch: &str, request: &Req) -> Result<Res, IpcError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let mut attempt: u64 = 0;
        loop {
            if let Some(engine) = self.engine.as_mut() {
                match engine.make_request(dispatch, request) {
                    Ok(result) => return Ok(result),
                    Err(e) if e.is_transport_level() => {
                        warn!(dispatch, error = %e, "daemon connection lost, reconnecting");
                        self.engine = None;
                    }
                    Err(e) => {
                        // The stream position is untrustworthy after a
                        // protocol violation; drop the connection but report
                        // the failure instead of retrying.
                        if matches!(e, IpcError::Protocol(_)) {
                            self.engine = None;
                        }
                        return Err(e);
                    }
                }
            }
            self.try_connect(attempt);
            attempt += 1;
        }
    }

    /// Invoke a fire-and-forget remote operation.
    pub fn make_nonblocking_request<Req>(
        &mut self,
        dispatch: &str,
        request: &Req,
    ) -> Result<(), IpcError>
    where
        Req: Serialize + ?Sized,
    {
        let mut attempt: u64 = 0;
        loop {
            if let Some(engine) = self.engine.as_mut() {
                match engine.make_nonblocking_request(dispatch, request) {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_transport_level() => {
                        warn!(dispatch, error = %e, "daemon connection lost, reconnecting");
                        self.engine = None;
                    }
                    Err(e) => return Err(e),
                }
            }
            self.try_connect(attempt);
            attempt += 1;
        }
    }

    /// One connection attempt. On success the engine is installed and the
    /// daemon's service ID recorded; on failure the connection stays down and
    /// the caller loops.
    fn try_connect(&mut self, attempt: u64) {
        if attempt > 0 {
            thread::sleep(RECONNECT_DELAY);
        }
        let stream = match TcpStream::connect((Ipv4Addr::LOCALHOST, self.port)) {
            Ok(s) => s,
            Err(e) => {
                debug!(port = self.port, error = %e, "daemon connection attempt failed");
                return;
            }
        };
        let _ = stream.set_nodelay(true);
        let mut engine = match Engine::from_stream(&stream) {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "failed to set up engine on new connection");
                return;
            }
        };
        // The daemon identifies itself before anything else; a changed ID
        // tells the pool the daemon has restarted and lost its state.
        match engine.get_object::<String>() {
            Ok(id) => {
                let mut current = self.service_id.lock().unwrap();
                if !current.is_empty() && *current != id {
                    warn!(old = %current, new = %id, "daemon service ID changed; daemon restarted");
                }
                *current = id;
                self.engine = Some(engine);
            }
            Err(e) => {
                debug!(error = %e, "no service identifier from daemon");
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_some()
    }
}

/// Bounded pool of daemon connections shared by all threads of a worker
/// process. `acquire` blocks while every connection is leased out.
pub struct ClientPool {
    connections: Mutex<VecDeque<ClientConnection>>,
    available: Condvar,
    service_id: Arc<Mutex<String>>,
    port: u16,
}

impl ClientPool {
    pub fn new(port: u16, size: usize) -> Arc<Self> {
        let service_id = Arc::new(Mutex::new(String::new()));
        let connections = (0..size.max(1))
            .map(|_| ClientConnection::new(port, Arc::clone(&service_id)))
            .collect();
        Arc::new(ClientPool {
            connections: Mutex::new(connections),
            available: Condvar::new(),
            service_id,
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The service ID of the daemon this pool last connected to, or empty if
    /// no connection has been established yet.
    pub fn service_id(&self) -> String {
        self.service_id.lock().unwrap().clone()
    }

    pub fn acquire(&self) -> ClientConnection {
        let mut free = self.connections.lock().unwrap();
        loop {
            if let Some(connection) = free.pop_front() {
                return connection;
            }
            free = self.available.wait(free).unwrap();
        }
    }

    pub fn release(&self, connection: ClientConnection) {
        self.connections.lock().unwrap().push_back(connection);
        self.available.notify_one();
    }

    /// Lease a connection; it is returned to the pool when the guard drops.
    pub fn lease(self: &Arc<Self>) -> ClientLease {
        ClientLease {
            connection: Some(self.acquire()),
            pool: Arc::clone(self),
        }
    }
}

/// RAII lease on a pooled connection.
pub struct ClientLease {
    pool: Arc<ClientPool>,
    connection: Option<ClientConnection>,
}

impl Deref for ClientLease {
    type Target = ClientConnection;

    fn deref(&self) -> &ClientConnection {
        // Present from construction until drop
        self.connection.as_ref().unwrap()
    }
}

impl DerefMut for ClientLease {
    fn deref_mut(&mut self) -> &mut ClientConnection {
        self.connection.as_mut().unwrap()
    }
}

impl Drop for ClientLease {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection);
        }
    }
}
