//! Daemon-side TCP listener.
//!
//! Binds the loopback interface only; the daemon trusts anything that can
//! reach it, so nothing else may. Each accepted connection gets its own
//! thread running the header/dispatch loop until the peer goes away. The
//! accept loop polls a non-blocking listener so a shutdown flag flipped by a
//! signal handler is honoured within one poll interval.

use crate::ipc::dispatcher::Dispatcher;
use crate::ipc::engine::Engine;
use crate::ipc::message::{InvocationError, MessageType};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct ServerSocket {
    dispatcher: Arc<dyn Dispatcher>,
    port: u16,
    shutdown: Arc<AtomicBool>,
    service_id: String,
    listener: Option<TcpListener>,
}

impl ServerSocket {
    /// `port` may be 0 to bind an ephemeral port (used by tests); call
    /// [`local_port`](Self::local_port) after [`bind`](Self::bind) to learn
    /// which one was chosen.
    pub fn new(dispatcher: Arc<dyn Dispatcher>, port: u16, shutdown: Arc<AtomicBool>) -> Self {
        ServerSocket {
            dispatcher,
            port,
            shutdown,
            service_id: crate::identifier::generate_id(),
            listener: None,
        }
    }

    pub fn bind(&mut self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, self.port))?;
        listener.set_nonblocking(true)?;
        self.listener = Some(listener);
        Ok(())
    }

    pub fn local_port(&self) -> Option<u16> {
        self.listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|addr| addr.port())
    }

    /// Random per-boot identifier sent to every client on connect. Clients
    /// compare it across reconnections to detect a daemon restart.
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Accept connections until the shutdown flag is set. Blocks the calling
    /// thread; connection handling happens on spawned threads.
    pub fn run(&mut self) -> Result<(), std::io::Error> {
        if self.listener.is_none() {
            self.bind()?;
        }
        let listener = match self.listener.as_ref() {
            Some(l) => l,
            None => return Err(std::io::Error::from(ErrorKind::NotConnected)),
        };

        info!(port = self.local_port().unwrap_or(self.port), "daemon listening");

        while !self.shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted daemon client connection");
                    // The listener is non-blocking and the flag is inherited
                    // by accepted sockets on some platforms
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!(error = %e, "could not configure accepted connection");
                        continue;
                    }
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let service_id = self.service_id.clone();
                    thread::spawn(move || handle_connection(stream, dispatcher, service_id));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    warn!(error = %e, "error accepting connection");
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        info!("daemon listener shutting down");
        Ok(())
    }
}

fn handle_connection(stream: TcpStream, dispatcher: Arc<dyn Dispatcher>, service_id: String) {
    let mut engine = match Engine::from_stream(&stream) {
        Ok(engine) => engine,
        Err(e) => {
            warn!(error = %e, "could not set up engine for connection");
            return;
        }
    };

    // Identify this daemon instance before the first exchange
    if let Err(e) = engine.send_object(&service_id) {
        debug!(error = %e, "peer gone before service identification");
        return;
    }

    loop {
        let header = match engine.recv_request_header() {
            Ok(header) => header,
            Err(e) => {
                debug!(error = %e, "connection closed");
                break;
            }
        };

        match dispatcher.dispatch(&header, &mut engine) {
            Ok(true) => {}
            Ok(false) => {
                warn!(dispatch = %header.dispatch, "unhandled dispatch string");
                if header.message_type == MessageType::Request {
                    let err = InvocationError::new(
                        "Invocation",
                        "No dispatcher was available to handle the requested call.",
                    );
                    let sent = engine
                        .send_error_response_header()
                        .and_then(|_| engine.send_object(&err));
                    if sent.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, dispatch = %header.dispatch, "connection failed during dispatch");
                break;
            }
        }
    }

    let _ = stream.shutdown(Shutdown::Both);
}
