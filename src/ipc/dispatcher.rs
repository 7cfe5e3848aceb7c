//! Request routing on the daemon side.

use crate::ipc::engine::Engine;
use crate::ipc::error::IpcError;
use crate::ipc::message::{InvocationError, MessageHeader, MessageType};
use tracing::{debug, error};

/// A handler for some prefix of the dispatch namespace.
///
/// Returns `Ok(false)` when the dispatch string is not one of its operations,
/// so the next dispatcher in the chain can be tried. `Ok(true)` means the
/// request was fully handled, including any response. Errors are either
/// transport failures (the connection is dead) or handler failures, which the
/// multiplexer translates into error responses.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, header: &MessageHeader, engine: &mut Engine) -> Result<bool, IpcError>;
}

/// Tries each registered dispatcher in order and performs error translation
/// so one failed invocation never tears down the connection.
#[derive(Default)]
pub struct MultiplexingDispatcher {
    dispatchers: Vec<Box<dyn Dispatcher>>,
}

impl MultiplexingDispatcher {
    pub fn new() -> Self {
        MultiplexingDispatcher {
            dispatchers: Vec::new(),
        }
    }

    pub fn add(&mut self, dispatcher: Box<dyn Dispatcher>) {
        self.dispatchers.push(dispatcher);
    }

    pub fn with(mut self, dispatcher: Box<dyn Dispatcher>) -> Self {
        self.add(dispatcher);
        self
    }
}

impl Dispatcher for MultiplexingDispatcher {
    fn dispatch(&self, header: &MessageHeader, engine: &mut Engine) -> Result<bool, IpcError> {
        for dispatcher in &self.dispatchers {
            match dispatcher.dispatch(header, engine) {
                Ok(true) => return Ok(true),
                Ok(false) => continue,
                Err(e) if e.is_transport_level() => return Err(e),
                Err(e) => {
                    // Handler failure: report it to a waiting caller, or just
                    // log it when nobody is listening.
                    let invocation = match e {
                        IpcError::Invocation(inv) => inv,
                        other => InvocationError::new("Invocation", &other.to_string()),
                    };
                    error!(
                        dispatch = %header.dispatch,
                        error = %invocation,
                        "handler failed"
                    );
                    if header.message_type == MessageType::Request {
                        engine.send_error_response_header()?;
                        engine.send_object(&invocation)?;
                    }
                    return Ok(true);
                }
            }
        }
        debug!(dispatch = %header.dispatch, "no dispatcher claimed request");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::message::MessageType;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn engine_pair() -> (Engine, Engine) {
        let (a, b) = UnixStream::pair().unwrap();
        let a2 = a.try_clone().unwrap();
        let b2 = b.try_clone().unwrap();
        (
            Engine::new(Box::new(a), Box::new(a2)),
            Engine::new(Box::new(b), Box::new(b2)),
        )
    }

    struct PrefixCounter {
        prefix: &'static str,
        hits: Arc<AtomicUsize>,
    }

    impl Dispatcher for PrefixCounter {
        fn dispatch(&self, header: &MessageHeader, engine: &mut Engine) -> Result<bool, IpcError> {
            if !header.dispatch.starts_with(self.prefix) {
                return Ok(false);
            }
            self.hits.fetch_add(1, Ordering::SeqCst);
            let _arg: u32 = engine.get_object()?;
            if header.message_type == MessageType::Request {
                engine.send_response_header()?;
                engine.send_object(&())?;
            }
            Ok(true)
        }
    }

    struct AlwaysFails;

    impl Dispatcher for AlwaysFails {
        fn dispatch(&self, header: &MessageHeader, engine: &mut Engine) -> Result<bool, IpcError> {
            if !header.dispatch.starts_with("fail/") {
                return Ok(false);
            }
            let _arg: u32 = engine.get_object()?;
            Err(IpcError::Invocation(InvocationError::new(
                "Invocation",
                "handler exploded",
            )))
        }
    }

    #[test]
    fn test_routes_by_prefix_in_order() {
        let hits_a = Arc::new(AtomicUsize::new(0));
        let hits_b = Arc::new(AtomicUsize::new(0));
        let mux = MultiplexingDispatcher::new()
            .with(Box::new(PrefixCounter {
                prefix: "a/",
                hits: Arc::clone(&hits_a),
            }))
            .with(Box::new(PrefixCounter {
                prefix: "b/",
                hits: Arc::clone(&hits_b),
            }));

        let (mut client, mut server) = engine_pair();
        client.make_nonblocking_request("b/Thing/poke", &1u32).unwrap();
        let header = server.recv_request_header().unwrap();
        assert!(mux.dispatch(&header, &mut server).unwrap());
        assert_eq!(hits_a.load(Ordering::SeqCst), 0);
        assert_eq!(hits_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unclaimed_dispatch_returns_false() {
        let mux = MultiplexingDispatcher::new().with(Box::new(PrefixCounter {
            prefix: "a/",
            hits: Arc::new(AtomicUsize::new(0)),
        }));

        let (mut client, mut server) = engine_pair();
        client
            .make_nonblocking_request("unknown/Thing/poke", &1u32)
            .unwrap();
        let header = server.recv_request_header().unwrap();
        assert!(!mux.dispatch(&header, &mut server).unwrap());
    }

    #[test]
    fn test_handler_failure_becomes_error_response() {
        let mux = MultiplexingDispatcher::new().with(Box::new(AlwaysFails));

        let (mut client, mut server) = engine_pair();
        let server_thread = std::thread::spawn(move || {
            let header = server.recv_request_header().unwrap();
            assert!(mux.dispatch(&header, &mut server).unwrap());
        });

        let err = client
            .make_request::<u32, ()>("fail/Thing/explode", &1)
            .unwrap_err();
        match err {
            IpcError::Invocation(inv) => assert_eq!(inv.message, "handler exploded"),
            other => panic!("expected invocation error, got {:?}", other),
        }
        server_thread.join().unwrap();
    }

    #[test]
    fn test_handler_failure_on_nonblocking_is_swallowed() {
        let mux = MultiplexingDispatcher::new().with(Box::new(AlwaysFails));

        let (mut client, mut server) = engine_pair();
        client
            .make_nonblocking_request("fail/Thing/explode", &1u32)
            .unwrap();
        let header = server.recv_request_header().unwrap();
        // Handled (and logged), no response written
        assert!(mux.dispatch(&header, &mut server).unwrap());
    }
}
