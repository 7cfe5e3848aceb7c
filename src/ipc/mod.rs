//! Loopback RPC transport for the SPEP daemon.
//!
//! All communication between web-server worker processes and the daemon runs
//! over this transport: a textual length-prefixed wire codec, a synchronous
//! request/response engine, a prefix-routed dispatcher chain on the daemon
//! side, and a bounded blocking connection pool on the client side.

pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod message;
pub mod server;

pub use client::{ClientConnection, ClientLease, ClientPool};
pub use codec::CodecError;
pub use dispatcher::{Dispatcher, MultiplexingDispatcher};
pub use engine::Engine;
pub use error::IpcError;
pub use message::{InvocationError, MessageHeader, MessageType};
pub use server::ServerSocket;
