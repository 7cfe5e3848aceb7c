//! Synchronous RPC engine over a single connection.
//!
//! One engine owns both directions of a stream. A connection carries exactly
//! one exchange at a time: the client writes a header and a request object,
//! then (for blocking requests) reads a header and a response object. The
//! engine itself never retries; reconnection policy lives in
//! [`crate::ipc::client::ClientConnection`].

use crate::ipc::codec;
use crate::ipc::error::IpcError;
use crate::ipc::message::{InvocationError, MessageHeader, MessageType};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufReader, Read, Write};
use std::net::TcpStream;

pub struct Engine {
    reader: BufReader<Box<dyn Read + Send>>,
    writer: Box<dyn Write + Send>,
}

impl Engine {
    pub fn new(reader: Box<dyn Read + Send>, writer: Box<dyn Write + Send>) -> Self {
        Engine {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Build an engine over a TCP stream by cloning the handle for each
    /// direction.
    pub fn from_stream(stream: &TcpStream) -> Result<Self, IpcError> {
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        Ok(Engine::new(Box::new(reader), Box::new(writer)))
    }

    /// Encode and send one object, flushing so the peer sees it immediately.
    pub fn send_object<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), IpcError> {
        let bytes = codec::to_bytes(value)?;
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Decode one object from the stream, blocking until it arrives.
    pub fn get_object<T: DeserializeOwned>(&mut self) -> Result<T, IpcError> {
        Ok(codec::from_reader(&mut self.reader)?)
    }

    /// Send a request and block for its response.
    pub fn make_request<Req, Res>(&mut self, dispatch: &str, request: &Req) -> Result<Res, IpcError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.send_object(&MessageHeader::request(dispatch))?;
        self.send_object(request)?;

        let header: MessageHeader = self.get_object()?;
        match header.message_type {
            MessageType::Response => self.get_object(),
            MessageType::ResponseError => {
                let err: InvocationError = self.get_object()?;
                Err(IpcError::Invocation(err))
            }
            other => Err(IpcError::Protocol(format!(
                "unexpected {:?} header in reply to a request",
                other
            ))),
        }
    }

    /// Send a fire-and-forget request. Returns as soon as the bytes are
    /// written; the daemon sends no acknowledgement.
    pub fn make_nonblocking_request<Req>(
        &mut self,
        dispatch: &str,
        request: &Req,
    ) -> Result<(), IpcError>
    where
        Req: Serialize + ?Sized,
    {
        self.send_object(&MessageHeader::nonblocking(dispatch))?;
        self.send_object(request)
    }

    /// Server side: read the next inbound header, rejecting anything a client
    /// has no business sending.
    pub fn recv_request_header(&mut self) -> Result<MessageHeader, IpcError> {
        let header: MessageHeader = self.get_object()?;
        match header.message_type {
            MessageType::Request | MessageType::NonBlocking => {
                if header.dispatch.is_empty() {
                    return Err(IpcError::Protocol(
                        "request header with empty dispatch string".into(),
                    ));
                }
                Ok(header)
            }
            other => Err(IpcError::Protocol(format!(
                "inbound {:?} header on server connection",
                other
            ))),
        }
    }

    pub fn send_response_header(&mut self) -> Result<(), IpcError> {
        self.send_object(&MessageHeader::response())
    }

    pub fn send_error_response_header(&mut self) -> Result<(), IpcError> {
        self.send_object(&MessageHeader::error_response())
    }
}
