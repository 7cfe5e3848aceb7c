//! Transport error taxonomy.

use crate::ipc::codec::CodecError;
use crate::ipc::message::InvocationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    /// The connection failed at the socket level. Recoverable by reconnecting.
    #[error("transport failure: {0}")]
    Transport(#[source] std::io::Error),

    /// The byte stream could not be decoded. The connection position is
    /// unknown afterwards, so this is treated like a transport failure.
    #[error("codec failure: {0}")]
    Codec(#[source] CodecError),

    /// The peer sent a structurally valid but semantically wrong message,
    /// e.g. an unexpected header type in reply to a request.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The remote handler ran and failed. The connection is still usable.
    #[error("remote invocation failed: {0}")]
    Invocation(InvocationError),
}

impl IpcError {
    /// True when the error poisons the connection itself, meaning the only
    /// recovery is to discard the socket and reconnect.
    pub fn is_transport_level(&self) -> bool {
        matches!(self, IpcError::Transport(_) | IpcError::Codec(_))
    }
}

impl From<std::io::Error> for IpcError {
    fn from(e: std::io::Error) -> Self {
        IpcError::Transport(e)
    }
}

impl From<CodecError> for IpcError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(io) => IpcError::Transport(io),
            other => IpcError::Codec(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_level_classification() {
        let transport = IpcError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(transport.is_transport_level());

        let codec = IpcError::from(CodecError::Eof);
        assert!(codec.is_transport_level());

        let protocol = IpcError::Protocol("unexpected header".into());
        assert!(!protocol.is_transport_level());

        let invocation = IpcError::Invocation(InvocationError::new("NotFound", "gone"));
        assert!(!invocation.is_transport_level());
    }

    #[test]
    fn test_codec_io_error_is_transport() {
        let inner = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        let err = IpcError::from(CodecError::Io(inner));
        assert!(matches!(err, IpcError::Transport(_)));
    }
}
