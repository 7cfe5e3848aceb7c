//! Message framing for the daemon protocol.
//!
//! Every exchange starts with a [`MessageHeader`]. Requests and non-blocking
//! requests carry a dispatch string naming the remote operation; responses
//! carry none. An error response is followed on the wire by an
//! [`InvocationError`] describing what went wrong on the daemon side.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message type discriminator, encoded as a variant index on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Caller expects a response.
    Request,
    /// Successful response; the result object follows.
    Response,
    /// Failed invocation; an [`InvocationError`] follows.
    ResponseError,
    /// Fire-and-forget request; no response will be sent.
    NonBlocking,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub message_type: MessageType,
    /// Remote operation name, e.g. `spep/sessions/SessionCache/getPrincipalSession`.
    /// Empty for responses.
    pub dispatch: String,
}

impl MessageHeader {
    pub fn request(dispatch: &str) -> Self {
        MessageHeader {
            message_type: MessageType::Request,
            dispatch: dispatch.to_string(),
        }
    }

    pub fn nonblocking(dispatch: &str) -> Self {
        MessageHeader {
            message_type: MessageType::NonBlocking,
            dispatch: dispatch.to_string(),
        }
    }

    pub fn response() -> Self {
        MessageHeader {
            message_type: MessageType::Response,
            dispatch: String::new(),
        }
    }

    pub fn error_response() -> Self {
        MessageHeader {
            message_type: MessageType::ResponseError,
            dispatch: String::new(),
        }
    }
}

/// A daemon-side failure carried back over the wire in an error response.
///
/// `kind` is a stable tag the proxies use to reconstruct the typed cache
/// error on the client side; `message` is human-readable detail (or the
/// structured payload for kinds that carry one, such as the duplicate
/// identifier itself).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct InvocationError {
    pub kind: String,
    pub message: String,
}

impl InvocationError {
    pub fn new(kind: &str, message: &str) -> Self {
        InvocationError {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::codec::{from_reader, to_bytes};

    #[test]
    fn test_header_round_trip() {
        let header = MessageHeader::request("spep/sessions/SessionCache/getPrincipalSession");
        let bytes = to_bytes(&header).unwrap();
        let decoded: MessageHeader = from_reader(bytes.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_response_header_has_empty_dispatch() {
        let bytes = to_bytes(&MessageHeader::response()).unwrap();
        let decoded: MessageHeader = from_reader(bytes.as_slice()).unwrap();
        assert_eq!(decoded.message_type, MessageType::Response);
        assert!(decoded.dispatch.is_empty());
    }

    #[test]
    fn test_invocation_error_round_trip() {
        let err = InvocationError::new("NotFound", "no session for identifier");
        let bytes = to_bytes(&err).unwrap();
        let decoded: InvocationError = from_reader(bytes.as_slice()).unwrap();
        assert_eq!(decoded, err);
        assert_eq!(decoded.to_string(), "NotFound: no session for identifier");
    }
}
