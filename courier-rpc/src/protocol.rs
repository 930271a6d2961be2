//! Wire protocol constants and message types
//!
//! Every frame on a Courier connection has the layout
//!
//! ```text
//! +--------+--------------+-----------------+-------------+------------+
//! | magic  | payload kind | serializer code | body length |    body    |
//! | 4 B BE | 4 B BE       | 4 B BE          | 4 B BE      | length B   |
//! +--------+--------------+-----------------+-------------+------------+
//! ```
//!
//! The body is a [`CallRequest`] or [`CallResponse`] encoded with the
//! serializer named in the header.

use courier_core::{CallRequest, CallResponse, Error, Result};

/// Identifies a Courier frame
pub const MAGIC_NUMBER: u32 = 0x7746_6258;

/// Length of the fixed frame header
pub const HEADER_LEN: usize = 16;

/// Largest body accepted unless configured otherwise
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// What a frame body contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Request,
    Response,
}

impl PayloadKind {
    pub fn code(&self) -> u32 {
        match self {
            PayloadKind::Request => 0,
            PayloadKind::Response => 1,
        }
    }

    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(PayloadKind::Request),
            1 => Ok(PayloadKind::Response),
            other => Err(Error::Protocol(format!("Unknown payload kind: {}", other))),
        }
    }
}

/// A decoded frame body
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request(CallRequest),
    Response(CallResponse),
}

impl RpcMessage {
    pub fn kind(&self) -> PayloadKind {
        match self {
            RpcMessage::Request(_) => PayloadKind::Request,
            RpcMessage::Response(_) => PayloadKind::Response,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            RpcMessage::Request(request) => &request.request_id,
            RpcMessage::Response(response) => &response.request_id,
        }
    }
}

impl From<CallRequest> for RpcMessage {
    fn from(request: CallRequest) -> Self {
        RpcMessage::Request(request)
    }
}

impl From<CallResponse> for RpcMessage {
    fn from(response: CallResponse) -> Self {
        RpcMessage::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_kind_codes() {
        assert_eq!(PayloadKind::from_code(0).unwrap(), PayloadKind::Request);
        assert_eq!(PayloadKind::from_code(1).unwrap(), PayloadKind::Response);
        assert!(matches!(PayloadKind::from_code(7), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_message_kind() {
        let request = CallRequest::new("HelloService", "hello", vec![], vec![]);
        let id = request.request_id.clone();
        let message = RpcMessage::from(request);
        assert_eq!(message.kind(), PayloadKind::Request);
        assert_eq!(message.request_id(), id);
    }
}
