//! Call request and response entities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status carried by every [`CallResponse`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseCode {
    /// Method ran and returned a value
    Success,
    /// Method ran and failed
    Failure,
    /// No method with the requested name and parameter types
    MethodNotFound,
    /// No service registered under the requested interface name
    ServiceNotFound,
}

impl ResponseCode {
    pub fn code(&self) -> u16 {
        match self {
            ResponseCode::Success => 200,
            ResponseCode::Failure => 500,
            ResponseCode::MethodNotFound => 501,
            ResponseCode::ServiceNotFound => 502,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ResponseCode::Success => "Method invoked successfully",
            ResponseCode::Failure => "Method invocation failed",
            ResponseCode::MethodNotFound => "Method not found",
            ResponseCode::ServiceNotFound => "Service not found",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseCode::Success)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Request sent by a consumer to a provider.
///
/// Each argument is already encoded by the serializer negotiated for the
/// connection, so the request itself stays format-agnostic. `param_types`
/// carries the ordered type descriptors the server uses to pick an overload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    pub request_id: String,
    pub interface_name: String,
    pub method_name: String,
    pub parameters: Vec<Vec<u8>>,
    pub param_types: Vec<String>,
    pub heartbeat: bool,
}

impl CallRequest {
    /// Create a request with a freshly generated identifier
    pub fn new(
        interface_name: impl Into<String>,
        method_name: impl Into<String>,
        parameters: Vec<Vec<u8>>,
        param_types: Vec<String>,
    ) -> Self {
        Self {
            request_id: generate_request_id(),
            interface_name: interface_name.into(),
            method_name: method_name.into(),
            parameters,
            param_types,
            heartbeat: false,
        }
    }

    /// Create a keep-alive request that bypasses dispatch
    pub fn heartbeat() -> Self {
        Self {
            request_id: generate_request_id(),
            interface_name: String::new(),
            method_name: String::new(),
            parameters: Vec::new(),
            param_types: Vec::new(),
            heartbeat: true,
        }
    }

    /// Stable textual form of the argument list, used as a routing key
    pub fn arguments_key(&self) -> String {
        format!("{:?}", self.parameters)
    }
}

/// Response returned by a provider once the call has been handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResponse {
    pub request_id: String,
    pub status: ResponseCode,
    pub message: Option<String>,
    pub data: Option<Vec<u8>>,
}

impl CallResponse {
    pub fn success(request_id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseCode::Success,
            message: None,
            data: Some(data),
        }
    }

    pub fn fail(request_id: impl Into<String>, status: ResponseCode) -> Self {
        Self {
            request_id: request_id.into(),
            status,
            message: Some(status.message().to_string()),
            data: None,
        }
    }

    pub fn fail_with_message(
        request_id: impl Into<String>,
        status: ResponseCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            status,
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Generate a unique request ID
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = CallRequest::new("HelloService", "hello", vec![], vec![]);
        let b = CallRequest::new("HelloService", "hello", vec![], vec![]);
        assert_ne!(a.request_id, b.request_id);
        assert!(!a.heartbeat);
    }

    #[test]
    fn test_heartbeat_request() {
        let request = CallRequest::heartbeat();
        assert!(request.heartbeat);
        assert!(request.interface_name.is_empty());
        assert!(request.parameters.is_empty());
    }

    #[test]
    fn test_arguments_key_is_stable() {
        let a = CallRequest::new("S", "m", vec![b"x".to_vec(), vec![1, 2]], vec![]);
        let b = CallRequest::new("S", "m", vec![b"x".to_vec(), vec![1, 2]], vec![]);
        let c = CallRequest::new("S", "m", vec![b"y".to_vec()], vec![]);
        assert_eq!(a.arguments_key(), b.arguments_key());
        assert_ne!(a.arguments_key(), c.arguments_key());
    }

    #[test]
    fn test_response_constructors() {
        let ok = CallResponse::success("abc", b"payload".to_vec());
        assert!(ok.status.is_success());
        assert_eq!(ok.data.as_deref(), Some(&b"payload"[..]));

        let missing = CallResponse::fail("abc", ResponseCode::MethodNotFound);
        assert_eq!(missing.status.code(), 501);
        assert_eq!(missing.message.as_deref(), Some("Method not found"));
        assert!(missing.data.is_none());
    }

    #[test]
    fn test_response_json_shape() {
        let response = CallResponse::fail_with_message("id-1", ResponseCode::Failure, "boom");
        let json = serde_json::to_string(&response).unwrap();
        let back: CallResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response);
    }
}
