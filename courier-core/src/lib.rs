//! # Courier Core
//!
//! Shared building blocks for the Courier RPC framework: the error type used
//! by every crate in the workspace, the call request/response entities that
//! travel over the wire, and the endpoint types produced by service discovery.

pub mod endpoint;
pub mod entity;
pub mod error;

pub use endpoint::{Endpoint, InstanceList};
pub use entity::{CallRequest, CallResponse, ResponseCode};
pub use error::{Error, ErrorCode, Result};

pub mod prelude {
    //! Common imports for Courier applications

    pub use crate::endpoint::{Endpoint, InstanceList};
    pub use crate::entity::{CallRequest, CallResponse, ResponseCode};
    pub use crate::error::{Error, Result};
}
