//! # Courier RPC
//!
//! The wire protocol and both ends of a call: a framed codec with pluggable
//! body serialization, a multiplexing client that discovers providers
//! through a registry, and a server that dispatches requests to published
//! services.
//!
//! ## Example
//!
//! ```rust,no_run
//! use courier_rpc::prelude::*;
//! use courier_registry::InMemoryRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> courier_core::Result<()> {
//!     let registry = Arc::new(InMemoryRegistry::new());
//!
//!     let server = RpcServerBuilder::new().registry(registry.clone()).build().await?;
//!     let service = RpcService::new("HelloService")
//!         .with_typed_method("hello", &["String"], |(name,): (String,)| Ok(format!("hello {}", name)));
//!     server.publish_service(service).await?;
//!
//!     let running = server.clone();
//!     tokio::spawn(async move { running.start().await });
//!
//!     let client = RpcClientBuilder::new().registry(registry).build()?;
//!     let reply: String = client
//!         .invoke("HelloService", "hello", &["String"], ("courier".to_string(),))
//!         .await?;
//!     println!("{}", reply);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod correlation;
pub mod protocol;
pub mod serializer;
pub mod server;
pub mod stub;

pub use client::{check_response, ClientConnection, ClientSettings, RpcClient, RpcClientBuilder};
pub use codec::{Frame, FrameCodec};
pub use correlation::PendingCalls;
pub use protocol::{PayloadKind, RpcMessage, MAGIC_NUMBER};
pub use serializer::SerializerKind;
pub use server::{
    ClosureHandler, Dispatcher, MethodHandler, RpcServer, RpcServerBuilder, RpcService,
    TypedHandler,
};
pub use stub::{ClientStub, DecodeArgs, EncodeArgs, ServiceProxy};

pub mod prelude {
    //! Common imports for Courier applications

    pub use crate::client::{RpcClient, RpcClientBuilder};
    pub use crate::serializer::SerializerKind;
    pub use crate::server::{RpcServer, RpcServerBuilder, RpcService};
    pub use crate::stub::{ClientStub, ServiceProxy};
    pub use courier_core::prelude::*;
}
