//! Shared pieces of the Courier demo binaries: the `HelloService` contract,
//! its provider implementation, a typed client stub and logging setup.

use courier_config::LoggingConfig;
use courier_core::{Error, Result};
use courier_rpc::{ClientStub, RpcService, ServiceProxy};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub const HELLO_SERVICE: &str = "HelloService";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HelloObject {
    pub id: u32,
    pub message: String,
}

impl HelloObject {
    pub fn new(id: u32, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
        }
    }
}

/// Provider side of `HelloService`
pub fn hello_service() -> RpcService {
    RpcService::new(HELLO_SERVICE).with_typed_method(
        "hello",
        &["HelloObject"],
        |(object,): (HelloObject,)| Ok(format!("8686 hello {}", object.message)),
    )
}

/// Consumer side of `HelloService`
pub struct HelloClient {
    proxy: ServiceProxy,
}

impl ClientStub for HelloClient {
    const INTERFACE: &'static str = HELLO_SERVICE;

    fn from_proxy(proxy: ServiceProxy) -> Self {
        Self { proxy }
    }
}

impl HelloClient {
    pub async fn hello(&self, object: HelloObject) -> Result<String> {
        self.proxy.call("hello", &["HelloObject"], (object,)).await
    }
}

/// Install a `tracing` subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load `courier.{yaml,toml,json}` with `COURIER_*` overrides applied
pub fn load_config() -> Result<courier_config::CourierConfig> {
    courier_config::ConfigLoader::new()
        .load_with_env()
        .map_err(|e| Error::Config(e.to_string()))
}
