use courier_config::LoggingConfig;
use courier_core::Result;
use courier_demos::{hello_service, init_tracing, HelloClient, HelloObject};
use courier_registry::InMemoryRegistry;
use courier_rpc::{RpcClientBuilder, RpcServerBuilder};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(&LoggingConfig::default());

    let registry = Arc::new(InMemoryRegistry::new());

    let server = RpcServerBuilder::new()
        .address("127.0.0.1", 0)
        .registry(registry.clone())
        .build()
        .await?;
    server.publish_service(hello_service()).await?;
    let running = server.clone();
    tokio::spawn(async move { running.start().await });

    let client = RpcClientBuilder::new().registry(registry).build()?;
    let hello: HelloClient = client.proxy();
    let reply = hello.hello(HelloObject::new(1, "X")).await?;
    info!("Provider answered: {}", reply);

    client.close().await;
    server.shutdown().await;
    Ok(())
}
