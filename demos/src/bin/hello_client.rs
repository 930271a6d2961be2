use courier_demos::{init_tracing, load_config, HelloClient, HelloObject, HELLO_SERVICE};
use courier_core::Result;
use courier_rpc::RpcClientBuilder;
use tracing::{error, info};

/// Calls a provider started with `hello_server`. Without a config file the
/// provider is expected at the default server address.
#[tokio::main]
async fn main() -> Result<()> {
    let mut config = load_config()?;
    init_tracing(&config.logging);

    if config.registry.kind == "memory" {
        // A memory registry is private to one process; point at the provider directly
        let provider = config.server_address();
        config.registry.kind = "static".to_string();
        config
            .registry
            .services
            .entry(HELLO_SERVICE.to_string())
            .or_insert_with(|| vec![provider]);
    }

    let client = RpcClientBuilder::from_config(&config)?.build()?;
    let hello: HelloClient = client.proxy();

    for id in 0..3 {
        match hello.hello(HelloObject::new(id, format!("courier #{}", id))).await {
            Ok(reply) => info!("{}", reply),
            Err(e) => error!("Call {} failed: {}", id, e),
        }
    }

    client.close().await;
    Ok(())
}
