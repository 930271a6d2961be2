use courier_demos::{hello_service, init_tracing, load_config};
use courier_core::Result;
use courier_rpc::RpcServerBuilder;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    init_tracing(&config.logging);

    let server = RpcServerBuilder::from_config(&config)?.build().await?;
    server.publish_service(hello_service()).await?;
    info!("HelloService provider listening on {}", server.local_addr());

    let running = server.clone();
    let accept_loop = tokio::spawn(async move { running.start().await });

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");
    server.shutdown().await;

    match accept_loop.await {
        Ok(result) => result,
        Err(e) => Err(courier_core::Error::IllegalState(e.to_string())),
    }
}
