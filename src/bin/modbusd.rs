use std::sync::Arc;

use anyhow::Context;
use log::info;

use modbusd::{
    logging, ConnectionPool, Dispatcher, GatewayConfig, GatewayContext, GatewayServer, ZmqBus,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = GatewayConfig::path_from_env();
    let config = GatewayConfig::load(&path)
        .with_context(|| format!("cannot load configuration {}", path.display()))?;

    logging::init(config.logging_enabled());
    info!("{}", modbusd::info());
    info!("config: {}", path.display());

    let context = Arc::new(GatewayContext::new(ConnectionPool::tcp(), config.timeout_us()));
    let dispatcher = Arc::new(Dispatcher::new(context));

    let bus = ZmqBus::bind(&config.ipc.sub, &config.ipc.publish)
        .await
        .context("cannot bind message bus")?;

    let server = GatewayServer::new(bus, dispatcher).with_persistence(config, path);
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.send(());
        }
    });

    server.run().await?;
    info!("housekeeping done");
    Ok(())
}
