//! Gateway server loop
//!
//! Receives bus messages one at a time, runs them through the dispatcher
//! and publishes the replies. A shutdown signal stops the loop between
//! messages; on exit the request metrics and per-slave session counters
//! are logged and the current response timeout is written back to the
//! configuration file.

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::{broadcast, Mutex};

use crate::bus::{BusMessage, MessageBus};
use crate::config::GatewayConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ModbusResult;
use crate::logging;
use crate::utils::{format, OperationTimer, PerformanceMetrics};

/// Receive, dispatch and publish loop
pub struct GatewayServer<B: MessageBus> {
    bus: B,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Mutex<PerformanceMetrics>>,
    shutdown_tx: broadcast::Sender<()>,
    persist: Option<(GatewayConfig, PathBuf)>,
}

impl<B: MessageBus> GatewayServer<B> {
    pub fn new(bus: B, dispatcher: Arc<Dispatcher>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            bus,
            dispatcher,
            metrics: Arc::new(Mutex::new(PerformanceMetrics::new())),
            shutdown_tx,
            persist: None,
        }
    }

    /// Write the response timeout into `config` and save it to `path` on exit
    pub fn with_persistence(mut self, config: GatewayConfig, path: PathBuf) -> Self {
        self.persist = Some((config, path));
        self
    }

    /// Sender that stops [`GatewayServer::run`]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn metrics(&self) -> Arc<Mutex<PerformanceMetrics>> {
        Arc::clone(&self.metrics)
    }

    /// Serve until a shutdown signal arrives or the bus closes
    pub async fn run(mut self) -> ModbusResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!("start request listener");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }

                result = self.bus.recv() => {
                    match result {
                        Ok(Some(message)) => self.handle(message).await,
                        Ok(None) => {
                            info!("message bus closed");
                            break;
                        }
                        Err(e) => warn!("receive failed: {}", e),
                    }
                }
            }
        }

        self.finish().await
    }

    async fn handle(&mut self, message: BusMessage) {
        let timer = OperationTimer::start("command");
        let reply = self.dispatcher.handle_message(&message.mode, &message.payload).await;
        logging::log_exchange(&message.mode, &message.payload, &reply);

        let success = reply.response.is_ok();
        if let Err(e) = self.bus.send(reply.function_code, reply.response.to_json()).await {
            error!("failed to publish reply for {}: {}", reply.function_code, e);
        }

        let duration = timer.stop_and_log(success);
        self.metrics.lock().await.record(reply.function_code, duration, success);
    }

    async fn finish(self) -> ModbusResult<()> {
        info!("{}", format::format_metrics(&*self.metrics.lock().await));
        for (key, stats) in self.dispatcher.context().pool().session_stats().await {
            info!("{}", format::format_session_stats(&key.to_string(), &stats));
        }

        if let Some((mut config, path)) = self.persist {
            config.set_timeout_us(self.dispatcher.context().timeout_us());
            config.save(&path).map_err(|e| {
                error!("failed to save config {}: {}", path.display(), e);
                e
            })?;
            info!("config saved to {}", path.display());
        }
        Ok(())
    }
}
