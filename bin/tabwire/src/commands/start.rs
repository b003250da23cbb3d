use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use tabwire_bus::{ActionTable, CorrelationTable, NativeChannel, Router, TabRegistry};
use tabwire_channels::{StdioHost, WsBridge};
use tabwire_core::{Config, Paths};

pub async fn run(config_path: Option<PathBuf>, host_cmd: Option<String>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = match &config_path {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::load_or_default(&paths)?,
    };
    if let Some(command) = host_cmd {
        config.host.command = command;
    }

    // The singletons live for the whole coordinator and are passed by
    // Arc, never reached as ambient globals.
    let (inbound_tx, mut inbound_rx) = mpsc::channel(256);
    let bridge = Arc::new(WsBridge::new(inbound_tx));
    let tabs = Arc::new(TabRegistry::new(
        bridge.clone(),
        Duration::from_millis(config.bus.tab_load_timeout_ms),
    ));
    let correlations = Arc::new(CorrelationTable::new());
    let transport = Arc::new(StdioHost::spawn(&config.host).context("starting native host")?);
    let native = Arc::new(NativeChannel::new(
        transport,
        Duration::from_millis(config.bus.keep_alive_interval_ms),
        &config.addresses.self_id,
        &config.addresses.host_id,
    ));
    let router = Arc::new(Router::new(
        &config,
        tabs,
        correlations,
        native.clone(),
        ActionTable::with_defaults(),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .context("invalid gateway address")?;
    let gateway_bridge = bridge.clone();
    let gateway_shutdown = shutdown_tx.subscribe();
    let gateway_task =
        tokio::spawn(async move { gateway_bridge.serve(addr, gateway_shutdown).await });

    // Everything the bridge receives from tabs flows into the router.
    let pump_router = router.clone();
    let pump_task = tokio::spawn(async move {
        while let Some((message, origin)) = inbound_rx.recv().await {
            pump_router.route_inbound(message, origin).await;
        }
    });

    let loop_router = router.clone();
    let loop_native = native.clone();
    let loop_shutdown = shutdown_tx.subscribe();
    let mut native_task =
        tokio::spawn(async move { loop_native.run_loop(&loop_router, loop_shutdown).await });

    info!("Coordinator started");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(());
            let _ = (&mut native_task).await;
        }
        result = &mut native_task => {
            match result {
                Ok(Ok(())) => info!("Native channel stopped"),
                Ok(Err(e)) => error!(error = %e, "Native channel terminated, shutting down"),
                Err(e) => error!(error = %e, "Native channel task panicked"),
            }
            let _ = shutdown_tx.send(());
        }
    }

    pump_task.abort();
    if let Ok(Err(e)) = gateway_task.await {
        error!(error = %e, "Gateway exited with error");
    }
    info!("Coordinator stopped");
    Ok(())
}
