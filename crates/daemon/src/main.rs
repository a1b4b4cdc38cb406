// SPDX-License-Identifier: MIT

//! `vm-agentd`: loads configuration, builds the reconciliation engine and
//! its watchers, and runs until `SIGINT`/`SIGTERM`.

use tracing::{error, info};
use vma_daemon::{build_engine, init_tracing, Config};

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    info!(node_id = %config.node_id, inventory_url = %config.inventory_url, "vm-agentd starting");

    let engine = match build_engine(&config) {
        Ok(engine) => engine,
        Err(e) => {
            error!("failed to construct inventory client: {e}");
            std::process::exit(1);
        }
    };

    let run_handle = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping engine");
    engine.stop().await;
    let _ = run_handle.await;

    info!("vm-agentd stopped");
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            error!("failed to install signal handler: {e}, falling back to ctrl_c only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
