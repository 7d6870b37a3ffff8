// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use scriptorium::archive::Archive;
use scriptorium::config::AppConfig;
use scriptorium::http::{self, AppState};
use scriptorium::logging;
use scriptorium::registry::Registry;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let config = AppConfig::parse();
    logging::initialize(config.debug);

    let archive = config.archive_dir.clone().map(|dir| Arc::new(Archive::new(dir)));
    let registry = Arc::new(Registry::new(archive, config.shard_count));

    let eviction_handle = tokio::spawn({
        let registry = Arc::clone(&registry);
        let interval = config.eviction_interval();
        async move {
            registry.run_eviction_sweep(interval).await;
        }
    });

    let app = http::router(AppState {
        registry: Arc::clone(&registry),
        idle_timeout: config.idle_timeout(),
    });

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!("listening on {}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("server failed")?;

    eviction_handle.abort();
    Ok(())
}

async fn wait_for_shutdown() {
    let mut signal_terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("should have been able to create terminate signal stream");
    tokio::select! {
        _ = signal::ctrl_c() => {
            debug!("got SIGINT (Ctrl+C), shutting down");
        }
        _ = signal_terminate.recv() => {
            debug!("got SIGTERM, shutting down");
        }
    }
}
