// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Polygon Relayer Binary.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

use tokio::signal::unix;
use tokio::time;

use polygon_relayer::service::{self, ChainClients};
use polygon_relayer_config::cli::{
    create_store, load_config, setup_logger, Opts,
};
use polygon_relayer_context::RelayerContext;

/// The main entry point for the relayer.
///
/// # Arguments
///
/// * `args` - The command line arguments.
#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose)?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    // The configuration is validated and configured from the given directory,
    // the command line start heights win over the files.
    let mut config = load_config(args.config_dir.clone())?;
    args.apply_overrides(&mut config);
    config.verify()?;

    // persistent storage for the relayer
    let store = create_store(&args, &config).await?;
    let ctx = RelayerContext::new(config, store.clone())?;

    let clients = ChainClients::from_config(&ctx.config)?;
    clients.check_endpoints().await?;

    // metric for data stored which is determined every 1 hour
    let metrics = ctx.metrics.clone();
    let sled_metric_task_handle = tokio::task::spawn(async move {
        let mut sled_data_metric_interval =
            time::interval(Duration::from_secs(3600));
        loop {
            sled_data_metric_interval.tick().await;
            metrics
                .total_amount_of_data_stored
                .set(store.get_data_stored_size() as f64);
        }
    });

    // the status API, it stops by itself on the shutdown signal.
    let (addr, server) = service::build_web_services(ctx.clone())?;
    tracing::info!("Starting the server on {}", addr);
    let server_handle = tokio::spawn(server);
    // start all background services.
    // this does not block, will fire the services on background tasks.
    let tasks = service::ignite(&ctx, clients)?;

    // watch for signals
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let mut quit_signal = unix::signal(unix::SignalKind::quit())?;
    tokio::select! {
        _ = ctrlc_signal.recv() => {
            tracing::warn!("Interrupted (Ctrl+C) ...");
        },
        _ = termination_signal.recv() => {
            tracing::warn!("Got Terminate signal ...");
        },
        _ = quit_signal.recv() => {
            tracing::warn!("Quitting ...");
        },
    }

    tracing::warn!("Shutting down...");
    let grace = Duration::from_millis(ctx.config.shutdown_grace_period);
    let failed = service::shutdown(&ctx, tasks, grace).await?;
    sled_metric_task_handle.abort();
    match time::timeout(grace, server_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::warn!("server stopped with: {}", e),
        Ok(Err(e)) => tracing::warn!("server task failed: {}", e),
        Err(_) => tracing::warn!("server did not stop in time"),
    }
    if failed > 0 {
        tracing::warn!("{} task(s) did not stop cleanly", failed);
    }
    tracing::info!("Clean Exit ..");
    Ok(())
}
