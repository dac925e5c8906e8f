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

//! # Relayer Service Module 🕸️
//!
//! A module for starting long-running tasks.
//!
//! ## Overview
//!
//! Services are tasks which the relayer constantly runs throughout its lifetime.
//! Every task gets its own handle on the store and the shutdown signal, they
//! never talk to each other directly.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use polygon_event_watcher_traits::PollingTask;
use polygon_event_watchers::{DepositMonitor, SpanMode, SpanMonitor};
use polygon_relayer_context::RelayerContext;
use polygon_relayer_handlers::routes::{
    handle_bridge_transaction, handle_bridge_transactions, handle_cursors,
    handle_metric_info, handle_relayer_info,
};
use polygon_relayer_store::{HeightStore, SledStore};
use polygon_relayer_tx_queue::{
    DepositProcessor, RetryWorker, SubmissionPipeline,
};
use polygon_relayer_types::ChainKey;
use polygon_relayer_utils::probe;

mod clients;

pub use clients::ChainClients;

/// Type alias for [Sled](https://sled.rs)-based database store
pub type Store = SledStore;

/// A background task started by [`ignite`].
#[derive(Debug)]
pub struct TaskHandle {
    /// Name of the task, used in the logs.
    pub name: &'static str,
    /// Resolves to the result of the task once it stopped.
    pub handle: JoinHandle<crate::Result<()>>,
}

/// Sets up the status API of the relayer, routing (endpoint queries / requests mapped to
/// handled code). The server stops once the shutdown signal is sent.
///
/// Returns the address the server is bound to and the server future.
///
/// # Arguments
///
/// * `ctx` - RelayContext reference that holds the configuration and database
pub fn build_web_services(
    ctx: RelayerContext,
) -> crate::Result<(SocketAddr, impl Future<Output = Result<(), hyper::Error>>)>
{
    let socket_addr = SocketAddr::new([0, 0, 0, 0].into(), ctx.config.port);
    let mut shutdown = ctx.shutdown_signal();
    let api = Router::new()
        .route("/info", get(handle_relayer_info))
        .route("/bridge-transactions", get(handle_bridge_transactions))
        .route(
            "/bridge-transactions/:tx_id",
            get(handle_bridge_transaction),
        )
        .route("/cursors", get(handle_cursors))
        .route("/metrics", get(handle_metric_info));

    let app = Router::new()
        .nest("/api/v1", api)
        .layer(CorsLayer::new().allow_origin(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(ctx))
        .into_make_service_with_connect_info::<SocketAddr>();

    let server = axum::Server::try_bind(&socket_addr)?.serve(app);
    let addr = server.local_addr();
    let server = server.with_graceful_shutdown(async move {
        shutdown.recv().await;
    });
    Ok((addr, server))
}

/// Spawns `task` on its own tokio task, logging how it ended.
fn spawn_task<T>(ctx: &RelayerContext, name: &'static str, task: T) -> TaskHandle
where
    T: PollingTask + 'static,
{
    let shutdown = ctx.shutdown_signal();
    let metrics = ctx.metrics.clone();
    let handle = tokio::spawn(async move {
        tracing::debug!("{} started", name);
        let result = task.run(shutdown, metrics).await;
        match &result {
            Ok(()) => tracing::debug!("{} stopped", name),
            Err(e) => tracing::error!("{} stopped abnormally: {}", name, e),
        }
        result
    });
    TaskHandle { name, handle }
}

/// Applies the forced start height: the cursor is moved just below it, even
/// if the relayer already went further, so the range is scanned again.
fn apply_forced_heights(ctx: &RelayerContext) -> crate::Result<()> {
    let Some(height) = ctx.config.eth.force_start_height else {
        return Ok(());
    };
    if height == 0 {
        tracing::warn!("forced start at genesis, block #0 is not scanned again");
    }
    let cursor = height.saturating_sub(1);
    let previous = ctx.store().force_height(ChainKey::Eth, cursor)?;
    tracing::info!(?previous, cursor, "eth cursor forced");
    ctx.metrics.set_cursor(ChainKey::Eth.cursor_name(), cursor);
    Ok(())
}

/// Starts all background services for the configured chains.
///
/// Returns the handles of the spawned tasks, they run until the shutdown
/// signal is sent or they fail.
///
/// # Arguments
///
/// * `ctx` - RelayContext reference that holds the configuration
/// * `clients` - The chain adapters
pub fn ignite(
    ctx: &RelayerContext,
    clients: ChainClients,
) -> crate::Result<Vec<TaskHandle>> {
    tracing::trace!(
        "Relayer configuration: {}",
        serde_json::to_string_pretty(&ctx.config)?
    );
    apply_forced_heights(ctx)?;
    let config = &ctx.config;
    let store = ctx.store().clone();
    let metrics = ctx.metrics.clone();
    let print_progress_interval =
        Duration::from_millis(config.print_progress_interval);

    let eth_monitor = DepositMonitor::builder()
        .client(clients.eth.clone())
        .store(store.clone())
        .start_height(config.eth.start_height.unwrap_or_default())
        .blocks_per_batch(config.eth.headers_per_batch)
        .confirmations(config.eth.block_confirmations)
        .polling_interval(config.eth.polling_interval())
        .print_progress_interval(print_progress_interval)
        .metrics(metrics.clone())
        .build();
    let poly_monitor = DepositMonitor::builder()
        .client(clients.poly.clone())
        .store(store.clone())
        .start_height(config.poly.start_height.unwrap_or_default())
        .blocks_per_batch(config.poly.blocks_per_batch)
        .confirmations(config.poly.block_confirmations)
        .polling_interval(config.poly.polling_interval())
        .print_progress_interval(print_progress_interval)
        .metrics(metrics.clone())
        .build();
    let span_monitor = |mode| {
        SpanMonitor::builder()
            .client(clients.heimdall.clone())
            .store(store.clone())
            .mode(mode)
            .spans_per_step(config.heimdall.spans_per_step)
            .polling_interval(config.heimdall.polling_interval())
            .metrics(metrics.clone())
            .build()
    };

    let mut tasks = vec![
        spawn_task(ctx, "eth deposit monitor", eth_monitor),
        spawn_task(ctx, "poly deposit monitor", poly_monitor),
        spawn_task(ctx, "span monitor", span_monitor(SpanMode::Latest)),
        spawn_task(
            ctx,
            "span history monitor",
            span_monitor(SpanMode::History {
                start: config.heimdall.span_start,
            }),
        ),
    ];

    // one submitter per destination, the retry stage runs in the same task.
    for (chain, prover, name) in [
        (ChainKey::Eth, clients.eth_prover.clone(), "eth deposit processor"),
        (
            ChainKey::Poly,
            clients.poly_prover.clone(),
            "poly deposit processor",
        ),
    ] {
        let pipeline =
            SubmissionPipeline::new(chain, prover, store.clone(), metrics.clone());
        let retry_worker = RetryWorker::builder()
            .pipeline(pipeline.clone())
            .batch_size(config.processor.batch_size)
            .polling_interval(config.processor.retry_polling_interval())
            .build();
        let processor = DepositProcessor::builder()
            .pipeline(pipeline)
            .batch_size(config.processor.batch_size)
            .polling_interval(config.processor.polling_interval())
            .retry(retry_worker)
            .build();
        tasks.push(spawn_task(ctx, name, processor));
    }

    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        tasks = tasks.len(),
        started = true,
    );
    Ok(tasks)
}

/// Stops the relayer: broadcasts the shutdown signal, waits for every task
/// (at most `grace`), aborts the ones still running, then flushes the store.
///
/// Returns how many tasks ended with an error or had to be aborted.
pub async fn shutdown(
    ctx: &RelayerContext,
    mut tasks: Vec<TaskHandle>,
    grace: Duration,
) -> crate::Result<usize> {
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        shutdown = true
    );
    ctx.shutdown();
    let mut failed = 0;
    let all_stopped = futures::future::join_all(
        tasks.iter_mut().map(|task| &mut task.handle),
    );
    match tokio::time::timeout(grace, all_stopped).await {
        Ok(results) => {
            for (task, result) in tasks.iter().zip(results) {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!("{} had stopped with: {}", task.name, e);
                        failed += 1;
                    }
                    Err(e) => {
                        tracing::error!("{} failed: {}", task.name, e);
                        failed += 1;
                    }
                }
            }
        }
        Err(_) => {
            for task in tasks.iter().filter(|t| !t.handle.is_finished()) {
                tracing::warn!("{} did not stop in time, aborting", task.name);
                task.handle.abort();
                failed += 1;
            }
        }
    }
    let flushed = ctx.store().flush()?;
    tracing::debug!("store flushed ({} bytes)", flushed);
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RelayerContext {
        let config = serde_json::from_value(serde_json::json!({
            "port": 0,
            "eth": { "side-chain-id": 2, "rpc-url": "http://localhost:8545" },
            "poly": { "chain-id": 0, "rpc-url": "http://localhost:20336" },
            "heimdall": {
                "rpc-url": "http://localhost:26657",
                "chain-id": "137"
            }
        }))
        .unwrap();
        RelayerContext::new(config, SledStore::temporary().unwrap()).unwrap()
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn stuck_tasks_are_aborted_after_the_grace_period() {
        let ctx = context();
        let mut shutdown_signal = ctx.shutdown_signal();
        let tasks = vec![
            TaskHandle {
                name: "polite",
                handle: tokio::spawn(async move {
                    shutdown_signal.recv().await;
                    Ok(())
                }),
            },
            TaskHandle {
                name: "stuck",
                handle: tokio::spawn(futures::future::pending()),
            },
        ];
        let failed = shutdown(&ctx, tasks, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(failed, 1);
        assert!(logs_contain("stuck did not stop in time"));
        assert!(!logs_contain("polite did not stop in time"));
        assert!(logs_contain("store flushed"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn failed_tasks_are_counted() {
        let ctx = context();
        let tasks = vec![TaskHandle {
            name: "broken",
            handle: tokio::spawn(async { Err(crate::Error::Generic("lost the endpoint")) }),
        }];
        let failed = shutdown(&ctx, tasks, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(failed, 1);
        assert!(logs_contain("broken had stopped with"));
    }

    #[tokio::test]
    async fn forced_height_moves_the_cursor_back() {
        let mut ctx = context();
        ctx.store().set_height(ChainKey::Eth, 500).unwrap();
        ctx.config.eth.force_start_height = Some(100);
        apply_forced_heights(&ctx).unwrap();
        assert_eq!(ctx.store().get_height(ChainKey::Eth).unwrap(), Some(99));

        ctx.config.eth.force_start_height = Some(0);
        apply_forced_heights(&ctx).unwrap();
        assert_eq!(ctx.store().get_height(ChainKey::Eth).unwrap(), Some(0));
    }
}
