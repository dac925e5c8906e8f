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

#![warn(missing_docs)]
//! # Relayer Events Watcher Module 🕸️
//!
//! A module that drives the background tasks of the relayer.
//!
//! ## Overview
//!
//! Every task of the relayer (chain monitors, span tracking, deposit
//! processing and retries) is a [`PollingTask`]: it knows how to make one
//! step of progress, and the shared [`PollingTask::run`] loop repeats that
//! step until the relayer shuts down. Transient failures are logged and the
//! step is tried again after the polling interval; any other failure stops
//! the task.

use std::sync::Arc;
use std::time::Duration;

use polygon_relayer_context::Shutdown;
use polygon_relayer_utils::metric::Metrics;
use polygon_relayer_utils::probe;

/// What a single step of a [`PollingTask`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// Nothing left to do right now, wait for the polling interval.
    Idle,
    /// There is more work queued up, step again right away.
    Busy,
}

/// A background task made of repeated steps.
#[async_trait::async_trait]
pub trait PollingTask: Send + Sync {
    /// A Helper tag used to identify the task during the logs.
    const TAG: &'static str;

    /// How long to wait between two steps when the task is idle.
    fn polling_interval(&self) -> Duration;

    /// Makes one step of progress.
    ///
    /// A step that makes several external calls checks `shutdown` before
    /// each of them and returns early once it fired.
    async fn poll_once(
        &self,
        shutdown: &mut Shutdown,
    ) -> polygon_relayer_utils::Result<PollStatus>;

    /// Runs the task until `shutdown` fires or a step fails with a
    /// non-transient error.
    ///
    /// The first step runs right away, the task then sleeps for the
    /// polling interval after every idle step. A busy step is followed
    /// by the next one without sleeping.
    #[tracing::instrument(skip_all, fields(tag = %Self::TAG))]
    async fn run(
        &self,
        mut shutdown: Shutdown,
        metrics: Arc<Metrics>,
    ) -> polygon_relayer_utils::Result<()> {
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            task = Self::TAG,
            started = true,
        );
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            let status = match self.poll_once(&mut shutdown).await {
                Ok(status) => status,
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        "{} step failed, retrying in {}ms: {}",
                        Self::TAG,
                        self.polling_interval().as_millis(),
                        e
                    );
                    metrics.monitor_back_off.inc();
                    PollStatus::Idle
                }
                Err(e) => {
                    tracing::error!("{} stopped: {}", Self::TAG, e);
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %probe::Kind::Lifecycle,
                        task = Self::TAG,
                        failed = true,
                    );
                    return Err(e);
                }
            };
            if status == PollStatus::Busy {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.polling_interval()) => {},
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("{} stopped", Self::TAG);
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            task = Self::TAG,
            stopped = true,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests;
