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

use std::sync::Arc;
use std::time::Duration;

use polygon_event_watcher_traits::{PollStatus, PollingTask};
use polygon_relayer_chain_client::SpanClient;
use polygon_relayer_context::Shutdown;
use polygon_relayer_store::{RelayStore, SpanInsert};
use polygon_relayer_types::{ChainKey, Span};
use polygon_relayer_utils::metric::Metrics;
use polygon_relayer_utils::{probe, Error};
use typed_builder::TypedBuilder;

/// Which part of the span sequence a [`SpanMonitor`] follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanMode {
    /// Follow the span currently published by Heimdall, filling the gap
    /// with the last stored span.
    Latest,
    /// Walk the span ids upward, starting at `start`, until the live span.
    /// Progress is kept under the `span_history` cursor.
    History { start: u64 },
}

/// Records Heimdall spans in the store.
///
/// Spans that do not fit the stored sequence are logged and skipped,
/// the monitor keeps going with the next one.
#[derive(TypedBuilder)]
pub struct SpanMonitor<S> {
    client: Arc<dyn SpanClient>,
    store: S,
    mode: SpanMode,
    /// Upper bound of the spans fetched in one step.
    #[builder(default = 10)]
    spans_per_step: u64,
    #[builder(default = Duration::from_secs(60))]
    polling_interval: Duration,
    metrics: Arc<Metrics>,
}

impl<S: RelayStore> SpanMonitor<S> {
    /// Writes `span`. Returns `false` when the span was rejected.
    fn record(&self, span: &Span) -> polygon_relayer_utils::Result<bool> {
        match self.store.put_span(span) {
            Ok(SpanInsert::Inserted) => {
                self.metrics.spans_recorded.inc();
                tracing::debug!("recorded {}", span);
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::TRACE,
                    kind = %probe::Kind::Span,
                    span_id = span.id,
                    start_block = span.start_block,
                    end_block = span.end_block,
                );
                Ok(true)
            }
            Ok(SpanInsert::AlreadyPresent) => {
                tracing::trace!("span #{} already stored", span.id);
                Ok(true)
            }
            Err(Error::SpanRejected { id, reason }) => {
                tracing::warn!("skipping span #{}: {}", id, reason);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Stores the live span, and the spans between it and the last stored
    /// one. A gap larger than `spans_per_step` is filled over several steps
    /// before the live span is written.
    async fn follow_latest(
        &self,
        shutdown: &mut Shutdown,
    ) -> polygon_relayer_utils::Result<PollStatus> {
        let live = self.client.latest_span().await?;
        let stored = self.store.latest_span()?.map(|span| span.id);
        let missing_from = match stored {
            Some(id) if id + 1 < live.id => id + 1,
            _ => {
                self.record(&live)?;
                return Ok(PollStatus::Idle);
            }
        };
        let missing = live.id - missing_from;
        let fetch = missing.min(self.spans_per_step);
        for id in missing_from..missing_from + fetch {
            if shutdown.is_shutdown() {
                return Ok(PollStatus::Idle);
            }
            match self.client.span(id).await? {
                Some(span) => {
                    self.record(&span)?;
                }
                None => {
                    tracing::warn!("span #{} below the live span is missing", id);
                    return Ok(PollStatus::Idle);
                }
            }
        }
        if fetch < missing {
            return Ok(PollStatus::Busy);
        }
        self.record(&live)?;
        Ok(PollStatus::Idle)
    }

    /// Walks the span ids from the history cursor.
    async fn walk_history(
        &self,
        start: u64,
        shutdown: &mut Shutdown,
    ) -> polygon_relayer_utils::Result<PollStatus> {
        let cursor = ChainKey::Heimdall;
        let mut next = match self.store.get_height(cursor)? {
            Some(id) => id.saturating_add(1),
            None => start,
        };
        for _ in 0..self.spans_per_step {
            if shutdown.is_shutdown() {
                return Ok(PollStatus::Idle);
            }
            let Some(span) = self.client.span(next).await? else {
                tracing::trace!("span #{} not published yet", next);
                return Ok(PollStatus::Idle);
            };
            self.record(&span)?;
            let at = self.store.set_height(cursor, next)?;
            self.metrics.set_cursor(cursor.cursor_name(), at);
            next = next.saturating_add(1);
        }
        Ok(PollStatus::Busy)
    }
}

#[async_trait::async_trait]
impl<S: RelayStore> PollingTask for SpanMonitor<S> {
    const TAG: &'static str = "Span Monitor";

    fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    #[tracing::instrument(skip_all, fields(mode = ?self.mode))]
    async fn poll_once(
        &self,
        shutdown: &mut Shutdown,
    ) -> polygon_relayer_utils::Result<PollStatus> {
        match self.mode {
            SpanMode::Latest => self.follow_latest(shutdown).await,
            SpanMode::History { start } => {
                self.walk_history(start, shutdown).await
            }
        }
    }
}
