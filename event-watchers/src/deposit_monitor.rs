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
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use polygon_event_watcher_traits::{PollStatus, PollingTask};
use polygon_relayer_chain_client::ChainClient;
use polygon_relayer_context::Shutdown;
use polygon_relayer_store::RelayStore;
use polygon_relayer_types::{ChainKey, DepositEvent, RetryKey};
use polygon_relayer_utils::metric::Metrics;
use polygon_relayer_utils::{probe, ClientError};
use typed_builder::TypedBuilder;

/// Scans a source chain for cross-chain events and records each of them as
/// a pending proof.
///
/// The monitor keeps a cursor per chain (the last fully scanned height).
/// One step scans at most `blocks_per_batch` blocks above the cursor,
/// never past `latest - confirmations`, records the events it finds and
/// then advances the cursor. A crash between the two leaves the cursor
/// behind, so the range is scanned again and nothing is missed.
#[derive(TypedBuilder)]
pub struct DepositMonitor<S> {
    client: Arc<dyn ChainClient>,
    store: S,
    /// First height to scan when the cursor was never written.
    #[builder(default)]
    start_height: u64,
    #[builder(default = 100)]
    blocks_per_batch: u64,
    #[builder(default)]
    confirmations: u64,
    #[builder(default = Duration::from_secs(1))]
    polling_interval: Duration,
    /// Zero disables the progress log.
    #[builder(default = Duration::from_secs(7))]
    print_progress_interval: Duration,
    metrics: Arc<Metrics>,
    #[builder(default = Mutex::new(Instant::now()), setter(skip))]
    last_progress: Mutex<Instant>,
}

impl<S: RelayStore> DepositMonitor<S> {
    /// The chain this monitor scans.
    pub fn chain(&self) -> ChainKey {
        self.client.chain()
    }

    /// The first height the next step will scan.
    pub fn next_height(&self) -> polygon_relayer_utils::Result<u64> {
        let next = match self.store.get_height(self.chain())? {
            Some(cursor) => cursor.saturating_add(1),
            None => self.start_height,
        };
        Ok(next)
    }

    /// Whether the event must be recorded. Events already relayed or
    /// already waiting for a retry are skipped.
    fn is_new(
        &self,
        event: &DepositEvent,
    ) -> polygon_relayer_utils::Result<bool> {
        let retry_key = RetryKey::new(self.chain(), event.tx_id).to_bytes();
        let relayed = self
            .store
            .get_bridge_tx(&event.tx_id.to_string())?
            .is_some();
        Ok(!relayed && !self.store.has_retry(&retry_key)?)
    }

    fn check_event(
        &self,
        event: &DepositEvent,
        from: u64,
        to: u64,
    ) -> Result<(), ClientError> {
        if event.height < from || event.height > to {
            return Err(ClientError::Malformed(format!(
                "event {} at #{} is outside the requested range [{}, {}]",
                event.tx_id, event.height, from, to
            )));
        }
        if event.source != self.chain() {
            return Err(ClientError::Malformed(format!(
                "event {} comes from {}, expected {}",
                event.tx_id,
                event.source,
                self.chain()
            )));
        }
        Ok(())
    }

    fn print_progress(&self, currently_at: u64, target_block: u64) {
        if self.print_progress_interval == Duration::ZERO {
            return;
        }
        let mut last = self.last_progress.lock();
        if last.elapsed() < self.print_progress_interval {
            return;
        }
        let progress = if target_block == 0 {
            100.0
        } else {
            currently_at as f64 / target_block as f64 * 100.0
        };
        let is_syncing = progress < 99.99;
        tracing::info!(
            chain = %self.chain(),
            target_block,
            currently_at,
            is_syncing,
            progress,
        );
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::TRACE,
            kind = %probe::Kind::Sync,
            chain = %self.chain(),
            %currently_at,
            %target_block,
        );
        *last = Instant::now();
    }
}

#[async_trait::async_trait]
impl<S: RelayStore> PollingTask for DepositMonitor<S> {
    const TAG: &'static str = "Deposit Monitor";

    fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    #[tracing::instrument(skip_all, fields(chain = %self.chain()))]
    async fn poll_once(
        &self,
        shutdown: &mut Shutdown,
    ) -> polygon_relayer_utils::Result<PollStatus> {
        let chain = self.chain();
        let latest = self.client.latest_height().await?;
        self.store.set_chain_height(chain, latest)?;
        let target = latest.saturating_sub(self.confirmations);
        let from = self.next_height()?;
        if from > target {
            tracing::trace!("Nothing to scan, #{} is not confirmed yet", from);
            return Ok(PollStatus::Idle);
        }
        let to = from
            .saturating_add(self.blocks_per_batch.saturating_sub(1))
            .min(target);

        if shutdown.is_shutdown() {
            return Ok(PollStatus::Idle);
        }
        let events = self.client.events_in_range(from, to).await?;
        for event in &events {
            self.check_event(event, from, to)?;
        }
        tracing::trace!("Found #{} events in [{}, {}]", events.len(), from, to);
        for event in events {
            if !self.is_new(&event)? {
                tracing::trace!(tx_id = %event.tx_id, "already handled, skipping");
                continue;
            }
            let payload = serde_json::to_vec(&event)?;
            self.store.mark_pending(&event.tx_id, &payload)?;
            self.metrics.pending_recorded.inc();
            tracing::debug!(
                tx_id = %event.tx_id,
                height = event.height,
                "recorded pending proof",
            );
        }

        // move the cursor only once everything below it is recorded.
        let cursor = self.store.set_height(chain, to)?;
        self.metrics.set_cursor(chain.cursor_name(), cursor);
        self.print_progress(cursor, target);

        if to < target {
            Ok(PollStatus::Busy)
        } else {
            Ok(PollStatus::Idle)
        }
    }
}

#[cfg(test)]
mod tests {
    use polygon_relayer_chain_client::mocked::{MockFailure, MockedChainClient};
    use polygon_relayer_store::{
        BridgeTxStore, HeightStore, InMemoryStore, PendingProofStore,
        RelayStateTransitions, SledStore,
    };
    use polygon_relayer_types::TxId;
    use polygon_relayer_utils::Error;
    use tokio::sync::broadcast;

    use super::*;

    /// One step with a shutdown signal that is never sent.
    async fn step<S: RelayStore>(
        monitor: &DepositMonitor<S>,
    ) -> polygon_relayer_utils::Result<PollStatus> {
        let (_tx, rx) = broadcast::channel(1);
        monitor.poll_once(&mut Shutdown::new(rx)).await
    }

    fn event(chain: ChainKey, id: u64, height: u64) -> DepositEvent {
        DepositEvent {
            tx_id: TxId::from_low_u64_be(id),
            height,
            source: chain,
            payload: id.to_be_bytes().to_vec(),
        }
    }

    fn deposit_monitor<S: RelayStore>(
        client: &Arc<MockedChainClient>,
        store: S,
        batch: u64,
    ) -> DepositMonitor<S> {
        DepositMonitor::builder()
            .client(client.clone() as Arc<dyn ChainClient>)
            .store(store)
            .blocks_per_batch(batch)
            .metrics(Arc::new(Metrics::new().unwrap()))
            .build()
    }

    async fn drain<S: RelayStore>(monitor: &DepositMonitor<S>) {
        while step(monitor).await.unwrap() == PollStatus::Busy {}
    }

    fn pending_ids<S: RelayStore>(store: &S) -> Vec<TxId> {
        let page = store.list_pending(usize::MAX).unwrap();
        page.items.into_iter().map(|(id, _)| id).collect()
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn scans_in_batches_up_to_the_confirmed_height() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        client.push_event(event(ChainKey::Eth, 1, 5));
        client.push_event(event(ChainKey::Eth, 2, 25));
        client.push_event(event(ChainKey::Eth, 3, 48));
        client.set_latest_height(50);
        let store = InMemoryStore::default();
        let monitor = DepositMonitor::builder()
            .client(client.clone() as Arc<dyn ChainClient>)
            .store(store.clone())
            .blocks_per_batch(20)
            .confirmations(5)
            .metrics(Arc::new(Metrics::new().unwrap()))
            .build();

        drain(&monitor).await;
        assert_eq!(client.range_queries(), vec![(0, 19), (20, 39), (40, 45)]);
        assert_eq!(store.get_height(ChainKey::Eth).unwrap(), Some(45));
        assert_eq!(
            pending_ids(&store),
            vec![TxId::from_low_u64_be(1), TxId::from_low_u64_be(2)]
        );

        // the event at #48 shows up once it is confirmed.
        client.set_latest_height(60);
        drain(&monitor).await;
        assert_eq!(pending_ids(&store).len(), 3);
        assert_eq!(store.get_height(ChainKey::Eth).unwrap(), Some(55));
    }

    #[tokio::test]
    async fn start_height_only_seeds_an_empty_cursor() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Poly));
        client.set_latest_height(120);
        let store = InMemoryStore::default();
        let monitor = DepositMonitor::builder()
            .client(client.clone() as Arc<dyn ChainClient>)
            .store(store.clone())
            .start_height(100)
            .blocks_per_batch(10)
            .metrics(Arc::new(Metrics::new().unwrap()))
            .build();
        step(&monitor).await.unwrap();
        assert_eq!(client.range_queries(), vec![(100, 109)]);

        store.set_height(ChainKey::Poly, 115).unwrap();
        step(&monitor).await.unwrap();
        assert_eq!(client.range_queries()[1], (116, 120));
    }

    #[tokio::test]
    async fn transient_failures_keep_the_cursor() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        client.push_event(event(ChainKey::Eth, 1, 3));
        client.set_latest_height(10);
        let store = InMemoryStore::default();
        let monitor = deposit_monitor(&client, store.clone(), 100);

        client.fail_next(1, MockFailure::Timeout);
        let err = step(&monitor).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.get_height(ChainKey::Eth).unwrap(), None);
        assert!(pending_ids(&store).is_empty());

        step(&monitor).await.unwrap();
        assert_eq!(store.get_height(ChainKey::Eth).unwrap(), Some(10));
        assert_eq!(pending_ids(&store), vec![TxId::from_low_u64_be(1)]);
    }

    #[tokio::test]
    async fn malformed_events_are_fatal() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        // an event tagged with another chain cannot be trusted.
        client.push_event(event(ChainKey::Poly, 1, 3));
        let store = InMemoryStore::default();
        let monitor = deposit_monitor(&client, store.clone(), 100);
        let err = step(&monitor).await.unwrap_err();
        assert!(matches!(err, Error::Client(ClientError::Malformed(_))));
        assert!(!err.is_transient());
        assert!(pending_ids(&store).is_empty());
        assert_eq!(store.get_height(ChainKey::Eth).unwrap(), None);
    }

    #[tokio::test]
    async fn no_range_is_scanned_once_shutdown_was_sent() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        client.push_event(event(ChainKey::Eth, 1, 3));
        let store = InMemoryStore::default();
        let monitor = deposit_monitor(&client, store.clone(), 100);
        let (tx, rx) = broadcast::channel(1);
        let mut shutdown = Shutdown::new(rx);
        tx.send(()).unwrap();

        let status = monitor.poll_once(&mut shutdown).await.unwrap();
        assert_eq!(status, PollStatus::Idle);
        assert!(client.range_queries().is_empty());
        assert_eq!(store.get_height(ChainKey::Eth).unwrap(), None);
    }

    #[tokio::test]
    async fn relayed_and_retrying_events_are_not_recorded_again() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        for id in 1..=3 {
            client.push_event(event(ChainKey::Eth, id, id));
        }
        let store = InMemoryStore::default();
        let relayed = TxId::from_low_u64_be(1);
        store.put_bridge_tx(&relayed.to_string(), b"{}").unwrap();
        let retrying = TxId::from_low_u64_be(2);
        store.mark_pending(&retrying, b"{}").unwrap();
        store.move_to_retry(ChainKey::Eth, &retrying).unwrap();

        step(&deposit_monitor(&client, store.clone(), 100)).await.unwrap();
        assert_eq!(pending_ids(&store), vec![TxId::from_low_u64_be(3)]);
    }

    #[tokio::test]
    async fn cursor_never_moves_backwards() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        client.set_latest_height(30);
        let store = InMemoryStore::default();
        let monitor = deposit_monitor(&client, store.clone(), 10);
        let mut last = 0;
        loop {
            let status = step(&monitor).await.unwrap();
            let cursor = store.get_height(ChainKey::Eth).unwrap().unwrap();
            assert!(cursor >= last);
            last = cursor;
            // a reorg makes the node report a lower tip.
            client.set_latest_height(25);
            if status == PollStatus::Idle {
                break;
            }
        }
        step(&monitor).await.unwrap();
        assert_eq!(store.get_height(ChainKey::Eth).unwrap(), Some(last));
    }

    /// Replays a crash after every prefix of the writes one step makes:
    /// whatever made it to disk, the restarted monitor ends up with every
    /// event recorded and the cursor at the top of the range.
    #[tokio::test]
    async fn no_event_is_missed_after_a_crash() {
        let events: Vec<_> =
            (1..=4).map(|id| event(ChainKey::Eth, id, id * 2)).collect();
        let expected: Vec<_> = events.iter().map(|e| e.tx_id).collect();
        // every event write, then the cursor.
        for durable_writes in 0..=events.len() + 1 {
            let dir = tempfile::tempdir().unwrap();
            {
                let store = SledStore::open(dir.path()).unwrap();
                for e in events.iter().take(durable_writes) {
                    store
                        .mark_pending(&e.tx_id, &serde_json::to_vec(e).unwrap())
                        .unwrap();
                }
                if durable_writes > events.len() {
                    store.set_height(ChainKey::Eth, 10).unwrap();
                }
                store.flush().unwrap();
            }

            let store = SledStore::open(dir.path()).unwrap();
            let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
            for e in &events {
                client.push_event(e.clone());
            }
            client.set_latest_height(10);
            drain(&deposit_monitor(&client, store.clone(), 100)).await;

            assert_eq!(pending_ids(&store), expected, "crash after {durable_writes} writes");
            assert_eq!(store.get_height(ChainKey::Eth).unwrap(), Some(10));
        }
    }
}
