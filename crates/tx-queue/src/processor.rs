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

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use polygon_event_watcher_traits::{PollStatus, PollingTask};
use polygon_relayer_context::Shutdown;
use polygon_relayer_store::{RelayStore, MAX_SCAN_ITEMS};
use polygon_relayer_types::{DepositEvent, TxId};
use polygon_relayer_utils::Error;
use typed_builder::TypedBuilder;

use crate::pipeline::{Outcome, Stage, SubmissionPipeline};
use crate::RetryWorker;

/// Works off the pending set of one source chain.
///
/// Each step takes up to `batch_size` items of its chain, resuming the scan
/// where the previous step stopped so that items whose proof is not final
/// yet do not hold back the rest of the set. When a [`RetryWorker`] is
/// attached, the step then runs a retry batch whenever one is due, so all
/// submissions of the chain come from a single task.
#[derive(TypedBuilder)]
pub struct DepositProcessor<S> {
    pipeline: SubmissionPipeline<S>,
    #[builder(default = 100)]
    batch_size: usize,
    #[builder(default = Duration::from_secs(5))]
    polling_interval: Duration,
    #[builder(default, setter(strip_option))]
    retry: Option<RetryWorker<S>>,
    #[builder(default, setter(skip))]
    resume_after: Mutex<Option<Vec<u8>>>,
    #[builder(default, setter(skip))]
    recovered: AtomicBool,
}

impl<S: RelayStore> DepositProcessor<S> {
    /// Sends every item whose submission was interrupted to the retry set.
    ///
    /// The outcome of those submissions is unknown: the retry stage asks
    /// the destination chain before submitting again.
    pub fn recover_interrupted(&self) -> polygon_relayer_utils::Result<usize> {
        let chain = self.pipeline.chain();
        let store = self.pipeline.store();
        let mut recovered = 0;
        loop {
            let page = store.list_reprove(chain, MAX_SCAN_ITEMS)?;
            for (key, _) in &page.items {
                match TxId::try_from(key.as_slice()) {
                    Ok(tx_id) => {
                        tracing::warn!(%tx_id, "submission was interrupted, queued for retry");
                        store.move_to_retry(chain, &tx_id)?;
                        self.pipeline.metrics().retries_enqueued.inc();
                        recovered += 1;
                    }
                    Err(e) => {
                        tracing::warn!("dropping undecodable in-flight marker: {}", e);
                        store.clear_reprove(chain, key)?;
                    }
                }
            }
            if !page.is_truncated() {
                break;
            }
        }
        Ok(recovered)
    }

    /// Collects the next batch of items emitted on this chain.
    fn next_batch(&self) -> polygon_relayer_utils::Result<Vec<DepositEvent>> {
        let chain = self.pipeline.chain();
        let mut after = self.resume_after.lock().take();
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            let page = self
                .pipeline
                .store()
                .list_pending_after(after.as_deref(), self.batch_size)?;
            for (tx_id, payload) in page.items {
                after = Some(tx_id.as_bytes().to_vec());
                match serde_json::from_slice::<DepositEvent>(&payload) {
                    Ok(event) if event.source == chain => batch.push(event),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(%tx_id, "skipping undecodable pending entry: {}", e);
                    }
                }
                if batch.len() == self.batch_size {
                    break;
                }
            }
            if page.next.is_none() && batch.len() < self.batch_size {
                // reached the end of the set, the next step starts over.
                after = None;
                break;
            }
        }
        *self.resume_after.lock() = after;
        Ok(batch)
    }
}

#[async_trait::async_trait]
impl<S: RelayStore> PollingTask for DepositProcessor<S> {
    const TAG: &'static str = "Deposit Processor";

    fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    #[tracing::instrument(skip_all, fields(chain = %self.pipeline.chain()))]
    async fn poll_once(
        &self,
        shutdown: &mut Shutdown,
    ) -> polygon_relayer_utils::Result<PollStatus> {
        if !self.recovered.swap(true, Ordering::SeqCst) {
            let count = self.recover_interrupted()?;
            if count > 0 {
                tracing::info!("{} interrupted submissions queued for retry", count);
            }
        }

        let batch = self.next_batch()?;
        let full = batch.len() == self.batch_size;
        let mut progressed = 0;
        for event in batch {
            if shutdown.is_shutdown() {
                return Ok(PollStatus::Idle);
            }
            match self
                .pipeline
                .process(Stage::Pending, event.tx_id, Some(event.height))
                .await
            {
                Ok(outcome) => {
                    if outcome.made_progress() {
                        progressed += 1;
                    }
                    if let Outcome::Submitted { hash } = outcome {
                        tracing::debug!(tx_id = %event.tx_id, %hash, "relayed");
                    }
                }
                Err(Error::Client(e)) => {
                    // the item stays pending and is picked up again later.
                    tracing::warn!(tx_id = %event.tx_id, "could not process: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        let pending = if full && progressed > 0 {
            PollStatus::Busy
        } else {
            PollStatus::Idle
        };

        let mut retried = PollStatus::Idle;
        if let Some(retry) = &self.retry {
            if retry.is_due() && !shutdown.is_shutdown() {
                retried = retry.run_batch(shutdown).await?;
            }
        }
        if pending == PollStatus::Busy || retried == PollStatus::Busy {
            Ok(PollStatus::Busy)
        } else {
            Ok(PollStatus::Idle)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use polygon_relayer_chain_client::mocked::{MockFailure, MockedChainClient};
    use polygon_relayer_chain_client::ProofClient;
    use polygon_relayer_store::{
        ChainStatusStore, InMemoryStore, PendingProofStore, RetryStore,
    };
    use polygon_relayer_types::{
        BridgeTxStatus, ChainKey, Proof, ProofStatus, RetryKey, SubmitReceipt,
    };
    use polygon_relayer_utils::metric::Metrics;
    use polygon_relayer_utils::{ClientError, SubmitError};
    use tokio::sync::broadcast;

    use super::*;
    use crate::pipeline::tests::{deposit, record, seed};

    fn pipeline(
        prover: Arc<dyn ProofClient>,
        store: &InMemoryStore,
        chain: ChainKey,
    ) -> SubmissionPipeline<InMemoryStore> {
        SubmissionPipeline::new(
            chain,
            prover,
            store.clone(),
            Arc::new(Metrics::new().unwrap()),
        )
    }

    fn processor(
        client: &Arc<MockedChainClient>,
        store: &InMemoryStore,
        chain: ChainKey,
        batch_size: usize,
    ) -> DepositProcessor<InMemoryStore> {
        DepositProcessor::builder()
            .pipeline(pipeline(client.clone(), store, chain))
            .batch_size(batch_size)
            .build()
    }

    fn with_retry(
        client: &Arc<MockedChainClient>,
        store: &InMemoryStore,
        chain: ChainKey,
    ) -> DepositProcessor<InMemoryStore> {
        let pipeline = pipeline(client.clone(), store, chain);
        DepositProcessor::builder()
            .pipeline(pipeline.clone())
            .retry(
                RetryWorker::builder()
                    .pipeline(pipeline)
                    .polling_interval(Duration::ZERO)
                    .build(),
            )
            .build()
    }

    async fn step(
        processor: &DepositProcessor<InMemoryStore>,
    ) -> polygon_relayer_utils::Result<PollStatus> {
        let (_tx, rx) = broadcast::channel(1);
        processor.poll_once(&mut Shutdown::new(rx)).await
    }

    /// Hands everything to the mocked client, and sends the shutdown signal
    /// once a submission went through.
    struct StopAfterSubmit {
        inner: Arc<MockedChainClient>,
        stop: broadcast::Sender<()>,
    }

    #[async_trait::async_trait]
    impl ProofClient for StopAfterSubmit {
        async fn proof(&self, tx_id: &TxId) -> Result<ProofStatus, ClientError> {
            self.inner.proof(tx_id).await
        }

        async fn submit(&self, proof: &Proof) -> Result<SubmitReceipt, SubmitError> {
            let receipt = self.inner.submit(proof).await;
            let _ = self.stop.send(());
            receipt
        }

        async fn is_relayed(&self, tx_id: &TxId) -> Result<bool, ClientError> {
            self.inner.is_relayed(tx_id).await
        }
    }

    #[tokio::test]
    async fn only_items_of_its_own_chain_are_processed() {
        let eth = Arc::new(MockedChainClient::new(ChainKey::Eth));
        let store = InMemoryStore::default();
        seed(&eth, &store, deposit(ChainKey::Eth, 1, 10));
        seed(&eth, &store, deposit(ChainKey::Poly, 2, 11));
        seed(&eth, &store, deposit(ChainKey::Eth, 3, 12));

        let processor = processor(&eth, &store, ChainKey::Eth, 10);
        assert_eq!(step(&processor).await.unwrap(), PollStatus::Idle);
        let left = store.list_pending(10).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left.items[0].0, TxId::from_low_u64_be(2));
        assert_eq!(eth.submitted().len(), 2);
    }

    #[tokio::test]
    async fn not_final_items_do_not_block_the_rest() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        let store = InMemoryStore::default();
        for id in 1..=4 {
            seed(&client, &store, deposit(ChainKey::Eth, id, id));
        }
        client.set_proof(TxId::from_low_u64_be(1), ProofStatus::Pending);
        client.set_proof(TxId::from_low_u64_be(2), ProofStatus::Pending);

        let processor = processor(&client, &store, ChainKey::Eth, 2);
        // first step only sees the two items that are not final.
        assert_eq!(step(&processor).await.unwrap(), PollStatus::Idle);
        assert_eq!(store.list_pending(10).unwrap().len(), 4);
        // the next one resumes after them.
        step(&processor).await.unwrap();
        assert_eq!(store.list_pending(10).unwrap().len(), 2);
        assert_eq!(client.submitted().len(), 2);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn client_failures_leave_the_item_pending() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        let store = InMemoryStore::default();
        seed(&client, &store, deposit(ChainKey::Eth, 1, 1));
        let processor = processor(&client, &store, ChainKey::Eth, 10);

        client.fail_next(1, MockFailure::Timeout);
        assert_eq!(step(&processor).await.unwrap(), PollStatus::Idle);
        assert!(store.get_pending(&TxId::from_low_u64_be(1)).unwrap().is_some());
        assert!(logs_contain("could not process"));

        step(&processor).await.unwrap();
        assert!(store.get_pending(&TxId::from_low_u64_be(1)).unwrap().is_none());
    }

    #[tokio::test]
    async fn shutdown_stops_the_batch_before_the_next_item() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        let store = InMemoryStore::default();
        for id in 1..=3 {
            seed(&client, &store, deposit(ChainKey::Eth, id, id));
        }
        let (stop, rx) = broadcast::channel(1);
        let mut shutdown = Shutdown::new(rx);
        let prover = Arc::new(StopAfterSubmit {
            inner: client.clone(),
            stop,
        });
        let processor = DepositProcessor::builder()
            .pipeline(pipeline(prover, &store, ChainKey::Eth))
            .batch_size(10)
            .build();

        let status = processor.poll_once(&mut shutdown).await.unwrap();
        assert_eq!(status, PollStatus::Idle);
        assert_eq!(client.submitted().len(), 1);
        assert_eq!(store.list_pending(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn retry_stage_runs_after_the_pending_batch() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        let store = InMemoryStore::default();
        seed(&client, &store, deposit(ChainKey::Eth, 2, 2));
        client.push_event(deposit(ChainKey::Eth, 1, 1));
        let retried = TxId::from_low_u64_be(1);
        store
            .enqueue_retry(&RetryKey::new(ChainKey::Eth, retried).to_bytes())
            .unwrap();

        let processor = with_retry(&client, &store, ChainKey::Eth);
        assert_eq!(step(&processor).await.unwrap(), PollStatus::Idle);
        let order: Vec<TxId> =
            client.submitted().into_iter().map(|p| p.tx_id).collect();
        assert_eq!(order, vec![TxId::from_low_u64_be(2), retried]);
        assert!(store.list_retry(10).unwrap().is_empty());
        assert!(store.list_pending(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn interrupted_submissions_are_retried_after_restart() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        let store = InMemoryStore::default();
        seed(&client, &store, deposit(ChainKey::Eth, 5, 50));
        let tx_id = TxId::from_low_u64_be(5);
        // a crash right after the marker was written.
        store.put_reprove(ChainKey::Eth, tx_id.as_bytes(), b"{}").unwrap();
        // and the submission did go through.
        client.mark_relayed(tx_id);

        let processor = processor(&client, &store, ChainKey::Eth, 10);
        step(&processor).await.unwrap();
        let retry_key = RetryKey::new(ChainKey::Eth, tx_id).to_bytes();
        assert!(store.has_retry(&retry_key).unwrap());
        assert!(store.get_pending(&tx_id).unwrap().is_none());
        assert!(store.list_reprove(ChainKey::Eth, 10).unwrap().is_empty());

        // after the restart, the retry stage finds it relayed.
        let restarted = with_retry(&client, &store, ChainKey::Eth);
        step(&restarted).await.unwrap();
        assert!(!store.has_retry(&retry_key).unwrap());
        assert_eq!(record(&store, &tx_id).status, BridgeTxStatus::AlreadyRelayed);
        assert!(client.submitted().is_empty());
    }
}
