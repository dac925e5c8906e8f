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
use std::time::{SystemTime, UNIX_EPOCH};

use polygon_relayer_chain_client::ProofClient;
use polygon_relayer_store::RelayStore;
use polygon_relayer_types::{
    BridgeTransaction, BridgeTxStatus, ChainKey, ProofStatus, TxId,
};
use polygon_relayer_utils::metric::Metrics;
use polygon_relayer_utils::probe;

/// Where the item being processed currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// In the pending set, never submitted.
    Pending,
    /// In the retry set, a previous submission failed.
    Retry,
}

/// What happened to an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The proof was accepted by the destination chain.
    Submitted { hash: String },
    /// The destination already processed the transaction.
    AlreadyRelayed,
    /// The source transaction is not final yet, the item stays where it is.
    NotFinal,
    /// The submission failed and will be attempted again.
    Retrying,
    /// The item can never be relayed and was dropped.
    Abandoned,
}

impl Outcome {
    /// Whether the item left the pending set.
    pub fn made_progress(&self) -> bool {
        !matches!(self, Outcome::NotFinal)
    }

    /// Whether the item is done with: it is in neither the pending nor the
    /// retry set anymore.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Outcome::Submitted { .. } | Outcome::AlreadyRelayed | Outcome::Abandoned
        )
    }
}

/// Proves and submits the items of one source chain.
#[derive(Clone)]
pub struct SubmissionPipeline<S> {
    chain: ChainKey,
    prover: Arc<dyn ProofClient>,
    store: S,
    metrics: Arc<Metrics>,
}

impl<S: RelayStore> SubmissionPipeline<S> {
    /// Creates a pipeline for the items emitted on `chain`.
    pub fn new(
        chain: ChainKey,
        prover: Arc<dyn ProofClient>,
        store: S,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            chain,
            prover,
            store,
            metrics,
        }
    }

    /// The source chain of the items.
    pub fn chain(&self) -> ChainKey {
        self.chain
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Runs one item through proof and submission, and records the result.
    ///
    /// Client failures while asking for the proof are returned untouched
    /// and leave the item where it is; store failures are returned too.
    #[tracing::instrument(skip(self), fields(chain = %self.chain))]
    pub async fn process(
        &self,
        stage: Stage,
        tx_id: TxId,
        source_height: Option<u64>,
    ) -> polygon_relayer_utils::Result<Outcome> {
        if stage == Stage::Retry && self.prover.is_relayed(&tx_id).await? {
            tracing::info!(%tx_id, "already relayed, nothing to submit");
            self.complete(&tx_id, BridgeTxStatus::AlreadyRelayed, None, source_height)?;
            return Ok(Outcome::AlreadyRelayed);
        }

        let proof = match self.prover.proof(&tx_id).await? {
            ProofStatus::Ready { proof } => proof,
            ProofStatus::Pending => {
                tracing::trace!(%tx_id, "proof not final yet");
                return Ok(Outcome::NotFinal);
            }
            ProofStatus::Invalid { reason } => {
                tracing::error!(%tx_id, %reason, "proof is invalid");
                self.abandon(&tx_id)?;
                return Ok(Outcome::Abandoned);
            }
        };

        // from here on the outcome of the submission may get lost,
        // the marker lets a restart find out.
        self.store.put_reprove(
            self.chain,
            tx_id.as_bytes(),
            &serde_json::to_vec(&proof)?,
        )?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::TxQueue,
            chain = %self.chain,
            %tx_id,
            submitting = true,
        );
        match self.prover.submit(&proof).await {
            Ok(receipt) => {
                tracing::info!(%tx_id, hash = %receipt.hash, "proof submitted");
                self.complete(
                    &tx_id,
                    BridgeTxStatus::Submitted,
                    Some(receipt.hash.clone()),
                    source_height.or(Some(proof.height)),
                )?;
                self.metrics.proofs_submitted.inc();
                Ok(Outcome::Submitted { hash: receipt.hash })
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(%tx_id, "submission failed, will retry: {}", e);
                match stage {
                    Stage::Pending => {
                        self.store.move_to_retry(self.chain, &tx_id)?;
                        self.metrics.retries_enqueued.inc();
                    }
                    Stage::Retry => {
                        self.store.clear_reprove(self.chain, tx_id.as_bytes())?;
                    }
                }
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Retry,
                    chain = %self.chain,
                    %tx_id,
                );
                Ok(Outcome::Retrying)
            }
            Err(e) => {
                tracing::error!(%tx_id, "submission rejected: {}", e);
                self.abandon(&tx_id)?;
                Ok(Outcome::Abandoned)
            }
        }
    }

    fn complete(
        &self,
        tx_id: &TxId,
        status: BridgeTxStatus,
        relay_tx_hash: Option<String>,
        source_height: Option<u64>,
    ) -> polygon_relayer_utils::Result<()> {
        let record = BridgeTransaction {
            tx_id: *tx_id,
            source: self.chain,
            source_height,
            relay_tx_hash,
            status,
            updated_at: unix_now(),
        };
        self.store
            .complete_pending(self.chain, tx_id, &serde_json::to_vec(&record)?)
    }

    fn abandon(&self, tx_id: &TxId) -> polygon_relayer_utils::Result<()> {
        self.store.abandon_pending(self.chain, tx_id)?;
        self.metrics.items_abandoned.inc();
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod tests {
    use polygon_relayer_chain_client::mocked::{MockSubmit, MockedChainClient};
    use polygon_relayer_store::{
        BridgeTxStore, ChainStatusStore, InMemoryStore, PendingProofStore,
        RetryStore,
    };
    use polygon_relayer_types::{DepositEvent, RetryKey};

    use super::*;

    pub(crate) fn deposit(chain: ChainKey, id: u64, height: u64) -> DepositEvent {
        DepositEvent {
            tx_id: TxId::from_low_u64_be(id),
            height,
            source: chain,
            payload: vec![0xde, 0xad],
        }
    }

    /// Records `event` as pending and publishes it on the mocked chain.
    pub(crate) fn seed(
        client: &MockedChainClient,
        store: &InMemoryStore,
        event: DepositEvent,
    ) {
        store
            .mark_pending(&event.tx_id, &serde_json::to_vec(&event).unwrap())
            .unwrap();
        client.push_event(event);
    }

    pub(crate) fn record(store: &InMemoryStore, tx_id: &TxId) -> BridgeTransaction {
        let bytes = store.get_bridge_tx(&tx_id.to_string()).unwrap().unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn pipeline(
        client: &Arc<MockedChainClient>,
        store: &InMemoryStore,
    ) -> SubmissionPipeline<InMemoryStore> {
        SubmissionPipeline::new(
            ChainKey::Eth,
            client.clone(),
            store.clone(),
            Arc::new(Metrics::new().unwrap()),
        )
    }

    fn retry_key(tx_id: TxId) -> Vec<u8> {
        RetryKey::new(ChainKey::Eth, tx_id).to_bytes()
    }

    #[tokio::test]
    async fn accepted_proof_completes_the_item() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        let store = InMemoryStore::default();
        seed(&client, &store, deposit(ChainKey::Eth, 0xabcd, 42));
        let tx_id = TxId::from_low_u64_be(0xabcd);
        let pipeline = pipeline(&client, &store);

        let outcome = pipeline.process(Stage::Pending, tx_id, Some(42)).await.unwrap();
        assert!(matches!(outcome, Outcome::Submitted { .. }));
        assert!(store.get_pending(&tx_id).unwrap().is_none());
        assert!(store.list_reprove(ChainKey::Eth, 10).unwrap().is_empty());
        let record = record(&store, &tx_id);
        assert_eq!(record.status, BridgeTxStatus::Submitted);
        assert_eq!(record.source_height, Some(42));
        assert_eq!(pipeline.metrics.proofs_submitted.get() as u64, 1);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn retryable_failure_moves_the_item_then_succeeds() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        let store = InMemoryStore::default();
        seed(&client, &store, deposit(ChainKey::Eth, 7, 3));
        let tx_id = TxId::from_low_u64_be(7);
        let pipeline = pipeline(&client, &store);

        client.push_submit_outcome(MockSubmit::Retryable("nonce too low".into()));
        let outcome = pipeline.process(Stage::Pending, tx_id, Some(3)).await.unwrap();
        assert_eq!(outcome, Outcome::Retrying);
        assert!(store.get_pending(&tx_id).unwrap().is_none());
        assert!(store.has_retry(&retry_key(tx_id)).unwrap());
        assert!(store.list_reprove(ChainKey::Eth, 10).unwrap().is_empty());

        // still failing in the retry stage: the entry stays.
        client.push_submit_outcome(MockSubmit::Retryable("busy".into()));
        let outcome = pipeline.process(Stage::Retry, tx_id, None).await.unwrap();
        assert_eq!(outcome, Outcome::Retrying);
        assert!(store.has_retry(&retry_key(tx_id)).unwrap());
        assert_eq!(pipeline.metrics.retries_enqueued.get() as u64, 1);

        let outcome = pipeline.process(Stage::Retry, tx_id, None).await.unwrap();
        assert!(matches!(outcome, Outcome::Submitted { .. }));
        assert!(!store.has_retry(&retry_key(tx_id)).unwrap());
        assert!(store.get_pending(&tx_id).unwrap().is_none());
        assert_eq!(record(&store, &tx_id).source_height, Some(3));
        assert!(logs_contain("will retry"));
    }

    #[tokio::test]
    async fn rejected_and_invalid_items_are_abandoned() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        let store = InMemoryStore::default();
        seed(&client, &store, deposit(ChainKey::Eth, 1, 1));
        seed(&client, &store, deposit(ChainKey::Eth, 2, 2));
        let pipeline = pipeline(&client, &store);

        client.push_submit_outcome(MockSubmit::Reject("bad proof".into()));
        let first = TxId::from_low_u64_be(1);
        let outcome = pipeline.process(Stage::Pending, first, None).await.unwrap();
        assert_eq!(outcome, Outcome::Abandoned);

        let second = TxId::from_low_u64_be(2);
        client.set_proof(
            second,
            ProofStatus::Invalid {
                reason: "reverted".into(),
            },
        );
        let outcome = pipeline.process(Stage::Pending, second, None).await.unwrap();
        assert_eq!(outcome, Outcome::Abandoned);

        for tx_id in [first, second] {
            assert!(store.get_pending(&tx_id).unwrap().is_none());
            assert!(!store.has_retry(&retry_key(tx_id)).unwrap());
            assert!(store.get_bridge_tx(&tx_id.to_string()).unwrap().is_none());
        }
        assert!(store.list_reprove(ChainKey::Eth, 10).unwrap().is_empty());
        assert_eq!(pipeline.metrics.items_abandoned.get() as u64, 2);
        assert!(client.submitted().is_empty());
    }

    #[tokio::test]
    async fn item_waits_while_the_proof_is_not_final() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        let store = InMemoryStore::default();
        seed(&client, &store, deposit(ChainKey::Eth, 1, 1));
        let tx_id = TxId::from_low_u64_be(1);
        client.set_proof(tx_id, ProofStatus::Pending);

        let outcome = pipeline(&client, &store)
            .process(Stage::Pending, tx_id, None)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::NotFinal);
        assert!(!outcome.made_progress());
        assert!(store.get_pending(&tx_id).unwrap().is_some());
        assert!(store.list_reprove(ChainKey::Eth, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn retry_of_a_relayed_item_does_not_resubmit() {
        let client = Arc::new(MockedChainClient::new(ChainKey::Eth));
        let store = InMemoryStore::default();
        let tx_id = TxId::from_low_u64_be(9);
        store.enqueue_retry(&retry_key(tx_id)).unwrap();
        client.mark_relayed(tx_id);

        let outcome = pipeline(&client, &store)
            .process(Stage::Retry, tx_id, None)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::AlreadyRelayed);
        assert!(!store.has_retry(&retry_key(tx_id)).unwrap());
        assert_eq!(record(&store, &tx_id).status, BridgeTxStatus::AlreadyRelayed);
        assert!(client.submitted().is_empty());
    }
}
