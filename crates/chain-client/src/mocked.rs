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

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use polygon_relayer_types::{
    ChainKey, DepositEvent, Proof, ProofStatus, Span, SubmitReceipt, TxId,
};
use polygon_relayer_utils::{ClientError, SubmitError};

use crate::{ChainClient, ProofClient, SpanClient};

/// Scripted outcome of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockSubmit {
    Accept,
    Retryable(String),
    Reject(String),
}

/// Failure injected into the next calls of a mocked client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Fails with [`ClientError::Timeout`].
    Timeout,
    /// Fails with [`ClientError::Malformed`].
    Malformed,
}

impl MockFailure {
    fn error(self) -> ClientError {
        match self {
            MockFailure::Timeout => ClientError::Timeout,
            MockFailure::Malformed => {
                ClientError::Malformed("scripted malformed response".into())
            }
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    latest_height: u64,
    events: Vec<DepositEvent>,
    proofs: HashMap<TxId, ProofStatus>,
    submit_script: VecDeque<MockSubmit>,
    submitted: Vec<Proof>,
    relayed: HashSet<TxId>,
    spans: BTreeMap<u64, Span>,
    failures: VecDeque<MockFailure>,
    range_queries: Vec<(u64, u64)>,
}

/// A chain client backed by memory. Tests script the chain (height,
/// events, proofs, spans) and the outcome of submissions, then inspect
/// what the relayer asked for.
#[derive(Debug)]
pub struct MockedChainClient {
    chain: ChainKey,
    state: Mutex<MockState>,
}

impl MockedChainClient {
    pub fn new(chain: ChainKey) -> Self {
        Self {
            chain,
            state: Mutex::default(),
        }
    }

    pub fn set_latest_height(&self, height: u64) {
        self.state.lock().latest_height = height;
    }

    /// Adds an event on the chain, its proof becomes ready right away.
    pub fn push_event(&self, event: DepositEvent) {
        let mut state = self.state.lock();
        state.latest_height = state.latest_height.max(event.height);
        state.proofs.insert(
            event.tx_id,
            ProofStatus::Ready {
                proof: Proof {
                    tx_id: event.tx_id,
                    height: event.height,
                    data: event.payload.clone(),
                },
            },
        );
        state.events.push(event);
        state.events.sort_by_key(|e| e.height);
    }

    pub fn set_proof(&self, tx_id: TxId, status: ProofStatus) {
        self.state.lock().proofs.insert(tx_id, status);
    }

    /// Queues the outcome of the next submission. Unscripted submissions
    /// are accepted.
    pub fn push_submit_outcome(&self, outcome: MockSubmit) {
        self.state.lock().submit_script.push_back(outcome);
    }

    /// Makes the next `count` calls fail with `failure`.
    pub fn fail_next(&self, count: usize, failure: MockFailure) {
        let mut state = self.state.lock();
        state.failures.extend(std::iter::repeat(failure).take(count));
    }

    /// Marks a transaction as relayed by someone else.
    pub fn mark_relayed(&self, tx_id: TxId) {
        self.state.lock().relayed.insert(tx_id);
    }

    pub fn push_span(&self, span: Span) {
        self.state.lock().spans.insert(span.id, span);
    }

    /// Proofs accepted so far, in submission order.
    pub fn submitted(&self) -> Vec<Proof> {
        self.state.lock().submitted.clone()
    }

    /// Every `[from, to]` range the client was asked to scan.
    pub fn range_queries(&self) -> Vec<(u64, u64)> {
        self.state.lock().range_queries.clone()
    }

    fn injected_failure(&self) -> Result<(), ClientError> {
        match self.state.lock().failures.pop_front() {
            Some(failure) => Err(failure.error()),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ChainClient for MockedChainClient {
    fn chain(&self) -> ChainKey {
        self.chain
    }

    async fn latest_height(&self) -> Result<u64, ClientError> {
        self.injected_failure()?;
        Ok(self.state.lock().latest_height)
    }

    async fn events_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<DepositEvent>, ClientError> {
        self.injected_failure()?;
        let mut state = self.state.lock();
        state.range_queries.push((from, to));
        Ok(state
            .events
            .iter()
            .filter(|e| from <= e.height && e.height <= to)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl ProofClient for MockedChainClient {
    async fn proof(&self, tx_id: &TxId) -> Result<ProofStatus, ClientError> {
        self.injected_failure()?;
        Ok(self
            .state
            .lock()
            .proofs
            .get(tx_id)
            .cloned()
            .unwrap_or(ProofStatus::Pending))
    }

    async fn submit(&self, proof: &Proof) -> Result<SubmitReceipt, SubmitError> {
        self.injected_failure()?;
        let mut state = self.state.lock();
        if state.relayed.contains(&proof.tx_id) {
            return Err(SubmitError::Permanent("already relayed".into()));
        }
        match state.submit_script.pop_front().unwrap_or(MockSubmit::Accept) {
            MockSubmit::Accept => {
                state.relayed.insert(proof.tx_id);
                state.submitted.push(proof.clone());
                Ok(SubmitReceipt {
                    hash: format!("0x{:064x}", state.submitted.len()),
                })
            }
            MockSubmit::Retryable(reason) => Err(SubmitError::Retryable(reason)),
            MockSubmit::Reject(reason) => Err(SubmitError::Permanent(reason)),
        }
    }

    async fn is_relayed(&self, tx_id: &TxId) -> Result<bool, ClientError> {
        self.injected_failure()?;
        Ok(self.state.lock().relayed.contains(tx_id))
    }
}

#[async_trait::async_trait]
impl SpanClient for MockedChainClient {
    async fn latest_span(&self) -> Result<Span, ClientError> {
        self.injected_failure()?;
        self.state
            .lock()
            .spans
            .values()
            .next_back()
            .cloned()
            .ok_or_else(|| ClientError::Rpc {
                code: -32000,
                message: "no span published yet".into(),
            })
    }

    async fn span(&self, id: u64) -> Result<Option<Span>, ClientError> {
        self.injected_failure()?;
        Ok(self.state.lock().spans.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: u64, height: u64) -> DepositEvent {
        DepositEvent {
            tx_id: TxId::from_low_u64_be(id),
            height,
            source: ChainKey::Eth,
            payload: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn scripted_chain_answers_in_order() {
        let client = MockedChainClient::new(ChainKey::Eth);
        client.push_event(event(2, 20));
        client.push_event(event(1, 10));
        assert_eq!(client.latest_height().await.unwrap(), 20);
        let events = client.events_in_range(0, 15).await.unwrap();
        assert_eq!(events, vec![event(1, 10)]);

        client.fail_next(1, MockFailure::Timeout);
        assert!(client.latest_height().await.unwrap_err().is_transient());
        assert_eq!(client.latest_height().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn submissions_follow_the_script() {
        let client = MockedChainClient::new(ChainKey::Eth);
        client.push_event(event(1, 10));
        let ProofStatus::Ready { proof } =
            client.proof(&TxId::from_low_u64_be(1)).await.unwrap()
        else {
            panic!("proof should be ready");
        };
        client.push_submit_outcome(MockSubmit::Retryable("busy".into()));
        assert!(client.submit(&proof).await.unwrap_err().is_retryable());
        client.submit(&proof).await.unwrap();
        assert!(client.is_relayed(&proof.tx_id).await.unwrap());
        assert!(!client.submit(&proof).await.unwrap_err().is_retryable());
        assert_eq!(client.submitted().len(), 1);
    }
}
