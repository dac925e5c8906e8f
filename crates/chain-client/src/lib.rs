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

//! # Chain Clients
//!
//! The relayer never talks to a chain node directly. Each chain sits behind
//! an adapter that speaks a small JSON-RPC protocol, and the relayer only
//! sees the traits below:
//!
//! * [`ChainClient`] scans a source chain for cross-chain events.
//! * [`ProofClient`] builds finality proofs and submits them to the
//!   destination chain.
//! * [`SpanClient`] reads Heimdall spans.
//!
//! Every failure is a [`ClientError`], which knows whether it is transient.

use polygon_relayer_types::{
    ChainKey, DepositEvent, Proof, ProofStatus, Span, SubmitReceipt, TxId,
};
use polygon_relayer_utils::{ClientError, SubmitError};

/// JSON-RPC adapter over HTTP.
pub mod http;
/// In memory clients, scripted by tests.
pub mod mocked;

pub use http::HttpChainClient;
pub use mocked::MockedChainClient;

/// Read access to a source chain.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    /// The chain this client scans.
    fn chain(&self) -> ChainKey;

    /// Height of the chain tip, confirmations not applied.
    async fn latest_height(&self) -> Result<u64, ClientError>;

    /// Every cross-chain event emitted in `[from, to]`, in height order.
    async fn events_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<DepositEvent>, ClientError>;
}

/// Proof construction on the source side, submission on the destination side.
#[async_trait::async_trait]
pub trait ProofClient: Send + Sync {
    async fn proof(&self, tx_id: &TxId) -> Result<ProofStatus, ClientError>;

    async fn submit(&self, proof: &Proof) -> Result<SubmitReceipt, SubmitError>;

    /// Whether the destination already processed `tx_id`, whoever relayed it.
    async fn is_relayed(&self, tx_id: &TxId) -> Result<bool, ClientError>;
}

/// Read access to Heimdall spans.
#[async_trait::async_trait]
pub trait SpanClient: Send + Sync {
    async fn latest_span(&self) -> Result<Span, ClientError>;

    /// `None` when the span is not published yet.
    async fn span(&self, id: u64) -> Result<Option<Span>, ClientError>;
}
