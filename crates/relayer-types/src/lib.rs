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

//! Types shared between the store, the chain clients and the relayer tasks.

/// The chains the relayer talks to, and the cursor names derived from them.
pub mod chain;
/// Deposit events, proofs and relay records.
pub mod event;
/// Env aware RPC url.
pub mod rpc_url;
/// Heimdall spans and validator sets.
pub mod span;
/// Fixed size transaction identifiers.
pub mod tx_id;

pub use chain::ChainKey;
pub use event::{
    BridgeTransaction, BridgeTxStatus, DepositEvent, Proof, ProofStatus,
    RetryKey, SubmitReceipt,
};
pub use span::{Span, Validator, ValidatorSet};
pub use tx_id::TxId;
