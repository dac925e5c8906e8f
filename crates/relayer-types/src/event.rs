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

use serde::{Deserialize, Serialize};

use polygon_relayer_utils::Error;

use crate::{ChainKey, TxId};

/// A cross-chain event found by a chain monitor.
///
/// Stored, JSON encoded, as the payload of a pending proof entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositEvent {
    pub tx_id: TxId,
    pub height: u64,
    /// The chain the event was emitted on.
    pub source: ChainKey,
    /// Opaque event data, as returned by the adapter.
    #[serde(with = "hex", default)]
    pub payload: Vec<u8>,
}

/// A finality proof for a source transaction, ready to be submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    pub tx_id: TxId,
    /// Height of the block the proof was built against.
    pub height: u64,
    #[serde(with = "hex")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProofStatus {
    /// The source transaction is final and the proof can be submitted.
    Ready { proof: Proof },
    /// Not final yet, ask again later.
    Pending,
    /// The source transaction can never be proven.
    Invalid { reason: String },
}

/// What the destination chain hands back for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Hash of the relay transaction on the destination chain.
    pub hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BridgeTxStatus {
    /// The relayer submitted the proof itself.
    Submitted,
    /// Someone else relayed it first.
    AlreadyRelayed,
}

/// Record of a completed relay, kept under the bridge transactions partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeTransaction {
    pub tx_id: TxId,
    pub source: ChainKey,
    #[serde(default)]
    pub source_height: Option<u64>,
    #[serde(default)]
    pub relay_tx_hash: Option<String>,
    pub status: BridgeTxStatus,
    /// Unix timestamp (seconds) of the last update.
    pub updated_at: u64,
}

/// Key of a retry entry: the source chain tag followed by the tx id.
///
/// The tag keeps the entries of each chain in one contiguous key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetryKey {
    pub chain: ChainKey,
    pub tx_id: TxId,
}

impl RetryKey {
    /// Length of the binary form.
    pub const LEN: usize = 1 + TxId::LEN;

    pub fn new(chain: ChainKey, tx_id: TxId) -> Self {
        Self { chain, tx_id }
    }

    /// The smallest possible key of `chain`, every retry key of that chain
    /// sorts strictly after it.
    pub fn chain_prefix(chain: ChainKey) -> [u8; 1] {
        [chain.tag()]
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::LEN);
        bytes.push(self.chain.tag());
        bytes.extend_from_slice(self.tx_id.as_bytes());
        bytes
    }
}

impl TryFrom<&[u8]> for RetryKey {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let (tag, rest) = value
            .split_first()
            .ok_or_else(|| Error::InvalidTxId("empty retry key".into()))?;
        let chain = ChainKey::from_tag(*tag).ok_or_else(|| {
            Error::InvalidTxId(format!("unknown chain tag {tag}"))
        })?;
        let tx_id = TxId::try_from(rest)?;
        Ok(Self { chain, tx_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_status_wire_format() {
        let json = serde_json::json!({
            "status": "ready",
            "proof": { "txId": "0xabcd", "height": 42, "data": "beef" }
        });
        let status: ProofStatus = serde_json::from_value(json).unwrap();
        match status {
            ProofStatus::Ready { proof } => {
                assert_eq!(proof.tx_id, TxId::from_low_u64_be(0xabcd));
                assert_eq!(proof.data, vec![0xbe, 0xef]);
            }
            other => panic!("unexpected {other:?}"),
        }
        let pending: ProofStatus =
            serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert_eq!(pending, ProofStatus::Pending);
    }

    #[test]
    fn retry_keys_are_namespaced_by_chain() {
        let key = RetryKey::new(ChainKey::Poly, TxId::from_low_u64_be(9));
        let bytes = key.to_bytes();
        assert_eq!(bytes.len(), RetryKey::LEN);
        assert!(bytes.as_slice() > &RetryKey::chain_prefix(ChainKey::Poly)[..]);
        assert!(bytes.as_slice() < &RetryKey::chain_prefix(ChainKey::Heimdall)[..]);
        assert_eq!(RetryKey::try_from(bytes.as_slice()).unwrap(), key);
        assert!(RetryKey::try_from(&[9u8; 33][..]).is_err());
    }
}
