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

//! # Relayer Store Module 🕸️
//!
//! A module for managing the durable state of the relayer.
//!
//! ## Overview
//!
//! The store keeps everything the relayer needs to resume after a crash:
//! the scan cursors, the pending proofs and the retry set, the Heimdall
//! spans and the record of completed relays. Every concern lives in its own
//! partition and is reached through its own accessor trait, so a task only
//! sees the part of the state it owns.
//!
//! Values are opaque bytes unless the partition says otherwise. Heights are
//! big-endian `u64`, spans are JSON.
use std::fmt::Debug;

use polygon_relayer_types::{ChainKey, Span, TxId};
use polygon_relayer_utils::{Error, Result};
/// A module for managing in-memory storage of the relayer.
pub mod mem;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
#[cfg(feature = "sled")]
pub mod sled;

/// A store that uses [`sled`](https://sled.rs) as the backend.
#[cfg(feature = "sled")]
pub use self::sled::SledStore;
/// A store that uses in memory data structures as the backend.
pub use mem::InMemoryStore;

/// Upper bound on the number of entries a single scan returns.
pub const MAX_SCAN_ITEMS: usize = 1000;

/// Names of the fixed partitions. Per chain partitions are named by
/// [`ChainKey::state_partition`] and friends.
pub mod partition {
    /// Pending proofs, keyed by transaction id.
    pub const CHECK: &str = "check";
    /// Items waiting for another submission attempt.
    pub const RETRY: &str = "retry";
    /// Scan cursors, keyed by cursor name.
    pub const HEIGHT: &str = "height";
    /// Spans, keyed by big-endian span id.
    pub const SPAN: &str = "span";
    /// Span ids, keyed by big-endian start block.
    pub const SPAN_START_INDEX: &str = "span_start_index";
    /// Completed relays, keyed by transaction id string.
    pub const BRIDGE_TRANSACTIONS: &str = "bridge_transactions";

    /// Partitions that do not depend on a chain.
    pub const FIXED: [&str; 6] = [
        CHECK,
        RETRY,
        HEIGHT,
        SPAN,
        SPAN_START_INDEX,
        BRIDGE_TRANSACTIONS,
    ];
}

/// Value written for every retry entry, only the key carries meaning.
pub const RETRY_MARKER: &[u8] = &[0x00];

/// One bounded slice of a scan.
///
/// When `next` is set there are more entries; pass it back as the
/// `after` argument to continue the scan where this page stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<Vec<u8>>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next: None,
        }
    }

    /// True when the scan stopped at the limit with entries left over.
    pub fn is_truncated(&self) -> bool {
        self.next.is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Collects at most `limit` (capped at [`MAX_SCAN_ITEMS`]) entries from an
/// ordered iterator, remembering where to continue if entries remain.
pub(crate) fn paginate<K, V, I>(
    entries: I,
    limit: usize,
    key_bytes: impl Fn(&K) -> Vec<u8>,
) -> Result<Page<(K, V)>>
where
    I: IntoIterator<Item = Result<(K, V)>>,
{
    let limit = limit.min(MAX_SCAN_ITEMS);
    if limit == 0 {
        return Ok(Page::empty());
    }
    let mut items = Vec::new();
    let mut next = None;
    for entry in entries {
        let entry = entry?;
        if items.len() == limit {
            next = items.last().map(|(k, _): &(K, V)| key_bytes(k));
            break;
        }
        items.push(entry);
    }
    Ok(Page { items, next })
}

pub(crate) fn decode_u64(partition: &'static str, bytes: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] =
        bytes.try_into().map_err(|_| Error::CorruptedValue {
            partition,
            reason: format!("expected 8 bytes, got {}", bytes.len()),
        })?;
    Ok(u64::from_be_bytes(bytes))
}

/// Checks that `span` fits between its stored neighbours.
///
/// `prev` is the stored span with the greatest id below `span.id` and
/// `next` the one with the smallest id above it. Spans must not overlap
/// and consecutive ids must cover consecutive block ranges.
pub fn check_span_fits(
    span: &Span,
    prev: Option<&Span>,
    next: Option<&Span>,
) -> Result<()> {
    let reject = |reason: String| Error::SpanRejected {
        id: span.id,
        reason,
    };
    if span.is_empty() {
        return Err(reject(format!(
            "start block #{} is after end block #{}",
            span.start_block, span.end_block
        )));
    }
    if let Some(prev) = prev {
        if prev.end_block >= span.start_block {
            return Err(reject(format!(
                "overlaps span #{} ending at #{}",
                prev.id, prev.end_block
            )));
        }
        if prev.id + 1 == span.id && prev.end_block + 1 != span.start_block {
            return Err(reject(format!(
                "expected to start at #{} right after span #{}",
                prev.end_block + 1,
                prev.id
            )));
        }
    }
    if let Some(next) = next {
        if next.start_block <= span.end_block {
            return Err(reject(format!(
                "overlaps span #{} starting at #{}",
                next.id, next.start_block
            )));
        }
        if span.id + 1 == next.id && span.end_block + 1 != next.start_block {
            return Err(reject(format!(
                "expected to end at #{} right before span #{}",
                next.start_block.saturating_sub(1),
                next.id
            )));
        }
    }
    Ok(())
}

/// HeightStore keeps the last fully processed height of every scan cursor.
pub trait HeightStore: Clone + Send + Sync {
    /// Returns the stored cursor, if any.
    fn get_height(&self, key: ChainKey) -> Result<Option<u64>>;

    /// Returns the stored cursor or `default` when none was stored yet.
    fn get_height_or(&self, key: ChainKey, default: u64) -> Result<u64> {
        Ok(self.get_height(key)?.unwrap_or(default))
    }

    /// Advances the cursor to `height`. The cursor never moves backwards:
    /// a lower value is ignored. Returns the value stored afterwards.
    fn set_height(&self, key: ChainKey, height: u64) -> Result<u64>;

    /// Overwrites the cursor, even with a lower value, to replay a range.
    /// Returns the previous value.
    fn force_height(&self, key: ChainKey, height: u64) -> Result<Option<u64>>;
}

/// Events seen on a source chain whose proof has not been submitted yet.
pub trait PendingProofStore: Clone + Send + Sync {
    /// Records an event. Recording the same id twice keeps one entry.
    fn mark_pending(&self, tx_id: &TxId, payload: &[u8]) -> Result<()>;
    /// Removes an entry. Removing an absent entry is a no-op.
    fn clear_pending(&self, tx_id: &TxId) -> Result<()>;
    fn get_pending(&self, tx_id: &TxId) -> Result<Option<Vec<u8>>>;
    /// Lists entries in key order, strictly after `after` when given.
    fn list_pending_after(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Page<(TxId, Vec<u8>)>>;

    fn list_pending(&self, limit: usize) -> Result<Page<(TxId, Vec<u8>)>> {
        self.list_pending_after(None, limit)
    }
}

/// Work items whose submission failed and must be attempted again.
pub trait RetryStore: Clone + Send + Sync {
    /// Adds an item. Adding it twice keeps one entry.
    fn enqueue_retry(&self, item: &[u8]) -> Result<()>;
    /// Removes an item, returns whether it was there.
    fn dequeue_retry(&self, item: &[u8]) -> Result<bool>;
    fn has_retry(&self, item: &[u8]) -> Result<bool>;
    /// Lists item ids in key order, strictly after `after` when given.
    fn list_retry_after(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Page<Vec<u8>>>;

    fn list_retry(&self, limit: usize) -> Result<Page<Vec<u8>>> {
        self.list_retry_after(None, limit)
    }
}

/// Outcome of [`SpanStore::put_span`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanInsert {
    /// The span was new and is now stored.
    Inserted,
    /// The very same span was already stored.
    AlreadyPresent,
}

/// Heimdall spans, addressable by id and by block.
pub trait SpanStore: Clone + Send + Sync {
    /// Stores a span. Rejects, with [`Error::SpanRejected`], a span that
    /// overlaps a stored one, that is not contiguous with a stored
    /// neighbour id, or that differs from a span stored under the same id.
    fn put_span(&self, span: &Span) -> Result<SpanInsert>;
    fn get_span(&self, id: u64) -> Result<Option<Span>>;
    /// The span with the greatest id.
    fn latest_span(&self) -> Result<Option<Span>>;
    /// The span whose range contains `block`.
    fn span_for_block(&self, block: u64) -> Result<Option<Span>>;
    /// Every span that shares at least one block with `[from, to]`,
    /// ordered by start block.
    fn get_spans_in_range(&self, from: u64, to: u64) -> Result<Vec<Span>>;
}

/// Completed relays, keyed by the transaction id string.
pub trait BridgeTxStore: Clone + Send + Sync {
    fn put_bridge_tx(&self, tx_id: &str, record: &[u8]) -> Result<()>;
    fn get_bridge_tx(&self, tx_id: &str) -> Result<Option<Vec<u8>>>;
    fn delete_bridge_tx(&self, tx_id: &str) -> Result<()>;
    /// Lists records in key order, strictly after `after` when given.
    fn list_bridge_tx_after(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Page<(String, Vec<u8>)>>;

    fn list_bridge_tx(&self, limit: usize) -> Result<Page<(String, Vec<u8>)>> {
        self.list_bridge_tx_after(None, limit)
    }
}

/// Per chain state: the chain height, in-flight submission markers and
/// free-form status flags.
pub trait ChainStatusStore: Clone + Send + Sync {
    fn get_chain_height(&self, chain: ChainKey) -> Result<Option<u64>>;
    fn set_chain_height(&self, chain: ChainKey, height: u64) -> Result<()>;
    /// Marks an item as handed to the destination chain, outcome unknown.
    fn put_reprove(
        &self,
        chain: ChainKey,
        item: &[u8],
        payload: &[u8],
    ) -> Result<()>;
    fn clear_reprove(&self, chain: ChainKey, item: &[u8]) -> Result<()>;
    fn list_reprove(
        &self,
        chain: ChainKey,
        limit: usize,
    ) -> Result<Page<(Vec<u8>, Vec<u8>)>>;
    fn put_status(&self, chain: ChainKey, key: &str, value: &[u8])
        -> Result<()>;
    fn get_status(&self, chain: ChainKey, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Moves of a work item between partitions. Each move is applied
/// atomically: after a crash the item is either where it was or where it
/// was sent, never in both and never in neither.
pub trait RelayStateTransitions: Clone + Send + Sync {
    /// The item was relayed: drop it from the pending set, the retry set
    /// and the in-flight markers of `chain`, and store its relay record.
    fn complete_pending(
        &self,
        chain: ChainKey,
        tx_id: &TxId,
        record: &[u8],
    ) -> Result<()>;
    /// The submission failed but may succeed later: move the item from the
    /// pending set to the retry set and drop its in-flight marker.
    fn move_to_retry(&self, chain: ChainKey, tx_id: &TxId) -> Result<()>;
    /// The item can never be relayed: drop it from every work partition.
    fn abandon_pending(&self, chain: ChainKey, tx_id: &TxId) -> Result<()>;
}

/// Everything the relayer tasks need from a store.
pub trait RelayStore:
    HeightStore
    + PendingProofStore
    + RetryStore
    + SpanStore
    + BridgeTxStore
    + ChainStatusStore
    + RelayStateTransitions
    + Debug
    + 'static
{
}

impl<S> RelayStore for S where
    S: HeightStore
        + PendingProofStore
        + RetryStore
        + SpanStore
        + BridgeTxStore
        + ChainStatusStore
        + RelayStateTransitions
        + Debug
        + 'static
{
}
