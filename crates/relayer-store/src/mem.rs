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

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use polygon_relayer_types::{ChainKey, RetryKey, Span, TxId};

use super::{
    check_span_fits, paginate, BridgeTxStore, ChainStatusStore, HeightStore,
    Page, PendingProofStore, RelayStateTransitions, RetryStore, SpanInsert,
    SpanStore,
};

type Partition = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Default)]
struct State {
    heights: HashMap<ChainKey, u64>,
    pending: Partition,
    retry: Partition,
    spans: BTreeMap<u64, Span>,
    bridge: BTreeMap<String, Vec<u8>>,
    chain_heights: HashMap<ChainKey, u64>,
    reprove: HashMap<ChainKey, Partition>,
    status: HashMap<(ChainKey, String), Vec<u8>>,
}

/// InMemoryStore is a store that keeps everything in memory, it is lost
/// when the process exits. Used in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

fn range_after<'a, V>(
    map: &'a BTreeMap<Vec<u8>, V>,
    after: Option<&[u8]>,
) -> impl Iterator<Item = (&'a Vec<u8>, &'a V)> {
    let lower = match after {
        Some(key) => Bound::Excluded(key.to_vec()),
        None => Bound::Unbounded,
    };
    map.range((lower, Bound::Unbounded))
}

impl HeightStore for InMemoryStore {
    fn get_height(&self, key: ChainKey) -> crate::Result<Option<u64>> {
        Ok(self.state.read().heights.get(&key).copied())
    }

    fn set_height(&self, key: ChainKey, height: u64) -> crate::Result<u64> {
        let mut state = self.state.write();
        let entry = state.heights.entry(key).or_insert(height);
        *entry = (*entry).max(height);
        Ok(*entry)
    }

    fn force_height(
        &self,
        key: ChainKey,
        height: u64,
    ) -> crate::Result<Option<u64>> {
        Ok(self.state.write().heights.insert(key, height))
    }
}

impl PendingProofStore for InMemoryStore {
    fn mark_pending(&self, tx_id: &TxId, payload: &[u8]) -> crate::Result<()> {
        self.state
            .write()
            .pending
            .insert(tx_id.as_bytes().to_vec(), payload.to_vec());
        Ok(())
    }

    fn clear_pending(&self, tx_id: &TxId) -> crate::Result<()> {
        self.state.write().pending.remove(tx_id.as_bytes());
        Ok(())
    }

    fn get_pending(&self, tx_id: &TxId) -> crate::Result<Option<Vec<u8>>> {
        Ok(self.state.read().pending.get(tx_id.as_bytes()).cloned())
    }

    fn list_pending_after(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> crate::Result<Page<(TxId, Vec<u8>)>> {
        let state = self.state.read();
        let entries = range_after(&state.pending, after)
            .map(|(k, v)| -> crate::Result<_> {
                Ok((TxId::try_from(k.as_slice())?, v.clone()))
            });
        paginate(entries, limit, |k: &TxId| k.as_bytes().to_vec())
    }
}

impl RetryStore for InMemoryStore {
    fn enqueue_retry(&self, item: &[u8]) -> crate::Result<()> {
        self.state
            .write()
            .retry
            .insert(item.to_vec(), crate::RETRY_MARKER.to_vec());
        Ok(())
    }

    fn dequeue_retry(&self, item: &[u8]) -> crate::Result<bool> {
        Ok(self.state.write().retry.remove(item).is_some())
    }

    fn has_retry(&self, item: &[u8]) -> crate::Result<bool> {
        Ok(self.state.read().retry.contains_key(item))
    }

    fn list_retry_after(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> crate::Result<Page<Vec<u8>>> {
        let state = self.state.read();
        let entries =
            range_after(&state.retry, after).map(|(k, _)| Ok((k.clone(), ())));
        let page = paginate(entries, limit, |k: &Vec<u8>| k.clone())?;
        Ok(Page {
            items: page.items.into_iter().map(|(k, _)| k).collect(),
            next: page.next,
        })
    }
}

impl SpanStore for InMemoryStore {
    fn put_span(&self, span: &Span) -> crate::Result<SpanInsert> {
        let mut state = self.state.write();
        if let Some(existing) = state.spans.get(&span.id) {
            if existing == span {
                return Ok(SpanInsert::AlreadyPresent);
            }
            return Err(crate::Error::SpanRejected {
                id: span.id,
                reason: format!("differs from the stored {existing}"),
            });
        }
        let prev = state.spans.range(..span.id).next_back().map(|(_, s)| s);
        let next = state
            .spans
            .range((Bound::Excluded(span.id), Bound::Unbounded))
            .next()
            .map(|(_, s)| s);
        check_span_fits(span, prev, next)?;
        state.spans.insert(span.id, span.clone());
        Ok(SpanInsert::Inserted)
    }

    fn get_span(&self, id: u64) -> crate::Result<Option<Span>> {
        Ok(self.state.read().spans.get(&id).cloned())
    }

    fn latest_span(&self) -> crate::Result<Option<Span>> {
        Ok(self.state.read().spans.values().next_back().cloned())
    }

    fn span_for_block(&self, block: u64) -> crate::Result<Option<Span>> {
        Ok(self
            .state
            .read()
            .spans
            .values()
            .find(|s| s.contains(block))
            .cloned())
    }

    fn get_spans_in_range(&self, from: u64, to: u64) -> crate::Result<Vec<Span>> {
        let state = self.state.read();
        let mut spans: Vec<_> = state
            .spans
            .values()
            .filter(|s| s.overlaps(from, to))
            .cloned()
            .collect();
        spans.sort_by_key(|s| s.start_block);
        Ok(spans)
    }
}

impl BridgeTxStore for InMemoryStore {
    fn put_bridge_tx(&self, tx_id: &str, record: &[u8]) -> crate::Result<()> {
        self.state
            .write()
            .bridge
            .insert(tx_id.to_owned(), record.to_vec());
        Ok(())
    }

    fn get_bridge_tx(&self, tx_id: &str) -> crate::Result<Option<Vec<u8>>> {
        Ok(self.state.read().bridge.get(tx_id).cloned())
    }

    fn delete_bridge_tx(&self, tx_id: &str) -> crate::Result<()> {
        self.state.write().bridge.remove(tx_id);
        Ok(())
    }

    fn list_bridge_tx_after(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> crate::Result<Page<(String, Vec<u8>)>> {
        let state = self.state.read();
        let entries = state
            .bridge
            .iter()
            .filter(|(k, _)| after.map_or(true, |a| k.as_bytes() > a))
            .map(|(k, v)| Ok((k.clone(), v.clone())));
        paginate(entries, limit, |k: &String| k.as_bytes().to_vec())
    }
}

impl ChainStatusStore for InMemoryStore {
    fn get_chain_height(&self, chain: ChainKey) -> crate::Result<Option<u64>> {
        Ok(self.state.read().chain_heights.get(&chain).copied())
    }

    fn set_chain_height(&self, chain: ChainKey, height: u64) -> crate::Result<()> {
        self.state.write().chain_heights.insert(chain, height);
        Ok(())
    }

    fn put_reprove(
        &self,
        chain: ChainKey,
        item: &[u8],
        payload: &[u8],
    ) -> crate::Result<()> {
        self.state
            .write()
            .reprove
            .entry(chain)
            .or_default()
            .insert(item.to_vec(), payload.to_vec());
        Ok(())
    }

    fn clear_reprove(&self, chain: ChainKey, item: &[u8]) -> crate::Result<()> {
        if let Some(markers) = self.state.write().reprove.get_mut(&chain) {
            markers.remove(item);
        }
        Ok(())
    }

    fn list_reprove(
        &self,
        chain: ChainKey,
        limit: usize,
    ) -> crate::Result<Page<(Vec<u8>, Vec<u8>)>> {
        let state = self.state.read();
        let Some(markers) = state.reprove.get(&chain) else {
            return Ok(Page::empty());
        };
        let entries = markers.iter().map(|(k, v)| Ok((k.clone(), v.clone())));
        paginate(entries, limit, |k: &Vec<u8>| k.clone())
    }

    fn put_status(
        &self,
        chain: ChainKey,
        key: &str,
        value: &[u8],
    ) -> crate::Result<()> {
        self.state
            .write()
            .status
            .insert((chain, key.to_owned()), value.to_vec());
        Ok(())
    }

    fn get_status(
        &self,
        chain: ChainKey,
        key: &str,
    ) -> crate::Result<Option<Vec<u8>>> {
        Ok(self
            .state
            .read()
            .status
            .get(&(chain, key.to_owned()))
            .cloned())
    }
}

impl RelayStateTransitions for InMemoryStore {
    fn complete_pending(
        &self,
        chain: ChainKey,
        tx_id: &TxId,
        record: &[u8],
    ) -> crate::Result<()> {
        let mut state = self.state.write();
        state.pending.remove(tx_id.as_bytes());
        state.retry.remove(&RetryKey::new(chain, *tx_id).to_bytes());
        if let Some(markers) = state.reprove.get_mut(&chain) {
            markers.remove(tx_id.as_bytes());
        }
        state.bridge.insert(tx_id.to_string(), record.to_vec());
        Ok(())
    }

    fn move_to_retry(&self, chain: ChainKey, tx_id: &TxId) -> crate::Result<()> {
        let mut state = self.state.write();
        state.pending.remove(tx_id.as_bytes());
        if let Some(markers) = state.reprove.get_mut(&chain) {
            markers.remove(tx_id.as_bytes());
        }
        state.retry.insert(
            RetryKey::new(chain, *tx_id).to_bytes(),
            crate::RETRY_MARKER.to_vec(),
        );
        Ok(())
    }

    fn abandon_pending(&self, chain: ChainKey, tx_id: &TxId) -> crate::Result<()> {
        let mut state = self.state.write();
        state.pending.remove(tx_id.as_bytes());
        state.retry.remove(&RetryKey::new(chain, *tx_id).to_bytes());
        if let Some(markers) = state.reprove.get_mut(&chain) {
            markers.remove(tx_id.as_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::span;

    #[test]
    fn behaves_like_the_durable_store() {
        let store = InMemoryStore::default();
        assert_eq!(store.set_height(ChainKey::Poly, 5).unwrap(), 5);
        assert_eq!(store.set_height(ChainKey::Poly, 3).unwrap(), 5);

        let id = TxId::from_low_u64_be(42);
        store.mark_pending(&id, b"event").unwrap();
        store.move_to_retry(ChainKey::Poly, &id).unwrap();
        let retry = store.list_retry(10).unwrap();
        assert_eq!(
            RetryKey::try_from(retry.items[0].as_slice()).unwrap(),
            RetryKey::new(ChainKey::Poly, id)
        );
        store.complete_pending(ChainKey::Poly, &id, b"done").unwrap();
        assert!(store.list_retry(10).unwrap().is_empty());
        assert!(store.list_pending(10).unwrap().is_empty());

        store.put_span(&span(0, 0, 99)).unwrap();
        store.put_span(&span(1, 100, 199)).unwrap();
        assert!(store.put_span(&span(2, 150, 249)).is_err());
        assert_eq!(store.span_for_block(120).unwrap().unwrap().id, 1);
    }
}
