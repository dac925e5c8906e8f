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

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use polygon_relayer_types::{ChainKey, RetryKey, Span, TxId};
use polygon_relayer_utils::probe;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::Transactional;

use super::{
    check_span_fits, decode_u64, paginate, partition, BridgeTxStore,
    ChainStatusStore, HeightStore, Page, PendingProofStore,
    RelayStateTransitions, RetryStore, SpanInsert, SpanStore, RETRY_MARKER,
};

type TxResult<T = ()> = Result<T, ConflictableTransactionError<std::io::Error>>;

/// Key of the chain height inside a chain state partition.
const CHAIN_HEIGHT_KEY: &[u8] = b"height";

/// SledStore keeps the relayer state in a [Sled](https://sled.rs)-based database,
/// one sled tree per partition.
///
/// All mutations are serialized through a single write lock, readers share
/// the read side, so a scan never observes half of a state transition.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    lock: Arc<RwLock<()>>,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Opens (or creates) the store at `path`, creating every partition.
    ///
    /// Missing parent directories are created.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        std::fs::create_dir_all(path.as_ref())?;
        let db = sled::Config::new()
            .path(path)
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Self::with_db(db)
    }

    /// Creates a store that is deleted once the last handle is dropped.
    pub fn temporary() -> crate::Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db)
    }

    fn with_db(db: sled::Db) -> crate::Result<Self> {
        for name in partition::FIXED {
            db.open_tree(name)?;
        }
        for chain in ChainKey::ALL {
            db.open_tree(chain.state_partition())?;
            db.open_tree(chain.reprove_partition())?;
            db.open_tree(chain.status_partition())?;
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Store,
            recovered = db.was_recovered(),
        );
        Ok(Self {
            db,
            lock: Arc::new(RwLock::new(())),
        })
    }

    /// Gets the total amount of data stored on disk
    pub fn get_data_stored_size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }

    /// Makes every write so far durable.
    pub fn flush(&self) -> crate::Result<usize> {
        Ok(self.db.flush()?)
    }

    fn tree(&self, name: impl AsRef<[u8]>) -> crate::Result<sled::Tree> {
        Ok(self.db.open_tree(name)?)
    }

    fn decode_span(bytes: &[u8]) -> crate::Result<Span> {
        serde_json::from_slice(bytes).map_err(|e| {
            crate::Error::CorruptedValue {
                partition: partition::SPAN,
                reason: e.to_string(),
            }
        })
    }

    fn span_at(&self, tree: &sled::Tree, id: u64) -> crate::Result<Option<Span>> {
        tree.get(id.to_be_bytes())?
            .map(|v| Self::decode_span(&v))
            .transpose()
    }

    fn range_after(
        tree: &sled::Tree,
        after: Option<&[u8]>,
    ) -> sled::Iter {
        match after {
            Some(key) => tree.range::<Vec<u8>, _>((
                Bound::Excluded(key.to_vec()),
                Bound::Unbounded,
            )),
            None => tree.iter(),
        }
    }

    /// Applies `f` to the pending, retry, in-flight and bridge partitions
    /// in one sled transaction, then flushes.
    fn transition<F>(&self, chain: ChainKey, f: F) -> crate::Result<()>
    where
        F: Fn(
            &TransactionalTree,
            &TransactionalTree,
            &TransactionalTree,
            &TransactionalTree,
        ) -> TxResult,
    {
        let _guard = self.lock.write();
        let check = self.tree(partition::CHECK)?;
        let retry = self.tree(partition::RETRY)?;
        let reprove = self.tree(chain.reprove_partition())?;
        let bridge = self.tree(partition::BRIDGE_TRANSACTIONS)?;
        (&check, &retry, &reprove, &bridge).transaction(
            |(check, retry, reprove, bridge)| f(check, retry, reprove, bridge),
        )?;
        self.db.flush()?;
        Ok(())
    }
}

impl HeightStore for SledStore {
    #[tracing::instrument(skip(self))]
    fn get_height(&self, key: ChainKey) -> crate::Result<Option<u64>> {
        let _guard = self.lock.read();
        let tree = self.tree(partition::HEIGHT)?;
        tree.get(key.cursor_name())?
            .map(|v| decode_u64(partition::HEIGHT, &v))
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    fn set_height(&self, key: ChainKey, height: u64) -> crate::Result<u64> {
        let _guard = self.lock.write();
        let tree = self.tree(partition::HEIGHT)?;
        let current = tree
            .get(key.cursor_name())?
            .map(|v| decode_u64(partition::HEIGHT, &v))
            .transpose()?;
        match current {
            Some(current) if current > height => {
                tracing::warn!(
                    "Ignoring {} going backwards from #{} to #{}",
                    key.cursor_name(),
                    current,
                    height
                );
                Ok(current)
            }
            _ => {
                tree.insert(key.cursor_name(), &height.to_be_bytes())?;
                self.db.flush()?;
                Ok(height)
            }
        }
    }

    #[tracing::instrument(skip(self))]
    fn force_height(
        &self,
        key: ChainKey,
        height: u64,
    ) -> crate::Result<Option<u64>> {
        let _guard = self.lock.write();
        let tree = self.tree(partition::HEIGHT)?;
        let old = tree.insert(key.cursor_name(), &height.to_be_bytes())?;
        self.db.flush()?;
        old.map(|v| decode_u64(partition::HEIGHT, &v)).transpose()
    }
}

impl PendingProofStore for SledStore {
    #[tracing::instrument(skip(self, payload))]
    fn mark_pending(&self, tx_id: &TxId, payload: &[u8]) -> crate::Result<()> {
        let _guard = self.lock.write();
        let tree = self.tree(partition::CHECK)?;
        tree.insert(tx_id.as_bytes(), payload)?;
        self.db.flush()?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn clear_pending(&self, tx_id: &TxId) -> crate::Result<()> {
        let _guard = self.lock.write();
        let tree = self.tree(partition::CHECK)?;
        tree.remove(tx_id.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    fn get_pending(&self, tx_id: &TxId) -> crate::Result<Option<Vec<u8>>> {
        let _guard = self.lock.read();
        let tree = self.tree(partition::CHECK)?;
        Ok(tree.get(tx_id.as_bytes())?.map(|v| v.to_vec()))
    }

    fn list_pending_after(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> crate::Result<Page<(TxId, Vec<u8>)>> {
        let _guard = self.lock.read();
        let tree = self.tree(partition::CHECK)?;
        let entries = Self::range_after(&tree, after).map(|entry| -> crate::Result<_> {
            let (k, v) = entry?;
            Ok((TxId::try_from(k.as_ref())?, v.to_vec()))
        });
        paginate(entries, limit, |k: &TxId| k.as_bytes().to_vec())
    }
}

impl RetryStore for SledStore {
    #[tracing::instrument(skip(self))]
    fn enqueue_retry(&self, item: &[u8]) -> crate::Result<()> {
        let _guard = self.lock.write();
        let tree = self.tree(partition::RETRY)?;
        tree.insert(item, RETRY_MARKER)?;
        self.db.flush()?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn dequeue_retry(&self, item: &[u8]) -> crate::Result<bool> {
        let _guard = self.lock.write();
        let tree = self.tree(partition::RETRY)?;
        let existed = tree.remove(item)?.is_some();
        self.db.flush()?;
        Ok(existed)
    }

    fn has_retry(&self, item: &[u8]) -> crate::Result<bool> {
        let _guard = self.lock.read();
        let tree = self.tree(partition::RETRY)?;
        Ok(tree.contains_key(item)?)
    }

    fn list_retry_after(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> crate::Result<Page<Vec<u8>>> {
        let _guard = self.lock.read();
        let tree = self.tree(partition::RETRY)?;
        let entries = Self::range_after(&tree, after).map(|entry| -> crate::Result<_> {
            let (k, _) = entry?;
            Ok((k.to_vec(), ()))
        });
        let page = paginate(entries, limit, |k: &Vec<u8>| k.clone())?;
        Ok(Page {
            items: page.items.into_iter().map(|(k, _)| k).collect(),
            next: page.next,
        })
    }
}

impl SpanStore for SledStore {
    #[tracing::instrument(skip(self, span), fields(id = span.id))]
    fn put_span(&self, span: &Span) -> crate::Result<SpanInsert> {
        let _guard = self.lock.write();
        let spans = self.tree(partition::SPAN)?;
        let index = self.tree(partition::SPAN_START_INDEX)?;
        let id_key = span.id.to_be_bytes();

        if let Some(existing) = self.span_at(&spans, span.id)? {
            if existing == *span {
                return Ok(SpanInsert::AlreadyPresent);
            }
            return Err(crate::Error::SpanRejected {
                id: span.id,
                reason: format!("differs from the stored {existing}"),
            });
        }

        let prev = match spans.range(..id_key).next_back() {
            Some(entry) => Some(Self::decode_span(&entry?.1)?),
            None => None,
        };
        let next = match spans
            .range::<[u8; 8], _>((Bound::Excluded(id_key), Bound::Unbounded))
            .next()
        {
            Some(entry) => Some(Self::decode_span(&entry?.1)?),
            None => None,
        };
        check_span_fits(span, prev.as_ref(), next.as_ref())?;

        let value = serde_json::to_vec(span)?;
        let start_key = span.start_block.to_be_bytes();
        (&spans, &index).transaction(
            |(spans, index)| -> TxResult {
                spans.insert(&id_key[..], value.as_slice())?;
                index.insert(&start_key[..], &id_key[..])?;
                Ok(())
            },
        )?;
        self.db.flush()?;
        Ok(SpanInsert::Inserted)
    }

    fn get_span(&self, id: u64) -> crate::Result<Option<Span>> {
        let _guard = self.lock.read();
        let spans = self.tree(partition::SPAN)?;
        self.span_at(&spans, id)
    }

    fn latest_span(&self) -> crate::Result<Option<Span>> {
        let _guard = self.lock.read();
        let spans = self.tree(partition::SPAN)?;
        spans.last()?.map(|(_, v)| Self::decode_span(&v)).transpose()
    }

    fn span_for_block(&self, block: u64) -> crate::Result<Option<Span>> {
        let _guard = self.lock.read();
        let spans = self.tree(partition::SPAN)?;
        let index = self.tree(partition::SPAN_START_INDEX)?;
        let Some(entry) = index.range(..=block.to_be_bytes()).next_back() else {
            return Ok(None);
        };
        let (_, id) = entry?;
        let id = decode_u64(partition::SPAN_START_INDEX, &id)?;
        let span = self.span_at(&spans, id)?;
        Ok(span.filter(|s| s.contains(block)))
    }

    fn get_spans_in_range(&self, from: u64, to: u64) -> crate::Result<Vec<Span>> {
        if from > to {
            return Ok(Vec::new());
        }
        let _guard = self.lock.read();
        let spans = self.tree(partition::SPAN)?;
        let index = self.tree(partition::SPAN_START_INDEX)?;
        // the span containing `from` may start before it
        let first = match index.range(..=from.to_be_bytes()).next_back() {
            Some(entry) => entry?.0.to_vec(),
            None => from.to_be_bytes().to_vec(),
        };
        let mut out = Vec::new();
        for entry in index.range(first..) {
            let (start, id) = entry?;
            if decode_u64(partition::SPAN_START_INDEX, &start)? > to {
                break;
            }
            let id = decode_u64(partition::SPAN_START_INDEX, &id)?;
            if let Some(span) = self.span_at(&spans, id)? {
                if span.overlaps(from, to) {
                    out.push(span);
                }
            }
        }
        Ok(out)
    }
}

impl BridgeTxStore for SledStore {
    #[tracing::instrument(skip(self, record))]
    fn put_bridge_tx(&self, tx_id: &str, record: &[u8]) -> crate::Result<()> {
        let _guard = self.lock.write();
        let tree = self.tree(partition::BRIDGE_TRANSACTIONS)?;
        tree.insert(tx_id, record)?;
        self.db.flush()?;
        Ok(())
    }

    fn get_bridge_tx(&self, tx_id: &str) -> crate::Result<Option<Vec<u8>>> {
        let _guard = self.lock.read();
        let tree = self.tree(partition::BRIDGE_TRANSACTIONS)?;
        Ok(tree.get(tx_id)?.map(|v| v.to_vec()))
    }

    #[tracing::instrument(skip(self))]
    fn delete_bridge_tx(&self, tx_id: &str) -> crate::Result<()> {
        let _guard = self.lock.write();
        let tree = self.tree(partition::BRIDGE_TRANSACTIONS)?;
        tree.remove(tx_id)?;
        self.db.flush()?;
        Ok(())
    }

    fn list_bridge_tx_after(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> crate::Result<Page<(String, Vec<u8>)>> {
        let _guard = self.lock.read();
        let tree = self.tree(partition::BRIDGE_TRANSACTIONS)?;
        let entries = Self::range_after(&tree, after).map(|entry| -> crate::Result<_> {
            let (k, v) = entry?;
            let key = String::from_utf8(k.to_vec()).map_err(|e| {
                crate::Error::CorruptedValue {
                    partition: partition::BRIDGE_TRANSACTIONS,
                    reason: e.to_string(),
                }
            })?;
            Ok((key, v.to_vec()))
        });
        paginate(entries, limit, |k: &String| k.as_bytes().to_vec())
    }
}

impl ChainStatusStore for SledStore {
    fn get_chain_height(&self, chain: ChainKey) -> crate::Result<Option<u64>> {
        let _guard = self.lock.read();
        let tree = self.tree(chain.state_partition())?;
        tree.get(CHAIN_HEIGHT_KEY)?
            .map(|v| decode_u64("chain_state", &v))
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    fn set_chain_height(&self, chain: ChainKey, height: u64) -> crate::Result<()> {
        let _guard = self.lock.write();
        let tree = self.tree(chain.state_partition())?;
        tree.insert(CHAIN_HEIGHT_KEY, &height.to_be_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    #[tracing::instrument(skip(self, payload))]
    fn put_reprove(
        &self,
        chain: ChainKey,
        item: &[u8],
        payload: &[u8],
    ) -> crate::Result<()> {
        let _guard = self.lock.write();
        let tree = self.tree(chain.reprove_partition())?;
        tree.insert(item, payload)?;
        self.db.flush()?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn clear_reprove(&self, chain: ChainKey, item: &[u8]) -> crate::Result<()> {
        let _guard = self.lock.write();
        let tree = self.tree(chain.reprove_partition())?;
        tree.remove(item)?;
        self.db.flush()?;
        Ok(())
    }

    fn list_reprove(
        &self,
        chain: ChainKey,
        limit: usize,
    ) -> crate::Result<Page<(Vec<u8>, Vec<u8>)>> {
        let _guard = self.lock.read();
        let tree = self.tree(chain.reprove_partition())?;
        let entries = tree.iter().map(|entry| -> crate::Result<_> {
            let (k, v) = entry?;
            Ok((k.to_vec(), v.to_vec()))
        });
        paginate(entries, limit, |k: &Vec<u8>| k.clone())
    }

    fn put_status(
        &self,
        chain: ChainKey,
        key: &str,
        value: &[u8],
    ) -> crate::Result<()> {
        let _guard = self.lock.write();
        let tree = self.tree(chain.status_partition())?;
        tree.insert(key, value)?;
        self.db.flush()?;
        Ok(())
    }

    fn get_status(
        &self,
        chain: ChainKey,
        key: &str,
    ) -> crate::Result<Option<Vec<u8>>> {
        let _guard = self.lock.read();
        let tree = self.tree(chain.status_partition())?;
        Ok(tree.get(key)?.map(|v| v.to_vec()))
    }
}

impl RelayStateTransitions for SledStore {
    #[tracing::instrument(skip(self, record))]
    fn complete_pending(
        &self,
        chain: ChainKey,
        tx_id: &TxId,
        record: &[u8],
    ) -> crate::Result<()> {
        let key = tx_id.as_bytes();
        let retry_key = RetryKey::new(chain, *tx_id).to_bytes();
        let bridge_key = tx_id.to_string();
        self.transition(chain, |check, retry, reprove, bridge| {
            check.remove(key)?;
            retry.remove(retry_key.as_slice())?;
            reprove.remove(key)?;
            bridge.insert(bridge_key.as_bytes(), record)?;
            Ok(())
        })
    }

    #[tracing::instrument(skip(self))]
    fn move_to_retry(&self, chain: ChainKey, tx_id: &TxId) -> crate::Result<()> {
        let key = tx_id.as_bytes();
        let retry_key = RetryKey::new(chain, *tx_id).to_bytes();
        self.transition(chain, |check, retry, reprove, _| {
            check.remove(key)?;
            reprove.remove(key)?;
            retry.insert(retry_key.as_slice(), RETRY_MARKER)?;
            Ok(())
        })
    }

    #[tracing::instrument(skip(self))]
    fn abandon_pending(&self, chain: ChainKey, tx_id: &TxId) -> crate::Result<()> {
        let key = tx_id.as_bytes();
        let retry_key = RetryKey::new(chain, *tx_id).to_bytes();
        self.transition(chain, |check, retry, reprove, _| {
            check.remove(key)?;
            retry.remove(retry_key.as_slice())?;
            reprove.remove(key)?;
            Ok(())
        })
    }
}
