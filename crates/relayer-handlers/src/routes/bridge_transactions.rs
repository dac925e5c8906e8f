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

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use polygon_relayer_context::RelayerContext;
use polygon_relayer_store::{BridgeTxStore, MAX_SCAN_ITEMS};
use polygon_relayer_types::{BridgeTransaction, TxId};
use polygon_relayer_utils::HandlerError;

/// Query of a bridge transactions listing.
#[derive(Debug, Default, Deserialize)]
pub struct BridgeTransactionsQuery {
    /// Page size, capped at the store scan limit.
    limit: Option<usize>,
    /// Continue after this transaction id, as returned in `next`.
    after: Option<String>,
}

/// A page of bridge transactions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeTransactionsResponse {
    items: Vec<BridgeTransaction>,
    /// Pass as `after` to get the next page.
    next: Option<String>,
}

fn decode(bytes: &[u8]) -> Result<BridgeTransaction, HandlerError> {
    serde_json::from_slice(bytes).map_err(|e| {
        tracing::error!("corrupted bridge transaction record: {}", e);
        HandlerError(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("corrupted bridge transaction record: {e}"),
        )
    })
}

/// Handles bridge transactions listing
///
/// Returns the completed relays in transaction id order, one page at a time.
pub async fn handle_bridge_transactions(
    State(ctx): State<Arc<RelayerContext>>,
    Query(query): Query<BridgeTransactionsQuery>,
) -> Result<Json<BridgeTransactionsResponse>, HandlerError> {
    let limit = query.limit.unwrap_or(100).min(MAX_SCAN_ITEMS);
    let page = ctx
        .store()
        .list_bridge_tx_after(query.after.as_deref().map(str::as_bytes), limit)?;
    let items = page
        .items
        .iter()
        .map(|(_, bytes)| decode(bytes))
        .collect::<Result<Vec<_>, _>>()?;
    let next = page
        .next
        .map(|key| String::from_utf8_lossy(&key).into_owned());
    Ok(Json(BridgeTransactionsResponse { items, next }))
}

/// Handles the lookup of one bridge transaction.
///
/// # Arguments
///
/// * `tx_id` - The source transaction id, hex encoded.
pub async fn handle_bridge_transaction(
    State(ctx): State<Arc<RelayerContext>>,
    Path(tx_id): Path<String>,
) -> Result<Json<BridgeTransaction>, HandlerError> {
    let tx_id: TxId = tx_id.parse().map_err(|e| {
        HandlerError(StatusCode::BAD_REQUEST, format!("{e}"))
    })?;
    match ctx.store().get_bridge_tx(&tx_id.to_string())? {
        Some(bytes) => Ok(Json(decode(&bytes)?)),
        None => Err(HandlerError(
            StatusCode::NOT_FOUND,
            format!("Bridge transaction {tx_id} not found"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use polygon_relayer_types::{BridgeTxStatus, ChainKey};

    use super::*;
    use crate::routes::tests::context;

    fn store_record(ctx: &RelayerContext, id: u64) {
        let record = BridgeTransaction {
            tx_id: TxId::from_low_u64_be(id),
            source: ChainKey::Eth,
            source_height: Some(id),
            relay_tx_hash: None,
            status: BridgeTxStatus::Submitted,
            updated_at: 0,
        };
        ctx.store()
            .put_bridge_tx(
                &record.tx_id.to_string(),
                &serde_json::to_vec(&record).unwrap(),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn lookup_accepts_short_ids_and_reports_missing_ones() {
        let ctx = Arc::new(context());
        store_record(&ctx, 0xabcd);

        let Json(found) = handle_bridge_transaction(
            State(ctx.clone()),
            Path("0xABCD".to_string()),
        )
        .await
        .ok()
        .unwrap();
        assert_eq!(found.source_height, Some(0xabcd));

        let missing =
            handle_bridge_transaction(State(ctx.clone()), Path("0x01".into()))
                .await
                .err()
                .unwrap();
        assert_eq!(missing.0, StatusCode::NOT_FOUND);

        let bad = handle_bridge_transaction(State(ctx), Path("nope".into()))
            .await
            .err()
            .unwrap();
        assert_eq!(bad.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn listing_is_paged() {
        let ctx = Arc::new(context());
        for id in 1..=3 {
            store_record(&ctx, id);
        }
        let Json(first) = handle_bridge_transactions(
            State(ctx.clone()),
            Query(BridgeTransactionsQuery {
                limit: Some(2),
                after: None,
            }),
        )
        .await
        .ok()
        .unwrap();
        assert_eq!(first.items.len(), 2);
        let next = first.next.clone().unwrap();

        let Json(second) = handle_bridge_transactions(
            State(ctx),
            Query(BridgeTransactionsQuery {
                limit: Some(2),
                after: Some(next),
            }),
        )
        .await
        .ok()
        .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].tx_id, TxId::from_low_u64_be(3));
        assert!(second.next.is_none());
    }
}
