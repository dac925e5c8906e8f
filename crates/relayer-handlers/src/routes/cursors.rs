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

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use polygon_relayer_context::RelayerContext;
use polygon_relayer_store::{ChainStatusStore, HeightStore};
use polygon_relayer_types::ChainKey;
use polygon_relayer_utils::HandlerError;

/// Cursors response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorsResponse {
    /// Last fully processed height (or span id) of every cursor.
    cursors: BTreeMap<&'static str, Option<u64>>,
    /// Last tip height seen on every chain.
    chain_heights: BTreeMap<ChainKey, Option<u64>>,
}

/// Handles cursor requests
///
/// Returns where every monitor stands, next to the chain tips they saw.
pub async fn handle_cursors(
    State(ctx): State<Arc<RelayerContext>>,
) -> Result<Json<CursorsResponse>, HandlerError> {
    let store = ctx.store();
    let mut cursors = BTreeMap::new();
    let mut chain_heights = BTreeMap::new();
    for chain in ChainKey::ALL {
        cursors.insert(chain.cursor_name(), store.get_height(chain)?);
        chain_heights.insert(chain, store.get_chain_height(chain)?);
    }
    Ok(Json(CursorsResponse {
        cursors,
        chain_heights,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::tests::context;

    #[tokio::test]
    async fn reports_every_cursor() {
        let ctx = context();
        ctx.store().set_height(ChainKey::Eth, 42).unwrap();
        ctx.store().set_chain_height(ChainKey::Eth, 60).unwrap();
        let Json(response) =
            handle_cursors(State(Arc::new(ctx))).await.ok().unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["cursors"]["eth_height"], 42);
        assert!(json["cursors"]["poly_height"].is_null());
        assert!(json["cursors"]["span_history"].is_null());
        assert_eq!(json["chainHeights"]["eth"], 60);
    }
}
