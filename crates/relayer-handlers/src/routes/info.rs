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

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use polygon_relayer_config::RelayerConfig;
use polygon_relayer_context::RelayerContext;

/// Relayer information response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerInformationResponse {
    /// Version of the running relayer.
    version: &'static str,
    /// The loaded configuration, endpoints credentials redacted.
    #[serde(flatten)]
    config: RelayerConfig,
}

/// Handles relayer information requests
///
/// Returns the relayer version and its configuration.
pub async fn handle_relayer_info(
    State(ctx): State<Arc<RelayerContext>>,
) -> Json<RelayerInformationResponse> {
    Json(RelayerInformationResponse {
        version: env!("CARGO_PKG_VERSION"),
        config: ctx.config.clone(),
    })
}
