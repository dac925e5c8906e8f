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

use std::time::Duration;

use polygon_relayer_types::rpc_url::RpcUrl;
use serde::{Deserialize, Serialize};

use crate::defaults;

/// PolyConfig is the configuration of the Poly relay chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PolyConfig {
    /// Chain id of Poly itself.
    #[serde(default)]
    pub chain_id: u64,
    /// Http(s) endpoint of the chain adapter.
    pub rpc_url: RpcUrl,
    /// Address of the entrance contract receiving the proofs.
    #[serde(default)]
    pub entrance_contract_address: String,
    /// Height to start scanning from when no cursor is stored yet.
    #[serde(default)]
    pub start_height: Option<u64>,
    /// Blocks that must be built on top of a block before it is scanned.
    #[serde(default = "defaults::poly_block_confirmations")]
    pub block_confirmations: u64,
    /// Blocks scanned per step.
    #[serde(default = "defaults::blocks_per_batch")]
    pub blocks_per_batch: u64,
    /// Polling interval in milliseconds.
    #[serde(default = "defaults::monitor_interval")]
    pub monitor_interval: u64,
}

impl PolyConfig {
    /// The polling interval as a [`Duration`].
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval)
    }
}
