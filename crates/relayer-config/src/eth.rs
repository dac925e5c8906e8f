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

/// EthConfig is the configuration of the EVM sidechain (Bor).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EthConfig {
    /// Chain id of the sidechain, as registered on Poly.
    pub side_chain_id: u64,
    /// Http(s) endpoint of the chain adapter.
    pub rpc_url: RpcUrl,
    /// Address of the cross chain manager contract.
    #[serde(default)]
    pub eccm_contract_address: String,
    /// Address of the cross chain data contract.
    #[serde(default)]
    pub eccd_contract_address: String,
    /// Height to start scanning from when no cursor is stored yet.
    #[serde(default)]
    pub start_height: Option<u64>,
    /// Height to restart scanning from, even if a cursor is stored.
    #[serde(default)]
    pub force_start_height: Option<u64>,
    /// Blocks that must be built on top of a block before it is scanned.
    #[serde(default = "defaults::eth_block_confirmations")]
    pub block_confirmations: u64,
    /// Blocks scanned per step.
    #[serde(default = "defaults::headers_per_batch")]
    pub headers_per_batch: u64,
    /// Polling interval in milliseconds.
    #[serde(default = "defaults::monitor_interval")]
    pub monitor_interval: u64,
}

impl EthConfig {
    /// The polling interval as a [`Duration`].
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval)
    }
}
