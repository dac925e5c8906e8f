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

/// HeimdallConfig is the configuration of the span source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HeimdallConfig {
    /// Http(s) endpoint of the Heimdall adapter.
    pub rpc_url: RpcUrl,
    /// Bor chain id the spans are published for.
    pub chain_id: String,
    /// Polling interval of the live span, in milliseconds.
    #[serde(default = "defaults::span_interval")]
    pub span_interval: u64,
    /// First span id backfilled by the history monitor.
    #[serde(default)]
    pub span_start: u64,
    /// Spans fetched per step.
    #[serde(default = "defaults::spans_per_step")]
    pub spans_per_step: u64,
}

impl HeimdallConfig {
    /// The polling interval as a [`Duration`].
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.span_interval)
    }
}
