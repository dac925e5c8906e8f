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

use serde::{Deserialize, Serialize};

use crate::defaults;

/// ProcessorConfig drives the deposit processors and their retry stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProcessorConfig {
    /// Interval between two passes over the pending proofs, in milliseconds.
    #[serde(default = "defaults::processor_interval")]
    pub interval: u64,
    /// Interval between two passes over the retry set, in milliseconds.
    #[serde(default = "defaults::retry_interval")]
    pub retry_interval: u64,
    /// Items handled per pass.
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,
}

impl ProcessorConfig {
    /// The pending proofs polling interval as a [`Duration`].
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    /// The retry set polling interval as a [`Duration`].
    pub fn retry_polling_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval)
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            interval: defaults::processor_interval(),
            retry_interval: defaults::retry_interval(),
            batch_size: defaults::batch_size(),
        }
    }
}
