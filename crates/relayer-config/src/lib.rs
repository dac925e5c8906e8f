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

#![warn(missing_docs)]

//! # Relayer Configuration Module 🕸️
//!
//! A module for configuring the relayer.
//!
//! ## Overview
//!
//! The relayer configuration module is responsible for configuring the relayer.
//! Possible configuration include:
//! * `port`: The port the status API will listen on. Defaults to 9955
//! * `store-path`: Where the durable store lives.
//! * `eth`: The EVM sidechain (Bor) scanned for deposits.
//! * `poly`: The Poly relay chain.
//! * `heimdall`: The Heimdall endpoint publishing spans.
//! * `processor`: How pending proofs and retries are worked off.

/// CLI configuration
#[cfg(feature = "cli")]
pub mod cli;
/// Default values of the optional settings.
pub mod defaults;
/// EVM sidechain configuration
pub mod eth;
/// Heimdall configuration
pub mod heimdall;
/// Poly chain configuration
pub mod poly;
/// Deposit processor configuration
pub mod processor;
/// Utils for processing configuration
pub mod utils;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use eth::EthConfig;
pub use heimdall::HeimdallConfig;
pub use poly::PolyConfig;
pub use processor::ProcessorConfig;

/// RelayerConfig is the configuration for the polygon relayer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerConfig {
    /// Status API port number
    ///
    /// default to 9955
    #[serde(default = "defaults::port", skip_serializing)]
    pub port: u16,
    /// Directory of the durable store.
    ///
    /// defaults to a `store` directory next to the config directory.
    #[serde(default, skip_serializing)]
    pub store_path: Option<PathBuf>,
    /// The EVM sidechain.
    pub eth: EthConfig,
    /// The Poly relay chain.
    pub poly: PolyConfig,
    /// The Heimdall endpoint.
    pub heimdall: HeimdallConfig,
    /// Deposit processing.
    #[serde(default)]
    pub processor: ProcessorConfig,
    /// How often (in ms) the monitors log their sync progress.
    #[serde(default = "defaults::print_progress_interval")]
    pub print_progress_interval: u64,
    /// Timeout (in ms) of a single request to a chain endpoint.
    #[serde(default = "defaults::request_timeout")]
    pub request_timeout: u64,
    /// How long (in ms) the tasks get to stop after a shutdown signal.
    #[serde(default = "defaults::shutdown_grace_period")]
    pub shutdown_grace_period: u64,
}

impl RelayerConfig {
    /// Makes sure that the config is valid, by going
    /// through the whole config and doing some basic checks.
    pub fn verify(&self) -> polygon_relayer_utils::Result<()> {
        let invalid = |reason: String| {
            Err(polygon_relayer_utils::Error::InvalidConfig(reason))
        };
        if self.eth.headers_per_batch == 0 {
            return invalid("eth.headers-per-batch must be at least 1".into());
        }
        if self.poly.blocks_per_batch == 0 {
            return invalid("poly.blocks-per-batch must be at least 1".into());
        }
        if self.processor.batch_size == 0 {
            return invalid("processor.batch-size must be at least 1".into());
        }
        if self.heimdall.spans_per_step == 0 {
            return invalid("heimdall.spans-per-step must be at least 1".into());
        }
        if self.eth.side_chain_id == self.poly.chain_id {
            return invalid(format!(
                "eth.side-chain-id and poly.chain-id are both {}",
                self.eth.side_chain_id
            ));
        }
        if let (Some(start), Some(forced)) =
            (self.eth.start_height, self.eth.force_start_height)
        {
            tracing::warn!(
                "eth.force-start-height ({}) takes precedence over eth.start-height ({})",
                forced,
                start
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RelayerConfig {
        serde_json::from_value(serde_json::json!({
            "eth": { "side-chain-id": 2, "rpc-url": "http://localhost:8545" },
            "poly": { "chain-id": 0, "rpc-url": "http://localhost:20336" },
            "heimdall": {
                "rpc-url": "http://localhost:26657",
                "chain-id": "137"
            }
        }))
        .unwrap()
    }

    #[test]
    fn optional_settings_have_defaults() {
        let config = sample();
        assert_eq!(config.port, 9955);
        assert_eq!(config.print_progress_interval, 7_000);
        assert_eq!(config.eth.block_confirmations, 12);
        assert_eq!(config.poly.block_confirmations, 1);
        assert_eq!(config.processor.batch_size, 100);
        config.verify().unwrap();
    }

    #[test]
    fn rejects_empty_batches_and_clashing_chain_ids() {
        let mut config = sample();
        config.processor.batch_size = 0;
        assert!(config.verify().is_err());

        let mut config = sample();
        config.poly.chain_id = config.eth.side_chain_id;
        assert!(config.verify().is_err());
    }
}
