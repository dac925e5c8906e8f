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
use std::time::Duration;

use polygon_relayer_chain_client::{
    ChainClient, HttpChainClient, ProofClient, SpanClient,
};
use polygon_relayer_config::RelayerConfig;
use polygon_relayer_types::ChainKey;
use polygon_relayer_utils::ClientError;

/// The chain adapters the background tasks talk to.
///
/// The adapter of a source chain scans it and also proves and submits the
/// events found there, so each source chain gets one scanning and one
/// proving handle onto the same adapter.
#[derive(Clone)]
pub struct ChainClients {
    /// Scans the EVM sidechain.
    pub eth: Arc<dyn ChainClient>,
    /// Proves and submits the EVM sidechain deposits.
    pub eth_prover: Arc<dyn ProofClient>,
    /// Scans Poly.
    pub poly: Arc<dyn ChainClient>,
    /// Proves and submits the Poly requests.
    pub poly_prover: Arc<dyn ProofClient>,
    /// Reads the Heimdall spans.
    pub heimdall: Arc<dyn SpanClient>,
}

impl ChainClients {
    /// Builds the handles from one adapter per chain.
    pub fn from_adapters<E, P, H>(
        eth: Arc<E>,
        poly: Arc<P>,
        heimdall: Arc<H>,
    ) -> Self
    where
        E: ChainClient + ProofClient + 'static,
        P: ChainClient + ProofClient + 'static,
        H: SpanClient + 'static,
    {
        Self {
            eth: eth.clone(),
            eth_prover: eth,
            poly: poly.clone(),
            poly_prover: poly,
            heimdall,
        }
    }

    /// Connects to the JSON-RPC adapters configured for every chain.
    pub fn from_config(config: &RelayerConfig) -> crate::Result<Self> {
        let timeout = Duration::from_millis(config.request_timeout);
        let eth = HttpChainClient::new(
            ChainKey::Eth,
            config.eth.rpc_url.clone(),
            timeout,
        )?;
        let poly = HttpChainClient::new(
            ChainKey::Poly,
            config.poly.rpc_url.clone(),
            timeout,
        )?;
        let heimdall = HttpChainClient::new(
            ChainKey::Heimdall,
            config.heimdall.rpc_url.clone(),
            timeout,
        )?;
        Ok(Self::from_adapters(
            Arc::new(eth),
            Arc::new(poly),
            Arc::new(heimdall),
        ))
    }

    /// Makes sure every endpoint answers before any task starts.
    pub async fn check_endpoints(&self) -> crate::Result<()> {
        for client in [&self.eth, &self.poly] {
            let height = client.latest_height().await?;
            tracing::debug!(chain = %client.chain(), height, "endpoint is up");
        }
        match self.heimdall.latest_span().await {
            Ok(span) => tracing::debug!("heimdall is up, live span is {}", span),
            // a node without a published span is still reachable.
            Err(ClientError::Rpc { code, message }) => {
                tracing::warn!("heimdall answered {}: {}", code, message);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
