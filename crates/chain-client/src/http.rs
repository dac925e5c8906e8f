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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use polygon_relayer_types::rpc_url::RpcUrl;
use polygon_relayer_types::{
    ChainKey, DepositEvent, Proof, ProofStatus, Span, SubmitReceipt, TxId,
};
use polygon_relayer_utils::retry::{classify, ConstantWithMaxRetryCount};
use polygon_relayer_utils::{ClientError, SubmitError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ChainClient, ProofClient, SpanClient};

/// How many times a transient failure is retried inside a single call,
/// before it is handed back to the task.
const MAX_RETRIES: usize = 3;
const RETRY_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum SubmitResponse {
    Submitted { hash: String },
    Retryable { reason: String },
    Rejected { reason: String },
}

/// Turns a raw JSON-RPC response body into the expected result.
///
/// A `null` or missing result decodes as `Value::Null`, so methods that
/// may return nothing can ask for an `Option<T>`.
fn decode_response<R: DeserializeOwned>(body: &[u8]) -> Result<R, ClientError> {
    let response: JsonRpcResponse = serde_json::from_slice(body)
        .map_err(|e| ClientError::Malformed(e.to_string()))?;
    if let Some(error) = response.error {
        return Err(ClientError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    serde_json::from_value(response.result.unwrap_or(Value::Null))
        .map_err(|e| ClientError::Malformed(e.to_string()))
}

/// A chain client that talks to a relayer adapter over JSON-RPC 2.0.
///
/// The same adapter answers the scanning, proof and span methods; which of
/// them are used depends on the task the client is handed to.
#[derive(Clone)]
pub struct HttpChainClient {
    chain: ChainKey,
    url: RpcUrl,
    http: reqwest::Client,
    request_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for HttpChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChainClient")
            .field("chain", &self.chain)
            .field("url", &self.url)
            .finish()
    }
}

impl HttpChainClient {
    /// Creates a client for `chain`, every request is bounded by `timeout`.
    pub fn new(
        chain: ChainKey,
        url: RpcUrl,
        timeout: Duration,
    ) -> polygon_relayer_utils::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            chain,
            url,
            http,
            request_id: Arc::new(AtomicU64::new(1)),
        })
    }

    async fn call_once<R: DeserializeOwned>(
        &self,
        method: &str,
        params: &Value,
    ) -> Result<R, ClientError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::SeqCst),
            method,
            params,
        };
        let response = self
            .http
            .post(self.url.as_url().clone())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(ClientError::Transport(format!("http status {status}")));
        }
        let body = response.bytes().await?;
        decode_response(&body)
    }

    #[tracing::instrument(skip(self, params), fields(chain = %self.chain))]
    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, ClientError> {
        let backoff = ConstantWithMaxRetryCount::new(RETRY_INTERVAL, MAX_RETRIES);
        backoff::future::retry(backoff, || async {
            self.call_once(method, &params).await.map_err(|e| {
                if e.is_transient() {
                    tracing::debug!("{} failed, retrying: {}", method, e);
                }
                classify(e)
            })
        })
        .await
    }
}

#[async_trait::async_trait]
impl ChainClient for HttpChainClient {
    fn chain(&self) -> ChainKey {
        self.chain
    }

    async fn latest_height(&self) -> Result<u64, ClientError> {
        self.call("relayer_latestHeight", Value::Array(vec![])).await
    }

    async fn events_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<DepositEvent>, ClientError> {
        self.call("relayer_eventsInRange", serde_json::json!([from, to]))
            .await
    }
}

#[async_trait::async_trait]
impl ProofClient for HttpChainClient {
    async fn proof(&self, tx_id: &TxId) -> Result<ProofStatus, ClientError> {
        self.call("relayer_getProof", serde_json::json!([tx_id]))
            .await
    }

    async fn submit(&self, proof: &Proof) -> Result<SubmitReceipt, SubmitError> {
        let response: SubmitResponse = self
            .call("relayer_submit", serde_json::json!([proof]))
            .await?;
        match response {
            SubmitResponse::Submitted { hash } => Ok(SubmitReceipt { hash }),
            SubmitResponse::Retryable { reason } => {
                Err(SubmitError::Retryable(reason))
            }
            SubmitResponse::Rejected { reason } => {
                Err(SubmitError::Permanent(reason))
            }
        }
    }

    async fn is_relayed(&self, tx_id: &TxId) -> Result<bool, ClientError> {
        self.call("relayer_isRelayed", serde_json::json!([tx_id]))
            .await
    }
}

#[async_trait::async_trait]
impl SpanClient for HttpChainClient {
    async fn latest_span(&self) -> Result<Span, ClientError> {
        self.call("heimdall_latestSpan", Value::Array(vec![])).await
    }

    async fn span(&self, id: u64) -> Result<Option<Span>, ClientError> {
        self.call("heimdall_span", serde_json::json!([id])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_results_and_errors() {
        let height: u64 =
            decode_response(br#"{"jsonrpc":"2.0","id":1,"result":42}"#).unwrap();
        assert_eq!(height, 42);

        let span: Option<Span> =
            decode_response(br#"{"jsonrpc":"2.0","id":2,"result":null}"#)
                .unwrap();
        assert!(span.is_none());

        let busy = decode_response::<u64>(
            br#"{"jsonrpc":"2.0","id":3,"error":{"code":-32005,"message":"limit exceeded"}}"#,
        )
        .unwrap_err();
        assert!(busy.is_transient());

        let invalid = decode_response::<u64>(
            br#"{"jsonrpc":"2.0","id":4,"error":{"code":-32602,"message":"invalid params"}}"#,
        )
        .unwrap_err();
        assert!(!invalid.is_transient());
    }

    #[test]
    fn undecodable_results_are_fatal() {
        let err = decode_response::<u64>(br#"{"result":"not a number"}"#)
            .unwrap_err();
        assert!(matches!(err, ClientError::Malformed(_)));
        let err = decode_response::<u64>(b"<html>").unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn submit_outcomes() {
        let r: SubmitResponse = decode_response(
            br#"{"result":{"status":"retryable","reason":"nonce too low"}}"#,
        )
        .unwrap();
        assert!(matches!(r, SubmitResponse::Retryable { .. }));
        let r: SubmitResponse = decode_response(
            br#"{"result":{"status":"submitted","hash":"0x01"}}"#,
        )
        .unwrap();
        assert!(matches!(r, SubmitResponse::Submitted { hash } if hash == "0x01"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let client = HttpChainClient::new(
            ChainKey::Eth,
            "http://127.0.0.1:1".parse().unwrap(),
            Duration::from_millis(200),
        )
        .unwrap();
        let err = client.latest_height().await.unwrap_err();
        assert!(err.is_transient(), "{err}");
    }
}
