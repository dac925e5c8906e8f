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

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Metrics functionality
pub mod metric;
/// A module used for debugging relayer lifecycle, sync state, or other relayer state.
pub mod probe;
/// Retry functionality
pub mod retry;

/// An enum of all possible errors that could be encountered during the execution of the Polygon
/// Relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error while decoding a hex string.
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    /// HTTP Error
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Sled transaction error.
    #[error(transparent)]
    SledTransaction(
        #[from] sled::transaction::TransactionError<std::io::Error>,
    ),
    /// Reqwest error
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// Prometheus metric registration error.
    #[error(transparent)]
    PrometheusError(#[from] prometheus::Error),
    /// A chain client call failed.
    #[error(transparent)]
    Client(#[from] ClientError),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// The loaded configuration is not usable.
    #[error("Invalid config: {}", _0)]
    InvalidConfig(String),
    /// A transaction id that is not a valid 32 bytes hash.
    #[error("Invalid transaction id: {}", _0)]
    InvalidTxId(String),
    /// A stored value could not be decoded.
    #[error("Corrupted value in partition {partition}: {reason}")]
    CorruptedValue {
        /// The partition (sled tree) that holds the value.
        partition: &'static str,
        /// What went wrong while decoding.
        reason: String,
    },
    /// A span was refused because it would break the span sequence.
    #[error("Span #{id} rejected: {reason}")]
    SpanRejected {
        /// The id of the rejected span.
        id: u64,
        /// Why it was rejected.
        reason: String,
    },
}

impl Error {
    /// Returns true if the error is a transient chain client failure
    /// and the operation that caused it can simply be tried again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Client(e) if e.is_transient())
    }
}

/// Errors returned by the chain adapters (EVM, Poly and Heimdall endpoints).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The endpoint could not be reached.
    #[error("Transport error: {}", _0)]
    Transport(String),
    /// The request did not complete in time.
    #[error("Request timed out")]
    Timeout,
    /// The endpoint answered with an error object.
    #[error("Rpc error {code}: {message}")]
    Rpc {
        /// The JSON-RPC error code.
        code: i64,
        /// The message attached to the error.
        message: String,
    },
    /// The endpoint answered with something we could not decode.
    #[error("Malformed response: {}", _0)]
    Malformed(String),
}

impl ClientError {
    /// Server side JSON-RPC error codes that signal a temporary condition.
    pub const TRANSIENT_RPC_CODES: std::ops::RangeInclusive<i64> =
        -32099..=-32000;

    /// Transport failures, timeouts and server side errors are transient,
    /// anything else means the endpoint will not give a better answer later.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(_) | ClientError::Timeout => true,
            ClientError::Rpc { code, .. } => {
                Self::TRANSIENT_RPC_CODES.contains(code)
            }
            ClientError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_decode() {
            ClientError::Malformed(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

/// Outcome of a failed proof submission.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The destination refused the submission for now, it may succeed later.
    #[error("Submission failed, will retry: {}", _0)]
    Retryable(String),
    /// The destination refused the submission for good.
    #[error("Submission rejected: {}", _0)]
    Permanent(String),
    /// The call itself failed, so the outcome is unknown.
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl SubmitError {
    /// Whether the item should be parked in the retry set instead of being dropped.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SubmitError::Permanent(_))
    }
}

/// A type alias for the result for polygon relayer, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for HandlerError {
    fn from(value: Error) -> Self {
        HandlerError(StatusCode::INTERNAL_SERVER_ERROR, value.to_string())
    }
}

/// Error type for HTTP handlers
pub struct HandlerError(
    /// HTTP status code for response
    pub StatusCode,
    /// Response message
    pub String,
);

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_classification() {
        assert!(ClientError::Timeout.is_transient());
        assert!(ClientError::Transport("refused".into()).is_transient());
        assert!(ClientError::Rpc {
            code: -32000,
            message: "busy".into()
        }
        .is_transient());
        assert!(!ClientError::Rpc {
            code: -32602,
            message: "invalid params".into()
        }
        .is_transient());
        assert!(!ClientError::Malformed("eof".into()).is_transient());

        let err = Error::from(ClientError::Timeout);
        assert!(err.is_transient());
        assert!(!Error::Generic("boom").is_transient());
    }

    #[test]
    fn submit_error_classification() {
        assert!(SubmitError::Retryable("nonce".into()).is_retryable());
        assert!(SubmitError::Client(ClientError::Timeout).is_retryable());
        assert!(!SubmitError::Permanent("bad proof".into()).is_retryable());
    }
}
