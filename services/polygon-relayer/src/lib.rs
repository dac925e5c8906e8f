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

#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # Polygon Relayer Crate 🕸️
//!
//! A crate used to relay cross-chain events between Polygon and the Poly
//! relay chain.
//!
//! ## Overview
//!
//! Deposits made on the Bor sidechain (the "eth" side) and cross-chain
//! requests emitted on Poly must each be proven and submitted to the other
//! side exactly once, whatever happens to the relayer in between. The
//! relayer runs a set of independent background tasks that only agree
//! through the durable store:
//!
//!   1. Chain monitors scan each source chain and record every event as a
//!      pending proof, then advance their height cursor.
//!   2. Span monitors follow the validator spans Heimdall publishes.
//!   3. A deposit processor per chain proves and submits the pending items,
//!      then re-attempts the failed submissions in the same task.
//!
//! A small HTTP API reports the relayed transactions, the cursors and the
//! metrics of the relayer.
//!
//! # Features
//!
//! * `cli`: Builds the `polygon-relayer` binary. By default, this is enabled.
//! * `integration-tests`: Logs in json, for the integration tests. By default, this is disabled.

/// A module for starting long-running tasks.
pub mod service;

pub use polygon_relayer_utils::{Error, Result};
