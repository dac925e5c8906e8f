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

use std::fmt;

use serde::{Deserialize, Serialize};

/// A Heimdall validator, as published inside a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "startEpoch", default)]
    pub start_epoch: u64,
    #[serde(rename = "endEpoch", default)]
    pub end_epoch: u64,
    #[serde(rename = "power")]
    pub voting_power: i64,
    #[serde(rename = "accum", default)]
    pub proposer_priority: i64,
    /// Hex encoded signer address.
    pub signer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidatorSet {
    pub validators: Vec<Validator>,
    #[serde(default)]
    pub proposer: Option<Validator>,
}

impl ValidatorSet {
    /// Sum of the voting power of every validator in the set.
    pub fn total_voting_power(&self) -> i64 {
        self.validators.iter().map(|v| v.voting_power).sum()
    }
}

/// A span: a contiguous, inclusive range of Bor blocks with the
/// validator set and block producers active during that range.
///
/// Spans are serialized with the field names Heimdall uses, so the JSON
/// stored on disk is the same document the span endpoint returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    #[serde(rename = "span_id")]
    pub id: u64,
    pub start_block: u64,
    pub end_block: u64,
    pub validator_set: ValidatorSet,
    pub selected_producers: Vec<Validator>,
    #[serde(rename = "bor_chain_id")]
    pub chain_id: String,
}

impl Span {
    /// Whether `block` is inside this span.
    pub fn contains(&self, block: u64) -> bool {
        self.start_block <= block && block <= self.end_block
    }

    /// Whether this span shares at least one block with `[from, to]`.
    pub fn overlaps(&self, from: u64, to: u64) -> bool {
        self.start_block <= to && from <= self.end_block
    }

    /// Number of blocks covered by the span.
    pub fn len(&self) -> u64 {
        self.end_block
            .saturating_sub(self.start_block)
            .saturating_add(1)
    }

    /// A span always covers at least one block once validated.
    pub fn is_empty(&self) -> bool {
        self.end_block < self.start_block
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Span #{} [{}..={}] on {} ({} producers)",
            self.id,
            self.start_block,
            self.end_block,
            self.chain_id,
            self.selected_producers.len()
        )
    }
}
