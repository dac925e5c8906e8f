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

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// The chains the relayer keeps state for.
#[derive(
    Debug,
    Display,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ChainKey {
    /// The EVM sidechain (Bor), where deposits originate.
    #[display(fmt = "eth")]
    Eth,
    /// The Poly relay chain.
    #[display(fmt = "poly")]
    Poly,
    /// Heimdall, the validator layer publishing spans.
    #[display(fmt = "heimdall")]
    Heimdall,
}

impl ChainKey {
    /// All the chain keys, in tag order.
    pub const ALL: [ChainKey; 3] =
        [ChainKey::Eth, ChainKey::Poly, ChainKey::Heimdall];

    /// Name of the scan cursor kept for this chain.
    ///
    /// The Heimdall cursor is the id of the last backfilled span rather
    /// than a block height.
    pub fn cursor_name(&self) -> &'static str {
        match self {
            ChainKey::Eth => "eth_height",
            ChainKey::Poly => "poly_height",
            ChainKey::Heimdall => "span_history",
        }
    }

    /// One byte tag, used to namespace keys that are shared by chains.
    pub fn tag(&self) -> u8 {
        match self {
            ChainKey::Eth => 1,
            ChainKey::Poly => 2,
            ChainKey::Heimdall => 3,
        }
    }

    /// Reverse of [`ChainKey::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }

    /// Name of the partition holding chain level state (the chain height).
    pub fn state_partition(&self) -> String {
        format!("{self}_state")
    }

    /// Name of the partition holding in-flight submission markers.
    pub fn reprove_partition(&self) -> String {
        format!("{self}_reprove")
    }

    /// Name of the partition holding free-form status flags.
    pub fn status_partition(&self) -> String {
        format!("{self}_status")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_and_names_are_stable() {
        for chain in ChainKey::ALL {
            assert_eq!(ChainKey::from_tag(chain.tag()), Some(chain));
        }
        assert_eq!(ChainKey::from_tag(0), None);
        assert_eq!(ChainKey::Eth.cursor_name(), "eth_height");
        assert_eq!(ChainKey::Poly.reprove_partition(), "poly_reprove");
        assert_eq!(ChainKey::Heimdall.status_partition(), "heimdall_status");
    }
}
