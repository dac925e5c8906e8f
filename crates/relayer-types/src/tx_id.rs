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
use std::str::FromStr;

use polygon_relayer_utils::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A transaction identifier, the 32 bytes hash of the source transaction.
///
/// The raw bytes are the canonical binary form used as a store key, the
/// `0x` prefixed lowercase hex string is the canonical text form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TxId([u8; 32]);

impl TxId {
    /// Length of the binary form.
    pub const LEN: usize = 32;

    /// Wraps the raw hash bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The canonical binary form.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Builds an id from a number, big-endian in the low bytes.
    /// Mostly useful for fixtures.
    pub fn from_low_u64_be(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for TxId {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 32] = value.try_into().map_err(|_| {
            Error::InvalidTxId(format!(
                "expected {} bytes, got {}",
                Self::LEN,
                value.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

/// Parses a hex string, with or without the `0x` prefix.
///
/// Shorter hashes are left padded with zeros, so `0xabcd` and
/// `0x000..0abcd` name the same transaction.
impl FromStr for TxId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.is_empty() || digits.len() > Self::LEN * 2 {
            return Err(Error::InvalidTxId(s.to_owned()));
        }
        let padded = format!("{digits:0>64}");
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(padded, &mut bytes)
            .map_err(|_| Error::InvalidTxId(s.to_owned()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({self})")
    }
}

impl Serialize for TxId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hashes_are_left_padded() {
        let short: TxId = "0xABCD".parse().unwrap();
        let long: TxId = format!("0x{:0>64}", "abcd").parse().unwrap();
        assert_eq!(short, long);
        assert_eq!(short, TxId::from_low_u64_be(0xabcd));
        assert_eq!(
            short.to_string(),
            "0x000000000000000000000000000000000000000000000000000000000000abcd"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!("0x".parse::<TxId>().is_err());
        assert!("0xzz".parse::<TxId>().is_err());
        assert!(format!("0x{}", "1".repeat(65)).parse::<TxId>().is_err());
        assert!(TxId::try_from(&[1u8, 2, 3][..]).is_err());
    }

    #[test]
    fn serializes_as_hex_string() {
        let id = TxId::from_low_u64_be(1);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: TxId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
