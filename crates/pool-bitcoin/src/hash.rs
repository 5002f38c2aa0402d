// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The double-SHA256 digest type used for previous-block hashes, merkle roots and merkle branch
//! entries, plus the folding algorithm that turns a coinbase hash and a merkle branch into a
//! merkle root.

use bitcoin_hashes::{sha256d, Hash as _};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A double-SHA256 digest, stored in the same internal byte order `bitcoin_hashes` produces it
/// in (i.e. *not* the reversed, human-readable order block explorers print).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DHash(pub [u8; 32]);

impl DHash {
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Double-SHA256 of `data`.
    pub fn hash(data: &[u8]) -> Self {
        let digest = sha256d::Hash::hash(data);
        Self(digest.to_byte_array())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Interprets the digest as a little-endian 256-bit integer, as required when comparing a
    /// block hash against a target ("interpreted as a little-endian 256-bit integer").
    pub fn into_target_le(self) -> crate::target::Target {
        let mut le = self.0;
        le.reverse();
        crate::target::Target::from_be_bytes(le)
    }

    /// Hex string in reversed ("display") byte order, the form used for `prevHashBeStr` and for
    /// logging block hashes.
    pub fn to_be_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }

    pub fn from_be_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        bytes.reverse();
        Ok(Self(bytes))
    }
}

impl fmt::Debug for DHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DHash({})", self.to_be_hex())
    }
}

impl fmt::Display for DHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_be_hex())
    }
}

/// Folds a coinbase hash through an ordered merkle branch: `hash = dSHA256(hash || step)` for
/// each `step`, starting from `hash = dSHA256(coinbase)`.
pub fn merkle_root(coinbase: &[u8], branch: &[DHash]) -> DHash {
    let mut hash = DHash::hash(coinbase);
    for step in branch {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&hash.0);
        buf.extend_from_slice(&step.0);
        hash = DHash::hash(&buf);
    }
    hash
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn merkle_root_with_empty_branch_is_coinbase_hash() {
        let coinbase = b"deadbeef coinbase bytes";
        assert_eq!(merkle_root(coinbase, &[]), DHash::hash(coinbase));
    }

    #[test]
    fn merkle_root_folds_branch_in_order() {
        let coinbase = b"coinbase";
        let step1 = DHash::hash(b"step1");
        let step2 = DHash::hash(b"step2");

        let expected = {
            let mut h = DHash::hash(coinbase);
            let mut buf = Vec::new();
            buf.extend_from_slice(&h.0);
            buf.extend_from_slice(&step1.0);
            h = DHash::hash(&buf);
            buf.clear();
            buf.extend_from_slice(&h.0);
            buf.extend_from_slice(&step2.0);
            DHash::hash(&buf)
        };

        assert_eq!(merkle_root(coinbase, &[step1, step2]), expected);
    }

    #[test]
    fn be_hex_round_trips() {
        let original = DHash::hash(b"round trip me");
        let hex = original.to_be_hex();
        assert_eq!(DHash::from_be_hex(&hex).unwrap(), original);
    }
}
