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

//! 256-bit share/network difficulty targets, built on `uint`'s `construct_uint!` the same way
//! `ii-bitcoin` builds its target type.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uint::construct_uint;

construct_uint! {
    pub struct U256(4);
}

/// A 256-bit threshold: a block hash interpreted as a little-endian integer that is `<=` a
/// target solves a block (network target) or earns a share (per-session job target).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Target(U256);

/// `U256` has no `serde` impl of its own, so `StratumJob`'s `network_target` field is carried
/// over the wire as its big-endian byte representation, the same form `to_be_bytes`/
/// `from_be_bytes` already use for `to_compact`.
impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_be_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <[u8; 32]>::deserialize(deserializer)?;
        Ok(Target::from_be_bytes(bytes))
    }
}

impl Target {
    pub const MAX: Target = Target(U256::MAX);

    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(U256::from_big_endian(&bytes))
    }

    pub fn to_be_bytes(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.0.to_big_endian(&mut out);
        out
    }

    /// Expands a 32-bit compact ("nBits") representation into a full 256-bit target.
    ///
    /// Layout: the high byte is an exponent (in bytes), the low three bytes are the mantissa;
    /// `target = mantissa * 256^(exponent - 3)`, matching Bitcoin's `nBits` encoding.
    pub fn from_compact(bits: u32) -> Self {
        let exponent = (bits >> 24) as u32;
        let mantissa = bits & 0x007f_ffff;

        if exponent <= 3 {
            let mantissa = mantissa >> (8 * (3 - exponent));
            Target(U256::from(mantissa))
        } else {
            Target(U256::from(mantissa) << (8 * (exponent - 3)))
        }
    }

    /// Compresses this target back into the compact ("nBits") representation.
    pub fn to_compact(self) -> u32 {
        let bytes = self.to_be_bytes();
        let first_significant = bytes.iter().position(|&b| b != 0).unwrap_or(32);
        let mut exponent = (32 - first_significant) as u32;

        let mut mantissa: u32 = if first_significant < 32 {
            let mut m = [0u8; 4];
            for (i, byte) in bytes[first_significant..(first_significant + 3).min(32)]
                .iter()
                .enumerate()
            {
                m[i + 1] = *byte;
            }
            u32::from_be_bytes(m)
        } else {
            0
        };

        // If the high bit of the mantissa's top byte is set, it would be interpreted as a sign
        // bit; shift one byte down and bump the exponent to compensate.
        if mantissa & 0x0080_0000 != 0 {
            mantissa >>= 8;
            exponent += 1;
        }

        (exponent << 24) | mantissa
    }

    pub fn is_met_by(self, hash_as_target: Target) -> bool {
        hash_as_target <= self
    }

    /// `self >> shift`, used for the "within 2^10 of network target" high-diff diagnostic.
    pub fn shr(self, shift: u32) -> Self {
        Target(self.0 >> shift)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:064x}", self.0)
    }
}

impl fmt::LowerHex for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:064x}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compact_round_trip_for_typical_difficulty_1_bits() {
        // Bitcoin mainnet's genesis difficulty-1 target.
        let bits = 0x1d00ffffu32;
        let target = Target::from_compact(bits);
        assert_eq!(target.to_compact(), bits);
    }

    #[test]
    fn lower_target_is_harder() {
        let easy = Target::from_compact(0x1d00ffff);
        let hard = Target::from_compact(0x1c00ffff);
        assert!(hard < easy);
    }

    #[test]
    fn shr_reduces_target() {
        let target = Target::from_compact(0x1d00ffff);
        assert!(target.shr(10) < target);
    }
}
